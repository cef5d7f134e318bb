//! Aggregation and rendering of Prometheus text exposition format.
//!
//! Samples observed from one or more upstream sources are merged into an
//! [`Aggregate`] keyed by metric name. Each metric name holds an ordered
//! sequence of [`Definition`]s, one per distinct label set, and each
//! definition keeps a bounded ring of the most recent samples it has seen.
//! Rendering always emits the latest sample of every definition.

use std::collections::{BTreeMap, VecDeque};

use indexmap::IndexMap;
use snafu::ResultExt;

mod line;

pub use line::{escape_label_value, ErrorKind, MetricKind};
use line::{Header, Line};

/// Number of samples retained per definition before the oldest is evicted.
pub const SAMPLE_RING_CAPACITY: usize = 100;

#[derive(Debug, snafu::Snafu, PartialEq)]
pub enum ParserError {
    #[snafu(display("{}, line: `{}`", kind, line))]
    WithLine {
        line: String,
        #[snafu(source)]
        kind: ErrorKind,
    },
}

/// One (timestamp, value) observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub observed_at: i64,
    pub value: f64,
}

/// A single, unique label set under a metric name, with a bounded history
/// of observed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Definition {
    pub labels: BTreeMap<String, String>,
    samples: VecDeque<Sample>,
}

impl Definition {
    fn push(&mut self, sample: Sample) {
        if self.samples.len() >= SAMPLE_RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// The most recently observed sample, if any.
    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    /// All retained samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

/// All definitions observed for a single metric name, plus its HELP/TYPE
/// strings.
#[derive(Debug, Clone, Default)]
pub struct MetricRecord {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    definitions: IndexMap<BTreeMap<String, String>, Definition>,
}

impl Default for MetricKind {
    fn default() -> Self {
        MetricKind::Untyped
    }
}

impl MetricRecord {
    fn new(name: String) -> Self {
        MetricRecord {
            name,
            help: String::new(),
            kind: MetricKind::Untyped,
            definitions: IndexMap::new(),
        }
    }

    fn observe(&mut self, labels: BTreeMap<String, String>, sample: Sample) {
        self.definitions
            .entry(labels.clone())
            .or_insert_with(|| Definition {
                labels,
                samples: VecDeque::with_capacity(SAMPLE_RING_CAPACITY),
            })
            .push(sample);
    }

    /// Definitions in first-observed order.
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }
}

/// A merged set of Prometheus metrics, keyed by metric name, preserving the
/// order in which metric names were first observed.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    records: IndexMap<String, MetricRecord>,
}

impl Aggregate {
    pub fn new() -> Self {
        Aggregate {
            records: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, name: &str) -> Option<&MetricRecord> {
        self.records.get(name)
    }

    /// Metric records in first-observed order.
    pub fn records(&self) -> impl Iterator<Item = &MetricRecord> {
        self.records.values()
    }

    fn record_mut(&mut self, name: &str) -> &mut MetricRecord {
        self.records
            .entry(name.to_owned())
            .or_insert_with(|| MetricRecord::new(name.to_owned()))
    }

    /// Parse `input` as Prometheus text exposition format and merge every
    /// sample into this aggregate, stamping each with `observed_at`.
    ///
    /// `# HELP`/`# TYPE` directives update the named record's metadata even
    /// when no sample line follows on this call; metric lines that appear
    /// before any directive for their name create an untyped record.
    pub fn merge_text(&mut self, input: &str, observed_at: i64) -> Result<(), ParserError> {
        for line in input.lines() {
            let parsed = Line::parse(line).context(WithLineSnafu {
                line: line.to_owned(),
            })?;
            match parsed {
                None => {}
                Some(Line::Header(header)) => self.apply_header(header),
                Some(Line::Metric(metric)) => {
                    let record = self.record_mut(&metric.name);
                    record.observe(
                        metric.labels,
                        Sample {
                            observed_at,
                            value: metric.value,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn apply_header(&mut self, header: Header) {
        let record = self.record_mut(&header.metric_name);
        if header.is_help {
            record.help = header.help_text;
        } else {
            record.kind = header.kind;
        }
    }

    /// Render this aggregate back into Prometheus text exposition format.
    /// Only the latest sample of every definition is emitted.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for record in self.records.values() {
            if !record.help.is_empty() {
                out.push_str("# HELP ");
                out.push_str(&record.name);
                out.push(' ');
                out.push_str(&record.help);
                out.push('\n');
            }
            out.push_str("# TYPE ");
            out.push_str(&record.name);
            out.push(' ');
            out.push_str(record.kind.as_str());
            out.push('\n');

            for definition in record.definitions.values() {
                let Some(sample) = definition.latest() else {
                    continue;
                };
                out.push_str(&record.name);
                if !definition.labels.is_empty() {
                    out.push('{');
                    for (i, (key, value)) in definition.labels.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push_str(key);
                        out.push_str("=\"");
                        out.push_str(&escape_label_value(value));
                        out.push('"');
                    }
                    out.push('}');
                }
                out.push(' ');
                render_value(&mut out, sample.value);
                out.push('\n');
            }
        }
        out
    }
}

fn render_value(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value.is_infinite() {
        out.push_str(if value.is_sign_positive() { "+Inf" } else { "-Inf" });
    } else {
        out.push_str(&value.to_string());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn merges_help_type_and_samples() {
        let input = r#"
# HELP http_requests_total The total number of HTTP requests.
# TYPE http_requests_total counter
http_requests_total{method="post",code="200"} 1027
http_requests_total{method="post",code="400"} 3
"#;
        let mut agg = Aggregate::new();
        agg.merge_text(input, 1000).unwrap();

        assert_eq!(agg.len(), 1);
        let record = agg.get("http_requests_total").unwrap();
        assert_eq!(record.help, "The total number of HTTP requests.");
        assert_eq!(record.kind, MetricKind::Counter);
        assert_eq!(record.definition_count(), 2);

        let defs: Vec<_> = record.definitions().collect();
        assert_eq!(defs[0].labels, labels(&[("code", "200"), ("method", "post")]));
        assert_eq!(defs[0].latest().unwrap().value, 1027.0);
        assert_eq!(defs[1].latest().unwrap().value, 3.0);
    }

    #[test]
    fn untyped_metric_before_any_header_still_records() {
        let mut agg = Aggregate::new();
        agg.merge_text("metric_without_timestamp_and_labels 12.47\n", 5)
            .unwrap();

        let record = agg.get("metric_without_timestamp_and_labels").unwrap();
        assert_eq!(record.kind, MetricKind::Untyped);
        assert_eq!(record.help, "");
        assert_eq!(record.definition_count(), 1);
    }

    #[test]
    fn ring_evicts_oldest_sample_past_capacity() {
        let mut agg = Aggregate::new();
        for i in 0..(SAMPLE_RING_CAPACITY + 10) {
            agg.merge_text("a_gauge 1\n", i as i64).unwrap();
        }
        let record = agg.get("a_gauge").unwrap();
        let def = record.definitions().next().unwrap();
        assert_eq!(def.samples().count(), SAMPLE_RING_CAPACITY);
        assert_eq!(def.samples().next().unwrap().observed_at, 10);
        assert_eq!(def.latest().unwrap().observed_at, (SAMPLE_RING_CAPACITY + 9) as i64);
    }

    #[test]
    fn merging_twice_is_idempotent_on_definition_identity() {
        let mut agg = Aggregate::new();
        agg.merge_text("a_gauge{x=\"1\"} 1\n", 1).unwrap();
        agg.merge_text("a_gauge{x=\"1\"} 2\n", 2).unwrap();

        let record = agg.get("a_gauge").unwrap();
        assert_eq!(record.definition_count(), 1);
        assert_eq!(record.definitions().next().unwrap().latest().unwrap().value, 2.0);
    }

    #[test]
    fn render_round_trips_label_escaping() {
        let mut agg = Aggregate::new();
        agg.merge_text(
            "# TYPE weird untyped\nweird{msg=\"line\\nbreak and \\\"quote\\\"\"} 1\n",
            0,
        )
        .unwrap();
        let text = agg.render_text();
        assert!(text.contains(r#"msg="line\nbreak and \"quote\"""#));

        let mut reparsed = Aggregate::new();
        reparsed.merge_text(&text, 0).unwrap();
        let original = agg.get("weird").unwrap().definitions().next().unwrap();
        let round_tripped = reparsed.get("weird").unwrap().definitions().next().unwrap();
        assert_eq!(original.labels, round_tripped.labels);
    }

    #[test]
    fn render_emits_nan_for_nan_value() {
        let mut agg = Aggregate::new();
        agg.merge_text("# TYPE g gauge\ng NaN\n", 0).unwrap();
        let text = agg.render_text();
        assert!(text.contains("g NaN"));
    }

    #[test]
    fn propagates_parse_errors_with_offending_line() {
        let mut agg = Aggregate::new();
        let err = agg
            .merge_text(r#"name{registry="default" content_type="html"} 1890"#, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            ParserError::WithLine {
                kind: ErrorKind::ExpectedChar { expected: ',', .. },
                ..
            }
        ));
    }
}

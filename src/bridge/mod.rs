//! Bridge: pulls Prometheus exposition text from configured upstream
//! endpoints, merges it into a shared [`pgexporter_prometheus::Aggregate`]
//! with an injected `endpoint="<host>:<port>"` label, and renders the result
//! as text or JSON.

use std::time::{SystemTime, UNIX_EPOCH};

use pgexporter_prometheus::{Aggregate, ParserError};
use serde::Serialize;
use snafu::{ResultExt, Snafu};

use crate::config::BridgeEndpoint;

#[derive(Debug, Snafu)]
pub enum BridgeError {
    #[snafu(display("fetching {}:{}: {}", host, port, source))]
    Fetch {
        host: String,
        port: u16,
        source: reqwest::Error,
    },
    #[snafu(display("parsing response from {}:{}: {}", host, port, source))]
    Parse {
        host: String,
        port: u16,
        source: ParserError,
    },
}

/// Fetch one upstream endpoint's `/metrics` and merge it into `aggregate`,
/// injecting an `endpoint` label onto every sample line before parsing so
/// that two upstreams exposing the same metric/label-set still produce
/// distinct definitions.
pub async fn fetch_and_merge(
    client: &reqwest::Client,
    endpoint: &BridgeEndpoint,
    aggregate: &mut Aggregate,
) -> Result<(), BridgeError> {
    let url = format!("http://{}:{}{}", endpoint.host, endpoint.port, endpoint.path);
    let body = client
        .get(&url)
        .send()
        .await
        .context(FetchSnafu {
            host: endpoint.host.clone(),
            port: endpoint.port,
        })?
        .text()
        .await
        .context(FetchSnafu {
            host: endpoint.host.clone(),
            port: endpoint.port,
        })?;

    let labeled = inject_endpoint_label(&body, &endpoint.host, endpoint.port);
    let observed_at = now_secs();
    aggregate
        .merge_text(&labeled, observed_at)
        .context(ParseSnafu {
            host: endpoint.host.clone(),
            port: endpoint.port,
        })?;
    Ok(())
}

/// Rewrite every sample line of `body` to carry an injected
/// `endpoint="host:port"` label, leaving `# HELP`/`# TYPE` directives and
/// blank lines untouched.
fn inject_endpoint_label(body: &str, host: &str, port: u16) -> String {
    let endpoint_label = format!("endpoint=\"{}:{}\"", host, port);
    let mut out = String::with_capacity(body.len() + body.lines().count() * (endpoint_label.len() + 2));

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            out.push_str(line);
            out.push('\n');
            continue;
        }

        match trimmed.find('{') {
            Some(brace) => {
                out.push_str(&trimmed[..brace + 1]);
                out.push_str(&endpoint_label);
                out.push(',');
                out.push_str(&trimmed[brace + 1..]);
            }
            None => {
                let Some(space) = trimmed.find(char::is_whitespace) else {
                    out.push_str(line);
                    out.push('\n');
                    continue;
                };
                out.push_str(&trimmed[..space]);
                out.push('{');
                out.push_str(&endpoint_label);
                out.push('}');
                out.push_str(&trimmed[space..]);
            }
        }
        out.push('\n');
    }
    out
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[derive(Serialize)]
pub struct JsonDefinition {
    pub labels: std::collections::BTreeMap<String, String>,
    pub value: f64,
    pub observed_at: i64,
}

#[derive(Serialize)]
pub struct JsonMetric {
    pub name: String,
    pub help: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub definitions: Vec<JsonDefinition>,
}

/// Render the aggregate as a compact JSON document for the bridge-JSON port.
pub fn render_json(aggregate: &Aggregate) -> String {
    let metrics: Vec<JsonMetric> = aggregate
        .records()
        .map(|record| JsonMetric {
            name: record.name.clone(),
            help: record.help.clone(),
            kind: record.kind.as_str(),
            definitions: record
                .definitions()
                .filter_map(|def| {
                    def.latest().map(|sample| JsonDefinition {
                        labels: def.labels.clone(),
                        value: sample.value,
                        observed_at: sample.observed_at,
                    })
                })
                .collect(),
        })
        .collect();

    serde_json::to_string(&metrics).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn injects_endpoint_label_into_existing_braces() {
        let body = "foo_total{x=\"a\"} 1\n";
        let labeled = inject_endpoint_label(body, "10.0.0.1", 9100);
        assert_eq!(
            labeled,
            "foo_total{endpoint=\"10.0.0.1:9100\",x=\"a\"} 1\n"
        );
    }

    #[test]
    fn injects_endpoint_label_into_label_less_metric() {
        let body = "foo_total 1\n";
        let labeled = inject_endpoint_label(body, "10.0.0.1", 9100);
        assert_eq!(labeled, "foo_total{endpoint=\"10.0.0.1:9100\"} 1\n");
    }

    #[test]
    fn leaves_directives_untouched() {
        let body = "# HELP foo_total docs\n# TYPE foo_total counter\n";
        let labeled = inject_endpoint_label(body, "h", 1);
        assert_eq!(labeled, body);
    }

    #[test]
    fn merges_two_endpoints_into_distinct_definitions() {
        let mut aggregate = Aggregate::new();
        let a = inject_endpoint_label("foo_total{x=\"a\"} 1\n", "host-a", 9100);
        let b = inject_endpoint_label("foo_total{x=\"a\"} 2\n", "host-b", 9100);
        aggregate.merge_text(&a, 0).unwrap();
        aggregate.merge_text(&b, 0).unwrap();

        let record = aggregate.get("foo_total").unwrap();
        assert_eq!(record.definition_count(), 2);
    }
}

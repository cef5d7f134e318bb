//! Collection engine: reconciles per-server connections, detects
//! server version/extensions/databases, runs the query catalog against each
//! selected server, and renders the results into Prometheus exposition
//! text.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use snafu::Snafu;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;

use crate::catalog::{Chosen, SemVer, ServerFilter};
use crate::config::{Config, ServerConfig};
use crate::management::{Counters, ServerHealth};
use crate::pg::{self, ColumnKind, Connection, PgError, QueryResult, Tuple};

#[derive(Debug, Snafu)]
pub enum EngineError {
    #[snafu(display("postgresql client error: {}", source))]
    Pg { source: PgError },
    #[snafu(display("user `{}` is not configured", user))]
    UnknownUser { user: String },
    #[snafu(display("server `{}` does not have the pg_monitor role", server))]
    MissingPgMonitor { server: String },
    #[snafu(display("server `{}` requires tls but no CA file is configured", server))]
    MissingTlsCa { server: String },
    #[snafu(display("could not load TLS CA for `{}`: {}", server, source))]
    TlsCa {
        server: String,
        source: std::io::Error,
    },
}

impl From<PgError> for EngineError {
    fn from(source: PgError) -> Self {
        EngineError::Pg { source }
    }
}

/// Either a plain TCP stream or one upgraded to TLS, so one [`Connection`]
/// type can serve both a plaintext and an encrypted server without a
/// trait-object indirection on every read/write.
pub enum PgStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for PgStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            PgStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            PgStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PgStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            PgStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            PgStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            PgStream::Plain(s) => Pin::new(s).poll_flush(cx),
            PgStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            PgStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            PgStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// An installed extension, as reported by `pg_available_extensions`.
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: SemVer,
    pub comment: String,
}

/// Per-server runtime state: the open connection (if any) plus everything
/// detected about the server the first time it was reached.
pub struct ServerRuntime {
    pub name: String,
    pub connection: Option<Connection<PgStream>>,
    pub major_version: u32,
    pub minor_version: u32,
    pub databases: Vec<String>,
    pub extensions: Vec<ExtensionInfo>,
}

impl ServerRuntime {
    fn new(name: String) -> Self {
        ServerRuntime {
            name,
            connection: None,
            major_version: 0,
            minor_version: 0,
            databases: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn extension_version(&self, name: &str) -> Option<SemVer> {
        self.extensions
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.version)
    }
}

/// One sample produced by rendering a query result row: its label columns
/// plus its non-label ("data") columns in declared order, each carrying the
/// [`ColumnKind`] that decides how it renders.
struct Sample {
    labels: Vec<(String, String)>,
    data: Vec<(String, ColumnKind, Option<String>)>,
}

/// Owns every server's runtime state across scrapes.
pub struct Engine {
    pub servers: Vec<ServerRuntime>,
    counters: Arc<Counters>,
    health: Arc<std::sync::Mutex<Vec<ServerHealth>>>,
}

impl Engine {
    pub fn new(
        server_configs: &[ServerConfig],
        counters: Arc<Counters>,
        health: Arc<std::sync::Mutex<Vec<ServerHealth>>>,
    ) -> Self {
        Engine {
            servers: server_configs
                .iter()
                .map(|s| ServerRuntime::new(s.name.clone()))
                .collect(),
            counters,
            health,
        }
    }

    /// Probe or (re)establish every server's connection.
    /// Returns the per-server outcome so the caller can log/skip rather
    /// than abort the whole scrape on one bad server.
    pub async fn reconcile(&mut self, config: &Config) -> Vec<(usize, Result<(), EngineError>)> {
        let mut outcomes = Vec::with_capacity(config.servers.len());
        for (idx, server_cfg) in config.servers.iter().enumerate() {
            let result = reconcile_one(&mut self.servers[idx], server_cfg, idx, config).await;
            outcomes.push((idx, result));
        }

        let connected = self.servers.iter().filter(|s| s.is_connected()).count();
        metrics::gauge!("pgexporter_servers_connected").set(connected as f64);

        let snapshot = self.health_snapshot(config);
        *self.health.lock().expect("health mutex poisoned") = snapshot;

        outcomes
    }

    /// Per-server snapshot for the management `status`/`status-details`
    /// commands, taken after the most recent [`Engine::reconcile`].
    pub fn health_snapshot(&self, config: &Config) -> Vec<ServerHealth> {
        config
            .servers
            .iter()
            .zip(self.servers.iter())
            .map(|(cfg, runtime)| ServerHealth {
                name: cfg.name.clone(),
                host: cfg.host.clone(),
                port: cfg.port,
                primary: cfg.primary,
                connected: runtime.is_connected(),
                major_version: runtime.major_version,
                minor_version: runtime.minor_version,
            })
            .collect()
    }

    /// Reconcile, then in one pass: emit fabric labels, run the catalog
    /// against every connected server, and render the union to exposition
    /// text.
    pub async fn scrape(&mut self, config: &Config) -> String {
        let reconcile_outcomes = self.reconcile(config).await;
        for (idx, outcome) in &reconcile_outcomes {
            if let Err(e) = outcome {
                tracing::warn!(server = %config.servers[*idx].name, error = %e, "server unavailable for this scrape");
            }
        }

        let mut out = String::new();
        render_fabric_labels(&mut out, config, &self.servers);

        for metric in &config.metrics {
            let mut results: Vec<QueryResult> = Vec::new();
            for (idx, server_cfg) in config.servers.iter().enumerate() {
                if !server_applies(metric.server_filter, server_cfg.primary) {
                    continue;
                }
                let runtime = &mut self.servers[idx];
                if !runtime.is_connected() {
                    continue;
                }

                let ext_version = metric
                    .extension_name
                    .as_deref()
                    .and_then(|name| runtime.extension_version(name));
                let Some(chosen) = metric.choose(runtime.major_version, ext_version) else {
                    continue;
                };

                if metric.exec_on_all_databases {
                    let databases = runtime.databases.clone();
                    for database in databases {
                        match run_on_database(server_cfg, &database, &chosen, idx, config).await {
                            Ok(result) => {
                                self.counters.record_query();
                                metrics::counter!("pgexporter_queries_total").increment(1);
                                results.push(result);
                            }
                            Err(e) => {
                                metrics::counter!("pgexporter_query_errors_total").increment(1);
                                tracing::warn!(
                                    server = %server_cfg.name,
                                    database = %database,
                                    metric = %metric.tag,
                                    error = %e,
                                    "metric query failed, skipping"
                                )
                            }
                        }
                    }
                } else if let Some(conn) = runtime.connection.as_mut() {
                    let column_names: Vec<String> =
                        chosen.columns().iter().map(|c| c.name.clone()).collect();
                    match conn.simple_query(chosen.sql(), &column_names).await {
                        Ok(result) => {
                            self.counters.record_query();
                            metrics::counter!("pgexporter_queries_total").increment(1);
                            results.push(result);
                        }
                        Err(e) => {
                            metrics::counter!("pgexporter_query_errors_total").increment(1);
                            tracing::warn!(
                                server = %server_cfg.name,
                                metric = %metric.tag,
                                error = %e,
                                "metric query failed, skipping"
                            )
                        }
                    }
                }
            }

            render_metric(&mut out, metric, &results);
        }

        out
    }
}

fn server_applies(filter: ServerFilter, is_primary: bool) -> bool {
    match filter {
        ServerFilter::Both => true,
        ServerFilter::PrimaryOnly => is_primary,
        ServerFilter::ReplicaOnly => !is_primary,
    }
}

fn render_fabric_labels(out: &mut String, config: &Config, servers: &[ServerRuntime]) {
    for (server_cfg, runtime) in config.servers.iter().zip(servers.iter()) {
        out.push_str(&format!(
            "pgexporter_state{{server=\"{}\"}} {}\n",
            server_cfg.name,
            if runtime.is_connected() { 1 } else { 0 }
        ));
        if runtime.major_version > 0 {
            out.push_str(&format!(
                "pgexporter_postgresql_version{{server=\"{}\",version=\"{}\"}} 1\n",
                server_cfg.name, runtime.major_version
            ));
        }
    }
}

/// Render one metric's HELP/TYPE plus one exposition line per tuple,
/// across however many servers/databases contributed rows.
fn render_metric(out: &mut String, metric: &crate::catalog::Metric, results: &[QueryResult]) {
    if results.iter().all(|r| r.tuples.is_empty()) {
        return;
    }

    let declared = representative_columns(metric);
    let metric_kind = declared
        .iter()
        .find(|c| c.kind != ColumnKind::Label)
        .map(|c| match c.kind {
            ColumnKind::Histogram => "histogram",
            ColumnKind::Counter => "counter",
            _ => "gauge",
        })
        .unwrap_or("gauge");

    out.push_str("# HELP ");
    out.push_str(&metric.tag);
    out.push(' ');
    out.push_str(&metric.help);
    out.push('\n');
    out.push_str("# TYPE ");
    out.push_str(&metric.tag);
    out.push(' ');
    out.push_str(metric_kind);
    out.push('\n');

    let mut samples: Vec<Sample> = Vec::new();
    for result in results {
        for tuple in &result.tuples {
            samples.push(tuple_to_sample(&declared, &result.columns, tuple));
        }
    }

    match metric.sort_mode {
        crate::catalog::SortMode::ByName => {
            samples.sort_by(|a, b| label_key(&a.labels).cmp(&label_key(&b.labels)));
        }
        crate::catalog::SortMode::ByFirstDataColumn => {
            samples.sort_by(|a, b| first_value(a).cmp(&first_value(b)));
        }
    }

    for sample in &samples {
        render_sample(out, &metric.tag, sample);
    }
}

/// Any one alternative's declared columns describe the metric's shape well
/// enough to render with: every alternative for one metric agrees on which
/// columns are labels vs. data, even though the SQL text differs by
/// version. Picks the highest-versioned alternative on either tree.
fn representative_columns(metric: &crate::catalog::Metric) -> Vec<crate::pg::ColumnDef> {
    metric
        .core
        .lookup(u32::MAX)
        .map(|a| a.columns.clone())
        .or_else(|| {
            metric
                .extension
                .lookup(SemVer {
                    major: u32::MAX,
                    minor: u32::MAX,
                    patch: u32::MAX,
                })
                .map(|a| a.columns.clone())
        })
        .unwrap_or_default()
}

fn tuple_to_sample(
    declared: &[crate::pg::ColumnDef],
    columns: &[String],
    tuple: &Tuple,
) -> Sample {
    let mut labels = Vec::new();
    let mut data = Vec::new();
    for (i, value) in tuple.values.iter().enumerate() {
        let name = columns.get(i).cloned().unwrap_or_default();
        let kind = declared.get(i).map(|c| c.kind).unwrap_or(ColumnKind::Label);
        match kind {
            ColumnKind::Label => labels.push((name, value.clone().unwrap_or_default())),
            other => data.push((name, other, value.clone())),
        }
    }
    Sample { labels, data }
}

fn label_key(labels: &[(String, String)]) -> String {
    let mut sorted = labels.to_vec();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn first_value(sample: &Sample) -> String {
    sample
        .data
        .first()
        .and_then(|(_, _, v)| v.clone())
        .unwrap_or_default()
}

fn render_sample(out: &mut String, tag: &str, sample: &Sample) {
    let Some((_, kind, raw)) = sample.data.first() else {
        return;
    };

    if *kind == ColumnKind::Histogram {
        render_histogram_sample(out, tag, &sample.labels, raw.as_deref());
        return;
    }

    render_labeled_line(out, tag, &sample.labels, raw.as_deref());
}

fn render_labeled_line(out: &mut String, name: &str, labels: &[(String, String)], raw: Option<&str>) {
    out.push_str(name);
    if !labels.is_empty() {
        out.push('{');
        for (i, (k, v)) in labels.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&pgexporter_prometheus::escape_label_value(v));
            out.push('"');
        }
        out.push('}');
    }
    out.push(' ');
    // Resolved open question: a NULL numeric column renders as NaN,
    // never the literal text `NULL`, so the body stays valid exposition
    // format and re-parses cleanly through the bridge.
    match raw {
        Some(v) if !v.is_empty() => out.push_str(v),
        _ => out.push_str("NaN"),
    }
    out.push('\n');
}

/// Histogram columns carry their buckets pre-aggregated by the SQL query
/// itself, encoded as `le1=count1,le2=count2,...,sum=<total>,count=<n>`
/// (the catalog's SQL text is expected to produce this shape via a
/// `string_agg`-style expression). Decodes that encoding into the three
/// exposition-format lines Prometheus expects.
fn render_histogram_sample(
    out: &mut String,
    name: &str,
    labels: &[(String, String)],
    raw: Option<&str>,
) {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        render_labeled_line(out, &format!("{}_count", name), labels, Some("NaN"));
        return;
    };

    for entry in raw.split(',') {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        match key {
            "sum" => render_labeled_line(out, &format!("{}_sum", name), labels, Some(value)),
            "count" => render_labeled_line(out, &format!("{}_count", name), labels, Some(value)),
            le => {
                let mut bucket_labels = labels.to_vec();
                bucket_labels.push(("le".to_string(), le.to_string()));
                render_labeled_line(out, &format!("{}_bucket", name), &bucket_labels, Some(value));
            }
        }
    }
}

async fn run_on_database(
    server_cfg: &ServerConfig,
    database: &str,
    chosen: &Chosen<'_>,
    server_index: usize,
    config: &Config,
) -> Result<QueryResult, EngineError> {
    let mut conn = connect(server_cfg, database, server_index, config).await?;
    let column_names: Vec<String> = chosen.columns().iter().map(|c| c.name.clone()).collect();
    let result = conn.simple_query(chosen.sql(), &column_names).await?;
    let _ = conn.terminate().await;
    Ok(result)
}

async fn reconcile_one(
    runtime: &mut ServerRuntime,
    server_cfg: &ServerConfig,
    server_index: usize,
    config: &Config,
) -> Result<(), EngineError> {
    if let Some(conn) = runtime.connection.as_mut() {
        if conn.validate().await {
            return Ok(());
        }
        runtime.connection = None;
    }

    let mut conn = connect(server_cfg, &server_cfg.database, server_index, config).await?;

    if let Some(version) = conn.parameters.get("server_version") {
        let (major, minor) = parse_server_version(version);
        runtime.major_version = major;
        runtime.minor_version = minor;
    }

    let has_role = conn
        .simple_query(
            "SELECT pg_has_role(current_user, 'pg_monitor', 'USAGE');",
            &[],
        )
        .await?;
    let granted = has_role
        .tuples
        .first()
        .and_then(|t| t.values.first())
        .and_then(|v| v.as_deref())
        == Some("t");
    if !granted {
        return Err(EngineError::MissingPgMonitor {
            server: server_cfg.name.clone(),
        });
    }

    let db_rows = conn
        .simple_query(
            "SELECT datname FROM pg_database WHERE NOT datistemplate AND datname <> 'postgres';",
            &[],
        )
        .await?;
    let mut databases: Vec<String> = db_rows
        .tuples
        .iter()
        .filter_map(|t| t.values.first().cloned().flatten())
        .take(config.global.max_databases.saturating_sub(1))
        .collect();
    databases.push("postgres".to_string());

    let ext_rows = conn
        .simple_query(
            "SELECT name, installed_version, comment FROM pg_available_extensions WHERE installed_version IS NOT NULL ORDER BY name;",
            &[],
        )
        .await?;
    let extensions: Vec<ExtensionInfo> = ext_rows
        .tuples
        .iter()
        .filter_map(|t| {
            let name = t.values.first()?.clone()?;
            let version = t.values.get(1)?.clone()?;
            let comment = t.values.get(2).cloned().flatten().unwrap_or_default();
            Some(ExtensionInfo {
                name,
                version: parse_semver(&version),
                comment,
            })
        })
        .collect();

    if let Some(ms) = config.global.metrics_query_timeout_ms {
        conn.set_statement_timeout(ms).await?;
    }

    runtime.databases = databases;
    runtime.extensions = extensions;
    runtime.connection = Some(conn);
    Ok(())
}

async fn connect(
    server_cfg: &ServerConfig,
    database: &str,
    server_index: usize,
    config: &Config,
) -> Result<Connection<PgStream>, EngineError> {
    let password = config
        .user_password(&server_cfg.user)
        .ok_or_else(|| EngineError::UnknownUser {
            user: server_cfg.user.clone(),
        })?;

    let tcp = pg::connect_tcp(&server_cfg.host, server_cfg.port).await?;
    let stream = if server_cfg.tls {
        let ca_path = config
            .global
            .tls_ca_file
            .as_ref()
            .ok_or_else(|| EngineError::MissingTlsCa {
                server: server_cfg.name.clone(),
            })?;
        let connector = build_tls_connector(ca_path, &server_cfg.name)?;
        let tls = pg::tls::negotiate(tcp, &server_cfg.host, connector).await?;
        PgStream::Tls(Box::new(tls))
    } else {
        PgStream::Plain(tcp)
    };

    let timeout = config.global.authentication_timeout;
    Connection::startup(
        stream,
        server_index,
        &server_cfg.user,
        database,
        password,
        timeout,
    )
    .await
    .map_err(Into::into)
}

fn build_tls_connector(
    ca_path: &std::path::Path,
    server_name: &str,
) -> Result<Arc<rustls::ClientConfig>, EngineError> {
    let pem = std::fs::read(ca_path).map_err(|source| EngineError::TlsCa {
        server: server_name.to_string(),
        source,
    })?;
    let mut reader = std::io::Cursor::new(pem);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader).flatten() {
        let _ = roots.add(cert);
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Parse `server_version` (e.g. `"16.3"`, `"12.19 (Debian ...)"`) into
/// (major, minor). PostgreSQL 10+ has no separate "minor" release digit in
/// the marketing version; this keeps the second dotted component when
/// present and otherwise reports 0.
fn parse_server_version(raw: &str) -> (u32, u32) {
    let head = raw.split_whitespace().next().unwrap_or(raw);
    let mut parts = head.split('.');
    let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (major, minor)
}

fn parse_semver(raw: &str) -> SemVer {
    let mut parts = raw.trim().split('.');
    let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    SemVer { major, minor, patch }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_server_version_with_trailing_platform_string() {
        assert_eq!(parse_server_version("16.3 (Debian 16.3-1)"), (16, 3));
        assert_eq!(parse_server_version("15"), (15, 0));
    }

    #[test]
    fn parses_extension_semver() {
        let v = parse_semver("1.10.2");
        assert_eq!(v, SemVer { major: 1, minor: 10, patch: 2 });
    }

    #[test]
    fn fabric_labels_report_disconnected_server() {
        let mut out = String::new();
        let servers = vec![ServerRuntime::new("primary".to_string())];
        let config_servers = [ServerConfig {
            name: "primary".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "pgexporter".to_string(),
            database: "postgres".to_string(),
            tls: false,
            primary: true,
        }];
        // Build just enough of a Config-shaped slice to exercise the
        // rendering helper directly rather than the whole load() path.
        for (server_cfg, runtime) in config_servers.iter().zip(servers.iter()) {
            out.push_str(&format!(
                "pgexporter_state{{server=\"{}\"}} {}\n",
                server_cfg.name,
                if runtime.is_connected() { 1 } else { 0 }
            ));
        }
        assert_eq!(out, "pgexporter_state{server=\"primary\"} 0\n");
    }

    #[test]
    fn render_metric_emits_nan_for_null_value() {
        let mut metric_tree = crate::catalog::VersionTree::new();
        metric_tree.insert(crate::catalog::Alternative {
            version: 10u32,
            sql: "select".to_string(),
            columns: vec![crate::pg::ColumnDef {
                name: "value".to_string(),
                kind: ColumnKind::Gauge,
            }],
        });
        let metric = crate::catalog::Metric {
            tag: "pgexporter_test".to_string(),
            help: "test metric".to_string(),
            collector_group: "test".to_string(),
            sort_mode: crate::catalog::SortMode::ByName,
            server_filter: ServerFilter::Both,
            exec_on_all_databases: false,
            core: metric_tree,
            extension_name: None,
            extension: crate::catalog::VersionTree::new(),
        };
        let result = QueryResult {
            tag: "SELECT".to_string(),
            columns: vec!["value".to_string()],
            tuples: vec![Tuple {
                server_index: 0,
                values: vec![None],
            }],
        };
        let mut out = String::new();
        render_metric(&mut out, &metric, &[result]);
        assert!(out.contains("pgexporter_test NaN"));
    }

    #[tokio::test]
    async fn reconcile_publishes_health_snapshot() {
        let counters = Arc::new(Counters::default());
        let health = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut engine = Engine::new(&[], counters.clone(), health.clone());
        let config = Config {
            global: crate::config::Global {
                host: "*".to_string(),
                metrics_port: 5002,
                bridge_port: None,
                bridge_json_port: None,
                management_port: None,
                unix_socket_dir: std::path::PathBuf::from("/tmp"),
                blocking_timeout: std::time::Duration::from_secs(10),
                authentication_timeout: std::time::Duration::from_secs(5),
                metrics_cache_max_age: std::time::Duration::from_secs(0),
                metrics_cache_max_size: 262_144,
                bridge_cache_max_age: std::time::Duration::from_secs(0),
                bridge_cache_max_size: 262_144,
                log_level: "info".to_string(),
                tls_cert_file: None,
                tls_key_file: None,
                tls_ca_file: None,
                max_databases: 64,
                metrics_query_timeout_ms: None,
                users_path: None,
                admins_path: None,
                master_key_path: None,
                management_compression: crate::management::crypto::Compression::None,
                management_encryption: crate::management::crypto::Encryption::None,
            },
            servers: Vec::new(),
            users: Vec::new(),
            admins: Vec::new(),
            metrics: Vec::new(),
            bridge_endpoints: Vec::new(),
        };
        let outcomes = engine.reconcile(&config).await;
        assert!(outcomes.is_empty());
        assert!(health.lock().unwrap().is_empty());
        assert_eq!(counters.queries.load(std::sync::atomic::Ordering::Relaxed), 0);
    }
}

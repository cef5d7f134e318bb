//! In-memory configuration model, loaded once at startup and swapped
//! wholesale on reload.

pub mod ini;
pub mod reload;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::catalog::{Alternative, ColumnDef, ColumnKind, CoreVersion, Metric, SemVer, ServerFilter, SortMode, VersionTree};
use crate::management::crypto::{Compression, Encryption};

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("could not read {}: {}", path.display(), source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("could not parse {} as ini: {}", path.display(), source))]
    ParseIni {
        path: PathBuf,
        source: ini::IniError,
    },
    #[snafu(display("could not parse metric definitions {}: {}", path.display(), source))]
    ParseMetrics {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("missing required key `{}` in section `{}`", key, section))]
    MissingKey { section: String, key: String },
    #[snafu(display("invalid value for `{}`: {}", key, value))]
    InvalidValue { key: String, value: String },
    #[snafu(display("duplicate metric tag: {}", tag))]
    DuplicateMetricTag { tag: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub tls: bool,
    pub primary: bool,
}

#[derive(Debug, Clone)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct BridgeEndpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Daemon-wide settings, the `[pgexporter]` section of the main config file.
#[derive(Debug, Clone)]
pub struct Global {
    pub host: String,
    pub metrics_port: u16,
    pub bridge_port: Option<u16>,
    pub bridge_json_port: Option<u16>,
    pub management_port: Option<u16>,
    pub unix_socket_dir: PathBuf,
    pub blocking_timeout: Duration,
    pub authentication_timeout: Duration,
    pub metrics_cache_max_age: Duration,
    pub metrics_cache_max_size: usize,
    pub bridge_cache_max_age: Duration,
    pub bridge_cache_max_size: usize,
    pub log_level: String,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub tls_ca_file: Option<PathBuf>,
    /// Per-server cap on the number of detected databases.
    pub max_databases: usize,
    /// `SET statement_timeout = <ms>` applied once after login; `None` means
    /// no timeout is applied.
    pub metrics_query_timeout_ms: Option<u64>,
    pub users_path: Option<PathBuf>,
    pub admins_path: Option<PathBuf>,
    pub master_key_path: Option<PathBuf>,
    /// Compression/encryption applied to the remote management port's
    /// framed payloads; the local Unix socket always runs
    /// cleartext/uncompressed regardless of these settings.
    pub management_compression: Compression,
    pub management_encryption: Encryption,
}

/// Deserialized shape of one entry in the metric-definitions JSON file; this
/// feeds [`crate::catalog`] tree construction.
#[derive(Debug, Deserialize)]
pub struct MetricDef {
    pub tag: String,
    #[serde(default)]
    pub help: Option<String>,
    pub collector: String,
    #[serde(default)]
    pub sort: SortModeDef,
    #[serde(default)]
    pub server: ServerFilterDef,
    #[serde(default)]
    pub exec_on_all_databases: bool,
    #[serde(default)]
    pub extension_name: Option<String>,
    pub core: Vec<AlternativeDef>,
    #[serde(default)]
    pub extension: Vec<ExtensionAlternativeDef>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortModeDef {
    #[default]
    ByName,
    ByFirstDataColumn,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerFilterDef {
    #[default]
    Both,
    PrimaryOnly,
    ReplicaOnly,
}

#[derive(Debug, Deserialize)]
pub struct AlternativeDef {
    pub min_version: u32,
    pub sql: String,
    pub columns: Vec<ColumnDef_>,
}

#[derive(Debug, Deserialize)]
pub struct ExtensionAlternativeDef {
    pub min_version: (u32, u32, u32),
    pub sql: String,
    pub columns: Vec<ColumnDef_>,
}

#[derive(Debug, Deserialize)]
pub struct ColumnDef_ {
    pub name: String,
    pub kind: ColumnKindDef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKindDef {
    Label,
    Counter,
    Gauge,
    Histogram,
}

impl From<ColumnKindDef> for ColumnKind {
    fn from(d: ColumnKindDef) -> Self {
        match d {
            ColumnKindDef::Label => ColumnKind::Label,
            ColumnKindDef::Counter => ColumnKind::Counter,
            ColumnKindDef::Gauge => ColumnKind::Gauge,
            ColumnKindDef::Histogram => ColumnKind::Histogram,
        }
    }
}

fn build_metric(def: MetricDef) -> Metric {
    let mut core = VersionTree::<CoreVersion>::new();
    for alt in def.core {
        core.insert(Alternative {
            version: alt.min_version,
            sql: alt.sql,
            columns: alt
                .columns
                .into_iter()
                .map(|c| ColumnDef {
                    name: c.name,
                    kind: c.kind.into(),
                })
                .collect(),
        });
    }

    let mut extension = VersionTree::<SemVer>::new();
    for alt in def.extension {
        let (major, minor, patch) = alt.min_version;
        extension.insert(Alternative {
            version: SemVer { major, minor, patch },
            sql: alt.sql,
            columns: alt
                .columns
                .into_iter()
                .map(|c| ColumnDef {
                    name: c.name,
                    kind: c.kind.into(),
                })
                .collect(),
        });
    }

    Metric {
        help: def.help.unwrap_or_else(|| format!("{} metric", def.tag)),
        tag: def.tag,
        collector_group: def.collector,
        sort_mode: match def.sort {
            SortModeDef::ByName => SortMode::ByName,
            SortModeDef::ByFirstDataColumn => SortMode::ByFirstDataColumn,
        },
        server_filter: match def.server {
            ServerFilterDef::Both => ServerFilter::Both,
            ServerFilterDef::PrimaryOnly => ServerFilter::PrimaryOnly,
            ServerFilterDef::ReplicaOnly => ServerFilter::ReplicaOnly,
        },
        exec_on_all_databases: def.exec_on_all_databases,
        core,
        extension_name: def.extension_name,
        extension,
    }
}

/// The full, validated in-memory configuration.
pub struct Config {
    pub global: Global,
    pub servers: Vec<ServerConfig>,
    pub users: Vec<UserConfig>,
    pub admins: Vec<AdminConfig>,
    pub metrics: Vec<Metric>,
    pub bridge_endpoints: Vec<BridgeEndpoint>,
}

impl Config {
    pub fn user_password(&self, username: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.password.as_str())
    }

    pub fn admin_password(&self, username: &str) -> Option<&str> {
        self.admins
            .iter()
            .find(|a| a.username == username)
            .map(|a| a.password.as_str())
    }
}

/// Load and validate the main `.ini` configuration plus the JSON metric
/// catalog. Users/admins files are loaded separately via
/// [`crate::management::crypto`], since they need the master key.
pub fn load(main_conf_path: &PathBuf, metrics_path: &PathBuf) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(main_conf_path).context(ReadFileSnafu {
        path: main_conf_path.clone(),
    })?;
    let doc = ini::parse(&raw).context(ParseIniSnafu {
        path: main_conf_path.clone(),
    })?;

    let global_section = doc.section("pgexporter").context(MissingKeySnafu {
        section: "pgexporter",
        key: "<section>",
    })?;
    let global = parse_global(global_section)?;

    let mut servers = Vec::new();
    for (name, kv) in doc
        .sections
        .iter()
        .filter(|(name, _)| name != "pgexporter")
    {
        servers.push(parse_server(name, kv)?);
    }

    let metrics_raw = std::fs::read_to_string(metrics_path).context(ReadFileSnafu {
        path: metrics_path.clone(),
    })?;
    let defs: Vec<MetricDef> = serde_json::from_str(&metrics_raw).context(ParseMetricsSnafu {
        path: metrics_path.clone(),
    })?;

    let mut seen_tags = HashMap::new();
    let mut metrics = Vec::new();
    for def in defs {
        if seen_tags.insert(def.tag.clone(), ()).is_some() {
            return Err(ConfigError::DuplicateMetricTag { tag: def.tag });
        }
        metrics.push(build_metric(def));
    }

    let bridge_endpoints = match global_section.get("endpoints") {
        Some(raw) => parse_bridge_endpoints(raw)?,
        None => Vec::new(),
    };

    Ok(Config {
        global,
        servers,
        users: Vec::new(),
        admins: Vec::new(),
        metrics,
        bridge_endpoints,
    })
}

/// `endpoints = host1:port1,host2:port2` in the `[pgexporter]` section names
/// the upstream Prometheus exporters the bridge merges; each becomes
/// an endpoint named after its `host:port` pair, scraped at `/metrics`.
fn parse_bridge_endpoints(raw: &str) -> Result<Vec<BridgeEndpoint>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (host, port) = entry.rsplit_once(':').ok_or_else(|| ConfigError::InvalidValue {
                key: "endpoints".to_string(),
                value: entry.to_string(),
            })?;
            let port: u16 = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "endpoints".to_string(),
                value: entry.to_string(),
            })?;
            Ok(BridgeEndpoint {
                name: entry.to_string(),
                host: host.to_string(),
                port,
                path: "/metrics".to_string(),
            })
        })
        .collect()
}

fn parse_global(kv: &HashMap<String, String>) -> Result<Global, ConfigError> {
    let get = |key: &str| kv.get(key).cloned();
    let parse_duration_secs = |key: &str, default: u64| -> Result<Duration, ConfigError> {
        match kv.get(key) {
            Some(v) => v
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v.clone(),
                }),
            None => Ok(Duration::from_secs(default)),
        }
    };
    let parse_port = |key: &str| -> Result<Option<u16>, ConfigError> {
        match kv.get(key) {
            Some(v) => v
                .parse::<u16>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v.clone(),
                }),
            None => Ok(None),
        }
    };

    Ok(Global {
        host: get("host").unwrap_or_else(|| "*".to_string()),
        metrics_port: kv
            .get("metrics")
            .context(MissingKeySnafu {
                section: "pgexporter",
                key: "metrics",
            })?
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "metrics".to_string(),
                value: kv["metrics"].clone(),
            })?,
        bridge_port: parse_port("bridge")?,
        bridge_json_port: parse_port("bridge_json")?,
        management_port: parse_port("management")?,
        unix_socket_dir: get("unix_socket_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp")),
        blocking_timeout: parse_duration_secs("blocking_timeout", 10)?,
        authentication_timeout: parse_duration_secs("authentication_timeout", 5)?,
        metrics_cache_max_age: parse_duration_secs("metrics_cache_max_age", 0)?,
        metrics_cache_max_size: kv
            .get("metrics_cache_max_size")
            .map(|v| v.parse().unwrap_or(0))
            .unwrap_or(262_144),
        bridge_cache_max_age: parse_duration_secs("bridge_cache_max_age", 0)?,
        bridge_cache_max_size: kv
            .get("bridge_cache_max_size")
            .map(|v| v.parse().unwrap_or(0))
            .unwrap_or(262_144),
        log_level: get("log_level").unwrap_or_else(|| "info".to_string()),
        tls_cert_file: get("tls_cert_file").map(PathBuf::from),
        tls_key_file: get("tls_key_file").map(PathBuf::from),
        tls_ca_file: get("tls_ca_file").map(PathBuf::from),
        max_databases: kv
            .get("max_databases")
            .map(|v| v.parse().unwrap_or(64))
            .unwrap_or(64),
        metrics_query_timeout_ms: kv
            .get("metrics_query_timeout")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0),
        users_path: get("users_path").map(PathBuf::from),
        admins_path: get("admins_path").map(PathBuf::from),
        master_key_path: get("master_key_path").map(PathBuf::from),
        management_compression: match get("management_compression").as_deref() {
            None | Some("none") => Compression::None,
            Some("gzip") => Compression::Gzip,
            Some("zstd") => Compression::Zstd,
            Some("lz4") => Compression::Lz4,
            Some("bzip2") => Compression::Bzip2,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "management_compression".to_string(),
                    value: other.to_string(),
                })
            }
        },
        management_encryption: match get("management_encryption").as_deref() {
            None | Some("none") => Encryption::None,
            Some("aes128") | Some("aes128cbc") => Encryption::Aes128Cbc,
            Some("aes192") | Some("aes192cbc") => Encryption::Aes192Cbc,
            Some("aes256") | Some("aes256cbc") => Encryption::Aes256Cbc,
            Some("aes128ctr") => Encryption::Aes128Ctr,
            Some("aes192ctr") => Encryption::Aes192Ctr,
            Some("aes256ctr") => Encryption::Aes256Ctr,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "management_encryption".to_string(),
                    value: other.to_string(),
                })
            }
        },
    })
}

fn parse_server(name: &str, kv: &HashMap<String, String>) -> Result<ServerConfig, ConfigError> {
    Ok(ServerConfig {
        name: name.to_string(),
        host: kv
            .get("host")
            .cloned()
            .context(MissingKeySnafu {
                section: name,
                key: "host",
            })?,
        port: kv
            .get("port")
            .context(MissingKeySnafu {
                section: name,
                key: "port",
            })?
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "port".to_string(),
                value: kv["port"].clone(),
            })?,
        user: kv
            .get("user")
            .cloned()
            .context(MissingKeySnafu {
                section: name,
                key: "user",
            })?,
        database: kv
            .get("database")
            .cloned()
            .unwrap_or_else(|| "postgres".to_string()),
        tls: kv.get("tls").map(|v| v == "true" || v == "on").unwrap_or(false),
        primary: kv.get("primary").map(|v| v != "false").unwrap_or(true),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn global_section_requires_metrics_port() {
        let mut kv = HashMap::new();
        kv.insert("host".to_string(), "*".to_string());
        let err = parse_global(&kv).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { .. }));
    }

    #[test]
    fn server_section_parses_defaults() {
        let mut kv = HashMap::new();
        kv.insert("host".to_string(), "127.0.0.1".to_string());
        kv.insert("port".to_string(), "5432".to_string());
        kv.insert("user".to_string(), "pgexporter".to_string());
        let server = parse_server("primary", &kv).unwrap();
        assert_eq!(server.database, "postgres");
        assert!(server.primary);
    }
}

//! Framed JSON management protocol: envelope types, command
//! dispatch, and the compression/encryption transport layer on top of it.

pub mod auth;
pub mod crypto;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::reload::SharedConfig;
use crate::error::code;
use crypto::{Compression, Encryption};

/// Command codes exchanged in `Header.Command`.
pub mod command {
    pub const UNKNOWN: i32 = 0;
    pub const TRANSFER_CONNECTION: i32 = 1;
    pub const SHUTDOWN: i32 = 2;
    pub const STATUS: i32 = 3;
    pub const STATUS_DETAILS: i32 = 4;
    pub const PING: i32 = 5;
    pub const RESET: i32 = 6;
    pub const RELOAD: i32 = 7;
    pub const CONF_LS: i32 = 8;
    pub const CONF_GET: i32 = 9;
    pub const CONF_SET: i32 = 10;
    pub const MASTER_KEY: i32 = 11;
    pub const ADD_USER: i32 = 12;
    pub const UPDATE_USER: i32 = 13;
    pub const REMOVE_USER: i32 = 14;
    pub const LIST_USERS: i32 = 15;
}

/// `Header.Output`: how a CLI client should render the envelope it gets
/// back. The server itself only ever produces `Raw`-shaped JSON; `Output` is
/// round-tripped for the client's own benefit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Raw,
}

impl OutputFormat {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(OutputFormat::Text),
            1 => Some(OutputFormat::Json),
            2 => Some(OutputFormat::Raw),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            OutputFormat::Text => 0,
            OutputFormat::Json => 1,
            OutputFormat::Raw => 2,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum ManagementError {
    #[snafu(display("i/o error: {}", source))]
    Io { source: std::io::Error },
    #[snafu(display("malformed envelope: {}", source))]
    Json { source: serde_json::Error },
    #[snafu(display("payload crypto error: {}", source))]
    Crypto { source: crypto::CryptoError },
    #[snafu(display("unrecognized compression code {}", code))]
    UnknownCompression { code: i32 },
    #[snafu(display("unrecognized encryption code {}", code))]
    UnknownEncryption { code: i32 },
    #[snafu(display("encrypted transport requires a master key"))]
    MissingMasterKey,
    #[snafu(display("unknown command code {}", code))]
    UnknownCommand { code: i32 },
    #[snafu(display("malformed dotted key {:?}", key))]
    MalformedKey { key: String },
}

impl From<std::io::Error> for ManagementError {
    fn from(source: std::io::Error) -> Self {
        ManagementError::Io { source }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    pub command: i32,
    pub output: i32,
    pub compression: i32,
    pub encryption: i32,
    pub client_version: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Outcome {
    pub status: bool,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<i32>,
}

impl Outcome {
    pub fn ok(time: impl Into<String>) -> Self {
        Outcome {
            status: true,
            time: time.into(),
            error: None,
        }
    }

    pub fn failure(time: impl Into<String>, error: i32) -> Self {
        Outcome {
            status: false,
            time: time.into(),
            error: Some(error),
        }
    }
}

/// The full request/response envelope. `Request`/`Response` are
/// command-specific, so they stay untyped JSON rather than one enum per
/// command — the dispatcher below interprets them by `Header.Command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub header: Header,
    #[serde(default)]
    pub request: serde_json::Value,
    #[serde(default)]
    pub response: serde_json::Value,
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

impl Envelope {
    pub fn request(command: i32, output: OutputFormat, body: serde_json::Value, now: &str) -> Self {
        Envelope {
            header: Header {
                command,
                output: output.code(),
                compression: Compression::None as i32,
                encryption: Encryption::None as i32,
                client_version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: now.to_string(),
            },
            request: body,
            response: serde_json::Value::Null,
            outcome: None,
        }
    }
}

/// Compression/encryption applied to the framed payload, negotiated out of
/// band (local Unix-socket control traffic runs `None`/`None`; a remote TCP
/// listener is configured with whichever scheme its operator chose).
#[derive(Debug, Clone, Copy)]
pub struct Transport {
    pub compression: Compression,
    pub encryption: Encryption,
}

impl Transport {
    pub const fn plain() -> Self {
        Transport {
            compression: Compression::None,
            encryption: Encryption::None,
        }
    }
}

/// Read one length-prefixed envelope, undoing compression/encryption per
/// `transport`.
pub async fn read_envelope<R: AsyncRead + Unpin>(
    stream: &mut R,
    transport: &Transport,
    master_key: Option<&[u8]>,
) -> Result<Envelope, ManagementError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut framed = vec![0u8; len];
    stream.read_exact(&mut framed).await?;

    let decrypted = match transport.encryption {
        Encryption::None => framed,
        enc => {
            let key = master_key.context(MissingMasterKeySnafu)?;
            crypto::decrypt(enc, key, &framed).context(CryptoSnafu)?
        }
    };
    let decompressed = crypto::decompress(transport.compression, &decrypted).context(CryptoSnafu)?;
    serde_json::from_slice(&decompressed).context(JsonSnafu)
}

/// Write one length-prefixed envelope, applying compression/encryption per
/// `transport`.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    stream: &mut W,
    transport: &Transport,
    master_key: Option<&[u8]>,
    envelope: &Envelope,
) -> Result<(), ManagementError> {
    let plain = serde_json::to_vec(envelope).context(JsonSnafu)?;
    let compressed = crypto::compress(transport.compression, &plain).context(CryptoSnafu)?;
    let framed = match transport.encryption {
        Encryption::None => compressed,
        enc => {
            let key = master_key.context(MissingMasterKeySnafu)?;
            crypto::encrypt(enc, key, &compressed)
        }
    };
    stream.write_all(&(framed.len() as u32).to_be_bytes()).await?;
    stream.write_all(&framed).await?;
    stream.flush().await?;
    Ok(())
}

/// The small set of atomic counters shared across workers: logged
/// lines and executed queries, zeroed by the `reset` command.
#[derive(Debug, Default)]
pub struct Counters {
    pub queries: AtomicU64,
    pub log_entries: AtomicU64,
}

impl Counters {
    pub fn reset(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.log_entries.store(0, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log(&self) {
        self.log_entries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of one configured server, refreshed by the collection
/// loop after each reconciliation pass and read by `status`/`status-details`.
#[derive(Debug, Clone)]
pub struct ServerHealth {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub primary: bool,
    pub connected: bool,
    pub major_version: u32,
    pub minor_version: u32,
}

/// Everything the dispatcher needs: the live config handle, the shared
/// counters, the latest server health snapshot, and a shutdown signal the
/// process fabric in `main` waits on.
#[derive(Clone)]
pub struct DispatchState {
    pub config: SharedConfig,
    pub counters: Arc<Counters>,
    pub health: Arc<Mutex<Vec<ServerHealth>>>,
    pub shutdown: Arc<tokio::sync::Notify>,
    pub started_at: std::time::Instant,
}

impl DispatchState {
    pub fn new(config: SharedConfig) -> Self {
        DispatchState {
            config,
            counters: Arc::new(Counters::default()),
            health: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(tokio::sync::Notify::new()),
            started_at: std::time::Instant::now(),
        }
    }
}

/// Dispatch one parsed request envelope, returning the response envelope to
/// write back. Never panics on bad input; every failure path produces
/// `Outcome.Status = false` plus a numeric error instead.
pub async fn dispatch(mut envelope: Envelope, state: &DispatchState, now: &str) -> Envelope {
    let command = envelope.header.command;
    let outcome_time = now.to_string();

    let result: Result<serde_json::Value, i32> = match command {
        command::PING => Ok(serde_json::Value::Null),
        command::STATUS => Ok(handle_status(state)),
        command::STATUS_DETAILS => Ok(handle_status_details(state)),
        command::RESET => {
            state.counters.reset();
            Ok(serde_json::Value::Null)
        }
        command::RELOAD => match state.config.reload(crypto::load_credentials_into) {
            Ok(()) => Ok(serde_json::Value::Null),
            Err(_) => Err(code::RELOAD_FAILED),
        },
        command::SHUTDOWN => {
            state.shutdown.notify_waiters();
            Ok(serde_json::Value::Null)
        }
        command::CONF_LS => Ok(handle_conf_ls(state)),
        command::CONF_GET => handle_conf_get(&envelope.request, state),
        command::CONF_SET => handle_conf_set(&envelope.request, state),
        command::MASTER_KEY => handle_master_key(state),
        command::ADD_USER => handle_add_user(&envelope.request, state),
        command::UPDATE_USER => handle_update_user(&envelope.request, state),
        command::REMOVE_USER => handle_remove_user(&envelope.request, state),
        command::LIST_USERS => handle_list_users(state),
        // Transported only between the accepting process and a forked
        // worker; a client never sends it directly.
        command::TRANSFER_CONNECTION => Err(code::UNKNOWN_COMMAND),
        _ => Err(code::UNKNOWN_COMMAND),
    };

    match result {
        Ok(response) => {
            envelope.response = response;
            envelope.outcome = Some(Outcome::ok(outcome_time));
        }
        Err(error_code) => {
            envelope.response = serde_json::Value::Null;
            envelope.outcome = Some(Outcome::failure(outcome_time, error_code));
        }
    }
    envelope
}

fn handle_status(state: &DispatchState) -> serde_json::Value {
    let health = state.health.lock().expect("health mutex poisoned");
    serde_json::json!({
        "UptimeSeconds": state.started_at.elapsed().as_secs(),
        "Queries": state.counters.queries.load(Ordering::Relaxed),
        "LogEntries": state.counters.log_entries.load(Ordering::Relaxed),
        "Servers": health.len(),
    })
}

fn handle_status_details(state: &DispatchState) -> serde_json::Value {
    let health = state.health.lock().expect("health mutex poisoned");
    let servers: Vec<_> = health
        .iter()
        .map(|s| {
            serde_json::json!({
                "Name": s.name,
                "Host": s.host,
                "Port": s.port,
                "Primary": s.primary,
                "Connected": s.connected,
                "Version": format!("{}.{}", s.major_version, s.minor_version),
            })
        })
        .collect();
    serde_json::json!({ "Servers": servers })
}

fn handle_conf_ls(state: &DispatchState) -> serde_json::Value {
    let config = state.config.load();
    serde_json::json!({
        "Servers": config.servers.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
        "Metrics": config.metrics.iter().map(|m| m.tag.clone()).collect::<Vec<_>>(),
    })
}

/// Split a dotted `A.B.C` key: `A` is the section (`"pgexporter"` maps to
/// the default/global section), `B` the context (server or extension name),
/// `C` the key. One- and two-part keys are also accepted.
struct DottedKey {
    section: String,
    context: Option<String>,
    key: Option<String>,
}

fn split_dotted_key(raw: &str) -> Result<DottedKey, ManagementError> {
    let parts: Vec<&str> = raw.split('.').collect();
    match parts.as_slice() {
        [section] => Ok(DottedKey {
            section: section.to_string(),
            context: None,
            key: None,
        }),
        [section, context] => Ok(DottedKey {
            section: section.to_string(),
            context: Some(context.to_string()),
            key: None,
        }),
        [section, context, key] => Ok(DottedKey {
            section: section.to_string(),
            context: Some(context.to_string()),
            key: Some(key.to_string()),
        }),
        _ => Err(ManagementError::MalformedKey {
            key: raw.to_string(),
        }),
    }
}

fn handle_conf_get(request: &serde_json::Value, state: &DispatchState) -> Result<serde_json::Value, i32> {
    let raw_key = request
        .get("Key")
        .and_then(|v| v.as_str())
        .ok_or(code::CONF_GET_NO_REQUEST)?;
    let dotted = split_dotted_key(raw_key).map_err(|_| code::CONF_GET_UNKNOWN_KEY)?;
    let config = state.config.load();

    // "pgexporter" (or a two/one-part key with no server context) reaches
    // into the global section; anything else names a server by the `B`
    // component.
    if dotted.section == "pgexporter" || dotted.context.is_none() {
        let global = &config.global;
        let key = dotted.context.as_deref().or(dotted.key.as_deref());
        let value = match key {
            Some("host") => global.host.clone(),
            Some("metrics") => global.metrics_port.to_string(),
            Some("log_level") => global.log_level.clone(),
            Some("max_databases") => global.max_databases.to_string(),
            None => return Ok(serde_json::json!({ "Section": "pgexporter" })),
            Some(_unknown) => return Err(code::CONF_GET_UNKNOWN_KEY),
        };
        return Ok(serde_json::json!({ "Value": value }));
    }

    let server_name = dotted.context.as_deref().unwrap_or(&dotted.section);
    let server = config
        .servers
        .iter()
        .find(|s| s.name == server_name)
        .ok_or(code::CONF_GET_UNKNOWN_KEY)?;
    let value = match dotted.key.as_deref() {
        Some("host") | None => server.host.clone(),
        Some("port") => server.port.to_string(),
        Some("user") => server.user.clone(),
        Some("database") => server.database.clone(),
        Some("primary") => server.primary.to_string(),
        Some(_) => return Err(code::CONF_GET_UNKNOWN_KEY),
    };
    Ok(serde_json::json!({ "Value": value }))
}

fn handle_conf_set(request: &serde_json::Value, _state: &DispatchState) -> Result<serde_json::Value, i32> {
    let _key = request
        .get("Key")
        .and_then(|v| v.as_str())
        .ok_or(code::CONF_SET_MISSING_KEY)?;
    let _value = request
        .get("Value")
        .and_then(|v| v.as_str())
        .ok_or(code::CONF_SET_MISSING_VALUE)?;
    // In-memory config is copy-on-write and published only through a full
    // reload of the on-disk files; `conf-set` is accepted
    // here only for keys that are meaningful to rewrite in place, and there
    // are none yet — every setting lives in the file the operator owns.
    Err(code::CONF_SET_GENERIC)
}

fn master_key_path(state: &DispatchState) -> Result<std::path::PathBuf, i32> {
    state
        .config
        .load()
        .global
        .master_key_path
        .clone()
        .ok_or(code::USER_MANAGEMENT_NO_MASTER_KEY)
}

fn users_path(state: &DispatchState) -> Result<std::path::PathBuf, i32> {
    state
        .config
        .load()
        .global
        .users_path
        .clone()
        .ok_or(code::USER_MANAGEMENT_NO_MASTER_KEY)
}

fn handle_master_key(state: &DispatchState) -> Result<serde_json::Value, i32> {
    let path = master_key_path(state)?;
    let key = crypto::generate_master_key();
    crypto::write_master_key(&path, &key).map_err(|_| code::USER_MANAGEMENT_IO)?;
    Ok(serde_json::Value::Null)
}

fn handle_add_user(request: &serde_json::Value, state: &DispatchState) -> Result<serde_json::Value, i32> {
    let (username, password) = username_and_password(request)?;
    let key_path = master_key_path(state)?;
    let path = users_path(state)?;
    let key = crypto::load_master_key(&key_path).map_err(|_| code::USER_MANAGEMENT_IO)?;
    let mut credentials = crypto::load_credentials(&path, &key).unwrap_or_default();
    if credentials.iter().any(|c| c.username == username) {
        return Err(code::USER_MANAGEMENT_DUPLICATE_USER);
    }
    credentials.push(crypto::Credential { username, password });
    crypto::save_credentials(&path, &key, &credentials).map_err(|_| code::USER_MANAGEMENT_IO)?;
    Ok(serde_json::Value::Null)
}

fn handle_update_user(request: &serde_json::Value, state: &DispatchState) -> Result<serde_json::Value, i32> {
    let (username, password) = username_and_password(request)?;
    let key_path = master_key_path(state)?;
    let path = users_path(state)?;
    let key = crypto::load_master_key(&key_path).map_err(|_| code::USER_MANAGEMENT_IO)?;
    let mut credentials = crypto::load_credentials(&path, &key).map_err(|_| code::USER_MANAGEMENT_IO)?;
    let entry = credentials
        .iter_mut()
        .find(|c| c.username == username)
        .ok_or(code::USER_MANAGEMENT_UNKNOWN_USER)?;
    entry.password = password;
    crypto::save_credentials(&path, &key, &credentials).map_err(|_| code::USER_MANAGEMENT_IO)?;
    Ok(serde_json::Value::Null)
}

fn handle_remove_user(request: &serde_json::Value, state: &DispatchState) -> Result<serde_json::Value, i32> {
    let username = request
        .get("Username")
        .and_then(|v| v.as_str())
        .ok_or(code::USER_MANAGEMENT_NO_REQUEST)?
        .to_string();
    let key_path = master_key_path(state)?;
    let path = users_path(state)?;
    let key = crypto::load_master_key(&key_path).map_err(|_| code::USER_MANAGEMENT_IO)?;
    let mut credentials = crypto::load_credentials(&path, &key).map_err(|_| code::USER_MANAGEMENT_IO)?;
    let before = credentials.len();
    credentials.retain(|c| c.username != username);
    if credentials.len() == before {
        return Err(code::USER_MANAGEMENT_UNKNOWN_USER);
    }
    crypto::save_credentials(&path, &key, &credentials).map_err(|_| code::USER_MANAGEMENT_IO)?;
    Ok(serde_json::Value::Null)
}

fn handle_list_users(state: &DispatchState) -> Result<serde_json::Value, i32> {
    let key_path = master_key_path(state)?;
    let path = users_path(state)?;
    let key = crypto::load_master_key(&key_path).map_err(|_| code::USER_MANAGEMENT_IO)?;
    let credentials = crypto::load_credentials(&path, &key).map_err(|_| code::USER_MANAGEMENT_IO)?;
    let usernames: Vec<&str> = credentials.iter().map(|c| c.username.as_str()).collect();
    Ok(serde_json::json!({ "Users": usernames }))
}

fn username_and_password(request: &serde_json::Value) -> Result<(String, String), i32> {
    let username = request
        .get("Username")
        .and_then(|v| v.as_str())
        .ok_or(code::USER_MANAGEMENT_NO_REQUEST)?
        .to_string();
    let password = request
        .get("Password")
        .and_then(|v| v.as_str())
        .ok_or(code::USER_MANAGEMENT_NO_REQUEST)?
        .to_string();
    Ok((username, password))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_three_part_dotted_key() {
        let k = split_dotted_key("pgexporter.primary.host").unwrap();
        assert_eq!(k.section, "pgexporter");
        assert_eq!(k.context.as_deref(), Some("primary"));
        assert_eq!(k.key.as_deref(), Some("host"));
    }

    #[test]
    fn splits_one_part_dotted_key() {
        let k = split_dotted_key("pgexporter").unwrap();
        assert_eq!(k.section, "pgexporter");
        assert!(k.context.is_none());
        assert!(k.key.is_none());
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = Envelope::request(
            command::PING,
            OutputFormat::Text,
            serde_json::Value::Null,
            "12:00:00",
        );
        let encoded = serde_json::to_string(&envelope).unwrap();
        assert!(encoded.contains("\"Command\":5"));
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.header.command, command::PING);
    }

    #[tokio::test]
    async fn plain_envelope_round_trips_over_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let envelope = Envelope::request(
            command::STATUS,
            OutputFormat::Json,
            serde_json::Value::Null,
            "12:00:00",
        );
        write_envelope(&mut a, &Transport::plain(), None, &envelope)
            .await
            .unwrap();
        let received = read_envelope(&mut b, &Transport::plain(), None).await.unwrap();
        assert_eq!(received.header.command, command::STATUS);
    }

    #[tokio::test]
    async fn encrypted_envelope_round_trips_with_the_master_key() {
        let key = crypto::generate_master_key();
        let transport = Transport {
            compression: Compression::Gzip,
            encryption: Encryption::Aes256Cbc,
        };
        let (mut a, mut b) = tokio::io::duplex(8192);
        let envelope = Envelope::request(
            command::PING,
            OutputFormat::Raw,
            serde_json::Value::Null,
            "12:00:00",
        );
        write_envelope(&mut a, &transport, Some(&key), &envelope)
            .await
            .unwrap();
        let received = read_envelope(&mut b, &transport, Some(&key)).await.unwrap();
        assert_eq!(received.header.command, command::PING);
    }

    #[tokio::test]
    async fn ctr_encrypted_envelope_round_trips_with_the_master_key() {
        let key = crypto::generate_master_key();
        let transport = Transport {
            compression: Compression::None,
            encryption: Encryption::Aes256Ctr,
        };
        let (mut a, mut b) = tokio::io::duplex(8192);
        let envelope = Envelope::request(
            command::PING,
            OutputFormat::Raw,
            serde_json::Value::Null,
            "12:00:00",
        );
        write_envelope(&mut a, &transport, Some(&key), &envelope)
            .await
            .unwrap();
        let received = read_envelope(&mut b, &transport, Some(&key)).await.unwrap();
        assert_eq!(received.header.command, command::PING);
    }

    #[tokio::test]
    async fn unknown_command_fails_with_the_envelope_error_code() {
        let state = DispatchState::new(SharedConfig::new(
            crate::config::Config {
                global: test_global(),
                servers: Vec::new(),
                users: Vec::new(),
                admins: Vec::new(),
                metrics: Vec::new(),
                bridge_endpoints: Vec::new(),
            },
            crate::config::reload::Paths {
                main_conf: std::path::PathBuf::new(),
                metrics: std::path::PathBuf::new(),
            },
        ));
        let envelope = Envelope::request(9999, OutputFormat::Text, serde_json::Value::Null, "12:00:00");
        let response = dispatch(envelope, &state, "12:00:00").await;
        let outcome = response.outcome.unwrap();
        assert!(!outcome.status);
        assert_eq!(outcome.error, Some(code::UNKNOWN_COMMAND));
    }

    #[tokio::test]
    async fn ping_succeeds() {
        let state = DispatchState::new(SharedConfig::new(
            crate::config::Config {
                global: test_global(),
                servers: Vec::new(),
                users: Vec::new(),
                admins: Vec::new(),
                metrics: Vec::new(),
                bridge_endpoints: Vec::new(),
            },
            crate::config::reload::Paths {
                main_conf: std::path::PathBuf::new(),
                metrics: std::path::PathBuf::new(),
            },
        ));
        let envelope = Envelope::request(command::PING, OutputFormat::Text, serde_json::Value::Null, "12:00:00");
        let response = dispatch(envelope, &state, "12:00:00").await;
        assert!(response.outcome.unwrap().status);
    }

    fn test_global() -> crate::config::Global {
        crate::config::Global {
            host: "*".to_string(),
            metrics_port: 5002,
            bridge_port: None,
            bridge_json_port: None,
            management_port: None,
            unix_socket_dir: std::path::PathBuf::from("/tmp"),
            blocking_timeout: Duration::from_secs(10),
            authentication_timeout: Duration::from_secs(5),
            metrics_cache_max_age: Duration::from_secs(0),
            metrics_cache_max_size: 262_144,
            bridge_cache_max_age: Duration::from_secs(0),
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
        }
    }
}

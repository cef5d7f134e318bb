//! End-to-end coverage of the management protocol: frame an envelope onto
//! a socket-like stream, dispatch it against real `DispatchState`, and
//! read the framed response back, the way the Unix-socket and TCP
//! listeners do in the running daemon.

use std::path::PathBuf;
use std::time::Duration;

use pgexporter::config::reload::{Paths, SharedConfig};
use pgexporter::config::{AdminConfig, Config, Global};
use pgexporter::management::crypto::{Compression, Encryption};
use pgexporter::management::{command, dispatch, read_envelope, write_envelope, DispatchState, Envelope, OutputFormat, Transport};

fn test_config(admins: Vec<AdminConfig>) -> Config {
    Config {
        global: Global {
            host: "*".to_string(),
            metrics_port: 5002,
            bridge_port: None,
            bridge_json_port: None,
            management_port: None,
            unix_socket_dir: PathBuf::from("/tmp"),
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
            management_compression: Compression::None,
            management_encryption: Encryption::None,
        },
        servers: Vec::new(),
        users: Vec::new(),
        admins,
        metrics: Vec::new(),
        bridge_endpoints: Vec::new(),
    }
}

async fn round_trip(envelope: Envelope, state: &DispatchState) -> Envelope {
    let (mut client, mut server) = tokio::io::duplex(16 * 1024);
    write_envelope(&mut client, &Transport::plain(), None, &envelope)
        .await
        .unwrap();
    let received = read_envelope(&mut server, &Transport::plain(), None).await.unwrap();
    let response = dispatch(received, state, "12:00:00").await;
    write_envelope(&mut server, &Transport::plain(), None, &response)
        .await
        .unwrap();
    drop(server);
    read_envelope(&mut client, &Transport::plain(), None).await.unwrap()
}

#[tokio::test]
async fn ping_status_reset_round_trip_over_a_framed_socket() {
    let state = DispatchState::new(SharedConfig::new(
        test_config(Vec::new()),
        Paths {
            main_conf: PathBuf::new(),
            metrics: PathBuf::new(),
        },
    ));

    let ping = Envelope::request(command::PING, OutputFormat::Json, serde_json::Value::Null, "12:00:00");
    let response = round_trip(ping, &state).await;
    assert!(response.outcome.unwrap().status);

    state.counters.record_query();
    state.counters.record_query();

    let status = Envelope::request(command::STATUS, OutputFormat::Json, serde_json::Value::Null, "12:00:00");
    let response = round_trip(status, &state).await;
    assert!(response.outcome.unwrap().status);
    assert_eq!(response.response["Queries"], 2);

    let reset = Envelope::request(command::RESET, OutputFormat::Json, serde_json::Value::Null, "12:00:00");
    let response = round_trip(reset, &state).await;
    assert!(response.outcome.unwrap().status);
    assert_eq!(state.counters.queries.load(std::sync::atomic::Ordering::Relaxed), 0);
}

#[tokio::test]
async fn conf_get_reads_the_dotted_global_key() {
    let state = DispatchState::new(SharedConfig::new(
        test_config(Vec::new()),
        Paths {
            main_conf: PathBuf::new(),
            metrics: PathBuf::new(),
        },
    ));

    let mut envelope = Envelope::request(command::CONF_GET, OutputFormat::Json, serde_json::Value::Null, "12:00:00");
    envelope.request = serde_json::json!({ "Key": "pgexporter.metrics" });
    let response = round_trip(envelope, &state).await;
    assert!(response.outcome.unwrap().status);
    assert_eq!(response.response["Value"], "5002");
}

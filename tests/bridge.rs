//! End-to-end coverage of the bridge: fetches Prometheus exposition text
//! from a real (in-process) HTTP server over a real TCP socket, merges it
//! with an injected `endpoint` label, and checks the resulting aggregate.

use pgexporter_prometheus::Aggregate;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use pgexporter::bridge::fetch_and_merge;
use pgexporter::config::BridgeEndpoint;

/// Serve one `/metrics` response on `listener` and exit.
async fn serve_once(listener: TcpListener, body: &'static str) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf).await.unwrap();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
}

#[tokio::test]
async fn fetches_and_merges_one_upstream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let body = "# HELP up whether the target is up\n# TYPE up gauge\nup{job=\"db\"} 1\n";
    let server = tokio::spawn(serve_once(listener, body));

    let endpoint = BridgeEndpoint {
        name: format!("127.0.0.1:{}", port),
        host: "127.0.0.1".to_string(),
        port,
        path: "/metrics".to_string(),
    };
    let client = reqwest::Client::new();
    let mut aggregate = Aggregate::new();

    fetch_and_merge(&client, &endpoint, &mut aggregate).await.unwrap();
    server.await.unwrap();

    let record = aggregate.get("up").expect("up metric merged");
    assert_eq!(record.definition_count(), 1);
    let definition = record.definitions().next().unwrap();
    assert_eq!(
        definition.labels.get("endpoint").map(String::as_str),
        Some(format!("127.0.0.1:{}", port).as_str())
    );
    assert_eq!(definition.labels.get("job").map(String::as_str), Some("db"));
}

#[tokio::test]
async fn two_upstreams_stay_as_distinct_definitions() {
    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port_a = listener_a.local_addr().unwrap().port();
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port_b = listener_b.local_addr().unwrap().port();

    let body = "up{job=\"db\"} 1\n";
    let server_a = tokio::spawn(serve_once(listener_a, body));
    let server_b = tokio::spawn(serve_once(listener_b, body));

    let client = reqwest::Client::new();
    let mut aggregate = Aggregate::new();

    fetch_and_merge(
        &client,
        &BridgeEndpoint {
            name: "a".to_string(),
            host: "127.0.0.1".to_string(),
            port: port_a,
            path: "/metrics".to_string(),
        },
        &mut aggregate,
    )
    .await
    .unwrap();
    fetch_and_merge(
        &client,
        &BridgeEndpoint {
            name: "b".to_string(),
            host: "127.0.0.1".to_string(),
            port: port_b,
            path: "/metrics".to_string(),
        },
        &mut aggregate,
    )
    .await
    .unwrap();

    server_a.await.unwrap();
    server_b.await.unwrap();

    let record = aggregate.get("up").unwrap();
    assert_eq!(record.definition_count(), 2);
}

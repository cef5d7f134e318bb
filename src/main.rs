//! Process entry point: loads configuration, binds every configured
//! listener, and runs until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pgexporter::bridge;
use pgexporter::cache::CacheRegion;
use pgexporter::config::reload::{Paths, SharedConfig};
use pgexporter::config;
use pgexporter::engine::Engine;
use pgexporter::http::{self, Response};
use pgexporter::management::{self, crypto, DispatchState};
use pgexporter::telemetry::LogCounterLayer;

const MAIN_UDS: &str = ".s.pgexporter";

#[derive(Debug, Parser)]
#[clap(
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION")
)]
struct Opts {
    /// Path to the main `pgexporter.conf` ini file.
    #[clap(long, default_value = "/etc/pgexporter/pgexporter.conf", env = "PGEXPORTER_CONFIG")]
    config: PathBuf,

    /// Path to the JSON metric-definition catalog.
    #[clap(
        long,
        default_value = "/etc/pgexporter/pgexporter_metrics.json",
        env = "PGEXPORTER_METRICS"
    )]
    metrics: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let paths = Paths {
        main_conf: opts.config.clone(),
        metrics: opts.metrics.clone(),
    };
    let mut loaded = config::load(&paths.main_conf, &paths.metrics)?;
    crypto::load_credentials_into(&mut loaded);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(loaded.global.log_level.clone()));

    let global = loaded.global.clone();
    let shared_config = SharedConfig::new(loaded, paths);
    let state = DispatchState::new(shared_config.clone());

    tracing_subscriber::registry()
        .with(LogCounterLayer::new(state.counters.clone()))
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let engine = Arc::new(Mutex::new(Engine::new(
        &shared_config.load().servers,
        state.counters.clone(),
        state.health.clone(),
    )));
    let http_client = reqwest::Client::new();

    let metrics_cache = Arc::new(CacheRegion::new(global.metrics_cache_max_size));
    let bridge_text_cache = Arc::new(CacheRegion::new(global.bridge_cache_max_size));
    let bridge_json_cache = Arc::new(CacheRegion::new(global.bridge_cache_max_size));

    let mut tasks = Vec::new();

    tasks.push(spawn_metrics_listener(
        &global,
        engine.clone(),
        shared_config.clone(),
        metrics_cache,
    )?);

    if let Some(port) = global.bridge_port {
        tasks.push(spawn_bridge_text_listener(
            &global,
            port,
            http_client.clone(),
            shared_config.clone(),
            bridge_text_cache,
        )?);
    }

    if let Some(port) = global.bridge_json_port {
        tasks.push(spawn_bridge_json_listener(
            &global,
            port,
            http_client.clone(),
            shared_config.clone(),
            bridge_json_cache,
        )?);
    }

    tasks.push(spawn_management_unix_listener(&global, state.clone())?);

    if let Some(port) = global.management_port {
        tasks.push(spawn_management_tcp_listener(&global, port, state.clone())?);
    }

    wait_for_shutdown(&state).await;
    tracing::info!("shutdown requested, stopping listeners");
    for task in tasks {
        task.abort();
    }

    Ok(())
}

fn bind_host(host: &str) -> &str {
    if host == "*" {
        "0.0.0.0"
    } else {
        host
    }
}

async fn wait_for_shutdown(state: &DispatchState) {
    let notified = state.shutdown.notified();
    tokio::pin!(notified);

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
            _ = &mut notified => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = &mut notified => {}
        }
    }
}

fn spawn_metrics_listener(
    global: &config::Global,
    engine: Arc<Mutex<Engine>>,
    shared_config: SharedConfig,
    cache: Arc<CacheRegion>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let addr: SocketAddr = format!("{}:{}", bind_host(&global.host), global.metrics_port).parse()?;
    let timeout = global.blocking_timeout;
    Ok(tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, error = %e, "could not bind metrics listener");
                return;
            }
        };
        tracing::info!(%addr, "metrics listener bound");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "metrics accept failed");
                    continue;
                }
            };
            let engine = engine.clone();
            let shared_config = shared_config.clone();
            let cache = cache.clone();
            tokio::spawn(async move {
                let result = http::serve_connection(stream, |path| {
                    let engine = engine.clone();
                    let shared_config = shared_config.clone();
                    let cache = cache.clone();
                    async move {
                        match path.as_str() {
                            "/" | "/index.html" => http::landing_page(),
                            "/metrics" => serve_metrics(&engine, &shared_config, &cache, timeout).await,
                            _ => Response::Forbidden,
                        }
                    }
                })
                .await;
                if let Err(e) = result {
                    tracing::debug!(%peer, error = %e, "metrics connection ended with an error");
                }
            });
        }
    }))
}

async fn serve_metrics(
    engine: &Arc<Mutex<Engine>>,
    shared_config: &SharedConfig,
    cache: &CacheRegion,
    timeout: Duration,
) -> Response {
    let guard = match cache.acquire(timeout).await {
        Ok(guard) => guard,
        // Cache lock unavailable in time: serve a fresh, uncached scrape
        // rather than fail the request outright.
        Err(_) => {
            let config = shared_config.load();
            let text = engine.lock().await.scrape(&config).await;
            return http::metrics_response(text);
        }
    };
    if let Some(body) = cache.body(&guard) {
        return http::metrics_response(String::from_utf8_lossy(&body).into_owned());
    }

    let config = shared_config.load();
    let text = engine.lock().await.scrape(&config).await;

    cache.invalidate(&guard);
    if cache.append(&guard, text.as_bytes()) {
        cache.finalize(&guard, config.global.metrics_cache_max_age);
    }
    http::metrics_response(text)
}

fn spawn_bridge_text_listener(
    global: &config::Global,
    port: u16,
    client: reqwest::Client,
    shared_config: SharedConfig,
    cache: Arc<CacheRegion>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let addr: SocketAddr = format!("{}:{}", bind_host(&global.host), port).parse()?;
    let timeout = global.blocking_timeout;
    Ok(tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, error = %e, "could not bind bridge listener");
                return;
            }
        };
        tracing::info!(%addr, "bridge listener bound");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "bridge accept failed");
                    continue;
                }
            };
            let client = client.clone();
            let shared_config = shared_config.clone();
            let cache = cache.clone();
            tokio::spawn(async move {
                let result = http::serve_connection(stream, |path| {
                    let client = client.clone();
                    let shared_config = shared_config.clone();
                    let cache = cache.clone();
                    async move {
                        match path.as_str() {
                            "/" | "/index.html" => http::landing_page(),
                            "/metrics" => serve_bridge_text(&client, &shared_config, &cache, timeout).await,
                            _ => Response::Forbidden,
                        }
                    }
                })
                .await;
                if let Err(e) = result {
                    tracing::debug!(%peer, error = %e, "bridge connection ended with an error");
                }
            });
        }
    }))
}

/// Fetch every configured upstream and merge it into one aggregate. Text and
/// JSON callers share this so a single fetch round feeds both renderings.
async fn refresh_bridge_aggregate(shared_config: &SharedConfig, client: &reqwest::Client) -> pgexporter_prometheus::Aggregate {
    let config = shared_config.load();
    let mut aggregate = pgexporter_prometheus::Aggregate::default();
    for endpoint in &config.bridge_endpoints {
        if let Err(e) = bridge::fetch_and_merge(client, endpoint, &mut aggregate).await {
            tracing::warn!(endpoint = %endpoint.name, error = %e, "bridge fetch failed");
        }
    }
    aggregate
}

async fn serve_bridge_text(
    client: &reqwest::Client,
    shared_config: &SharedConfig,
    cache: &CacheRegion,
    timeout: Duration,
) -> Response {
    let guard = match cache.acquire(timeout).await {
        Ok(guard) => guard,
        Err(_) => return Response::ServiceUnavailable,
    };
    if let Some(body) = cache.body(&guard) {
        return http::metrics_response(String::from_utf8_lossy(&body).into_owned());
    }

    let aggregate = refresh_bridge_aggregate(shared_config, client).await;
    let text = aggregate.render_text();

    cache.invalidate(&guard);
    if cache.append(&guard, text.as_bytes()) {
        cache.finalize(&guard, shared_config.load().global.bridge_cache_max_age);
    }
    http::metrics_response(text)
}

fn spawn_bridge_json_listener(
    global: &config::Global,
    port: u16,
    client: reqwest::Client,
    shared_config: SharedConfig,
    cache: Arc<CacheRegion>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let addr: SocketAddr = format!("{}:{}", bind_host(&global.host), port).parse()?;
    let timeout = global.blocking_timeout;
    Ok(tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, error = %e, "could not bind bridge-json listener");
                return;
            }
        };
        tracing::info!(%addr, "bridge-json listener bound");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "bridge-json accept failed");
                    continue;
                }
            };
            let client = client.clone();
            let shared_config = shared_config.clone();
            let cache = cache.clone();
            tokio::spawn(async move {
                let result = http::serve_connection(stream, |path| {
                    let client = client.clone();
                    let shared_config = shared_config.clone();
                    let cache = cache.clone();
                    async move {
                        match path.as_str() {
                            "/" | "/index.html" => http::landing_page(),
                            "/metrics" => serve_bridge_json(&client, &shared_config, &cache, timeout).await,
                            _ => Response::Forbidden,
                        }
                    }
                })
                .await;
                if let Err(e) = result {
                    tracing::debug!(%peer, error = %e, "bridge-json connection ended with an error");
                }
            });
        }
    }))
}

/// Unlike the text endpoints, a cache-lock timeout here is answered with a
/// hard error rather than an uncached fallback render.
async fn serve_bridge_json(
    client: &reqwest::Client,
    shared_config: &SharedConfig,
    cache: &CacheRegion,
    timeout: Duration,
) -> Response {
    let guard = match cache.acquire(timeout).await {
        Ok(guard) => guard,
        Err(_) => return Response::ServiceUnavailable,
    };
    if let Some(body) = cache.body(&guard) {
        return http::json_response(String::from_utf8_lossy(&body).into_owned());
    }

    let aggregate = refresh_bridge_aggregate(shared_config, client).await;
    let json = bridge::render_json(&aggregate);

    cache.invalidate(&guard);
    if cache.append(&guard, json.as_bytes()) {
        cache.finalize(&guard, shared_config.load().global.bridge_cache_max_age);
    }
    http::json_response(json)
}

fn spawn_management_unix_listener(
    global: &config::Global,
    state: DispatchState,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let socket_path = global.unix_socket_dir.join(MAIN_UDS);
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!(path = %socket_path.display(), "management unix listener bound");

    Ok(tokio::spawn(async move {
        loop {
            let (stream, _addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "management accept failed");
                    continue;
                }
            };
            let state = state.clone();
            tokio::spawn(async move {
                serve_management_connection(stream, state, &management::Transport::plain(), None).await;
            });
        }
    }))
}

fn spawn_management_tcp_listener(
    global: &config::Global,
    port: u16,
    state: DispatchState,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let addr: SocketAddr = format!("{}:{}", bind_host(&global.host), port).parse()?;
    let transport = management::Transport {
        compression: global.management_compression,
        encryption: global.management_encryption,
    };
    let master_key = global
        .master_key_path
        .clone()
        .and_then(|path| crypto::load_master_key(&path).ok());
    let tls_acceptor = build_management_tls_acceptor(global)?;

    Ok(tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, error = %e, "could not bind management tcp listener");
                return;
            }
        };
        tracing::info!(%addr, "management tcp listener bound");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "management tcp accept failed");
                    continue;
                }
            };
            let state = state.clone();
            let transport = transport;
            let master_key = master_key.clone();
            let tls_acceptor = tls_acceptor.clone();
            tokio::spawn(async move {
                let admins = state.config.load();
                let lookup = {
                    let admins = admins.admins.clone();
                    move |username: &str| {
                        admins
                            .iter()
                            .find(|a| a.username == username)
                            .map(|a| a.password.clone())
                    }
                };

                match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(mut tls_stream) => {
                            if let Err(e) = management::auth::authenticate(&mut tls_stream, lookup).await {
                                tracing::warn!(%peer, error = %e, "management authentication failed");
                                return;
                            }
                            serve_management_connection(tls_stream, state, &transport, master_key.as_deref()).await;
                        }
                        Err(e) => tracing::warn!(%peer, error = %e, "management tls handshake failed"),
                    },
                    None => {
                        let mut stream = stream;
                        if let Err(e) = management::auth::authenticate(&mut stream, lookup).await {
                            tracing::warn!(%peer, error = %e, "management authentication failed");
                            return;
                        }
                        serve_management_connection(stream, state, &transport, master_key.as_deref()).await;
                    }
                }
            });
        }
    }))
}

fn build_management_tls_acceptor(global: &config::Global) -> anyhow::Result<Option<tokio_rustls::TlsAcceptor>> {
    let (Some(cert_path), Some(key_path)) = (&global.tls_cert_file, &global.tls_key_file) else {
        return Ok(None);
    };

    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(std::fs::File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(std::fs::File::open(key_path)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    let server_config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Some(tokio_rustls::TlsAcceptor::from(Arc::new(server_config))))
}

async fn serve_management_connection<S>(
    mut stream: S,
    state: DispatchState,
    transport: &management::Transport,
    master_key: Option<&[u8]>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let envelope = match management::read_envelope(&mut stream, transport, master_key).await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "management connection closed");
                return;
            }
        };
        let now = humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string();
        let response = management::dispatch(envelope, &state, &now).await;
        if let Err(e) = management::write_envelope(&mut stream, transport, master_key, &response).await {
            tracing::warn!(error = %e, "could not write management response");
            return;
        }
    }
}

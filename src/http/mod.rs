//! Minimal hand-rolled HTTP/1.1 server: parses only a `GET <path> HTTP/1.1`
//! request line plus a terminating blank line, and replies with
//! chunked-encoded bodies. No keep-alive — each connection is handled to
//! completion and closed.

use snafu::Snafu;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Snafu)]
pub enum HttpError {
    #[snafu(display("i/o error: {}", source))]
    Io { source: std::io::Error },
    #[snafu(display("malformed request line: {:?}", line))]
    MalformedRequestLine { line: String },
}

impl From<std::io::Error> for HttpError {
    fn from(source: std::io::Error) -> Self {
        HttpError::Io { source }
    }
}

/// What the caller's routing table decided to do with a request.
pub enum Response {
    Ok {
        content_type: &'static str,
        body: String,
    },
    Forbidden,
    BadRequest,
    /// Cache lock could not be acquired within the blocking timeout on an
    /// endpoint where serving uncached is not an acceptable fallback
    /// (bridge-JSON has no uncached path, so it fails outright).
    ServiceUnavailable,
}

const LANDING_PAGE: &str = "<html><body><a href=\"/metrics\">/metrics</a></body></html>";

/// Parsed request line: only the path is needed for routing.
struct Request {
    method: String,
    path: String,
}

async fn read_request_line<R>(reader: &mut BufReader<R>) -> Result<Option<Request>, HttpError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let line = line.trim_end();
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or_else(|| HttpError::MalformedRequestLine {
        line: line.to_string(),
    })?;
    let path = parts.next().ok_or_else(|| HttpError::MalformedRequestLine {
        line: line.to_string(),
    })?;
    let _version = parts.next();

    // Drain headers up to the terminating blank line.
    loop {
        let mut header_line = String::new();
        let n = reader.read_line(&mut header_line).await?;
        if n == 0 || header_line.trim_end().is_empty() {
            break;
        }
    }

    Ok(Some(Request {
        method: method.to_string(),
        path: path.to_string(),
    }))
}

/// Serve one accepted connection by asking `route` to produce a [`Response`]
/// for each request path, then writing it chunk-encoded. `route` is async so
/// it can acquire the response cache and, on a miss, run a scrape before
/// answering.
pub async fn serve_connection<S, F, Fut>(stream: S, route: F) -> Result<(), HttpError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Response>,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let Some(request) = read_request_line(&mut reader).await? else {
        return Ok(());
    };

    let response = if request.method != "GET" {
        Response::BadRequest
    } else {
        route(request.path).await
    };

    write_response(&mut write_half, response).await?;
    write_half.shutdown().await?;
    Ok(())
}

async fn write_response<W>(stream: &mut W, response: Response) -> Result<(), HttpError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    match response {
        Response::Ok { content_type, body } => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\n\r\n",
                content_type
            );
            stream.write_all(header.as_bytes()).await?;
            write_chunk(stream, body.as_bytes()).await?;
            write_final_chunk(stream).await?;
        }
        Response::Forbidden => {
            stream
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await?;
        }
        Response::BadRequest => {
            stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await?;
        }
        Response::ServiceUnavailable => {
            stream
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n")
                .await?;
        }
    }
    Ok(())
}

async fn write_chunk<W>(stream: &mut W, bytes: &[u8]) -> Result<(), HttpError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    if bytes.is_empty() {
        return Ok(());
    }
    stream
        .write_all(format!("{:x}\r\n", bytes.len()).as_bytes())
        .await?;
    stream.write_all(bytes).await?;
    stream.write_all(b"\r\n").await?;
    Ok(())
}

async fn write_final_chunk<W>(stream: &mut W) -> Result<(), HttpError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(b"0\r\n\r\n").await?;
    Ok(())
}

pub fn landing_page() -> Response {
    Response::Ok {
        content_type: "text/html",
        body: LANDING_PAGE.to_string(),
    }
}

pub fn metrics_response(body: String) -> Response {
    Response::Ok {
        content_type: "text/plain; version=0.0.1; charset=utf-8",
        body,
    }
}

pub fn json_response(body: String) -> Response {
    Response::Ok {
        content_type: "application/json",
        body,
    }
}

/// The routing table shared by the metrics and bridge ports: `/` and
/// `/index.html` serve the landing page, `/metrics` serves the awaited
/// `body()` future, and everything else is 403.
pub async fn route_standard<F, Fut>(path: &str, body: F) -> Response
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = String>,
{
    match path {
        "/" | "/index.html" => landing_page(),
        "/metrics" => metrics_response(body().await),
        _ => Response::Forbidden,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn serves_metrics_route() {
        let (client, server) = duplex(4096);
        let serve = tokio::spawn(async move {
            serve_connection(server, |path| async move {
                route_standard(&path, || async { "up 1\n".to_string() }).await
            })
            .await
            .unwrap();
        });

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        write_half.shutdown().await.unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut read_half, &mut out)
            .await
            .unwrap();
        serve.await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("up 1\n"));
    }

    #[tokio::test]
    async fn unknown_path_is_forbidden() {
        let (client, server) = duplex(4096);
        let serve = tokio::spawn(async move {
            serve_connection(server, |path| async move {
                route_standard(&path, || async { String::new() }).await
            })
            .await
            .unwrap();
        });

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half
            .write_all(b"GET /secret HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        write_half.shutdown().await.unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut read_half, &mut out)
            .await
            .unwrap();
        serve.await.unwrap();

        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 403"));
    }
}

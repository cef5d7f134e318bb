//! Per-server PostgreSQL client: startup, authentication, simple query
//! protocol, and row extraction into tuples.

pub mod auth;
pub mod scram;

use std::collections::HashMap;
use std::time::Duration;

use snafu::Snafu;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::wire::{self, FrameStatus, WireError};

#[derive(Debug, Snafu)]
pub enum PgError {
    #[snafu(display("wire error: {}", source))]
    Wire { source: WireError },
    #[snafu(display("authentication failed: {}", reason))]
    AuthFailed { reason: String },
    #[snafu(display("authentication timed out"))]
    AuthTimeout,
    #[snafu(display("server error [{}]: {}", code, message))]
    ServerError { code: String, message: String },
    #[snafu(display("connection is not valid"))]
    Invalid,
    #[snafu(display("unsupported authentication method requested: {}", code))]
    UnsupportedAuth { code: i32 },
}

impl From<WireError> for PgError {
    fn from(source: WireError) -> Self {
        PgError::Wire { source }
    }
}

/// One declared output column: name plus the role it plays when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Label,
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

/// One result row: nullable string per declared column.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub server_index: usize,
    pub values: Vec<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub tag: String,
    pub columns: Vec<String>,
    pub tuples: Vec<Tuple>,
}

/// An open, authenticated connection to one PostgreSQL server/database.
pub struct Connection<S> {
    stream: S,
    pub parameters: HashMap<String, String>,
    pub server_index: usize,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send `StartupMessage` and drive the authentication dialogue to
    /// completion, stashing `ParameterStatus` messages along the way.
    pub async fn startup(
        mut stream: S,
        server_index: usize,
        user: &str,
        database: &str,
        password: &str,
        auth_timeout: Duration,
    ) -> Result<Connection<S>, PgError> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&196608i32.to_be_bytes());
        wire::put_cstr(&mut payload, "user");
        wire::put_cstr(&mut payload, user);
        wire::put_cstr(&mut payload, "database");
        wire::put_cstr(&mut payload, database);
        wire::put_cstr(&mut payload, "application_name");
        wire::put_cstr(&mut payload, "pgexporter");
        payload.push(0);

        wire::write_untagged_frame(&mut stream, &payload).await?;

        let mut parameters = HashMap::new();

        loop {
            let frame = match wire::read_frame_timeout(&mut stream, auth_timeout).await {
                FrameStatus::Ok(frame) => frame,
                FrameStatus::Zero => return Err(PgError::AuthTimeout),
                FrameStatus::Error(e) => return Err(e.into()),
            };

            match frame.kind {
                b'R' => {
                    let request = auth::parse_auth_request(&frame.payload)?;
                    match request {
                        auth::AuthRequest::Ok => break,
                        auth::AuthRequest::CleartextPassword => {
                            wire::write_frame(&mut stream, b'p', password.as_bytes()).await?;
                        }
                        auth::AuthRequest::Md5Password { salt } => {
                            let response = auth::md5_password_response(user, password, salt);
                            wire::write_frame(&mut stream, b'p', response.as_bytes()).await?;
                        }
                        auth::AuthRequest::SaslScramSha256 => {
                            match auth::run_scram(&mut stream, password).await? {
                                // run_scram already consumed the trailing
                                // AuthenticationOk frame, so there's nothing
                                // left to read before the ParameterStatus
                                // drain loop below.
                                auth::AuthOutcome::Success => break,
                                auth::AuthOutcome::BadPassword => {
                                    return Err(PgError::AuthFailed {
                                        reason: "bad password".into(),
                                    })
                                }
                                auth::AuthOutcome::Timeout => return Err(PgError::AuthTimeout),
                                auth::AuthOutcome::Error(reason) => {
                                    return Err(PgError::AuthFailed { reason })
                                }
                            }
                        }
                        auth::AuthRequest::Unsupported(code) => {
                            return Err(PgError::UnsupportedAuth { code })
                        }
                        auth::AuthRequest::SaslContinue(_) | auth::AuthRequest::SaslFinal(_) => {
                            return Err(PgError::AuthFailed {
                                reason: "unexpected SASL message outside dialogue".into(),
                            })
                        }
                    }
                }
                b'E' => {
                    let (code, message) = parse_error_response(&frame.payload);
                    return Err(PgError::ServerError { code, message });
                }
                _ => {
                    // ParameterStatus/BackendKeyData/NoticeResponse before AuthenticationOk
                    // is non-standard but harmless to ignore here.
                }
            }
        }

        // Drain ParameterStatus / BackendKeyData until ReadyForQuery.
        loop {
            let frame = match wire::read_frame_timeout(&mut stream, auth_timeout).await {
                FrameStatus::Ok(frame) => frame,
                FrameStatus::Zero => return Err(PgError::AuthTimeout),
                FrameStatus::Error(e) => return Err(e.into()),
            };
            match frame.kind {
                b'S' => {
                    if let Ok((key, rest)) = wire::get_cstr(&frame.payload, 0) {
                        if let Ok((value, _)) = wire::get_cstr(&frame.payload, rest) {
                            parameters.insert(key, value);
                        }
                    }
                }
                b'Z' => break,
                b'E' => {
                    let (code, message) = parse_error_response(&frame.payload);
                    return Err(PgError::ServerError { code, message });
                }
                _ => {}
            }
        }

        Ok(Connection {
            stream,
            parameters,
            server_index,
        })
    }

    /// Send `Query` and reconstruct the result from `RowDescription`,
    /// `DataRow`s, and the closing `ReadyForQuery`. If `column_names` is
    /// non-empty, it overrides the server-reported column names.
    pub async fn simple_query(
        &mut self,
        sql: &str,
        column_names: &[String],
    ) -> Result<QueryResult, PgError> {
        let mut payload = Vec::new();
        wire::put_cstr(&mut payload, sql);
        wire::write_frame(&mut self.stream, b'Q', &payload).await?;

        let mut result = QueryResult::default();
        let mut field_count = 0usize;

        loop {
            let frame = match wire::read_frame(&mut self.stream).await {
                FrameStatus::Ok(frame) => frame,
                FrameStatus::Zero => return Err(PgError::Invalid),
                FrameStatus::Error(e) => return Err(e.into()),
            };

            match frame.kind {
                b'T' => {
                    let count = wire::get_u16(&frame.payload, 0)? as usize;
                    field_count = count;
                    let mut names = Vec::with_capacity(count);
                    let mut offset = 2;
                    for _ in 0..count {
                        let (name, next) = wire::get_cstr(&frame.payload, offset)?;
                        names.push(name);
                        offset = next + 18; // table oid, attnum, type oid, typlen, typmod, format
                    }
                    result.columns = if column_names.len() == names.len() {
                        column_names.to_vec()
                    } else {
                        names
                    };
                }
                b'D' => {
                    let mut offset = 0;
                    let count = wire::get_u16(&frame.payload, offset)? as usize;
                    offset += 2;
                    let mut values = Vec::with_capacity(count.max(field_count));
                    for _ in 0..count {
                        let len = wire::get_i32(&frame.payload, offset)?;
                        offset += 4;
                        if len < 0 {
                            values.push(None);
                        } else {
                            let len = len as usize;
                            let bytes = frame
                                .payload
                                .get(offset..offset + len)
                                .ok_or_else(|| WireError::Malformed {
                                    reason: "truncated DataRow column".into(),
                                })?;
                            values.push(Some(String::from_utf8_lossy(bytes).into_owned()));
                            offset += len;
                        }
                    }
                    result.tuples.push(Tuple {
                        server_index: self.server_index,
                        values,
                    });
                }
                b'C' => {
                    result.tag = String::from_utf8_lossy(&frame.payload).into_owned();
                }
                b'E' => {
                    let (code, message) = parse_error_response(&frame.payload);
                    // Drain to ReadyForQuery so the connection stays usable.
                    loop {
                        match wire::read_frame(&mut self.stream).await {
                            FrameStatus::Ok(f) if f.kind == b'Z' => break,
                            FrameStatus::Ok(_) => continue,
                            _ => break,
                        }
                    }
                    return Err(PgError::ServerError { code, message });
                }
                b'Z' => break,
                _ => {}
            }
        }

        Ok(result)
    }

    /// `SELECT 1;` connection hygiene probe, per the engine's reconciliation
    /// step.
    pub async fn validate(&mut self) -> bool {
        self.simple_query("SELECT 1;", &[]).await.is_ok()
    }

    pub async fn set_statement_timeout(&mut self, millis: u64) -> Result<(), PgError> {
        self.simple_query(&format!("SET statement_timeout = {};", millis), &[])
            .await?;
        Ok(())
    }

    pub async fn terminate(&mut self) -> Result<(), PgError> {
        wire::write_frame(&mut self.stream, b'X', &[]).await?;
        Ok(())
    }
}

fn parse_error_response(payload: &[u8]) -> (String, String) {
    let mut code = String::new();
    let mut message = String::new();
    let mut offset = 0;
    while offset < payload.len() && payload[offset] != 0 {
        let field = payload[offset];
        offset += 1;
        let Ok((value, next)) = wire::get_cstr(payload, offset) else {
            break;
        };
        match field {
            b'C' => code = value,
            b'M' => message = value,
            _ => {}
        }
        offset = next;
    }
    (code, message)
}

/// Connect to `host:port` over TCP. TLS upgrade happens in
/// [`crate::pg::tls`] before this function is reached, when configured.
pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, PgError> {
    TcpStream::connect((host, port))
        .await
        .map_err(|e| PgError::Wire {
            source: WireError::Io { source: e },
        })
}

pub mod tls {
    //! Optional TLS upgrade via an `SSLRequest` negotiation followed by a
    //! `tokio-rustls` handshake.
    use std::sync::Arc;

    use tokio::net::TcpStream;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::TlsConnector;

    use super::PgError;
    use crate::wire::{self, WireError};

    /// Send `SSLRequest` and, if the server agrees (`S`), complete a TLS
    /// handshake using `connector`.
    pub async fn negotiate(
        mut stream: TcpStream,
        server_name: &str,
        connector: Arc<tokio_rustls::rustls::ClientConfig>,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, PgError> {
        let request = 80877103i32.to_be_bytes();
        wire::write_untagged_frame(&mut stream, &request)
            .await
            .map_err(PgError::from)?;

        let mut reply = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut stream, &mut reply)
            .await
            .map_err(|e| PgError::Wire {
                source: WireError::Io { source: e },
            })?;
        if reply[0] != b'S' {
            return Err(PgError::ServerError {
                code: "08004".into(),
                message: "server declined SSLRequest".into(),
            });
        }

        let name = ServerName::try_from(server_name.to_owned()).map_err(|_| PgError::ServerError {
            code: "08004".into(),
            message: format!("invalid TLS server name: {}", server_name),
        })?;
        let connector = TlsConnector::from(connector);
        connector
            .connect(name, stream)
            .await
            .map_err(|e| PgError::Wire {
                source: WireError::Io { source: e },
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_error_response_fields() {
        let mut payload = Vec::new();
        payload.push(b'C');
        wire::put_cstr(&mut payload, "42601");
        payload.push(b'M');
        wire::put_cstr(&mut payload, "syntax error");
        payload.push(0);

        let (code, message) = parse_error_response(&payload);
        assert_eq!(code, "42601");
        assert_eq!(message, "syntax error");
    }
}

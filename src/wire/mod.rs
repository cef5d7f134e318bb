//! PostgreSQL frontend/backend v3 framing primitives.
//!
//! A frame is `kind: u8, length: u32 (includes itself), payload: [u8]`. The
//! startup frame is the one exception: it has no `kind` byte. Reads return an
//! explicit [`FrameStatus`] trichotomy so call sites stay linear across
//! partial reads and clean/unclean disconnects.

use std::time::Duration;

use snafu::Snafu;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Snafu)]
pub enum WireError {
    #[snafu(display("connection closed by peer"))]
    Closed,
    #[snafu(display("i/o error: {}", source))]
    Io { source: std::io::Error },
    #[snafu(display("read timed out"))]
    Timeout,
    #[snafu(display("malformed frame: {}", reason))]
    Malformed { reason: String },
}

impl From<std::io::Error> for WireError {
    fn from(source: std::io::Error) -> Self {
        WireError::Io { source }
    }
}

/// Outcome of attempting to read one frame.
#[derive(Debug)]
pub enum FrameStatus {
    /// Peer closed the connection cleanly.
    Zero,
    /// A complete frame is available.
    Ok(Frame),
    /// An unrecoverable I/O fault occurred.
    Error(WireError),
}

/// One PostgreSQL backend/frontend message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: u8, payload: Vec<u8>) -> Self {
        Frame { kind, payload }
    }
}

/// Read one length-prefixed, kind-tagged frame from `stream`.
pub async fn read_frame<R: AsyncReadExt + Unpin>(stream: &mut R) -> FrameStatus {
    let mut kind_buf = [0u8; 1];
    match stream.read_exact(&mut kind_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return FrameStatus::Zero,
        Err(e) => return FrameStatus::Error(e.into()),
    }

    let mut len_buf = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut len_buf).await {
        return FrameStatus::Error(e.into());
    }
    let total_len = u32::from_be_bytes(len_buf) as usize;
    if total_len < 4 {
        return FrameStatus::Error(WireError::Malformed {
            reason: format!("frame length {} smaller than its own prefix", total_len),
        });
    }
    let payload_len = total_len - 4;
    let mut payload = vec![0u8; payload_len];
    if let Err(e) = stream.read_exact(&mut payload).await {
        return FrameStatus::Error(e.into());
    }

    FrameStatus::Ok(Frame::new(kind_buf[0], payload))
}

/// Same as [`read_frame`] but gives up with [`FrameStatus::Zero`] once
/// `timeout` elapses without a complete frame arriving.
pub async fn read_frame_timeout<R: AsyncReadExt + Unpin>(
    stream: &mut R,
    timeout: Duration,
) -> FrameStatus {
    match tokio::time::timeout(timeout, read_frame(stream)).await {
        Ok(status) => status,
        Err(_) => FrameStatus::Zero,
    }
}

/// Read a startup-style frame: `length: u32 (includes itself), payload`, with
/// no leading kind byte. Used only for the very first message on a new
/// connection (`StartupMessage`, `SSLRequest`, `CancelRequest`).
pub async fn read_untagged_frame<R: AsyncReadExt + Unpin>(
    stream: &mut R,
) -> Result<Vec<u8>, WireError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let total_len = u32::from_be_bytes(len_buf) as usize;
    if total_len < 4 {
        return Err(WireError::Malformed {
            reason: format!("frame length {} smaller than its own prefix", total_len),
        });
    }
    let mut payload = vec![0u8; total_len - 4];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write a kind-tagged frame, looping until the whole buffer is flushed.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    stream: &mut W,
    kind: u8,
    payload: &[u8],
) -> Result<(), WireError> {
    let total_len = (payload.len() + 4) as u32;
    let mut buf = Vec::with_capacity(5 + payload.len());
    buf.push(kind);
    buf.extend_from_slice(&total_len.to_be_bytes());
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await?;
    Ok(())
}

/// Write an untagged (startup-style) frame.
pub async fn write_untagged_frame<W: AsyncWriteExt + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> Result<(), WireError> {
    let total_len = (payload.len() + 4) as u32;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&total_len.to_be_bytes());
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await?;
    Ok(())
}

/// Append a NUL-terminated string to `buf`.
pub fn put_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Read a NUL-terminated string starting at `offset`, returning the string
/// and the offset just past its terminator.
pub fn get_cstr(data: &[u8], offset: usize) -> Result<(String, usize), WireError> {
    let rest = &data[offset..];
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| WireError::Malformed {
            reason: "unterminated string".into(),
        })?;
    let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
    Ok((s, offset + nul + 1))
}

pub fn get_u16(data: &[u8], offset: usize) -> Result<u16, WireError> {
    let bytes: [u8; 2] = data
        .get(offset..offset + 2)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| WireError::Malformed {
            reason: "truncated u16".into(),
        })?;
    Ok(u16::from_be_bytes(bytes))
}

pub fn get_u32(data: &[u8], offset: usize) -> Result<u32, WireError> {
    let bytes: [u8; 4] = data
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| WireError::Malformed {
            reason: "truncated u32".into(),
        })?;
    Ok(u32::from_be_bytes(bytes))
}

pub fn get_i32(data: &[u8], offset: usize) -> Result<i32, WireError> {
    get_u32(data, offset).map(|v| v as i32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn round_trips_tagged_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b'Q', b"SELECT 1").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        match read_frame(&mut cursor).await {
            FrameStatus::Ok(frame) => {
                assert_eq!(frame.kind, b'Q');
                assert_eq!(frame.payload, b"SELECT 1");
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_stream_is_zero() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(matches!(read_frame(&mut cursor).await, FrameStatus::Zero));
    }

    #[test]
    fn cstr_round_trips() {
        let mut buf = Vec::new();
        put_cstr(&mut buf, "hello");
        let (s, next) = get_cstr(&buf, 0).unwrap();
        assert_eq!(s, "hello");
        assert_eq!(next, buf.len());
    }
}

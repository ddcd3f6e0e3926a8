//! Content-Length message framing.
//!
//! Every message on a stdio channel is
//!
//! ```text
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of UTF-8 JSON>
//! ```
//!
//! The reader pulls the header one byte at a time until `\r\n\r\n`, so it
//! never consumes bytes belonging to the next message. Reads that report
//! `WouldBlock` are retried after [`POLL_BACKOFF`]; end-of-stream and any
//! other I/O error end the current read.

use std::io::ErrorKind;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Delay before retrying a read that would block.
pub const POLL_BACKOFF: Duration = Duration::from_millis(10);

/// Upper bound on header bytes before the terminator.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Upper bound on a single message body.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length:";

/// Framing failures.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed (process may have exited)")]
    Closed,

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length value: '{0}'")]
    InvalidContentLength(String),

    #[error("header exceeds size limit")]
    HeaderTooLarge,

    #[error("message body of {0} bytes exceeds limit")]
    BodyTooLarge(usize),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

// ─── Encoding ────────────────────────────────────────────────────────────────

/// Serialize `message` to compact JSON and prepend the length header.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one framed message as a single write, then flush.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let frame = encode_frame(message)?;
    trace!(bytes = frame.len(), "writing frame");
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// Read exactly one framed message and parse its body as JSON.
pub async fn read_message<R>(reader: &mut R) -> Result<Value, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let header = read_header(reader).await?;
    let len = parse_content_length(&header)?;
    if len > MAX_BODY_BYTES {
        return Err(FrameError::BodyTooLarge(len));
    }

    let mut body = vec![0u8; len];
    read_exact_polling(reader, &mut body).await?;
    trace!(bytes = len, "read frame body");
    Ok(serde_json::from_slice(&body)?)
}

/// Accumulate bytes up to and including `\r\n\r\n`.
async fn read_header<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    while !header.ends_with(HEADER_TERMINATOR) {
        if header.len() >= MAX_HEADER_BYTES {
            return Err(FrameError::HeaderTooLarge);
        }
        read_exact_polling(reader, &mut byte).await?;
        header.push(byte[0]);
    }
    Ok(header)
}

/// Locate `Content-Length:` in a header block and parse its value.
pub fn parse_content_length(header: &[u8]) -> Result<usize, FrameError> {
    let text = String::from_utf8_lossy(header);
    for line in text.split("\r\n") {
        let Some(prefix) = line.get(..CONTENT_LENGTH.len()) else {
            continue;
        };
        if prefix.eq_ignore_ascii_case(CONTENT_LENGTH) {
            let value = line[CONTENT_LENGTH.len()..].trim();
            return value
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.to_string()));
        }
    }
    Err(FrameError::MissingContentLength)
}

/// Fill `buf` completely, sleeping on `WouldBlock` instead of failing.
async fn read_exact_polling<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => return Err(FrameError::Closed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tokio::time::sleep(POLL_BACKOFF).await;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

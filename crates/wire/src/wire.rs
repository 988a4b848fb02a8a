//! Length-prefixed JSON framing. See spec §4.5: each message is a 4-byte
//! big-endian unsigned length followed by a UTF-8 JSON object payload;
//! messages larger than 1 MiB are rejected.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted message size, per spec §4.5.
pub const MAX_MESSAGE_BYTES: u32 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: u32, limit: u32 },

    #[error("connection closed")]
    Closed,

    #[error("malformed JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes `value` as a length-prefixed JSON frame.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(value)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::TooLarge { size: u32::MAX, limit: MAX_MESSAGE_BYTES })?;
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge { size: len, limit: MAX_MESSAGE_BYTES });
    }
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

/// Decodes a JSON payload (without its length prefix).
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Reads one length-prefixed frame's raw JSON payload from `reader`.
/// Returns `Err(ProtocolError::Closed)` if the peer closed before sending
/// any bytes of the length prefix (a clean EOF between messages).
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Closed)
        }
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge { size: len, limit: MAX_MESSAGE_BYTES });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Writes `payload` (already-encoded JSON, without a length prefix) as one
/// length-prefixed frame.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::TooLarge { size: u32::MAX, limit: MAX_MESSAGE_BYTES })?;
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge { size: len, limit: MAX_MESSAGE_BYTES });
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads and decodes one [`crate::Request`] frame.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<crate::Request, ProtocolError> {
    let payload = read_message(reader).await?;
    decode(&payload)
}

/// Encodes and writes one [`crate::Response`] frame.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &crate::Response,
) -> Result<(), ProtocolError> {
    let payload = encode(response)?;
    // `encode` already wrote the length prefix; write the raw frame as-is.
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

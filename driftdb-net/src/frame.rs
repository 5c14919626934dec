//! Checksummed frame codec
//!
//! Every RPC message travels in a single frame:
//!
//! ```text
//! +------------+------------+--------------+
//! | Length(4B) | CRC32(4B)  | Payload(var) |
//! +------------+------------+--------------+
//! ```
//!
//! Integers are little-endian; the checksum covers the payload only. A
//! length above [`MAX_FRAME_SIZE`] or a checksum mismatch is treated as
//! corruption and tears down the connection.

use bytes::{BufMut, BytesMut};
use crc32fast::Hasher;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use driftdb_core::{Error, Result};

use crate::wire::{Request, Response};

/// Upper bound on a single frame's payload
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Writes one frame to the stream
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::InvalidArgument(format!(
            "frame payload of {} bytes exceeds limit",
            payload.len()
        )));
    }

    let mut hasher = Hasher::new();
    hasher.update(payload);

    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    buf.put_u32_le(payload.len() as u32);
    buf.put_u32_le(hasher.finalize());
    buf.put_slice(payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;

    Ok(())
}

/// Reads one frame from the stream, verifying length and checksum
///
/// A clean end-of-stream before the header surfaces as
/// [`Error::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    if let Err(err) = reader.read_exact(&mut header).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(Error::ConnectionClosed);
        }
        return Err(err.into());
    }

    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if length > MAX_FRAME_SIZE {
        return Err(Error::Corruption(format!(
            "frame length {} exceeds limit",
            length
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(err)
        }
    })?;

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != expected {
        return Err(Error::Corruption("frame checksum mismatch".to_string()));
    }

    Ok(payload)
}

/// Serializes a request for framing
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    bincode::serialize(request).map_err(|err| Error::Serialization(err.to_string()))
}

/// Deserializes a framed request
pub fn decode_request(payload: &[u8]) -> Result<Request> {
    bincode::deserialize(payload).map_err(|err| Error::Serialization(err.to_string()))
}

/// Serializes a response for framing
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    bincode::serialize(response).map_err(|err| Error::Serialization(err.to_string()))
}

/// Deserializes a framed response
pub fn decode_response(payload: &[u8]) -> Result<Response> {
    bincode::deserialize(payload).map_err(|err| Error::Serialization(err.to_string()))
}

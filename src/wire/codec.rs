//! Frame encoding and decoding.
//!
//! ```text
//! +--------+--------+-----------------+---------------------+
//! | method | format | length (u32 BE) | payload (length B)  |
//! +--------+--------+-----------------+---------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::messages::{Method, WireFormat, WireMessage};
use crate::error::CodecError;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 6;

/// Largest payload a frame may carry (64 MiB).
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message kind.
    pub method: Method,
    /// Payload serialization format.
    pub format: WireFormat,
    /// Payload length in bytes.
    pub length: usize,
}

impl FrameHeader {
    /// Parses the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] if `buf` is shorter than a header,
    /// [`CodecError::UnknownMethod`] / [`CodecError::UnknownFormat`] for
    /// unrecognised tags, [`CodecError::TooLarge`] past [`MAX_PAYLOAD`].
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let head = buf.get(..HEADER_LEN).ok_or(CodecError::Truncated)?;
        let Ok([method, format, l0, l1, l2, l3]) = <[u8; HEADER_LEN]>::try_from(head) else {
            return Err(CodecError::Truncated);
        };
        let method = Method::from_tag(method).ok_or(CodecError::UnknownMethod(method))?;
        let format = WireFormat::from_tag(format).ok_or(CodecError::UnknownFormat(format))?;
        let length = u32::from_be_bytes([l0, l1, l2, l3]) as usize;
        if length > MAX_PAYLOAD {
            return Err(CodecError::TooLarge(length));
        }
        Ok(Self {
            method,
            format,
            length,
        })
    }
}

/// Serializes `message` into a complete frame.
///
/// # Errors
///
/// Returns a serializer error, or [`CodecError::TooLarge`] if the payload
/// exceeds [`MAX_PAYLOAD`].
pub fn encode(message: &WireMessage, format: WireFormat) -> Result<Bytes, CodecError> {
    let payload = match message {
        WireMessage::Profiler(info) => to_payload(info, format)?,
        WireMessage::Result(snapshot) => to_payload(snapshot, format)?,
    };
    if payload.len() > MAX_PAYLOAD {
        return Err(CodecError::TooLarge(payload.len()));
    }
    let length = u32::try_from(payload.len()).map_err(|_| CodecError::TooLarge(payload.len()))?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u8(message.method().tag());
    frame.put_u8(format.tag());
    frame.put_u32(length);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Decodes one frame from the front of `buf`.
///
/// Returns the message and the number of bytes consumed.
///
/// # Errors
///
/// Any header error from [`FrameHeader::parse`], [`CodecError::Truncated`]
/// if the payload is incomplete, or a deserializer error.
pub fn decode(buf: &[u8]) -> Result<(WireMessage, usize), CodecError> {
    let header = FrameHeader::parse(buf)?;
    let end = HEADER_LEN + header.length;
    let payload = buf.get(HEADER_LEN..end).ok_or(CodecError::Truncated)?;
    let message = decode_payload(header, payload)?;
    Ok((message, end))
}

/// Reads exactly one frame from `reader`.
///
/// This is the inspector-side counterpart of the server's broadcast.
///
/// # Errors
///
/// I/O errors from the reader (including unexpected EOF), header errors,
/// or a deserializer error.
pub async fn read_message<R>(reader: &mut R) -> Result<WireMessage, CodecError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = [0_u8; HEADER_LEN];
    reader.read_exact(&mut head).await?;
    let header = FrameHeader::parse(&head)?;
    let mut payload = vec![0_u8; header.length];
    reader.read_exact(&mut payload).await?;
    decode_payload(header, &payload)
}

fn decode_payload(header: FrameHeader, payload: &[u8]) -> Result<WireMessage, CodecError> {
    Ok(match header.method {
        Method::Profiler => WireMessage::Profiler(from_payload(payload, header.format)?),
        Method::Result => WireMessage::Result(from_payload(payload, header.format)?),
    })
}

fn to_payload<T: Serialize>(value: &T, format: WireFormat) -> Result<Vec<u8>, CodecError> {
    Ok(match format {
        WireFormat::Json => serde_json::to_vec(value)?,
        WireFormat::Bincode => bincode::serialize(value)?,
    })
}

fn from_payload<T: DeserializeOwned>(payload: &[u8], format: WireFormat) -> Result<T, CodecError> {
    Ok(match format {
        WireFormat::Json => serde_json::from_slice(payload)?,
        WireFormat::Bincode => bincode::deserialize(payload)?,
    })
}

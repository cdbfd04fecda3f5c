//! # Quill Wire
//!
//! Value model and framed binary codec for messages exchanged with the
//! quill master over the request/reply channel.
//!
//! Every message on the wire is a single [`WireValue`] (in practice a map)
//! framed with a u32 big-endian length prefix. The codec is a
//! `tokio_util::codec` [`Encoder`]/[`Decoder`] pair so a channel is just a
//! `Framed` transport.
//!
//! [`Encoder`]: tokio_util::codec::Encoder
//! [`Decoder`]: tokio_util::codec::Decoder

pub mod codec;
pub mod de;
pub mod error;
pub mod ser;
pub mod types;

pub use codec::WireCodec;
pub use de::WireDeserializer;
pub use error::WireError;
pub use ser::WireSerializer;
pub use types::{WireMap, WireValue};

use bytes::Bytes;

/// Encode a single value to its unframed wire representation.
pub fn encode(value: &WireValue) -> Bytes {
    let mut ser = WireSerializer::new();
    ser.write_value(value);
    ser.into_bytes()
}

/// Decode a single value from its unframed wire representation.
///
/// Trailing bytes after the value are rejected: a payload carries exactly
/// one value.
pub fn decode(buf: Bytes) -> Result<WireValue, WireError> {
    let mut de = WireDeserializer::new(buf);
    let value = de.read_value()?;
    if !de.is_empty() {
        return Err(WireError::TrailingBytes(de.remaining()));
    }
    Ok(value)
}

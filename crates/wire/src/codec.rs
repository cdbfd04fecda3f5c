use crate::{de::WireDeserializer, error::WireError, ser::WireSerializer, types::WireValue};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a single frame. File content moves in server-sized
/// chunks well below this; a larger prefix means a desynchronized or
/// hostile peer.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct WireCodec;

impl Encoder<WireValue> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, item: WireValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut ser = WireSerializer::with_capacity(WireSerializer::estimate_size(&item));
        ser.write_value(&item);
        let body = ser.into_inner();

        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = WireValue;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(len));
        }

        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let body = src.split_to(len).freeze();
        let mut de = WireDeserializer::new(body);
        let value = de.read_value()?;
        if !de.is_empty() {
            return Err(WireError::TrailingBytes(de.remaining()));
        }
        Ok(Some(value))
    }
}

use crate::{
    error::WireError,
    types::{WireMap, WireValue},
};
use bytes::{Buf, Bytes};

/// Maximum nesting depth accepted by the deserializer. Quill payloads are
/// shallow maps; anything deeper is a malformed or hostile frame.
const MAX_DEPTH: usize = 32;

pub struct WireDeserializer {
    buffer: Bytes,
}

impl WireDeserializer {
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn read_value(&mut self) -> Result<WireValue, WireError> {
        self.read_value_at_depth(0)
    }

    fn need(&self, len: usize) -> Result<(), WireError> {
        if self.buffer.remaining() < len {
            return Err(WireError::UnexpectedEof {
                needed: len - self.buffer.remaining(),
            });
        }
        Ok(())
    }

    fn read_len(&mut self) -> Result<usize, WireError> {
        self.need(4)?;
        Ok(self.buffer.get_u32() as usize)
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_len()?;
        self.need(len)?;
        let raw = self.buffer.split_to(len);
        Ok(String::from_utf8(raw.to_vec())?)
    }

    fn read_value_at_depth(&mut self, depth: usize) -> Result<WireValue, WireError> {
        if depth > MAX_DEPTH {
            return Err(WireError::DepthExceeded);
        }
        self.need(1)?;
        let type_id = self.buffer.get_u8();
        match type_id {
            0 => Ok(WireValue::Null),
            1 => {
                self.need(1)?;
                Ok(WireValue::Bool(self.buffer.get_u8() != 0))
            }
            2 => {
                self.need(8)?;
                Ok(WireValue::Int(self.buffer.get_i64()))
            }
            3 => Ok(WireValue::Str(self.read_string()?)),
            4 => {
                let len = self.read_len()?;
                self.need(len)?;
                // split_to keeps this zero-copy against the frame buffer
                Ok(WireValue::Bytes(self.buffer.split_to(len)))
            }
            5 => {
                let count = self.read_len()?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read_value_at_depth(depth + 1)?);
                }
                Ok(WireValue::List(items))
            }
            6 => {
                let count = self.read_len()?;
                let mut map = WireMap::default();
                for _ in 0..count {
                    let key = self.read_string()?;
                    let value = self.read_value_at_depth(depth + 1)?;
                    map.insert(key, value);
                }
                Ok(WireValue::Map(map))
            }
            other => Err(WireError::InvalidTypeId(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode};

    fn roundtrip(value: WireValue) {
        let encoded = encode(&value);
        let decoded = decode(encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_scalar_roundtrips() {
        roundtrip(WireValue::Null);
        roundtrip(WireValue::Bool(true));
        roundtrip(WireValue::Int(-42));
        roundtrip(WireValue::Int(i64::MAX));
        roundtrip(WireValue::Str(String::new()));
        roundtrip(WireValue::Str("files/base/top.qs".into()));
        roundtrip(WireValue::Bytes(Bytes::from_static(b"\x00\x01\xff")));
    }

    #[test]
    fn test_container_roundtrips() {
        roundtrip(WireValue::List(vec![
            WireValue::Str("a/one.txt".into()),
            WireValue::Str("a/two.txt".into()),
        ]));

        let map: WireValue = [
            ("cmd".to_owned(), WireValue::from("_serve_file")),
            ("path".to_owned(), WireValue::from("a/one.txt")),
            ("loc".to_owned(), WireValue::Int(0)),
            ("data".to_owned(), WireValue::Bytes(Bytes::from_static(b"x"))),
        ]
        .into_iter()
        .collect();
        roundtrip(map);
    }

    #[test]
    fn test_invalid_type_id() {
        let err = decode(Bytes::from_static(&[9])).unwrap_err();
        assert!(matches!(err, WireError::InvalidTypeId(9)));
    }

    #[test]
    fn test_truncated_string() {
        // Str with declared length 4 but only 2 bytes of content
        let err = decode(Bytes::from_static(&[3, 0, 0, 0, 4, b'a', b'b'])).unwrap_err();
        assert!(matches!(err, WireError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = encode(&WireValue::Bool(false)).to_vec();
        encoded.push(0);
        let err = decode(Bytes::from(encoded)).unwrap_err();
        assert!(matches!(err, WireError::TrailingBytes(1)));
    }
}

use crate::types::WireValue;
use bytes::{BufMut, Bytes, BytesMut};

pub struct WireSerializer {
    buffer: BytesMut,
}

impl Default for WireSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl WireSerializer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Estimate the encoded size of a value for capacity planning.
    pub fn estimate_size(value: &WireValue) -> usize {
        match value {
            WireValue::Null => 1,
            WireValue::Bool(_) => 2,
            WireValue::Int(_) => 9,
            WireValue::Str(s) => 5 + s.len(),
            WireValue::Bytes(b) => 5 + b.len(),
            WireValue::List(items) => {
                5 + items.iter().map(Self::estimate_size).sum::<usize>()
            }
            WireValue::Map(map) => {
                5 + map
                    .iter()
                    .map(|(k, v)| 4 + k.len() + Self::estimate_size(v))
                    .sum::<usize>()
            }
        }
    }

    pub fn into_inner(self) -> BytesMut {
        self.buffer
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_value(&mut self, value: &WireValue) {
        self.buffer.reserve(Self::estimate_size(value));
        self.buffer.put_u8(value.type_id());
        match value {
            WireValue::Null => {}
            WireValue::Bool(b) => self.buffer.put_u8(u8::from(*b)),
            WireValue::Int(i) => self.buffer.put_i64(*i),
            WireValue::Str(s) => {
                self.buffer.put_u32(s.len() as u32);
                self.buffer.extend_from_slice(s.as_bytes());
            }
            WireValue::Bytes(b) => {
                self.buffer.put_u32(b.len() as u32);
                self.buffer.extend_from_slice(b);
            }
            WireValue::List(items) => {
                self.buffer.put_u32(items.len() as u32);
                for item in items {
                    self.write_value(item);
                }
            }
            WireValue::Map(map) => {
                self.buffer.put_u32(map.len() as u32);
                for (key, val) in map {
                    self.buffer.put_u32(key.len() as u32);
                    self.buffer.extend_from_slice(key.as_bytes());
                    self.write_value(val);
                }
            }
        }
    }
}

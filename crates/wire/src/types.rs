use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::error::WireError;

/// Map payload used by every request and most replies.
pub type WireMap = FxHashMap<String, WireValue>;

/// An enum representing any value the quill wire format can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Zero-copy binary data, used for file chunks and encrypted payloads.
    Bytes(Bytes),
    List(Vec<WireValue>),
    Map(WireMap),
}

impl WireValue {
    /// Wire type ID, also the first byte of the encoded form.
    pub fn type_id(&self) -> u8 {
        match self {
            WireValue::Null => 0,
            WireValue::Bool(_) => 1,
            WireValue::Int(_) => 2,
            WireValue::Str(_) => 3,
            WireValue::Bytes(_) => 4,
            WireValue::List(_) => 5,
            WireValue::Map(_) => 6,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WireValue::Null => "null",
            WireValue::Bool(_) => "bool",
            WireValue::Int(_) => "int",
            WireValue::Str(_) => "str",
            WireValue::Bytes(_) => "bytes",
            WireValue::List(_) => "list",
            WireValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            WireValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            WireValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn try_into_string(self) -> Result<String, WireError> {
        match self {
            WireValue::Str(s) => Ok(s),
            other => Err(WireError::TypeMismatch {
                expected: "str",
                actual: other.type_name(),
            }),
        }
    }

    pub fn try_into_bytes(self) -> Result<Bytes, WireError> {
        match self {
            WireValue::Bytes(b) => Ok(b),
            other => Err(WireError::TypeMismatch {
                expected: "bytes",
                actual: other.type_name(),
            }),
        }
    }

    pub fn try_into_list(self) -> Result<Vec<WireValue>, WireError> {
        match self {
            WireValue::List(l) => Ok(l),
            other => Err(WireError::TypeMismatch {
                expected: "list",
                actual: other.type_name(),
            }),
        }
    }

    pub fn try_into_map(self) -> Result<WireMap, WireError> {
        match self {
            WireValue::Map(m) => Ok(m),
            other => Err(WireError::TypeMismatch {
                expected: "map",
                actual: other.type_name(),
            }),
        }
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::Int(v)
    }
}

impl From<u64> for WireValue {
    fn from(v: u64) -> Self {
        WireValue::Int(v as i64)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        WireValue::Str(v.to_owned())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        WireValue::Str(v)
    }
}

impl From<Bytes> for WireValue {
    fn from(v: Bytes) -> Self {
        WireValue::Bytes(v)
    }
}

impl From<Vec<WireValue>> for WireValue {
    fn from(v: Vec<WireValue>) -> Self {
        WireValue::List(v)
    }
}

impl From<WireMap> for WireValue {
    fn from(v: WireMap) -> Self {
        WireValue::Map(v)
    }
}

impl FromIterator<(String, WireValue)> for WireValue {
    fn from_iter<T: IntoIterator<Item = (String, WireValue)>>(iter: T) -> Self {
        WireValue::Map(iter.into_iter().collect())
    }
}

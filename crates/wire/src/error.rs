use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in string value: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid type ID: {0}")]
    InvalidTypeId(u8),

    #[error("unexpected end of buffer: needed {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),

    #[error("value nesting exceeds the maximum depth")]
    DepthExceeded,

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

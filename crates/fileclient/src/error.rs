use thiserror::Error;

/// Errors surfaced by file client operations.
///
/// Expected "not found" conditions are deliberately not errors: resolve,
/// hash and cache probes return `None`, and `get_file`/`get_url` return
/// `Ok(None)` when the destination parent is missing and directory
/// creation was not requested. Only genuinely exceptional conditions land
/// here.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unsupported path: {0}")]
    UnsupportedPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] quill_wire::WireError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("error reading {url}: {reason}")]
    RemoteResource { url: String, reason: String },

    #[error("session crypto error: {0}")]
    Crypto(String),

    #[error("master request timed out: {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),
}

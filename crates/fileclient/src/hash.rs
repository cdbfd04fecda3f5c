//! Digest selection and file hashing.
//!
//! The algorithm is a closed enum resolved when the configuration is
//! deserialized; unknown names fail at config load, not at call time.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::error::ClientError;

/// Fixed digest used when hashing a plain local path that carries no
/// `quill://` scheme.
pub const FALLBACK_HASH: HashKind = HashKind::Sha256;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    #[default]
    Sha256,
    Sha512,
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKind::Sha256 => f.write_str("sha256"),
            HashKind::Sha512 => f.write_str("sha512"),
        }
    }
}

impl FromStr for HashKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(HashKind::Sha256),
            "sha512" => Ok(HashKind::Sha512),
            other => Err(ClientError::Config(format!(
                "unknown hash algorithm: {other}"
            ))),
        }
    }
}

/// Digest of one file plus the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHash {
    pub hsum: String,
    pub hash_type: HashKind,
}

/// Hash a file with the given algorithm, reading in fixed-size chunks.
pub async fn hash_path(path: &Path, kind: HashKind) -> Result<String, ClientError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; READ_CHUNK];
    match kind {
        HashKind::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashKind::Sha512 => {
            let mut hasher = Sha512::new();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Hash an absolute local path with the fallback digest.
///
/// Used by both backends when `hash_file` is handed a path without the
/// `quill://` scheme. A missing file is an expected probe, not an error.
pub async fn hash_local_fallback(path: &str) -> Result<Option<FileHash>, ClientError> {
    let candidate = Path::new(path);
    let is_file = match tokio::fs::metadata(candidate).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    };
    if !is_file {
        warn!(path, "file is not present to generate hash");
        return Ok(None);
    }
    let hsum = hash_path(candidate, FALLBACK_HASH).await?;
    Ok(Some(FileHash {
        hsum,
        hash_type: FALLBACK_HASH,
    }))
}

//! # Quill fileclient
//!
//! Agent-side client for the quill master file server. Fetches files,
//! directory trees, and remote URLs into the local agent cache.
//!
//! ## Features
//!
//! - Remote backend over the encrypted master channel, with chunked
//!   transfer of arbitrarily large files
//! - Local backend reading master-style file roots directly, for
//!   masterless operation
//! - `quill://` locator handling and per-environment cache layout
//! - HTTP/HTTPS fetching into the external-files cache

pub mod channel;
pub mod client;
pub mod config;
pub mod crypt;
pub mod error;
pub mod hash;
pub mod local;
pub mod paths;
pub mod remote;

pub use channel::MasterChannel;
pub use client::{FileClient, create_http_client, get_file_client};
pub use config::{ClientConfig, ClientKind, HttpConfig};
pub use crypt::{AesCrypticle, Crypticle, PlaintextCrypticle};
pub use error::ClientError;
pub use hash::{FileHash, HashKind};
pub use local::LocalClient;
pub use remote::RemoteClient;

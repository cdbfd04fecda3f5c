use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::hash::HashKind;

const DEFAULT_USER_AGENT: &str = concat!("quill-agent/", env!("CARGO_PKG_VERSION"));

/// Which backend answers file requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    #[default]
    Remote,
    Local,
}

/// HTTP settings for the generic URL fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Overall timeout for one request, in seconds. 0 disables it.
    pub timeout_secs: u64,

    /// Connection establishment timeout, in seconds. 0 disables it.
    pub connect_timeout_secs: u64,

    /// Whether to follow redirects (limited to 10 hops).
    pub follow_redirects: bool,

    /// User agent string sent on external downloads.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Process-wide client options.
///
/// The cache layout produced under `cache_root`:
/// `files/<env>/<rel>` for master-sourced files, `localfiles/<rel>` for
/// explicitly cached local files, `extrn_files/<env>/<host>/<path>` for
/// generic URL downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root of the agent-side file cache.
    pub cache_root: PathBuf,

    /// Ordered file roots per environment, used by the local backend.
    pub file_roots: HashMap<String, Vec<PathBuf>>,

    /// Digest used for `hash_file` on resolved locators.
    pub hash_kind: HashKind,

    /// External nodes classifier command, if any.
    pub external_nodes: Option<String>,

    /// This node's identifier, passed to the classifier and the master.
    pub node_id: String,

    /// Master channel address, `host:port`.
    pub master_addr: String,

    /// Backend selection.
    pub client_kind: ClientKind,

    /// Master reply timeout, in seconds. 0 waits forever.
    pub request_timeout_secs: u64,

    pub http: HttpConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("/var/cache/quill"),
            file_roots: HashMap::new(),
            hash_kind: HashKind::default(),
            external_nodes: None,
            node_id: String::new(),
            master_addr: "127.0.0.1:4505".to_owned(),
            client_kind: ClientKind::default(),
            request_timeout_secs: 60,
            http: HttpConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(ClientError::Config("cache_root must be set".into()));
        }
        if self.external_nodes.is_some() && self.node_id.is_empty() {
            return Err(ClientError::Config(
                "node_id must be set when external_nodes is configured".into(),
            ));
        }
        if self.client_kind == ClientKind::Remote && self.master_addr.is_empty() {
            return Err(ClientError::Config(
                "master_addr must be set for the remote client".into(),
            ));
        }
        Ok(())
    }
}

//! File client backed by the master file server channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use quill_wire::{WireMap, WireValue};

use crate::channel::MasterChannel;
use crate::client::{FileClient, create_http_client};
use crate::config::ClientConfig;
use crate::crypt::Crypticle;
use crate::error::ClientError;
use crate::hash::{self, FileHash};
use crate::paths;

/// Convert a decrypted reply into JSON for callers that want plain data.
fn wire_to_json(value: &WireValue) -> JsonValue {
    match value {
        WireValue::Null => JsonValue::Null,
        WireValue::Bool(b) => JsonValue::Bool(*b),
        WireValue::Int(i) => JsonValue::from(*i),
        WireValue::Str(s) => JsonValue::String(s.clone()),
        WireValue::Bytes(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
        WireValue::List(items) => JsonValue::Array(items.iter().map(wire_to_json).collect()),
        WireValue::Map(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), wire_to_json(v)))
                .collect(),
        ),
    }
}

/// Talk to the master file server over the persistent encrypted channel.
///
/// One exchange is in flight at a time; concurrent callers of the same
/// instance queue on the channel lock.
pub struct RemoteClient<T = TcpStream> {
    config: ClientConfig,
    http: reqwest::Client,
    crypticle: Arc<dyn Crypticle>,
    channel: Mutex<MasterChannel<T>>,
}

impl RemoteClient<TcpStream> {
    /// Connect to the configured master. The session key behind
    /// `crypticle` must already be established.
    pub async fn connect(
        config: ClientConfig,
        crypticle: Arc<dyn Crypticle>,
    ) -> Result<Self, ClientError> {
        let channel =
            MasterChannel::connect(&config.master_addr, config.request_timeout()).await?;
        Self::from_channel(config, channel, crypticle)
    }
}

impl<T> RemoteClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Build a client over an already-connected channel.
    pub fn from_channel(
        config: ClientConfig,
        channel: MasterChannel<T>,
        crypticle: Arc<dyn Crypticle>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let http = create_http_client(&config.http)?;
        Ok(Self {
            config,
            http,
            crypticle,
            channel: Mutex::new(channel),
        })
    }

    /// Wrap a load in the outer envelope: `{enc: "aes", load: <sealed>}`.
    fn seal(&self, load: WireMap) -> Result<WireValue, ClientError> {
        let encoded = quill_wire::encode(&WireValue::Map(load));
        let sealed = self.crypticle.encrypt(&encoded)?;
        Ok([
            ("enc".to_owned(), WireValue::from("aes")),
            ("load".to_owned(), WireValue::Bytes(Bytes::from(sealed))),
        ]
        .into_iter()
        .collect())
    }

    fn open(&self, reply: WireValue) -> Result<WireValue, ClientError> {
        let sealed = reply
            .try_into_bytes()
            .map_err(|e| ClientError::Protocol(format!("reply is not a sealed payload: {e}")))?;
        let plain = self.crypticle.decrypt(&sealed)?;
        Ok(quill_wire::decode(Bytes::from(plain))?)
    }

    /// One sealed request/reply exchange.
    async fn request(&self, load: WireMap) -> Result<WireValue, ClientError> {
        let envelope = self.seal(load)?;
        let reply = self.channel.lock().await.exchange(envelope).await?;
        self.open(reply)
    }

    async fn request_list(&self, load: WireMap) -> Result<Vec<String>, ClientError> {
        let reply = self.request(load).await?;
        reply
            .try_into_list()
            .map_err(|e| ClientError::Protocol(format!("expected a listing reply: {e}")))?
            .into_iter()
            .map(|item| {
                item.try_into_string()
                    .map_err(|e| ClientError::Protocol(format!("non-string listing entry: {e}")))
            })
            .collect()
    }
}

fn load_for(cmd: &str, env: &str) -> WireMap {
    [
        ("cmd".to_owned(), WireValue::from(cmd)),
        ("env".to_owned(), WireValue::from(env)),
    ]
    .into_iter()
    .collect()
}

#[async_trait]
impl<T> FileClient for RemoteClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Chunked fetch loop. `loc` is carried as an explicit accumulator of
    /// bytes written so far; the server alone decides chunk boundaries,
    /// and an empty chunk ends the transfer.
    async fn get_file(
        &self,
        path: &str,
        dest: Option<&Path>,
        makedirs: bool,
        env: &str,
    ) -> Result<Option<PathBuf>, ClientError> {
        let rel = paths::check_proto(path)?.to_owned();

        let mut writer: Option<tokio::fs::File> = None;
        let mut final_dest: Option<PathBuf> = None;
        if let Some(dest) = dest {
            if let Some(parent) = dest.parent() {
                if !tokio::fs::try_exists(parent).await? {
                    if makedirs {
                        tokio::fs::create_dir_all(parent).await?;
                    } else {
                        // Definite failure, and the master is never contacted
                        return Ok(None);
                    }
                }
            }
            writer = Some(tokio::fs::File::create(dest).await?);
            final_dest = Some(dest.to_path_buf());
        }

        let mut loc: u64 = 0;
        loop {
            let load: WireMap = [
                ("cmd".to_owned(), WireValue::from("_serve_file")),
                ("path".to_owned(), WireValue::from(rel.clone())),
                ("env".to_owned(), WireValue::from(env)),
                ("loc".to_owned(), WireValue::Int(loc as i64)),
            ]
            .into_iter()
            .collect();

            let mut reply = self
                .request(load)
                .await?
                .try_into_map()
                .map_err(|e| ClientError::Protocol(format!("bad _serve_file reply: {e}")))?;

            let data = match reply.remove("data") {
                Some(WireValue::Bytes(b)) => b,
                Some(WireValue::Null) | None => Bytes::new(),
                Some(other) => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected data field of type {}",
                        other.type_name()
                    )));
                }
            };
            let server_dest = match reply.remove("dest") {
                Some(WireValue::Str(s)) if !s.is_empty() => Some(s),
                _ => None,
            };

            if data.is_empty() {
                if writer.is_none() && loc == 0 {
                    if let Some(server_dest) = server_dest {
                        // Zero-byte file on the master: materialize it
                        // without ever writing a payload.
                        let dest =
                            paths::cache_loc(&self.config.cache_root, &server_dest, env).await?;
                        if !tokio::fs::try_exists(&dest).await? {
                            tokio::fs::File::create(&dest).await?;
                        }
                        paths::restrict_perms(&dest).await?;
                        final_dest = Some(dest);
                    }
                }
                break;
            }

            if writer.is_none() {
                let rel_dest = server_dest.as_deref().unwrap_or(rel.as_str());
                let dest = paths::cache_loc(&self.config.cache_root, rel_dest, env).await?;
                let file = tokio::fs::File::create(&dest).await?;
                paths::restrict_perms(&dest).await?;
                final_dest = Some(dest);
                writer = Some(file);
            }
            if let Some(file) = writer.as_mut() {
                file.write_all(&data).await?;
            }
            loc += data.len() as u64;
        }

        if let Some(file) = writer.as_mut() {
            file.flush().await?;
        }
        if let Some(dest) = &final_dest {
            debug!(path, dest = %dest.display(), bytes = loc, "fetched file from master");
        }
        Ok(final_dest)
    }

    async fn file_list(&self, env: &str) -> Result<Vec<String>, ClientError> {
        self.request_list(load_for("_file_list", env)).await
    }

    async fn file_list_emptydirs(&self, env: &str) -> Result<Vec<String>, ClientError> {
        self.request_list(load_for("_file_list_emptydirs", env)).await
    }

    async fn hash_file(&self, path: &str, env: &str) -> Result<Option<FileHash>, ClientError> {
        let rel = match paths::check_proto(path) {
            Ok(rel) => rel,
            Err(_) => return hash::hash_local_fallback(path).await,
        };

        let load: WireMap = [
            ("cmd".to_owned(), WireValue::from("_file_hash")),
            ("path".to_owned(), WireValue::from(rel)),
            ("env".to_owned(), WireValue::from(env)),
        ]
        .into_iter()
        .collect();

        let mut reply = self
            .request(load)
            .await?
            .try_into_map()
            .map_err(|e| ClientError::Protocol(format!("bad _file_hash reply: {e}")))?;
        let Some(hsum) = reply.remove("hsum") else {
            // Empty mapping: the master has no such file
            return Ok(None);
        };

        let hsum = hsum
            .try_into_string()
            .map_err(|e| ClientError::Protocol(format!("bad hsum field: {e}")))?;
        let hash_type = reply
            .remove("hash_type")
            .ok_or_else(|| ClientError::Protocol("hash reply is missing hash_type".into()))?
            .try_into_string()
            .map_err(|e| ClientError::Protocol(format!("bad hash_type field: {e}")))?
            .parse()
            .map_err(|_| ClientError::Protocol("master uses an unsupported hash type".into()))?;

        Ok(Some(FileHash { hsum, hash_type }))
    }

    async fn list_env(&self, env: &str) -> Result<Vec<String>, ClientError> {
        // Same data as file_list, but deployments differ on the server
        // command name, so this stays its own exchange.
        self.request_list(load_for("_file_list", env)).await
    }

    async fn master_config(&self) -> Result<JsonValue, ClientError> {
        let load: WireMap = [("cmd".to_owned(), WireValue::from("_master_opts"))]
            .into_iter()
            .collect();
        let reply = self.request(load).await?;
        Ok(wire_to_json(&reply))
    }

    async fn ext_nodes(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
        let load: WireMap = [
            ("cmd".to_owned(), WireValue::from("_ext_nodes")),
            ("id".to_owned(), WireValue::from(self.config.node_id.clone())),
        ]
        .into_iter()
        .collect();

        let reply = self
            .request(load)
            .await?
            .try_into_map()
            .map_err(|e| ClientError::Protocol(format!("bad _ext_nodes reply: {e}")))?;

        let mut ret = HashMap::with_capacity(reply.len());
        for (env, classes) in reply {
            let classes = classes
                .try_into_list()
                .map_err(|e| ClientError::Protocol(format!("bad class list: {e}")))?
                .into_iter()
                .map(|c| {
                    c.try_into_string()
                        .map_err(|e| ClientError::Protocol(format!("non-string class: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            ret.insert(env, classes);
        }
        Ok(ret)
    }
}

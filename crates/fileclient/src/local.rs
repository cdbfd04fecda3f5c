//! File client backed by locally mounted file roots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::client::{FileClient, create_http_client};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::hash::{self, FileHash};
use crate::paths;

/// A resolved file: its absolute source path and the relative path it
/// was requested under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    pub full: PathBuf,
    pub rel: String,
}

/// Serve `quill://` locators from the `file_roots` option instead of the
/// master channel.
pub struct LocalClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl LocalClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = create_http_client(&config.http)?;
        Ok(Self { config, http })
    }

    /// Locate a relative path under the environment's ordered roots.
    /// `None` covers both an unknown environment and a plain miss.
    pub async fn find_file(&self, rel: &str, env: &str) -> Result<Option<Found>, ClientError> {
        let Some(roots) = self.config.file_roots.get(env) else {
            return Ok(None);
        };
        for root in roots {
            let full = paths::join_rel(root, rel);
            if let Ok(meta) = tokio::fs::metadata(&full).await {
                if meta.is_file() {
                    return Ok(Some(Found {
                        full,
                        rel: rel.to_owned(),
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Run the configured external nodes command and capture its stdout.
    async fn run_ext_nodes(&self, cmd: &str) -> Result<Vec<u8>, ClientError> {
        let output = tokio::process::Command::new(cmd)
            .arg(&self.config.node_id)
            .output()
            .await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl FileClient for LocalClient {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    async fn get_file(
        &self,
        path: &str,
        dest: Option<&Path>,
        makedirs: bool,
        env: &str,
    ) -> Result<Option<PathBuf>, ClientError> {
        let rel = paths::check_proto(path)?;
        let Some(found) = self.find_file(rel, env).await? else {
            debug!(path, env, "file not found in file_roots");
            return Ok(None);
        };

        let dest = match dest {
            Some(dest) => {
                if let Some(parent) = dest.parent() {
                    if !tokio::fs::try_exists(parent).await? {
                        if makedirs {
                            tokio::fs::create_dir_all(parent).await?;
                        } else {
                            return Ok(None);
                        }
                    }
                }
                dest.to_path_buf()
            }
            None => paths::cache_loc(&self.config.cache_root, rel, env).await?,
        };

        tokio::fs::copy(&found.full, &dest).await?;
        paths::restrict_perms(&dest).await?;
        Ok(Some(dest))
    }

    async fn file_list(&self, env: &str) -> Result<Vec<String>, ClientError> {
        let mut ret = Vec::new();
        let Some(roots) = self.config.file_roots.get(env) else {
            return Ok(ret);
        };
        for root in roots {
            for rel in paths::walk_files(root).await? {
                ret.push(paths::rel_to_wire(&rel));
            }
        }
        Ok(ret)
    }

    async fn file_list_emptydirs(&self, env: &str) -> Result<Vec<String>, ClientError> {
        let mut ret = Vec::new();
        let Some(roots) = self.config.file_roots.get(env) else {
            return Ok(ret);
        };
        for root in roots {
            for rel in paths::walk_empty_dirs(root).await? {
                ret.push(paths::rel_to_wire(&rel));
            }
        }
        Ok(ret)
    }

    async fn hash_file(&self, path: &str, env: &str) -> Result<Option<FileHash>, ClientError> {
        let rel = match paths::check_proto(path) {
            Ok(rel) => rel,
            Err(_) => return hash::hash_local_fallback(path).await,
        };
        let Some(found) = self.find_file(rel, env).await? else {
            return Ok(None);
        };
        let hsum = hash::hash_path(&found.full, self.config.hash_kind).await?;
        Ok(Some(FileHash {
            hsum,
            hash_type: self.config.hash_kind,
        }))
    }

    async fn list_env(&self, env: &str) -> Result<Vec<String>, ClientError> {
        self.file_list(env).await
    }

    async fn master_config(&self) -> Result<JsonValue, ClientError> {
        // There is no master; the local client's own options stand in.
        serde_json::to_value(&self.config)
            .map_err(|e| ClientError::Config(format!("options are not serializable: {e}")))
    }

    async fn ext_nodes(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
        let Some(cmd) = self.config.external_nodes.clone() else {
            return Ok(HashMap::new());
        };
        if which::which(&cmd).is_err() {
            warn!(
                cmd,
                "external nodes controller is not available, verify that it is installed"
            );
            return Ok(HashMap::new());
        }

        let stdout = self.run_ext_nodes(&cmd).await?;
        // Unstructured classifier output means "no assignments", same as
        // output without a class list below.
        let ndata: JsonValue = match serde_json::from_slice(&stdout) {
            Ok(ndata) => ndata,
            Err(e) => {
                warn!(cmd, error = %e, "external nodes output is not structured data");
                return Ok(HashMap::new());
            }
        };
        let env = ndata
            .get("environment")
            .and_then(JsonValue::as_str)
            .unwrap_or("base")
            .to_owned();

        let classes = match ndata.get("classes") {
            Some(JsonValue::Object(map)) => map.keys().cloned().collect(),
            Some(JsonValue::Array(list)) => list
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => return Ok(HashMap::new()),
        };

        Ok(HashMap::from([(env, classes)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientKind;

    async fn local_fixture() -> (tempfile::TempDir, tempfile::TempDir, LocalClient) {
        let roots = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        tokio::fs::create_dir_all(roots.path().join("a/empty")).await.unwrap();
        tokio::fs::write(roots.path().join("a/one.txt"), b"x").await.unwrap();
        tokio::fs::write(roots.path().join("a/two.txt"), b"").await.unwrap();
        tokio::fs::write(roots.path().join("top.qs"), b"state").await.unwrap();

        let config = ClientConfig {
            cache_root: cache.path().to_path_buf(),
            file_roots: HashMap::from([(
                "base".to_owned(),
                vec![roots.path().to_path_buf()],
            )]),
            client_kind: ClientKind::Local,
            ..Default::default()
        };
        let client = LocalClient::new(config).unwrap();
        (roots, cache, client)
    }

    #[tokio::test]
    async fn test_find_file_sentinels() {
        let (_roots, _cache, client) = local_fixture().await;

        assert!(client.find_file("a/one.txt", "base").await.unwrap().is_some());
        assert!(client.find_file("a/one.txt", "prod").await.unwrap().is_none());
        assert!(client.find_file("missing.txt", "base").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ordered_roots_first_match_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        tokio::fs::write(first.path().join("f.txt"), b"first").await.unwrap();
        tokio::fs::write(second.path().join("f.txt"), b"second").await.unwrap();

        let config = ClientConfig {
            cache_root: cache.path().to_path_buf(),
            file_roots: HashMap::from([(
                "base".to_owned(),
                vec![first.path().to_path_buf(), second.path().to_path_buf()],
            )]),
            client_kind: ClientKind::Local,
            ..Default::default()
        };
        let client = LocalClient::new(config).unwrap();

        let found = client.find_file("f.txt", "base").await.unwrap().unwrap();
        assert_eq!(found.full, first.path().join("f.txt"));
    }

    #[tokio::test]
    async fn test_get_file_to_cache_and_explicit_dest() {
        let (_roots, cache, client) = local_fixture().await;

        let cached = client
            .get_file("quill://a/one.txt", None, false, "base")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            cached,
            cache.path().join("files").join("base").join("a/one.txt")
        );
        assert_eq!(tokio::fs::read(&cached).await.unwrap(), b"x");

        // Missing dest parent without makedirs is a definite failure value
        let refused = client
            .get_file(
                "quill://a/one.txt",
                Some(&cache.path().join("nowhere/one.txt")),
                false,
                "base",
            )
            .await
            .unwrap();
        assert!(refused.is_none());
    }

    #[tokio::test]
    async fn test_every_listed_file_is_fetchable() {
        let (_roots, _cache, client) = local_fixture().await;

        let listing = client.file_list("base").await.unwrap();
        assert_eq!(listing.len(), 3);
        for entry in listing {
            let fetched = client
                .get_file(&format!("quill://{entry}"), None, true, "base")
                .await
                .unwrap();
            assert!(fetched.is_some(), "listed file {entry} was unreachable");
        }
    }

    #[tokio::test]
    async fn test_file_list_emptydirs() {
        let (_roots, _cache, client) = local_fixture().await;
        assert_eq!(
            client.file_list_emptydirs("base").await.unwrap(),
            vec!["a/empty".to_owned()]
        );
        assert!(client.file_list_emptydirs("prod").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hash_file_variants() {
        let (roots, _cache, client) = local_fixture().await;

        let hashed = client.hash_file("quill://a/one.txt", "base").await.unwrap().unwrap();
        assert_eq!(hashed.hash_type, client.config().hash_kind);
        assert_eq!(hashed.hsum.len(), 64);

        // Unresolvable locator is a sentinel
        assert!(client.hash_file("quill://nope", "base").await.unwrap().is_none());

        // Plain path falls back to the fixed digest
        let abs = roots.path().join("a/one.txt");
        let fallback = client
            .hash_file(abs.to_str().unwrap(), "base")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fallback.hash_type, crate::hash::FALLBACK_HASH);

        // Missing plain path is a sentinel, never an error
        assert!(client.hash_file("/no/such/path", "base").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ext_nodes_unconfigured_and_missing() {
        let (_roots, _cache, client) = local_fixture().await;
        assert!(client.ext_nodes().await.unwrap().is_empty());

        let mut config = client.config().clone();
        config.external_nodes = Some("definitely-not-a-real-classifier".to_owned());
        config.node_id = "agent-1".to_owned();
        let client = LocalClient::new(config).unwrap();
        assert!(client.ext_nodes().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ext_nodes_parses_classifier_output() {
        use std::os::unix::fs::PermissionsExt;

        let (_roots, _cache, base) = local_fixture().await;
        let bin = tempfile::tempdir().unwrap();
        let script = bin.path().join("classifier");
        tokio::fs::write(
            &script,
            "#!/bin/sh\necho '{\"environment\": \"prod\", \"classes\": [\"web\", \"db\"]}'\n",
        )
        .await
        .unwrap();
        tokio::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .await
            .unwrap();

        let mut config = base.config().clone();
        config.external_nodes = Some(script.to_string_lossy().into_owned());
        config.node_id = "agent-1".to_owned();
        let client = LocalClient::new(config).unwrap();

        let nodes = client.ext_nodes().await.unwrap();
        assert_eq!(nodes["prod"], vec!["web".to_owned(), "db".to_owned()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ext_nodes_unstructured_output_is_empty() {
        use std::os::unix::fs::PermissionsExt;

        let (_roots, _cache, base) = local_fixture().await;
        let bin = tempfile::tempdir().unwrap();
        let script = bin.path().join("classifier");
        tokio::fs::write(&script, "#!/bin/sh\necho 'plain text, not structured data'\n")
            .await
            .unwrap();
        tokio::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .await
            .unwrap();

        let mut config = base.config().clone();
        config.external_nodes = Some(script.to_string_lossy().into_owned());
        config.node_id = "agent-1".to_owned();
        let client = LocalClient::new(config).unwrap();

        assert!(client.ext_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_master_config_reflects_own_options() {
        let (_roots, _cache, client) = local_fixture().await;
        let opts = client.master_config().await.unwrap();
        assert_eq!(opts["client_kind"], "local");
    }
}

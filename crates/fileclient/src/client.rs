//! The file client capability trait and backend factory.
//!
//! The trait's required operations are the per-backend primitives; the
//! provided operations carry the semantics both backends share: cache
//! bookkeeping, directory replication and the generic URL fetcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use rustls_platform_verifier::BuilderVerifierExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::config::{ClientConfig, ClientKind, HttpConfig};
use crate::crypt::Crypticle;
use crate::error::ClientError;
use crate::hash::FileHash;
use crate::local::LocalClient;
use crate::paths::{self, SCHEME};
use crate::remote::RemoteClient;

/// Build the reqwest client used for generic URL downloads.
///
/// TLS is configured explicitly: a ring crypto provider with the
/// platform certificate verifier. The webpki-roots reqwest feature
/// alone installs no provider.
pub fn create_http_client(config: &HttpConfig) -> Result<reqwest::Client, ClientError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Config(format!("TLS protocol setup failed: {e}")))?
        .with_platform_verifier()
        .map_err(|e| ClientError::Config(format!("TLS verifier setup failed: {e}")))?
        .with_no_client_auth();

    let mut builder = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout().is_zero() {
        builder = builder.timeout(config.timeout());
    }
    if !config.connect_timeout().is_zero() {
        builder = builder.connect_timeout(config.connect_timeout());
    }

    builder.build().map_err(ClientError::from)
}

/// Read the `client_kind` option and build the matching backend.
pub async fn get_file_client(
    config: ClientConfig,
    crypticle: Arc<dyn Crypticle>,
) -> Result<Box<dyn FileClient>, ClientError> {
    config.validate()?;
    match config.client_kind {
        ClientKind::Local => Ok(Box::new(LocalClient::new(config)?)),
        ClientKind::Remote => Ok(Box::new(RemoteClient::connect(config, crypticle).await?)),
    }
}

/// Interface to a quill file server tree, backed either by the master
/// channel or by locally mounted file roots.
#[async_trait]
pub trait FileClient: Send + Sync {
    fn config(&self) -> &ClientConfig;

    fn http(&self) -> &reqwest::Client;

    /// Fetch one file. `Ok(None)` means the file does not exist or the
    /// destination parent is missing with `makedirs` off; both are
    /// expected conditions callers branch on.
    async fn get_file(
        &self,
        path: &str,
        dest: Option<&Path>,
        makedirs: bool,
        env: &str,
    ) -> Result<Option<PathBuf>, ClientError>;

    /// Every file in the environment, as `/`-separated relative paths.
    async fn file_list(&self, env: &str) -> Result<Vec<String>, ClientError>;

    /// Every empty directory in the environment.
    async fn file_list_emptydirs(&self, env: &str) -> Result<Vec<String>, ClientError>;

    /// Digest of a `quill://` locator, or of a plain local path with the
    /// fallback digest. `None` when the file cannot be found.
    async fn hash_file(&self, path: &str, env: &str) -> Result<Option<FileHash>, ClientError>;

    /// Listing of the server environment. Same data as [`file_list`] but
    /// kept as its own operation because the server command differs.
    ///
    /// [`file_list`]: FileClient::file_list
    async fn list_env(&self, env: &str) -> Result<Vec<String>, ClientError>;

    /// The effective master configuration as seen by this node.
    async fn master_config(&self) -> Result<JsonValue, ClientError>;

    /// Environment-to-classes mapping from the external nodes system.
    async fn ext_nodes(&self) -> Result<HashMap<String, Vec<String>>, ClientError>;

    /// Pull a file into the agent cache.
    async fn cache_file(&self, path: &str, env: &str) -> Result<Option<PathBuf>, ClientError> {
        self.get_url(path, None, true, env).await
    }

    /// Cache a list of files; missing entries do not abort the batch.
    async fn cache_files(
        &self,
        paths: &[String],
        env: &str,
    ) -> Result<Vec<Option<PathBuf>>, ClientError> {
        let mut ret = Vec::with_capacity(paths.len());
        for path in paths {
            ret.push(self.cache_file(path, env).await?);
        }
        Ok(ret)
    }

    /// Cache every file the server exposes in an environment.
    async fn cache_master(&self, env: &str) -> Result<Vec<Option<PathBuf>>, ClientError> {
        let mut ret = Vec::new();
        for path in self.file_list(env).await? {
            ret.push(self.cache_file(&format!("{SCHEME}{path}"), env).await?);
        }
        Ok(ret)
    }

    /// Cache every listed file whose relative path starts with the
    /// target. This is a raw string-prefix match, so `a/b` also catches
    /// `a/bc`; [`get_dir`] is the subtree-exact variant.
    ///
    /// [`get_dir`]: FileClient::get_dir
    async fn cache_dir(&self, path: &str, env: &str) -> Result<Vec<PathBuf>, ClientError> {
        let target = paths::check_proto(path)?.to_owned();
        let mut ret = Vec::new();
        for entry in self.file_list(env).await? {
            if !entry.starts_with(&target) || entry.trim().is_empty() {
                continue;
            }
            if let Some(local) = self.cache_file(&format!("{SCHEME}{entry}"), env).await? {
                ret.push(local);
            }
        }
        Ok(ret)
    }

    /// Copy a local file into the `localfiles` cache.
    async fn cache_local_file(&self, path: &Path) -> Result<PathBuf, ClientError> {
        let dest = paths::localfiles_dest(&self.config().cache_root, &path.to_string_lossy());
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &dest).await?;
        debug!(src = %path.display(), dest = %dest.display(), "cached local file");
        Ok(dest)
    }

    /// Absolute paths of everything already cached for an environment,
    /// across the `files` and `localfiles` areas, sorted.
    async fn file_local_list(&self, env: &str) -> Result<Vec<PathBuf>, ClientError> {
        let root = &self.config().cache_root;
        let mut ret = paths::walk_absolute(&root.join("files").join(env)).await?;
        ret.extend(paths::walk_absolute(&root.join("localfiles")).await?);
        ret.sort();
        Ok(ret)
    }

    /// Full path of a file if it is already cached on this node.
    async fn is_cached(&self, path: &str, env: &str) -> Result<Option<PathBuf>, ClientError> {
        let root = &self.config().cache_root;
        let rel = match paths::check_proto(path) {
            Ok(rel) => rel,
            Err(_) => path.trim_start_matches('/'),
        };

        let files_dest = paths::join_rel(&root.join("files").join(env), rel);
        if tokio::fs::try_exists(&files_dest).await? {
            return Ok(Some(files_dest));
        }
        let local_dest = paths::localfiles_dest(root, rel);
        if tokio::fs::try_exists(&local_dest).await? {
            return Ok(Some(local_dest));
        }
        Ok(None)
    }

    /// Resolve a dotted manifest name to a cached state file: `a.b` maps
    /// to `quill://a/b.qs`, falling back to `quill://a/b/init.qs`.
    async fn get_manifest(&self, name: &str, env: &str) -> Result<Option<PathBuf>, ClientError> {
        let base = name.replace('.', "/");
        for locator in [
            format!("{SCHEME}{base}.qs"),
            format!("{SCHEME}{base}/init.qs"),
        ] {
            if let Some(dest) = self.cache_file(&locator, env).await? {
                return Ok(Some(dest));
            }
        }
        Ok(None)
    }

    /// Replicate one named subtree under `dest`: fetches every matching
    /// file at its position relative to the target's parent and recreates
    /// matching empty directories. Returns all produced paths, sorted.
    async fn get_dir(
        &self,
        path: &str,
        dest: &Path,
        env: &str,
    ) -> Result<Vec<PathBuf>, ClientError> {
        let target = paths::check_proto(path)?.trim_end_matches('/').to_owned();
        // Everything before the final segment is stripped from fetched
        // paths so only the named directory is recreated under dest.
        let prefix = match target.rsplit_once('/') {
            Some((prefix, _)) => prefix.to_owned(),
            None => String::new(),
        };

        let mut ret = Vec::new();
        for entry in self.file_list(env).await? {
            if !entry.starts_with(&target) {
                continue;
            }
            let rel = entry[prefix.len()..].trim_start_matches('/');
            let file_dest = paths::join_rel(dest, rel);
            if let Some(produced) = self
                .get_file(&format!("{SCHEME}{entry}"), Some(&file_dest), true, env)
                .await?
            {
                ret.push(produced);
            }
        }

        for entry in self.file_list_emptydirs(env).await? {
            if !entry.starts_with(&target) {
                continue;
            }
            let rel = entry[prefix.len()..].trim_start_matches('/');
            let dir_dest = paths::join_rel(dest, rel);
            tokio::fs::create_dir_all(&dir_dest).await?;
            ret.push(dir_dest);
        }

        ret.sort();
        Ok(ret)
    }

    /// Get a single file from a URL: `quill://` locators go through
    /// [`get_file`], anything else is a direct streaming download.
    ///
    /// [`get_file`]: FileClient::get_file
    async fn get_url(
        &self,
        url: &str,
        dest: Option<&Path>,
        makedirs: bool,
        env: &str,
    ) -> Result<Option<PathBuf>, ClientError> {
        if url.starts_with(SCHEME) {
            return self.get_file(url, dest, makedirs, env).await;
        }

        let parsed = Url::parse(url).map_err(|e| ClientError::RemoteResource {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

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
            None => {
                let dest = paths::extrn_dest(&self.config().cache_root, env, &parsed);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                dest
            }
        };

        let response = self
            .http()
            .get(parsed)
            .send()
            .await
            .map_err(|e| ClientError::RemoteResource {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::RemoteResource {
                url: url.to_owned(),
                reason: format!(
                    "HTTP error {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown status")
                ),
            });
        }

        let mut file = tokio::fs::File::create(&dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::RemoteResource {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        paths::restrict_perms(&dest).await?;

        info!(url, dest = %dest.display(), "downloaded external resource");
        Ok(Some(dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory backend standing in for a master: a fixed listing plus
    /// content served straight from a map.
    struct StubClient {
        config: ClientConfig,
        http: reqwest::Client,
        files: HashMap<String, Vec<u8>>,
        empty_dirs: Vec<String>,
    }

    impl StubClient {
        fn new(cache_root: &Path) -> Self {
            let config = ClientConfig {
                cache_root: cache_root.to_path_buf(),
                ..Default::default()
            };
            let http = create_http_client(&config.http).unwrap();
            Self {
                config,
                http,
                files: HashMap::new(),
                empty_dirs: Vec::new(),
            }
        }

        fn with_file(mut self, rel: &str, content: &[u8]) -> Self {
            self.files.insert(rel.to_owned(), content.to_vec());
            self
        }

        fn with_empty_dir(mut self, rel: &str) -> Self {
            self.empty_dirs.push(rel.to_owned());
            self
        }
    }

    #[async_trait]
    impl FileClient for StubClient {
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
            let Some(content) = self.files.get(rel) else {
                return Ok(None);
            };
            let dest = match dest {
                Some(dest) => {
                    if let Some(parent) = dest.parent() {
                        if !parent.exists() {
                            if !makedirs {
                                return Ok(None);
                            }
                            tokio::fs::create_dir_all(parent).await?;
                        }
                    }
                    dest.to_path_buf()
                }
                None => paths::cache_loc(&self.config.cache_root, rel, env).await?,
            };
            tokio::fs::write(&dest, content).await?;
            Ok(Some(dest))
        }

        async fn file_list(&self, _env: &str) -> Result<Vec<String>, ClientError> {
            let mut list: Vec<String> = self.files.keys().cloned().collect();
            list.sort();
            Ok(list)
        }

        async fn file_list_emptydirs(&self, _env: &str) -> Result<Vec<String>, ClientError> {
            Ok(self.empty_dirs.clone())
        }

        async fn hash_file(&self, _: &str, _: &str) -> Result<Option<FileHash>, ClientError> {
            Ok(None)
        }

        async fn list_env(&self, env: &str) -> Result<Vec<String>, ClientError> {
            self.file_list(env).await
        }

        async fn master_config(&self) -> Result<JsonValue, ClientError> {
            Ok(JsonValue::Null)
        }

        async fn ext_nodes(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
            Ok(HashMap::new())
        }
    }

    #[test]
    fn test_http_client_builds_with_defaults() {
        // Client construction must not panic over TLS provider setup
        assert!(create_http_client(&crate::config::HttpConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_cache_dir_matches_raw_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::new(dir.path())
            .with_file("a/b/one.txt", b"1")
            .with_file("a/bc/two.txt", b"2")
            .with_file("z/other.txt", b"3");

        // Raw prefix semantics: a/b matches a/bc as well
        let cached = client.cache_dir("quill://a/b", "base").await.unwrap();
        assert_eq!(cached.len(), 2);
        assert!(cached.iter().all(|p| p.starts_with(dir.path())));

        let listed = client.cache_dir("quill://z", "base").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_get_dir_replicates_named_subtree() {
        let cache = tempfile::tempdir().unwrap();
        let out_root = tempfile::tempdir().unwrap();
        let out = out_root.path().join("out");
        let client = StubClient::new(cache.path())
            .with_file("a/one.txt", b"x")
            .with_file("a/two.txt", b"")
            .with_empty_dir("a/empty");

        let produced = client.get_dir("quill://a", &out, "base").await.unwrap();
        assert_eq!(
            produced,
            vec![out.join("a/empty"), out.join("a/one.txt"), out.join("a/two.txt")]
        );
        assert!(out.join("a/empty").is_dir());
        assert_eq!(tokio::fs::read(out.join("a/one.txt")).await.unwrap(), b"x");
        assert_eq!(
            tokio::fs::read(out.join("a/two.txt")).await.unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn test_get_dir_strips_leading_prefix() {
        let cache = tempfile::tempdir().unwrap();
        let out_root = tempfile::tempdir().unwrap();
        let out = out_root.path().join("tree");
        let client = StubClient::new(cache.path()).with_file("deep/nested/a/file.txt", b"f");

        let produced = client
            .get_dir("quill://deep/nested/a/", &out, "base")
            .await
            .unwrap();
        // Only the basename directory is replicated, not deep/nested
        assert_eq!(produced, vec![out.join("a/file.txt")]);
    }

    #[tokio::test]
    async fn test_get_dir_empty_subtree_still_makes_dirs() {
        let cache = tempfile::tempdir().unwrap();
        let out_root = tempfile::tempdir().unwrap();
        let out = out_root.path().join("only-dirs");
        let client = StubClient::new(cache.path()).with_empty_dir("a/hollow");

        let produced = client.get_dir("quill://a", &out, "base").await.unwrap();
        assert_eq!(produced, vec![out.join("a/hollow")]);
        assert!(out.join("a/hollow").is_dir());
    }

    #[tokio::test]
    async fn test_get_url_internal_scheme_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::new(dir.path()).with_file("cfg/app.conf", b"k=v");

        let dest = client
            .get_url("quill://cfg/app.conf", None, true, "base")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            dest,
            dir.path().join("files").join("base").join("cfg/app.conf")
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"k=v");
    }

    #[tokio::test]
    async fn test_get_url_missing_parent_fails_without_contact() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::new(dir.path());

        // 127.0.0.1:9 would refuse anyway, but the parent check fails
        // first and returns the sentinel without any request.
        let result = client
            .get_url(
                "http://127.0.0.1:9/file.bin",
                Some(&dir.path().join("no/such/parent/file.bin")),
                false,
                "base",
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_get_url_unreachable_is_remote_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::new(dir.path());

        let err = client
            .get_url("http://127.0.0.1:9/file.bin", None, true, "base")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RemoteResource { .. }));
    }

    #[tokio::test]
    async fn test_is_cached_probes_both_areas() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::new(dir.path()).with_file("etc/motd", b"hi");

        assert!(client.is_cached("quill://etc/motd", "base").await.unwrap().is_none());
        client.cache_file("quill://etc/motd", "base").await.unwrap();
        let hit = client.is_cached("quill://etc/motd", "base").await.unwrap();
        assert_eq!(
            hit.unwrap(),
            dir.path().join("files").join("base").join("etc/motd")
        );
    }

    #[tokio::test]
    async fn test_cache_local_file() {
        let cache = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("notes.txt");
        tokio::fs::write(&src, b"local").await.unwrap();
        let client = StubClient::new(cache.path());

        let dest = client.cache_local_file(&src).await.unwrap();
        assert!(dest.starts_with(cache.path().join("localfiles")));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"local");

        let listed = client.file_local_list("base").await.unwrap();
        assert_eq!(listed, vec![dest]);
    }

    #[tokio::test]
    async fn test_get_manifest_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::new(dir.path())
            .with_file("web/server.qs", b"flat")
            .with_file("web/server/init.qs", b"init");

        // Flat file wins over init.qs
        let dest = client.get_manifest("web.server", "base").await.unwrap().unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"flat");

        let missing = client.get_manifest("web.nothing", "base").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_cache_files_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::new(dir.path()).with_file("have.txt", b"1");

        let results = client
            .cache_files(
                &["quill://have.txt".to_owned(), "quill://miss.txt".to_owned()],
                "base",
            )
            .await
            .unwrap();
        assert!(results[0].is_some());
        assert!(results[1].is_none());
    }
}

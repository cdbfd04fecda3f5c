//! Locator validation and cache path layout.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::error::ClientError;

/// Scheme prefix carried by every master-addressable locator.
pub const SCHEME: &str = "quill://";

/// Make sure a locator is intended for the master and trim the scheme.
///
/// The remainder must stay a relative path once joined under an
/// environment root, so `..` segments are rejected outright.
pub fn check_proto(path: &str) -> Result<&str, ClientError> {
    let rel = path
        .strip_prefix(SCHEME)
        .ok_or_else(|| ClientError::UnsupportedPath(path.to_owned()))?;
    if rel.split('/').any(|seg| seg == "..") {
        return Err(ClientError::UnsupportedPath(path.to_owned()));
    }
    Ok(rel)
}

/// Join a `/`-separated relative wire path under a base directory.
pub fn join_rel(base: &Path, rel: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for seg in rel.split('/').filter(|s| !s.is_empty()) {
        out.push(seg);
    }
    out
}

/// Render a relative filesystem path as a `/`-separated wire path.
pub fn rel_to_wire(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(seg) => Some(seg.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Local location to cache a master-sourced file, creating missing cache
/// directories. Idempotent: pre-existing directories are fine.
pub async fn cache_loc(
    cache_root: &Path,
    rel: &str,
    env: &str,
) -> Result<PathBuf, ClientError> {
    let dest = join_rel(&cache_root.join("files").join(env), rel);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(&dest).await? {
        restrict_perms(&dest).await?;
    }
    Ok(dest)
}

/// Destination for an explicitly cached local file.
pub fn localfiles_dest(cache_root: &Path, path: &str) -> PathBuf {
    join_rel(&cache_root.join("localfiles"), path.trim_start_matches('/'))
}

/// Destination synthesized for a generic URL download.
pub fn extrn_dest(cache_root: &Path, env: &str, url: &Url) -> PathBuf {
    let host = url.host_str().unwrap_or("localhost");
    join_rel(
        &cache_root.join("extrn_files").join(env).join(host),
        url.path().trim_start_matches('/'),
    )
}

/// Clamp a cached file to owner read/write.
#[cfg(unix)]
pub async fn restrict_perms(path: &Path) -> Result<(), ClientError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
pub async fn restrict_perms(_path: &Path) -> Result<(), ClientError> {
    Ok(())
}

/// Recursively collect every regular file under `root`, relative to it.
/// Walk order within a directory is whatever the OS returns.
pub async fn walk_files(root: &Path) -> Result<Vec<PathBuf>, ClientError> {
    let mut out = Vec::new();
    if !tokio::fs::try_exists(root).await? {
        return Ok(out);
    }
    walk_files_inner(root, root, &mut out).await?;
    Ok(out)
}

fn walk_files_inner<'a>(
    root: &'a Path,
    dir: &'a Path,
    out: &'a mut Vec<PathBuf>,
) -> futures::future::BoxFuture<'a, Result<(), ClientError>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let kind = entry.file_type().await?;
            if kind.is_dir() {
                walk_files_inner(root, &path, out).await?;
            } else if kind.is_file() {
                if let Ok(rel) = path.strip_prefix(root) {
                    out.push(rel.to_path_buf());
                }
            }
        }
        Ok(())
    })
}

/// Recursively collect every directory under `root` that holds neither
/// files nor subdirectories, relative to `root`.
pub async fn walk_empty_dirs(root: &Path) -> Result<Vec<PathBuf>, ClientError> {
    let mut out = Vec::new();
    if !tokio::fs::try_exists(root).await? {
        return Ok(out);
    }
    walk_empty_dirs_inner(root, root, &mut out).await?;
    Ok(out)
}

fn walk_empty_dirs_inner<'a>(
    root: &'a Path,
    dir: &'a Path,
    out: &'a mut Vec<PathBuf>,
) -> futures::future::BoxFuture<'a, Result<bool, ClientError>> {
    // Returns whether `dir` is empty so parents can tell leaves apart.
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut empty = true;
        while let Some(entry) = entries.next_entry().await? {
            empty = false;
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                walk_empty_dirs_inner(root, &path, out).await?;
            }
        }
        if empty && dir != root {
            if let Ok(rel) = dir.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
        Ok(empty)
    })
}

/// Collect every regular file under `root` as an absolute path.
pub async fn walk_absolute(root: &Path) -> Result<Vec<PathBuf>, ClientError> {
    let rels = walk_files(root).await?;
    Ok(rels.into_iter().map(|rel| root.join(rel)).collect())
}

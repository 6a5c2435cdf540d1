//! Global Cache (spec §4.9): an abstract, best-effort remote tier.
//!
//! Grounded on `examples/original_source/yabt/fs_global_cache.py` and
//! `gs_global_cache.py` (several interchangeable backends behind one
//! narrow interface) and on the teacher's `ImageTool`/`ImageToolImpl`
//! split in `tools/oci-cli-wrapper/src/lib.rs`: a small `#[async_trait]`
//! object, stored as `Arc<dyn GlobalCache>`, so the scheduler and CLI never
//! need to know which concrete backend is configured.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use tracing::instrument;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("global cache is unreachable: {reason}"))]
    Unavailable { reason: String },

    #[snafu(display("failed to read from global cache mirror '{}': {source}", path.display()))]
    Read { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to write to global cache mirror '{}': {source}", path.display()))]
    Write { path: PathBuf, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A remote cache backend. Uploads are best-effort (spec §4.9: "a failed
/// upload never fails the build"); downloads, when they fail, simply mean
/// a miss and the target gets built locally instead.
#[async_trait]
pub trait GlobalCache: Send + Sync {
    async fn get(&self, combined_hash: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, combined_hash: &str, bundle: &[u8]) -> Result<()>;
}

/// A filesystem-backed mirror, standing in for a networked object-store
/// backend (spec §4.9 "at least one concrete backend; others may be
/// stubbed"). Each entry is a single opaque tar-like byte bundle the caller
/// assembles (manifest + artifacts); this cache does not interpret it.
pub struct LocalFsMirror {
    root: PathBuf,
}

impl LocalFsMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, combined_hash: &str) -> PathBuf {
        let (algo, hex) = combined_hash.split_once(':').unwrap_or(("sha256", combined_hash));
        self.root.join(algo).join(hex).with_extension("bundle")
    }
}

#[async_trait]
impl GlobalCache for LocalFsMirror {
    #[instrument(level = "trace", skip(self), fields(combined_hash = %combined_hash))]
    async fn get(&self, combined_hash: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(combined_hash);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await.context(ReadSnafu { path })?;
        Ok(Some(bytes))
    }

    #[instrument(level = "trace", skip(self, bundle), fields(combined_hash = %combined_hash))]
    async fn put(&self, combined_hash: &str, bundle: &[u8]) -> Result<()> {
        let path = self.entry_path(combined_hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.context(WriteSnafu { path: parent.to_path_buf() })?;
        }
        let tmp = path.with_extension("bundle.tmp");
        tokio::fs::write(&tmp, bundle).await.context(WriteSnafu { path: tmp.clone() })?;
        tokio::fs::rename(&tmp, &path).await.context(WriteSnafu { path })?;
        Ok(())
    }
}

/// A backend that never has anything and discards every upload; used when
/// no global cache is configured (spec §4.9: the global tier is optional).
pub struct NoopGlobalCache;

#[async_trait]
impl GlobalCache for NoopGlobalCache {
    async fn get(&self, _combined_hash: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn put(&self, _combined_hash: &str, _bundle: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[instrument(level = "trace", skip(cache, bundle), fields(combined_hash = %combined_hash))]
pub async fn best_effort_upload(cache: &dyn GlobalCache, combined_hash: &str, bundle: &[u8]) {
    if let Err(e) = cache.put(combined_hash, bundle).await {
        tracing::warn!(hash = combined_hash, error = %e, "global cache upload failed, continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_fs_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalFsMirror::new(dir.path());
        assert!(mirror.get("sha256:aa").await.unwrap().is_none());
        mirror.put("sha256:aa", b"hello").await.unwrap();
        assert_eq!(mirror.get("sha256:aa").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn noop_cache_never_hits() {
        let cache = NoopGlobalCache;
        cache.put("sha256:aa", b"x").await.unwrap();
        assert!(cache.get("sha256:aa").await.unwrap().is_none());
    }
}

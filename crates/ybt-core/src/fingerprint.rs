//! Content-addressed fingerprinting (spec §4.6).
//!
//! The hash function itself (`sha2::Sha256`) is the same crate the teacher
//! already depends on for digesting external files
//! (`tools/buildsys/src/cache.rs::LookasideCache::verify_file`, which hashes
//! with `sha2::Sha512`) and for OCI layer digests
//! (`twoliter/src/docker/image.rs`, `twoliter/src/lock/image.rs`). We render
//! hashes the same way OCI does, as `sha256:<hex>`, since the cache key
//! doubles as a filesystem directory name and a debug-printable value.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};
use tracing::instrument;
use walkdir::WalkDir;

use crate::spec::TargetSpec;

/// The fixed digest used for an empty file (spec §8 boundary behavior:
/// "Empty source file: fixed digest"). This is simply the SHA-256 of zero
/// bytes, computed once so every empty file in the tree hashes identically
/// without re-hashing.
pub fn empty_file_digest() -> String {
    render(&Sha256::digest(b""))
}

fn render(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(bytes))
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read source file '{}': {source}", path.display()))]
    ReadFile { path: std::path::PathBuf, source: std::io::Error },

    #[snafu(display("failed to walk source directory '{}': {source}", path.display()))]
    WalkDir { path: std::path::PathBuf, source: walkdir::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Digest the bytes of a single file.
pub fn digest_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).context(ReadFileSnafu { path: path.to_path_buf() })?;
    if bytes.is_empty() {
        return Ok(empty_file_digest());
    }
    Ok(render(&Sha256::digest(&bytes)))
}

/// Digest a directory tree as the sorted sequence of
/// `(relative_path, file_digest)` pairs (spec §4.6: "for a directory tree,
/// digest the sorted sequence... order-independent on directory entries").
pub fn digest_dir(root: &Path) -> Result<String> {
    let mut entries: Vec<(String, String)> = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.context(WalkDirSnafu { path: root.to_path_buf() })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let digest = digest_file(entry.path())?;
        entries.push((rel, digest));
    }
    entries.sort();
    let mut hasher = Sha256::new();
    for (rel, digest) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update([0u8]);
    }
    Ok(render(&hasher.finalize()))
}

/// Digest a source path, dispatching to [`digest_file`] or [`digest_dir`].
#[instrument(level = "trace")]
pub fn digest_path(path: &Path) -> Result<String> {
    if path.is_dir() {
        digest_dir(path)
    } else {
        digest_file(path)
    }
}

/// The two hashes computed per target (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheKeys {
    pub self_hash: String,
    pub combined_hash: String,
}

/// Canonicalize a `serde_json::Value` by recursively sorting map keys (spec
/// §4.6: "Props are canonicalized by recursively sorting map keys").
/// `serde_json::Map`'s default feature already preserves insertion order;
/// `preserve_order` is not enabled for this crate, so `BTreeMap`-backed
/// round-trips from [`TargetSpec::props`] are already sorted -- this walks
/// recursively anyway so nested nested-mapping prop values are sorted too.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compute the self hash: `H(canonical(builder_name, props, sorted(source_file_hashes)))`.
/// Target-ref values inside props are not substituted with dep hashes here --
/// they only contribute their structural (string) position (spec §4.6).
pub fn self_hash(target: &TargetSpec, source_digests: &[String]) -> String {
    let mut sorted_digests = source_digests.to_vec();
    sorted_digests.sort();

    let props_json = serde_json::to_value(&target.props).expect("props always serialize");
    let payload = serde_json::json!({
        "builder_name": target.builder_name,
        "props": canonicalize(&props_json),
        "source_file_hashes": sorted_digests,
    });
    let canonical = canonicalize(&payload);
    let bytes = serde_json::to_vec(&canonical).expect("canonical value always serializes");
    render(&Sha256::digest(&bytes))
}

/// Compute the combined hash (the cache key):
/// `H(self_hash, sorted([combined_hash(d) for d in deps]))` (spec §4.6).
/// A target with zero deps has a combined hash equal to its self hash (spec
/// §8 boundary behavior).
pub fn combined_hash(self_hash: &str, mut dep_combined_hashes: Vec<String>) -> String {
    if dep_combined_hashes.is_empty() {
        return self_hash.to_string();
    }
    dep_combined_hashes.sort();
    let mut hasher = Sha256::new();
    hasher.update(self_hash.as_bytes());
    for h in &dep_combined_hashes {
        hasher.update([0u8]);
        hasher.update(h.as_bytes());
    }
    render(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::QualifiedName;

    fn target() -> TargetSpec {
        TargetSpec::new(QualifiedName::new("a", "b"), "generic")
    }

    #[test]
    fn empty_deps_combined_equals_self() {
        let h = self_hash(&target(), &[]);
        assert_eq!(combined_hash(&h, vec![]), h);
    }

    #[test]
    fn dep_order_does_not_matter() {
        let h = self_hash(&target(), &[]);
        let a = combined_hash(&h, vec!["sha256:1".into(), "sha256:2".into()]);
        let b = combined_hash(&h, vec!["sha256:2".into(), "sha256:1".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn prop_change_changes_self_hash() {
        let mut t1 = target();
        t1.props.insert("x".into(), crate::spec::PropValue::Str("1".into()));
        let mut t2 = target();
        t2.props.insert("x".into(), crate::spec::PropValue::Str("2".into()));
        assert_ne!(self_hash(&t1, &[]), self_hash(&t2, &[]));
    }

    #[test]
    fn empty_file_has_fixed_digest() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = dir.path().join("a");
        let f2 = dir.path().join("b");
        std::fs::write(&f1, b"").unwrap();
        std::fs::write(&f2, b"").unwrap();
        assert_eq!(digest_file(&f1).unwrap(), digest_file(&f2).unwrap());
        assert_eq!(digest_file(&f1).unwrap(), empty_file_digest());
    }

    #[test]
    fn dir_digest_is_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"hello").unwrap();
        std::fs::write(dir.path().join("b"), b"world").unwrap();
        let d1 = digest_dir(dir.path()).unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        std::fs::write(dir2.path().join("b"), b"world").unwrap();
        std::fs::write(dir2.path().join("a"), b"hello").unwrap();
        let d2 = digest_dir(dir2.path()).unwrap();

        assert_eq!(d1, d2);
    }
}

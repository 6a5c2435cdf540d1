//! Local Cache (spec §4.8): an on-disk, content-addressed store keyed by a
//! target's combined hash. Writes are staged in a sibling temp directory and
//! promoted with a single atomic rename (spec §4.8: "Writes are atomic: no
//! partially-written cache entry is ever visible to a reader"), mirroring
//! `tools/buildsys/src/cache.rs::LookasideCache::fetch_file`'s
//! write-to-`.tmp`-then-`fs::rename` pattern.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use snafu::{ensure, ResultExt, Snafu};
use tracing::instrument;

use crate::artifact::{ArtifactKind, ArtifactStore};

const MANIFEST_FILE: &str = "target.json";
const ARTIFACTS_DIR: &str = "artifacts";
const ARTIFACTS_MANIFEST: &str = "artifacts.json";
const SUMMARY_FILE: &str = "summary.json";

/// One artifact's identity within a cache entry: which kind it was produced
/// as, the destination path it is keyed by in the owning target's
/// [`ArtifactStore`] (spec §4.7/§4.8), and its content hash/size (spec §6.4's
/// `artifacts.json` schema: `{destination_path: {hash, size}}`). Kept
/// alongside the flat file tree under `artifacts/` so a cache hit can
/// rebuild a real `ArtifactStore` instead of just splatting files onto disk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ArtifactEntry {
    kind: ArtifactKind,
    dst: PathBuf,
    hash: String,
    size: u64,
}

/// A cache entry packaged as a single opaque byte blob for the global cache
/// tier (spec §4.9), which does not interpret what it stores. Artifact
/// contents travel as hex so the bundle round-trips through a `&[u8]`
/// interface without needing a streaming/tar format.
#[derive(serde::Serialize, serde::Deserialize)]
struct Bundle {
    manifest: serde_json::Value,
    build_time_secs: f64,
    artifacts: Vec<BundledArtifact>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct BundledArtifact {
    kind: ArtifactKind,
    dst: PathBuf,
    hash: String,
    size: u64,
    contents_hex: String,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Build a fresh `summary.json` payload (spec §6.4: `{name, artifacts_hash,
/// build_time, created, accessed}`). `created`/`accessed` are always "now" --
/// callers that need to preserve an existing `created` touch it separately.
fn build_summary(manifest: &serde_json::Value, entries: &[ArtifactEntry], build_time_secs: f64) -> serde_json::Value {
    let name = manifest.get("name").and_then(serde_json::Value::as_str).unwrap_or_default();
    let artifacts_hash =
        hash_artifacts(&entries.iter().map(|e| (e.dst.clone(), e.hash.clone())).collect::<Vec<_>>());
    let now = now_secs();
    serde_json::json!({
        "name": name,
        "artifacts_hash": artifacts_hash,
        "build_time": build_time_secs,
        "created": now,
        "accessed": now,
    })
}

/// Hash the sorted `(destination, hash)` pairs of a cache entry's artifacts
/// into the single `artifacts_hash` recorded in `summary.json` (spec §6.4).
fn hash_artifacts(entries: &[(PathBuf, String)]) -> String {
    let mut sorted = entries.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    for (dst, hash) in &sorted {
        hasher.update(dst.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(hash.as_bytes());
        hasher.update([0u8]);
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// A filesystem-safe subdirectory name for one artifact kind, so two kinds
/// that happen to share a destination path (e.g. an `object` and a `binary`
/// both named `dst`) don't collide under a single flat `artifacts/` tree.
fn kind_tag(kind: &ArtifactKind) -> String {
    match kind {
        ArtifactKind::App => "app".to_string(),
        ArtifactKind::Binary => "binary".to_string(),
        ArtifactKind::Object => "object".to_string(),
        ArtifactKind::GeneratedSource => "generated-source".to_string(),
        ArtifactKind::GeneratedHeader => "generated-header".to_string(),
        ArtifactKind::GeneratedLang(lang) => {
            let sanitized: String = lang
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            format!("generated-lang-{sanitized}")
        }
        ArtifactKind::Image => "image".to_string(),
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create cache directory '{}': {source}", path.display()))]
    CreateDir { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to write cache manifest '{}': {source}", path.display()))]
    WriteManifest { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to read cache manifest '{}': {source}", path.display()))]
    ReadManifest { path: PathBuf, source: std::io::Error },

    #[snafu(display("cache entry at '{}' is corrupt: {source}", path.display()))]
    CorruptManifest { path: PathBuf, source: serde_json::Error },

    #[snafu(display("failed to promote staged cache entry '{}' -> '{}': {source}", from.display(), to.display()))]
    Promote { from: PathBuf, to: PathBuf, source: std::io::Error },

    #[snafu(display("failed to remove stale cache entry '{}': {source}", path.display()))]
    RemoveStale { path: PathBuf, source: std::io::Error },

    #[snafu(display("artifact materialization failed: {source}"))]
    Artifact { source: crate::artifact::Error },

    #[snafu(display("cache entry at '{}' is missing its artifacts directory", path.display()))]
    MissingArtifactsDir { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The on-disk, content-addressed local cache tier.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The entry directory for a combined hash like `sha256:abc...`. The
    /// colon is replaced with a path separator so the digest algorithm
    /// becomes a real subdirectory, keeping any one directory's fan-out
    /// bounded to the hex digest's own entropy.
    fn entry_dir(&self, combined_hash: &str) -> PathBuf {
        let (algo, hex) = combined_hash.split_once(':').unwrap_or(("sha256", combined_hash));
        self.root.join(algo).join(hex)
    }

    pub fn contains(&self, combined_hash: &str) -> bool {
        self.entry_dir(combined_hash).join(MANIFEST_FILE).is_file()
    }

    /// Read back the cached target manifest (spec §6.4 `target.json`).
    pub fn manifest(&self, combined_hash: &str) -> Result<Option<serde_json::Value>> {
        let path = self.entry_dir(combined_hash).join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).context(ReadManifestSnafu { path: path.clone() })?;
        let value = serde_json::from_slice(&bytes).context(CorruptManifestSnafu { path })?;
        Ok(Some(value))
    }

    /// Stage a new cache entry and promote it atomically (spec §4.8).
    /// `artifact_files` is `(kind, dest_relative_to_target, abs_src)` per
    /// artifact the target produced; the kind is preserved in a sidecar
    /// manifest so a later [`Self::restore_artifacts`] can rebuild a real
    /// `ArtifactStore` rather than just restoring a flat file tree. A
    /// `summary.json` is written alongside `target.json`/`artifacts.json`
    /// only once the build has actually succeeded (spec §4.8: "a summary is
    /// written only after a target has been successfully built").
    #[instrument(level = "trace", skip(self, manifest, artifact_files), fields(combined_hash = %combined_hash))]
    pub fn put(
        &self,
        combined_hash: &str,
        manifest: &serde_json::Value,
        artifact_files: &[(ArtifactKind, PathBuf, PathBuf)],
        build_time_secs: f64,
    ) -> Result<()> {
        let dest = self.entry_dir(combined_hash);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent.to_path_buf() })?;
        }

        let staging = dest.with_extension("tmp");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).context(RemoveStaleSnafu { path: staging.clone() })?;
        }
        let artifacts_dir = staging.join(ARTIFACTS_DIR);
        std::fs::create_dir_all(&artifacts_dir).context(CreateDirSnafu { path: artifacts_dir.clone() })?;

        let mut entries: Vec<ArtifactEntry> = Vec::with_capacity(artifact_files.len());
        for (kind, rel_dest, src) in artifact_files {
            let abs_dest = artifacts_dir.join(kind_tag(kind)).join(rel_dest);
            if let Some(parent) = abs_dest.parent() {
                std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent.to_path_buf() })?;
            }
            std::fs::hard_link(src, &abs_dest)
                .or_else(|_| std::fs::copy(src, &abs_dest).map(|_| ()))
                .context(CreateDirSnafu { path: abs_dest.clone() })?;
            let hash = crate::fingerprint::digest_file(src).unwrap_or_else(|_| crate::fingerprint::empty_file_digest());
            let size = std::fs::metadata(src).map(|m| m.len()).unwrap_or(0);
            entries.push(ArtifactEntry { kind: kind.clone(), dst: rel_dest.clone(), hash, size });
        }

        let artifacts_manifest_path = staging.join(ARTIFACTS_MANIFEST);
        let artifacts_bytes = serde_json::to_vec_pretty(&entries).expect("artifact entries always serialize");
        std::fs::write(&artifacts_manifest_path, artifacts_bytes)
            .context(WriteManifestSnafu { path: artifacts_manifest_path })?;

        let manifest_path = staging.join(MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(manifest).expect("manifest always serializes");
        std::fs::write(&manifest_path, bytes).context(WriteManifestSnafu { path: manifest_path })?;

        let summary_path = staging.join(SUMMARY_FILE);
        let summary = build_summary(manifest, &entries, build_time_secs);
        std::fs::write(&summary_path, serde_json::to_vec_pretty(&summary).expect("summary always serializes"))
            .context(WriteManifestSnafu { path: summary_path })?;

        self.promote(&staging, &dest)
    }

    /// Promote a staged entry directory into place with a single atomic
    /// rename, replacing any stale entry already there.
    fn promote(&self, staging: &Path, dest: &Path) -> Result<()> {
        if dest.exists() {
            std::fs::remove_dir_all(dest).context(RemoveStaleSnafu { path: dest.to_path_buf() })?;
        }
        std::fs::rename(staging, dest).context(PromoteSnafu { from: staging.to_path_buf(), to: dest.to_path_buf() })?;
        Ok(())
    }

    /// Bump a cache entry's `accessed` timestamp on a hit (spec §4.8's
    /// eviction-heuristic invariant: the cache needs a recency signal per
    /// entry). A no-op if the entry has no summary (e.g. pre-dates this
    /// field, or was never successfully built).
    pub fn touch(&self, combined_hash: &str) -> Result<()> {
        let summary_path = self.entry_dir(combined_hash).join(SUMMARY_FILE);
        if !summary_path.is_file() {
            return Ok(());
        }
        let bytes = std::fs::read(&summary_path).context(ReadManifestSnafu { path: summary_path.clone() })?;
        let mut summary: serde_json::Value =
            serde_json::from_slice(&bytes).context(CorruptManifestSnafu { path: summary_path.clone() })?;
        if let Some(obj) = summary.as_object_mut() {
            obj.insert("accessed".to_string(), serde_json::json!(now_secs()));
        }
        std::fs::write(&summary_path, serde_json::to_vec_pretty(&summary).expect("summary always serializes"))
            .context(WriteManifestSnafu { path: summary_path.clone() })?;
        let mtime = filetime::FileTime::from_unix_time(now_secs() as i64, 0);
        filetime::set_file_mtime(&summary_path, mtime).ok();
        Ok(())
    }

    /// Package a local entry as an opaque byte bundle for the global cache
    /// tier (spec §4.9). `None` if the entry isn't present locally.
    pub fn bundle(&self, combined_hash: &str) -> Result<Option<Vec<u8>>> {
        let entry = self.entry_dir(combined_hash);
        let Some(manifest) = self.manifest(combined_hash)? else {
            return Ok(None);
        };
        let build_time_secs = self
            .summary(combined_hash)?
            .and_then(|s| s.get("build_time").and_then(serde_json::Value::as_f64))
            .unwrap_or(0.0);

        let artifacts_dir = entry.join(ARTIFACTS_DIR);
        let entries = self.read_artifact_entries(&entry)?;
        let mut artifacts = Vec::with_capacity(entries.len());
        for ArtifactEntry { kind, dst, hash, size } in entries {
            let src = artifacts_dir.join(kind_tag(&kind)).join(&dst);
            let contents = std::fs::read(&src).context(ReadManifestSnafu { path: src })?;
            artifacts.push(BundledArtifact { kind, dst, hash, size, contents_hex: hex::encode(contents) });
        }

        let bundle = Bundle { manifest, build_time_secs, artifacts };
        Ok(Some(serde_json::to_vec(&bundle).expect("bundle always serializes")))
    }

    /// Populate the local cache from a bundle fetched off the global tier
    /// (spec §4.9: "on hit it populates the local cache"). `created`/
    /// `accessed` are re-stamped to now, since this is this local cache's
    /// first sighting of the entry; the recorded `build_time` travels with
    /// the bundle unchanged.
    pub fn populate_from_bundle(&self, combined_hash: &str, bundle_bytes: &[u8]) -> Result<()> {
        let dest = self.entry_dir(combined_hash);
        let bundle: Bundle = serde_json::from_slice(bundle_bytes)
            .context(CorruptManifestSnafu { path: dest.join(MANIFEST_FILE) })?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent.to_path_buf() })?;
        }
        let staging = dest.with_extension("tmp");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).context(RemoveStaleSnafu { path: staging.clone() })?;
        }
        let artifacts_dir = staging.join(ARTIFACTS_DIR);
        std::fs::create_dir_all(&artifacts_dir).context(CreateDirSnafu { path: artifacts_dir.clone() })?;

        let mut entries = Vec::with_capacity(bundle.artifacts.len());
        for BundledArtifact { kind, dst, hash, size, contents_hex } in bundle.artifacts {
            let bytes = hex::decode(&contents_hex).unwrap_or_default();
            let abs_dest = artifacts_dir.join(kind_tag(&kind)).join(&dst);
            if let Some(parent) = abs_dest.parent() {
                std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent.to_path_buf() })?;
            }
            std::fs::write(&abs_dest, &bytes).context(WriteManifestSnafu { path: abs_dest.clone() })?;
            entries.push(ArtifactEntry { kind, dst, hash, size });
        }

        let artifacts_manifest_path = staging.join(ARTIFACTS_MANIFEST);
        std::fs::write(
            &artifacts_manifest_path,
            serde_json::to_vec_pretty(&entries).expect("artifact entries always serialize"),
        )
        .context(WriteManifestSnafu { path: artifacts_manifest_path })?;

        let manifest_path = staging.join(MANIFEST_FILE);
        std::fs::write(&manifest_path, serde_json::to_vec_pretty(&bundle.manifest).expect("manifest always serializes"))
            .context(WriteManifestSnafu { path: manifest_path })?;

        let summary_path = staging.join(SUMMARY_FILE);
        let summary = build_summary(&bundle.manifest, &entries, bundle.build_time_secs);
        std::fs::write(&summary_path, serde_json::to_vec_pretty(&summary).expect("summary always serializes"))
            .context(WriteManifestSnafu { path: summary_path })?;

        self.promote(&staging, &dest)
    }

    fn summary(&self, combined_hash: &str) -> Result<Option<serde_json::Value>> {
        let path = self.entry_dir(combined_hash).join(SUMMARY_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).context(ReadManifestSnafu { path: path.clone() })?;
        let value = serde_json::from_slice(&bytes).context(CorruptManifestSnafu { path })?;
        Ok(Some(value))
    }

    fn read_artifact_entries(&self, entry: &Path) -> Result<Vec<ArtifactEntry>> {
        let manifest_path = entry.join(ARTIFACTS_MANIFEST);
        if !manifest_path.is_file() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&manifest_path).context(ReadManifestSnafu { path: manifest_path.clone() })?;
        serde_json::from_slice(&bytes).context(CorruptManifestSnafu { path: manifest_path })
    }

    /// Materialize a cached entry's artifacts under `dest_root`, hard-linking
    /// each file out (spec §4.7/§4.8: cache hits never re-copy file
    /// contents), and return a populated [`ArtifactStore`] keyed the same
    /// way a fresh build's would be -- `src` and `dst` both point at the
    /// now-materialized path relative to `dest_root`.
    #[instrument(level = "trace", skip(self), fields(combined_hash = %combined_hash))]
    pub fn restore_artifacts(&self, combined_hash: &str, dest_root: &Path) -> Result<ArtifactStore> {
        let entry = self.entry_dir(combined_hash);
        let artifacts_dir = entry.join(ARTIFACTS_DIR);
        ensure!(artifacts_dir.is_dir(), MissingArtifactsDirSnafu { path: entry.clone() });

        let entries = self.read_artifact_entries(&entry)?;

        let mut store = ArtifactStore::new();
        for ArtifactEntry { kind, dst, .. } in entries {
            let src_file = artifacts_dir.join(kind_tag(&kind)).join(&dst);
            let dest_file = dest_root.join(&dst);
            if let Some(parent) = dest_file.parent() {
                std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent.to_path_buf() })?;
            }
            if dest_file.exists() {
                std::fs::remove_file(&dest_file).ok();
            }
            std::fs::hard_link(&src_file, &dest_file)
                .or_else(|_| std::fs::copy(&src_file, &dest_file).map(|_| ()))
                .context(CreateDirSnafu { path: dest_file })?;
            store.add(kind, dst.clone(), dst).context(ArtifactSnafu)?;
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_contains() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let manifest = serde_json::json!({"name": "a:b"});
        cache.put("sha256:deadbeef", &manifest, &[], 1.5).unwrap();
        assert!(cache.contains("sha256:deadbeef"));
        assert_eq!(cache.manifest("sha256:deadbeef").unwrap(), Some(manifest));
    }

    #[test]
    fn missing_entry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        assert_eq!(cache.manifest("sha256:nope").unwrap(), None);
        assert!(!cache.contains("sha256:nope"));
    }

    #[test]
    fn put_overwrites_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        cache.put("sha256:x", &serde_json::json!({"v": 1}), &[], 0.0).unwrap();
        cache.put("sha256:x", &serde_json::json!({"v": 2}), &[], 0.0).unwrap();
        assert_eq!(cache.manifest("sha256:x").unwrap(), Some(serde_json::json!({"v": 2})));
    }

    #[test]
    fn put_writes_a_summary_with_build_time_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        cache.put("sha256:sum", &serde_json::json!({"name": "a:b"}), &[], 2.5).unwrap();
        let summary = cache.summary("sha256:sum").unwrap().unwrap();
        assert_eq!(summary["name"], "a:b");
        assert_eq!(summary["build_time"], 2.5);
        assert!(summary["created"].is_u64());
        assert!(summary["accessed"].is_u64());
    }

    #[test]
    fn touch_bumps_accessed_without_disturbing_created() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        cache.put("sha256:acc", &serde_json::json!({"name": "a:b"}), &[], 0.0).unwrap();
        let before = cache.summary("sha256:acc").unwrap().unwrap();
        cache.touch("sha256:acc").unwrap();
        let after = cache.summary("sha256:acc").unwrap().unwrap();
        assert_eq!(before["created"], after["created"]);
        assert!(after["accessed"].as_u64().unwrap() >= before["accessed"].as_u64().unwrap());
    }

    #[test]
    fn restore_artifacts_repopulates_the_store() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("out.bin"), b"payload").unwrap();

        let cache_dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(cache_dir.path());
        let abs_src = project.path().join("out.bin");
        cache
            .put(
                "sha256:feed",
                &serde_json::json!({"name": "a:b"}),
                &[(ArtifactKind::Binary, PathBuf::from("out.bin"), abs_src)],
                0.0,
            )
            .unwrap();

        let dest = tempfile::tempdir().unwrap();
        let restored = cache.restore_artifacts("sha256:feed", dest.path()).unwrap();
        assert!(dest.path().join("out.bin").is_file());
        let binaries = restored.get(ArtifactKind::Binary).unwrap();
        assert_eq!(binaries.get(&PathBuf::from("out.bin")), Some(&PathBuf::from("out.bin")));
    }

    #[test]
    fn bundle_round_trips_through_another_local_cache() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("out.bin"), b"payload").unwrap();

        let origin_dir = tempfile::tempdir().unwrap();
        let origin = LocalCache::new(origin_dir.path());
        origin
            .put(
                "sha256:mirror",
                &serde_json::json!({"name": "a:b"}),
                &[(ArtifactKind::Binary, PathBuf::from("out.bin"), project.path().join("out.bin"))],
                3.0,
            )
            .unwrap();

        let bundle = origin.bundle("sha256:mirror").unwrap().unwrap();

        let mirror_dir = tempfile::tempdir().unwrap();
        let mirror = LocalCache::new(mirror_dir.path());
        assert!(!mirror.contains("sha256:mirror"));
        mirror.populate_from_bundle("sha256:mirror", &bundle).unwrap();
        assert!(mirror.contains("sha256:mirror"));

        let dest = tempfile::tempdir().unwrap();
        let restored = mirror.restore_artifacts("sha256:mirror", dest.path()).unwrap();
        assert!(dest.path().join("out.bin").is_file());
        assert!(restored.get(ArtifactKind::Binary).is_some());

        let summary = mirror.summary("sha256:mirror").unwrap().unwrap();
        assert_eq!(summary["build_time"], 3.0);
    }
}

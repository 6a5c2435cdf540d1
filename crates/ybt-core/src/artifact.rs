//! Per-target typed artifact store (spec §4.7).
//!
//! Grounded on `examples/original_source/yabt/artifact.py::ArtifactStore`
//! (the closed `ArtifactType` enum, `add`/`extend`/`link_types`/`link_for_image`),
//! reshaped to the teacher's fallible, `fs`-wrapped style
//! (`twoliter/src/common.rs`, which wraps every filesystem op in
//! `anyhow::Context`) translated to `snafu` for a library crate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use snafu::{ensure, ResultExt, Snafu};

/// Closed enumeration of artifact kinds and their propagation/staging rules
/// (spec §4.7 table).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum ArtifactKind {
    App,
    Binary,
    Object,
    GeneratedSource,
    GeneratedHeader,
    GeneratedLang(String),
    Image,
}

impl ArtifactKind {
    /// Sub-directory under a staged image root (`/usr/src/...`), or `None`
    /// if this kind is never staged into an image (spec §4.7 table).
    pub fn image_stage_dir(&self) -> Option<&'static str> {
        match self {
            ArtifactKind::App => Some("app"),
            ArtifactKind::Binary => Some("bin"),
            _ => None,
        }
    }

    /// Whether this kind propagates to direct+indirect deps and to image
    /// builds (spec §4.7 table; `app` and `binary` propagate broadly,
    /// `object` only at link time, generated-* per their narrower rule).
    pub fn propagates_to_image(&self) -> bool {
        matches!(self, ArtifactKind::App | ArtifactKind::Binary)
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "{kind:?} artifact with destination '{dst}' already exists with a different source: {existing} != {new}"
    ))]
    ConflictingDestination {
        kind: ArtifactKind,
        dst: String,
        existing: String,
        new: String,
    },

    #[snafu(display("failed to hard-link artifact from '{}' to '{}': {source}", src.display(), dst.display()))]
    Link {
        src: PathBuf,
        dst: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to create directory '{}': {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A per-target, per-kind mapping from destination path (relative to the
/// per-kind staging root) to source path (relative to the project root).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ArtifactStore {
    #[serde(skip)]
    by_kind: BTreeMap<ArtifactKind, BTreeMap<PathBuf, PathBuf>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact. Adding the same destination twice with a different
    /// source is an error (spec §4.7: "Adding the same destination twice
    /// with different sources is an error").
    pub fn add(&mut self, kind: ArtifactKind, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Result<()> {
        let src = src.into();
        let dst = dst.into();
        let entry = self.by_kind.entry(kind).or_default();
        match entry.get(&dst) {
            Some(existing) if existing != &src => {
                return ConflictingDestinationSnafu {
                    kind,
                    dst: dst.display().to_string(),
                    existing: existing.display().to_string(),
                    new: src.display().to_string(),
                }
                .fail();
            }
            _ => {
                entry.insert(dst, src);
            }
        }
        Ok(())
    }

    /// Add every path in `srcs` as an artifact of `kind`, using each path as
    /// both source and destination (`ArtifactStore.extend` in artifact.py).
    pub fn extend(&mut self, kind: ArtifactKind, srcs: impl IntoIterator<Item = PathBuf>) -> Result<()> {
        for src in srcs {
            self.add(kind, src.clone(), src)?;
        }
        Ok(())
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&BTreeMap<PathBuf, PathBuf>> {
        self.by_kind.get(&kind)
    }

    pub fn all(&self) -> &BTreeMap<ArtifactKind, BTreeMap<PathBuf, PathBuf>> {
        &self.by_kind
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(BTreeMap::is_empty)
    }

    /// Materialize every artifact of the given kinds under `base_dir` via
    /// hard-links from `project_root` (spec §3 invariant 4: artifact paths
    /// are always relative to the project root; §4.7: "never copies file
    /// contents"). Returns the number of artifacts linked.
    pub fn link_kinds(
        &self,
        project_root: &Path,
        base_dir: &Path,
        kinds: &[ArtifactKind],
    ) -> Result<usize> {
        let mut linked = 0;
        for kind in kinds {
            let Some(map) = self.by_kind.get(kind) else {
                continue;
            };
            let stage = match kind.image_stage_dir() {
                Some(dir) => base_dir.join(dir),
                None => base_dir.to_path_buf(),
            };
            linked += link_map(project_root, &stage, map)?;
        }
        Ok(linked)
    }

    /// Materialize all artifacts required for a container image build
    /// (`ArtifactStore.link_for_image` in artifact.py): `app` and `binary`
    /// kinds, staged under their respective sub-directories.
    pub fn link_for_image(&self, project_root: &Path, base_dir: &Path) -> Result<usize> {
        self.link_kinds(project_root, base_dir, &[ArtifactKind::App, ArtifactKind::Binary])
    }
}

fn link_map(project_root: &Path, stage: &Path, map: &BTreeMap<PathBuf, PathBuf>) -> Result<usize> {
    let mut linked = 0;
    for (dst, src) in map {
        let abs_src = project_root.join(src);
        let abs_dst = stage.join(dst);
        if let Some(parent) = abs_dst.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent.to_path_buf() })?;
        }
        if abs_dst.exists() {
            std::fs::remove_file(&abs_dst).ok();
        }
        std::fs::hard_link(&abs_src, &abs_dst).context(LinkSnafu {
            src: abs_src.clone(),
            dst: abs_dst.clone(),
        })?;
        linked += 1;
    }
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_destination_is_rejected() {
        let mut store = ArtifactStore::new();
        store.add(ArtifactKind::App, "a/one", "dst").unwrap();
        let err = store.add(ArtifactKind::App, "a/two", "dst").unwrap_err();
        assert!(matches!(err, Error::ConflictingDestination { .. }));
    }

    #[test]
    fn same_source_twice_is_fine() {
        let mut store = ArtifactStore::new();
        store.add(ArtifactKind::App, "a/one", "dst").unwrap();
        store.add(ArtifactKind::App, "a/one", "dst").unwrap();
        assert_eq!(store.get(ArtifactKind::App).unwrap().len(), 1);
    }

    #[test]
    fn link_for_image_materializes_app_and_binary_only() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("srcfile"), b"hi").unwrap();
        let mut store = ArtifactStore::new();
        store.add(ArtifactKind::App, "srcfile", "srcfile").unwrap();
        store.add(ArtifactKind::Object, "srcfile", "obj.o").unwrap();

        let stage = tempfile::tempdir().unwrap();
        let linked = store.link_for_image(project.path(), stage.path()).unwrap();
        assert_eq!(linked, 1);
        assert!(stage.path().join("app/srcfile").is_file());
        assert!(!stage.path().join("bin").exists());
    }
}

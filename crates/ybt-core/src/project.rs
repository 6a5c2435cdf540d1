//! Project-root discovery (spec §6.3).
//!
//! Grounded on `Project::find_and_load` in `twoliter/src/project/mod.rs`:
//! search the given directory for the marker file, and if absent, move up
//! one level and retry, failing once the filesystem root is reached. Kept
//! synchronous (unlike the teacher's `async_recursion`'d version) since
//! project discovery happens once, before any cooperative scheduling
//! begins, and nothing here suspends on external I/O.

use std::path::{Path, PathBuf};

use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

use crate::config::{self, YConfig, DEFAULT_CONFIG_FILE_NAME};
use crate::fs;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to canonicalize '{}': {source}", path.display()))]
    Canonicalize { path: PathBuf, source: fs::Error },

    #[snafu(display("unable to locate '{marker}' starting from '{}'", start.display()))]
    NotFound { start: PathBuf, marker: String },

    #[snafu(display("{source}"))]
    Config { source: config::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A loaded project: its root directory and validated configuration.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: YConfig,
}

impl Project {
    /// Search upward from `start` for `ybt.toml`; if none is found anywhere
    /// up to the filesystem root, fall back to treating `start` itself as
    /// the project root with default configuration (spec §6.3: a
    /// configuration file is optional).
    #[instrument(level = "trace")]
    pub fn find_and_load(start: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let start = start.as_ref();
        match find_marker(start, DEFAULT_CONFIG_FILE_NAME)? {
            Some((root, marker_path)) => {
                let config = YConfig::load(&marker_path, &root).context(ConfigSnafu)?;
                Ok(Self { root, config })
            }
            None => {
                let root = fs::canonicalize(start).context(CanonicalizeSnafu { path: start.to_path_buf() })?;
                Ok(Self {
                    config: YConfig::default_for(&root),
                    root,
                })
            }
        }
    }

    /// Path to a build module's build file, project-root-relative.
    pub fn build_file_path(&self, module: &str) -> PathBuf {
        if module.is_empty() {
            self.root.join(&self.config.build_file_name)
        } else {
            self.root.join(module).join(&self.config.build_file_name)
        }
    }

    /// The caller's working directory expressed relative to the project
    /// root, for use as the "current module" when resolving CLI seed
    /// selectors (spec §4.1 "for CLI seeds").
    #[instrument(level = "trace", skip(self), fields(root = %self.root.display()))]
    pub fn rel_work_dir(&self, work_dir: &Path) -> Result<String> {
        let work_dir = fs::canonicalize(work_dir).context(CanonicalizeSnafu { path: work_dir.to_path_buf() })?;
        let rel = work_dir.strip_prefix(&self.root).unwrap_or(Path::new(""));
        Ok(rel.to_string_lossy().replace('\\', "/"))
    }
}

fn find_marker(start: &Path, marker: &str) -> Result<Option<(PathBuf, PathBuf)>> {
    let mut dir = fs::canonicalize(start).context(CanonicalizeSnafu { path: start.to_path_buf() })?;
    loop {
        let candidate = dir.join(marker);
        if candidate.is_file() {
            return Ok(Some((dir, candidate)));
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marker_in_parent_directory() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join(DEFAULT_CONFIG_FILE_NAME), "").unwrap();
        let nested = root.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let project = Project::find_and_load(&nested).unwrap();
        assert_eq!(project.root, root.path().canonicalize().unwrap());
    }

    #[test]
    fn falls_back_to_defaults_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::find_and_load(dir.path()).unwrap();
        assert_eq!(project.config.build_file_name, "BUILD.toml");
    }
}

//! Project configuration (`ybt.toml`, spec §6.3 / ambient configuration
//! stack).
//!
//! Grounded on `Project`/`UnvalidatedProject` in
//! `twoliter/src/project/mod.rs`: a `toml::from_str` deserialize pass into
//! an "unvalidated" shape, then a validation step that fills defaults and
//! checks invariants, kept separate so a malformed but well-typed TOML
//! document and a well-typed-but-nonsensical one produce distinct errors.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::{ensure, ResultExt, Snafu};
use tracing::instrument;

use crate::fs;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "ybt.toml";
pub const DEFAULT_BUILD_FILE_NAME: &str = "BUILD.toml";
pub const DEFAULT_TARGET_NAME: &str = "all";
pub const DEFAULT_CACHE_DIR: &str = ".ybt/cache";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read config file '{}': {source}", path.display()))]
    Read { path: PathBuf, source: fs::Error },

    #[snafu(display("failed to parse config file '{}': {source}", path.display()))]
    Parse { path: PathBuf, source: toml::de::Error },

    #[snafu(display("'{name}' in [builders.cachable] is not a valid builder name"))]
    EmptyBuilderName { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Deserialize, Default)]
struct UnvalidatedConfig {
    build_file_name: Option<String>,
    default_target_name: Option<String>,
    cache_dir: Option<PathBuf>,
    #[serde(default)]
    cachable_builders: Vec<String>,
    #[serde(default)]
    global_cache: GlobalCacheConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct GlobalCacheConfig {
    #[serde(default)]
    enabled: bool,
    mirror_dir: Option<PathBuf>,
}

/// The validated, defaults-applied project configuration.
#[derive(Debug, Clone)]
pub struct YConfig {
    pub build_file_name: String,
    pub default_target_name: String,
    pub cache_dir: PathBuf,
    pub cachable_builders: BTreeSet<String>,
    pub global_cache_enabled: bool,
    pub global_cache_mirror_dir: PathBuf,
}

impl YConfig {
    /// The configuration that applies when no `ybt.toml` is present: every
    /// built-in builder is cachable, caches live under `<root>/.ybt`.
    pub fn default_for(project_root: &Path) -> Self {
        Self {
            build_file_name: DEFAULT_BUILD_FILE_NAME.to_string(),
            default_target_name: DEFAULT_TARGET_NAME.to_string(),
            cache_dir: project_root.join(DEFAULT_CACHE_DIR),
            cachable_builders: ["generic", "apt", "docker-image", "alias"]
                .into_iter()
                .map(String::from)
                .collect(),
            global_cache_enabled: false,
            global_cache_mirror_dir: project_root.join(".ybt/global-cache"),
        }
    }

    #[instrument(level = "trace")]
    pub fn load(path: &Path, project_root: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).context(ReadSnafu { path: path.to_path_buf() })?;
        let unvalidated: UnvalidatedConfig =
            toml::from_str(&text).context(ParseSnafu { path: path.to_path_buf() })?;
        Self::validate(unvalidated, project_root)
    }

    fn validate(unvalidated: UnvalidatedConfig, project_root: &Path) -> Result<Self> {
        let defaults = Self::default_for(project_root);

        let mut cachable_builders = defaults.cachable_builders;
        for name in unvalidated.cachable_builders {
            ensure!(!name.trim().is_empty(), EmptyBuilderNameSnafu { name: name.clone() });
            cachable_builders.insert(name);
        }

        Ok(Self {
            build_file_name: unvalidated.build_file_name.unwrap_or(defaults.build_file_name),
            default_target_name: unvalidated.default_target_name.unwrap_or(defaults.default_target_name),
            cache_dir: unvalidated
                .cache_dir
                .map(|p| project_root.join(p))
                .unwrap_or(defaults.cache_dir),
            cachable_builders,
            global_cache_enabled: unvalidated.global_cache.enabled,
            global_cache_mirror_dir: unvalidated
                .global_cache
                .mirror_dir
                .map(|p| project_root.join(p))
                .unwrap_or(defaults.global_cache_mirror_dir),
        })
    }
}

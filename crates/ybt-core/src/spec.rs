//! The target data model (spec §3).
//!
//! Grounded on `examples/original_source/yabt/target_utils.py::Target` (a
//! `SimpleNamespace` of `name, builder_name, props, deps, tags`) and on
//! `examples/original_source/yabt/extend.py::PropType`, reshaped into a
//! statically typed Rust enum the way `SPEC_FULL.md` §1 calls for ("Prop bag
//! -> static typing").

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::artifact::ArtifactStore;
use crate::fingerprint::CacheKeys;
use crate::name::QualifiedName;

/// The closed set of property types a builder signature slot may declare
/// (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PropType {
    Str,
    Number,
    Bool,
    RawList,
    StringList,
    TargetName,
    TargetRef,
    TargetRefList,
    FilePath,
    FilePathList,
    Untyped,
}

/// A typed property value, after extraction and coercion (spec §4.3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum PropValue {
    Str(String),
    Number(f64),
    Bool(bool),
    RawList(Vec<PropValue>),
    StringList(Vec<String>),
    TargetName(QualifiedName),
    TargetRef(QualifiedName),
    TargetRefList(Vec<QualifiedName>),
    FilePath(PathBuf),
    FilePathList(Vec<PathBuf>),
    Mapping(BTreeMap<String, PropValue>),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            PropValue::StringList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_target_ref_list(&self) -> Option<&[QualifiedName]> {
        match self {
            PropValue::TargetRefList(v) => Some(v),
            _ => None,
        }
    }
}

/// Canonical well-known tags (spec §3, `tags` field description).
pub mod tags {
    pub const APT_INSTALLABLE: &str = "apt-installable";
    pub const PIP_INSTALLABLE: &str = "pip-installable";
    pub const CUSTOM_INSTALLER: &str = "custom-installer";
    pub const PRUNE_ME: &str = "prune-me";
}

/// The materialized output of build-file evaluation (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TargetSpec {
    pub name: QualifiedName,
    pub builder_name: String,
    pub props: BTreeMap<String, PropValue>,
    /// Ordered, de-duplicated (first occurrence wins) list of dep names.
    pub deps: Vec<QualifiedName>,
    /// The build flavor this target was evaluated under (e.g. a release vs.
    /// debug workspace), if any (spec §6.4's canonical manifest; grounded on
    /// `examples/original_source/yabt/target_utils.py`'s `release_flavor`
    /// workspace dimension).
    pub flavor: Option<String>,
    pub tags: BTreeSet<String>,
    pub buildenv: Option<QualifiedName>,
    #[serde(skip)]
    pub artifacts: ArtifactStore,
    #[serde(skip)]
    pub cache_keys: Option<CacheKeys>,
}

impl TargetSpec {
    pub fn new(name: QualifiedName, builder_name: impl Into<String>) -> Self {
        Self {
            name,
            builder_name: builder_name.into(),
            props: BTreeMap::new(),
            deps: Vec::new(),
            flavor: None,
            tags: BTreeSet::new(),
            buildenv: None,
            artifacts: ArtifactStore::default(),
            cache_keys: None,
        }
    }

    /// Append a dep, preserving first-occurrence order and de-duplicating
    /// (spec §3: "`deps` is an ordered list... de-duplicated preserving
    /// first occurrence").
    pub fn push_dep(&mut self, dep: QualifiedName) {
        if !self.deps.contains(&dep) {
            self.deps.push(dep);
        }
    }

    pub fn is_cachable(&self, cachable_builders: &BTreeSet<String>) -> bool {
        cachable_builders.contains(&self.builder_name)
    }

    /// Canonical form for `target.json` (spec §6.4): keys sorted, deps
    /// sorted. This is the persisted cache manifest shape; it is NOT the
    /// same as the fingerprinter's self-hash input, which deliberately
    /// excludes `deps` and `buildenv` (spec §4.6) so dep re-ordering cannot
    /// perturb the self hash.
    pub fn canonical_json(&self) -> serde_json::Value {
        let mut deps: Vec<String> = self.deps.iter().map(ToString::to_string).collect();
        deps.sort();
        serde_json::json!({
            "name": self.name.to_string(),
            "builder_name": self.builder_name,
            "deps": deps,
            "flavor": self.flavor,
            "props": self.props,
            "tags": self.tags,
            "buildenv": self.buildenv.as_ref().map(ToString::to_string),
        })
    }
}

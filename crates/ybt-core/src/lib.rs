//! `ybt-core`: the target-graph-engine-and-cache core of the `ybt` polyglot,
//! container-aware build orchestrator. Builder plug-ins, the CLI front-end,
//! SCM providers, and config/logging wiring for a running `ybt` process are
//! all external collaborators (spec §6); this crate owns name resolution,
//! build-file evaluation, the target graph, content-addressed
//! fingerprinting, the artifact store, the two-tier cache, the image-cache
//! classifier, and scheduled execution.

pub mod artifact;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod crawler;
pub mod error;
pub mod evaluator;
pub mod fingerprint;
pub mod fs;
pub mod graph;
pub mod name;
pub mod project;
pub mod registry;
pub mod scheduler;
pub mod spec;

pub use error::{Error, ErrorKind, Result};
pub use name::QualifiedName;
pub use spec::TargetSpec;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

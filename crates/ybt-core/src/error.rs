//! Top-level error taxonomy (spec §7).
//!
//! Every fallible operation in `ybt-core` returns its own module-local
//! `Error` (via `snafu`, mirroring `tools/buildsys/src/*/error.rs` and
//! `tools/oci-cli-wrapper/src/error.rs`). This module collects them behind
//! one umbrella `Error` so `ybt-cli` has a single type to match on, and
//! exposes [`Error::kind`] to recover the coarse-grained taxonomy category
//! the spec names, independent of which module actually produced it.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{source}"))]
    Name { source: crate::name::Error },

    #[snafu(display("{source}"))]
    Register { source: crate::registry::RegisterError },

    #[snafu(display("{source}"))]
    Extract { source: crate::registry::ExtractError },

    #[snafu(display("{source}"))]
    Evaluate { source: crate::evaluator::Error },

    #[snafu(display("{source}"))]
    Crawl { source: crate::crawler::Error },

    #[snafu(display("{source}"))]
    Graph { source: crate::graph::Error },

    #[snafu(display("{source}"))]
    Build { source: crate::scheduler::BuildError },

    #[snafu(display("{source}"))]
    Artifact { source: crate::artifact::Error },

    #[snafu(display("{source}"))]
    Fingerprint { source: crate::fingerprint::Error },

    #[snafu(display("{source}"))]
    LocalCache { source: crate::cache::local::Error },

    #[snafu(display("{source}"))]
    GlobalCache { source: crate::cache::global::Error },

    #[snafu(display("{source}"))]
    Config { source: crate::config::Error },

    #[snafu(display("{source}"))]
    Project { source: crate::project::Error },

    #[snafu(display("policy violation: {reason}"))]
    PolicyViolation { reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The coarse-grained taxonomy category a given error belongs to (spec §7:
/// ParseError, AmbiguousName, EscapesSandbox, DuplicateTarget, UnknownTarget,
/// CycleDetected, PolicyViolation, BuilderFailed, CacheCorrupt,
/// RemoteCacheUnavailable). `ybt-cli` uses this to pick a process exit code
/// without needing to match on every nested `snafu` variant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    AmbiguousName,
    EscapesSandbox,
    DuplicateTarget,
    UnknownTarget,
    CycleDetected,
    PolicyViolation,
    BuilderFailed,
    CacheCorrupt,
    RemoteCacheUnavailable,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Name { source } => match source {
                crate::name::Error::AmbiguousName { .. } => ErrorKind::AmbiguousName,
                crate::name::Error::EscapesSandbox { .. } => ErrorKind::EscapesSandbox,
            },
            Error::Evaluate { source } => match source {
                crate::evaluator::Error::ParseToml { .. } => ErrorKind::ParseError,
                crate::evaluator::Error::MissingBuilderKey { .. } => ErrorKind::ParseError,
                _ => ErrorKind::Other,
            },
            Error::Crawl { source } => match source {
                crate::crawler::Error::DuplicateTarget { .. } => ErrorKind::DuplicateTarget,
                crate::crawler::Error::UnknownTarget { .. } => ErrorKind::UnknownTarget,
                crate::crawler::Error::Name { source } => match source {
                    crate::name::Error::AmbiguousName { .. } => ErrorKind::AmbiguousName,
                    crate::name::Error::EscapesSandbox { .. } => ErrorKind::EscapesSandbox,
                },
                crate::crawler::Error::Evaluate { source } => match source {
                    crate::evaluator::Error::ParseToml { .. } | crate::evaluator::Error::MissingBuilderKey { .. } => {
                        ErrorKind::ParseError
                    }
                    _ => ErrorKind::Other,
                },
                _ => ErrorKind::Other,
            },
            Error::Graph { source } => match source {
                crate::graph::Error::CycleDetected { .. } => ErrorKind::CycleDetected,
                crate::graph::Error::UnknownTarget { .. } => ErrorKind::UnknownTarget,
            },
            Error::Build { .. } => ErrorKind::BuilderFailed,
            Error::LocalCache { source } => match source {
                crate::cache::local::Error::CorruptManifest { .. }
                | crate::cache::local::Error::MissingArtifactsDir { .. } => ErrorKind::CacheCorrupt,
                _ => ErrorKind::Other,
            },
            Error::GlobalCache { source } => match source {
                crate::cache::global::Error::Unavailable { .. } => ErrorKind::RemoteCacheUnavailable,
                _ => ErrorKind::Other,
            },
            Error::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            _ => ErrorKind::Other,
        }
    }
}

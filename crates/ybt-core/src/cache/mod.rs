//! Two-tier build cache (spec §4.8, §4.9).
//!
//! `local` is the on-disk, content-addressed tier every build consults
//! first. `global` is an abstract, best-effort remote tier; the trait here
//! is shaped after `oci-cli-wrapper/src/lib.rs`'s `ImageTool`/`ImageToolImpl`
//! split (a narrow async trait object behind an `Arc<dyn Trait>`, so the
//! scheduler never cares which concrete backend is wired in).

pub mod global;
pub mod local;

pub use global::GlobalCache;
pub use local::LocalCache;

//! Small filesystem helpers shared across modules, wrapping `std::fs` calls
//! in typed, path-carrying errors rather than bare `io::Error`, the way
//! `twoliter/src/common.rs` wraps every filesystem operation in an
//! `anyhow::Context` before it can reach a caller.

use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read '{}': {source}", path.display()))]
    Read { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to write '{}': {source}", path.display()))]
    Write { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to create directory '{}': {source}", path.display()))]
    CreateDir { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to canonicalize '{}': {source}", path.display()))]
    Canonicalize { path: PathBuf, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn read_to_string(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).context(ReadSnafu { path: path.to_path_buf() })
}

pub fn write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, contents).context(WriteSnafu { path: path.to_path_buf() })
}

pub fn create_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path).context(CreateDirSnafu { path: path.to_path_buf() })
}

pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    std::fs::canonicalize(path).context(CanonicalizeSnafu { path: path.to_path_buf() })
}

//! Test-only scaffolding for building scratch projects on disk.
//!
//! Renamed and reshaped from the teacher's `crate::test::copy_project_to_temp_dir`
//! (`twoliter/src/cmd/mod.rs`'s `#[cfg(test)] mod test`), which copies a
//! fixture directory out of `tests/data/` into a fresh `tempfile::TempDir`
//! before every test runs a real command against it. We have no fixture
//! directory to copy (each test's build files differ), so `scratch_project`
//! takes an in-memory file list instead and writes it out the same way.

use std::path::PathBuf;

use tempfile::TempDir;

/// A project materialized under a `TempDir`, kept alive for the scope of
/// the test that built it.
pub struct ScratchProject {
    pub dir: TempDir,
}

impl ScratchProject {
    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

/// Write `files` (relative path -> contents) under a fresh temp directory
/// and return it, mirroring `copy_project_to_temp_dir`'s "give every test
/// its own disposable project" shape without requiring checked-in fixtures.
pub fn scratch_project(files: &[(&str, &str)]) -> ScratchProject {
    let dir = tempfile::tempdir().expect("failed to create scratch project temp dir");
    for (rel_path, contents) in files {
        let path = dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create scratch project directory");
        }
        std::fs::write(&path, contents).expect("failed to write scratch project file");
    }
    ScratchProject { dir }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_nested_files() {
        let project = scratch_project(&[
            ("ybt.toml", "default_target_name = \"all\"\n"),
            ("lib/BUILD.toml", "[[target]]\nbuilder = \"generic\"\nname = \"x\"\ncmd = \"true\"\n"),
        ]);
        assert!(project.root().join("ybt.toml").is_file());
        assert!(project.root().join("lib/BUILD.toml").is_file());
    }
}

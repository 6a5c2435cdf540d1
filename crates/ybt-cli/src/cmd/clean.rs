use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

/// Remove the local cache directory.
#[derive(Debug, Parser)]
pub struct Clean;

impl Clean {
    pub async fn run(self, project_dir: Option<PathBuf>) -> Result<()> {
        let project = super::load_project(project_dir)?;
        if project.config.cache_dir.is_dir() {
            std::fs::remove_dir_all(&project.config.cache_dir)?;
            println!("removed {}", project.config.cache_dir.display());
        } else {
            println!("nothing to clean: {} does not exist", project.config.cache_dir.display());
        }
        Ok(())
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Print the target dependency tree (spec §9 supplement: `ybt tree --dot`).
#[derive(Debug, Parser)]
pub struct Tree {
    /// Target selectors. Defaults to the project's default target.
    pub targets: Vec<String>,

    /// Emit Graphviz DOT instead of an indented listing.
    #[clap(long)]
    pub dot: bool,
}

impl Tree {
    pub async fn run(self, project_dir: Option<PathBuf>) -> Result<()> {
        let project = super::load_project(project_dir)?;
        let registry = super::builder_registry()?;

        let cwd = std::env::current_dir()?;
        let rel_work_dir = project.rel_work_dir(&cwd)?;

        let graph = ybt_core::crawler::crawl(
            &registry,
            &project.root,
            &project.config.build_file_name,
            &rel_work_dir,
            &self.targets,
            &project.config.default_target_name,
        )
        .context("failed to crawl project")?;

        if self.dot {
            print!("{}", graph.to_dot());
        } else {
            let order = graph.stable_reverse_topological_sort().context("cycle in target graph")?;
            for name in order {
                let deps = graph.deps_of(&name);
                if deps.is_empty() {
                    println!("{name}");
                } else {
                    let dep_list: Vec<String> = deps.iter().map(ToString::to_string).collect();
                    println!("{name} -> [{}]", dep_list.join(", "));
                }
            }
        }
        Ok(())
    }
}

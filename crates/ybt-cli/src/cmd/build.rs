use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use ybt_core::cache::global::{LocalFsMirror, NoopGlobalCache};
use ybt_core::cache::local::LocalCache;
use ybt_core::classifier::{get_prebuilt_targets, BaseImageLookup};
use ybt_core::graph::TargetGraph;
use ybt_core::name::QualifiedName;
use ybt_core::scheduler::{BuildContext, Outcome, Scheduler};
use ybt_core::spec::PropValue;

/// Build one or more targets (spec §4.11). With no targets given, builds
/// the project's default target.
#[derive(Debug, Parser)]
pub struct Build {
    /// Target selectors, e.g. `:all`, `//lib:foo`, `**:*`.
    pub targets: Vec<String>,

    /// Keep scheduling independent branches after a builder failure instead
    /// of aborting the whole run on the first failure.
    #[clap(long = "continue-after-fail")]
    pub continue_after_fail: bool,
}

/// Asks the local docker daemon whether an image-target's ref is already
/// present, the way `docker_image.rs`'s builder names the ref it builds
/// (`image_name` prop, defaulting to the target's local name, `:image_tag`,
/// defaulting to `latest`).
struct DockerDaemonLookup<'a> {
    graph: &'a TargetGraph,
}

impl BaseImageLookup for DockerDaemonLookup<'_> {
    fn is_base_image_cached(&self, image_target: &QualifiedName) -> bool {
        let Some(target) = self.graph.get(image_target) else {
            return false;
        };
        let image_tag = target.props.get("image_tag").and_then(PropValue::as_str).unwrap_or("latest");
        let image_name = target
            .props
            .get("image_name")
            .and_then(PropValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| image_target.local().to_string());

        std::process::Command::new("docker")
            .args(["image", "inspect", &format!("{image_name}:{image_tag}")])
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

impl Build {
    pub async fn run(self, project_dir: Option<PathBuf>) -> Result<()> {
        let project = super::load_project(project_dir)?;
        let registry = super::builder_registry()?;

        let cwd = std::env::current_dir()?;
        let rel_work_dir = project.rel_work_dir(&cwd)?;

        let mut graph = ybt_core::crawler::crawl(
            &registry,
            &project.root,
            &project.config.build_file_name,
            &rel_work_dir,
            &self.targets,
            &project.config.default_target_name,
        )
        .context("failed to crawl project")?;

        let violations = registry.run_policies(&graph);
        anyhow::ensure!(
            violations.is_empty(),
            "policy violations:\n{}",
            violations.iter().map(|v| format!("  {}: {}", v.target, v.reason)).collect::<Vec<_>>().join("\n")
        );

        let prebuilt = {
            let lookup = DockerDaemonLookup { graph: &graph };
            get_prebuilt_targets(&graph, &lookup)
        };

        let local_cache = Arc::new(LocalCache::new(&project.config.cache_dir));
        let global_cache: Arc<dyn ybt_core::cache::GlobalCache> = if project.config.global_cache_enabled {
            Arc::new(LocalFsMirror::new(&project.config.global_cache_mirror_dir))
        } else {
            Arc::new(NoopGlobalCache)
        };

        let work_root = project.root.join(".ybt/work");
        let scheduler = Scheduler::new(&registry)
            .with_continue_after_fail(self.continue_after_fail)
            .with_prebuilt_targets(prebuilt);
        let project_root = project.root.clone();
        let outcomes = scheduler
            .run(&mut graph, |name| {
                let safe_name = name.to_string().replace([':', '/'], "_");
                let workspace_dir = work_root.join(safe_name);
                let _ = std::fs::create_dir_all(&workspace_dir);
                BuildContext {
                    project_root: project_root.clone(),
                    workspace_dir,
                    local_cache: local_cache.clone(),
                    global_cache: Some(global_cache.clone()),
                }
            })
            .await
            .context("scheduling failed")?;

        let mut failed = false;
        for (name, outcome) in &outcomes {
            match outcome {
                Outcome::Built => println!("built       {name}"),
                Outcome::CacheHit => println!("cache-hit   {name}"),
                Outcome::Prebuilt => println!("prebuilt    {name}"),
                Outcome::Skipped { because } => println!("skipped     {name} (blocked on {because})"),
                Outcome::Failed(reason) => {
                    failed = true;
                    eprintln!("FAILED      {name}: {reason}");
                }
            }
        }

        anyhow::ensure!(!failed, "one or more targets failed to build");
        Ok(())
    }
}

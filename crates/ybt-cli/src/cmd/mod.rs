//! CLI front-end (spec §6.2). Shaped after `twoliter/src/cmd/mod.rs`: an
//! `Args` root parsed with `clap::Parser`, a `Subcommand` enum, one module
//! per subcommand, and a tiny `run` dispatcher.

mod build;
mod clean;
mod list_builders;
mod tree;

use anyhow::Result;
use clap::Parser;

use build::Build;
use clean::Clean;
use list_builders::ListBuilders;
use tree::Tree;

/// A polyglot, container-aware build orchestrator.
#[derive(Debug, Parser)]
#[clap(about, long_about = None, version)]
pub struct Args {
    /// Project directory. Defaults to searching upward from the current
    /// directory for `ybt.toml` (spec §6.3).
    #[clap(long, global = true)]
    pub project_dir: Option<std::path::PathBuf>,

    /// Set the logging level (`error`, `warn`, `info`, `debug`, `trace`).
    /// Defaults to `RUST_LOG`, or `info` if that is unset.
    #[clap(long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    /// Build one or more targets.
    Build(Build),

    /// Print the target dependency tree, optionally as Graphviz DOT.
    Tree(Tree),

    /// List every registered builder and its docstring.
    ListBuilders(ListBuilders),

    /// Remove the local cache directory.
    Clean(Clean),
}

pub async fn run(args: Args) -> Result<()> {
    match args.subcommand {
        Subcommand::Build(cmd) => cmd.run(args.project_dir).await,
        Subcommand::Tree(cmd) => cmd.run(args.project_dir).await,
        Subcommand::ListBuilders(cmd) => cmd.run(),
        Subcommand::Clean(cmd) => cmd.run(args.project_dir).await,
    }
}

/// Initialize the `tracing` subscriber (ambient logging stack, mirroring
/// the `tracing_subscriber::EnvFilter` setup used throughout the teacher's
/// library crates): `--log-level` if given, else `RUST_LOG`, else `info`.
pub fn init_logging(level: Option<&str>) {
    let filter = level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .try_init();
}

/// Resolve the project the way every subcommand needs to (spec §6.3).
pub(crate) fn load_project(project_dir: Option<std::path::PathBuf>) -> Result<ybt_core::project::Project> {
    let start = match project_dir {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    Ok(ybt_core::project::Project::find_and_load(&start)?)
}

pub(crate) fn builder_registry() -> Result<ybt_core::registry::Registry> {
    let mut registry = ybt_core::registry::Registry::new();
    ybt_builders::register_all(&mut registry)?;
    Ok(registry)
}

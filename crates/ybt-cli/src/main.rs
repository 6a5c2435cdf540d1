use anyhow::Result;
use clap::Parser;

mod cmd;

use cmd::Args;

/// `anyhow` prints a nicely formatted error message with `Debug`, so we can
/// return a result from the `main` function, the way `twoliter/src/main.rs`
/// does.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cmd::init_logging(args.log_level.as_deref());
    cmd::run(args).await
}

//! Build command - Build a fixture into an image.

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{DaemonArgs, FixtureArgs};

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    fixture: FixtureArgs,

    /// Do not print the daemon build log
    #[arg(short, long)]
    quiet: bool,
}

pub async fn execute(args: BuildArgs, daemon: &DaemonArgs) -> Result<()> {
    let FixtureArgs { provider, fixture } = args.fixture;
    info!("Building state {}/{}", provider, fixture);

    let manager = daemon.connect().await?;

    let image = if args.quiet {
        manager
            .build(&provider, &fixture, &mut tokio::io::sink())
            .await?
    } else {
        manager
            .build(&provider, &fixture, &mut tokio::io::stdout())
            .await?
    };

    println!("{}", image);
    Ok(())
}

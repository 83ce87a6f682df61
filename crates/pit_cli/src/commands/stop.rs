//! Stop command - Remove a fixture container.

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{DaemonArgs, FixtureArgs};

#[derive(Args)]
pub struct StopArgs {
    #[command(flatten)]
    fixture: FixtureArgs,

    /// Succeed when no container is running for the fixture
    #[arg(long)]
    ignore_missing: bool,
}

pub async fn execute(args: StopArgs, daemon: &DaemonArgs) -> Result<()> {
    let FixtureArgs { provider, fixture } = args.fixture;
    info!("Stopping state {}/{}", provider, fixture);

    let manager = daemon.connect().await?;
    match manager.stop(&provider, &fixture).await {
        Ok(()) => {
            println!("🗑️  Removed {}", manager.image_name(&provider, &fixture));
            Ok(())
        }
        Err(pit_state::StateError::ContainerNotFound { name }) if args.ignore_missing => {
            println!("   No container {} running", name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

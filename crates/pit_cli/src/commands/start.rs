//! Start command - Start a fixture container.

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{DaemonArgs, FixtureArgs};

#[derive(Args)]
pub struct StartArgs {
    #[command(flatten)]
    fixture: FixtureArgs,

    /// Print the started container as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: StartArgs, daemon: &DaemonArgs) -> Result<()> {
    let FixtureArgs { provider, fixture } = args.fixture;
    info!("Starting state {}/{}", provider, fixture);

    let manager = daemon.connect().await?;
    let state = manager.start(&provider, &fixture).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("✅ {} ready", state.name);
    println!("   Container: {}", state.id);
    println!("   Host:      {}", state.host);
    for port in &state.ports {
        println!("   Port:      {} -> {}:{}", port.container_key(), state.host, port.host_port);
    }
    Ok(())
}

//! Name command - Print the image/container name of a fixture.

use anyhow::Result;
use clap::Args;

use pit_state::Naming;

use super::{DaemonArgs, FixtureArgs};

#[derive(Args)]
pub struct NameArgs {
    #[command(flatten)]
    fixture: FixtureArgs,

    /// Also print the build context directory
    #[arg(long)]
    path: bool,
}

pub async fn execute(args: NameArgs, daemon: &DaemonArgs) -> Result<()> {
    let naming = Naming::new(daemon.states_dir.clone());
    let FixtureArgs { provider, fixture } = &args.fixture;

    println!("{}", naming.image_name_for(provider, fixture));
    if args.path {
        println!("{}", naming.context_path(provider, fixture).display());
    }
    Ok(())
}

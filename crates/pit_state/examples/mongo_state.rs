//! Example: Provisioning a MongoDB state
//!
//! Builds the `mongo/'several users'` fixture, starts it and removes it
//! again. Needs a TLS Docker daemon.
//!
//! Run with: DOCKER_HOST=tcp://... DOCKER_CERT_PATH=... cargo run --example mongo_state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pit_state::{Manager, ManagerOptions, PortBinding, StateConfig, StateProviderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let host = std::env::var("DOCKER_HOST")?;
    let cert_path = std::env::var("DOCKER_CERT_PATH")?;
    let states_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/states");

    let config = StateConfig::new().with_provider(
        "mongo",
        StateProviderConfig::new(".*waiting for connections.*")?
            .arg("--nojournal")
            .port(PortBinding::new(27017, 30000))
            .ready_timeout(Duration::from_secs(10)),
    );

    let manager = Manager::connect(
        ManagerOptions::new(host, cert_path, states_dir),
        Arc::new(config),
    )
    .await?;

    let mut log = tokio::io::stdout();
    let image = manager.build("mongo", "several users", &mut log).await?;
    println!("Built {}", image);

    let state = manager.start("mongo", "several users").await?;
    println!("Container {} ready at {:?}", state.id, state.address(27017));

    manager.stop("mongo", "several users").await?;
    println!("Removed {}", state.name);

    Ok(())
}

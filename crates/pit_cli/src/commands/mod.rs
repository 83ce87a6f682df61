//! CLI command definitions.
//!
//! Every subcommand addresses one fixture by provider and fixture name.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use pit_state::{Manager, ManagerOptions, StateConfig};

pub mod build;
pub mod name;
pub mod start;
pub mod stop;

/// pit-state - disposable service states for integration tests
#[derive(Parser)]
#[command(name = "pit-state")]
#[command(version, about = "Build, start and stop disposable service states")]
#[command(long_about = r#"
pit-state turns fixture directories into running containers for
integration tests. A fixture lives in <states-dir>/<provider>/'<fixture>'
and holds a Dockerfile build context.

WORKFLOW:
  build   → Build the fixture into a pitstate_<provider>_<digest> image
  start   → Start a container and wait until it logs its ready pattern
  stop    → Force-remove the container of the fixture
  name    → Print the image/container name of a fixture

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  3 - State not found
  4 - State not ready in time
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub daemon: DaemonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon connection and fixture location.
#[derive(Args, Clone)]
pub struct DaemonArgs {
    /// Docker daemon address
    #[arg(long, global = true, env = "DOCKER_HOST")]
    pub host: Option<String>,

    /// Directory holding cert.pem, key.pem and ca.pem
    #[arg(long, global = true, env = "DOCKER_CERT_PATH")]
    pub cert_path: Option<PathBuf>,

    /// Directory holding the provider fixture folders
    #[arg(long, global = true, env = "PIT_STATES_DIR", default_value = "states")]
    pub states_dir: PathBuf,

    /// State provider configuration file
    #[arg(long, global = true, env = "PIT_CONFIG", default_value = "pit.yaml")]
    pub config: PathBuf,
}

/// Provider and fixture addressed by a command.
#[derive(Args, Clone)]
pub struct FixtureArgs {
    /// State provider, e.g. mongo
    pub provider: String,

    /// Fixture name, e.g. "several users"
    pub fixture: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a fixture into an image
    Build(build::BuildArgs),

    /// Start a fixture container and wait until it is ready
    Start(start::StartArgs),

    /// Remove a fixture container
    Stop(stop::StopArgs),

    /// Print the image/container name of a fixture
    Name(name::NameArgs),
}

impl DaemonArgs {
    fn load_config(&self) -> Result<StateConfig> {
        if !self.config.exists() {
            tracing::warn!(
                "Config file {} not found, no state providers configured",
                self.config.display()
            );
            return Ok(StateConfig::new());
        }
        let config = StateConfig::load(&self.config)
            .with_context(|| format!("Failed to load config {}", self.config.display()))?;
        tracing::debug!(
            "Loaded state providers {:?} from {}",
            config.provider_names(),
            self.config.display()
        );
        Ok(config)
    }

    /// Connect to the daemon.
    pub async fn connect(&self) -> Result<Manager> {
        let host = self
            .host
            .clone()
            .context("No Docker host given (use --host or DOCKER_HOST)")?;
        let cert_path = self
            .cert_path
            .clone()
            .context("No certificate directory given (use --cert-path or DOCKER_CERT_PATH)")?;

        let options = ManagerOptions::new(host, cert_path, self.states_dir.clone());
        let config = self.load_config()?;

        Manager::connect(options, Arc::new(config))
            .await
            .context("Failed to connect to Docker daemon")
    }
}

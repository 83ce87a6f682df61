//! # pit_state
//!
//! Disposable, deterministic backing services for microservice integration
//! tests.
//!
//! A *state* is a fixture directory holding a Docker build context, e.g. a
//! database image with seeded data. This crate builds the fixture into an
//! image, starts a container from it, waits until the service inside logs a
//! readiness banner and removes the container again afterwards.
//!
//! # Features
//!
//! - **Content-addressed names**: one image/container name per fixture path
//! - **Streaming builds**: the daemon's build log is forwarded while it runs
//! - **Readiness detection**: container output is polled against a pattern
//! - **TLS**: client-certificate authentication against the daemon
//! - **Mock Runtime**: for testing without a Docker daemon
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use pit_state::{Manager, ManagerOptions, StateConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StateConfig::load(Path::new("pit.yaml"))?;
//!     let options = ManagerOptions::new("tcp://192.168.59.103:2376", "/certs", ".example/states");
//!     let manager = Manager::connect(options, Arc::new(config)).await?;
//!
//!     let mut log = Vec::new();
//!     manager.build("mongo", "several users", &mut log).await?;
//!
//!     let state = manager.start("mongo", "several users").await?;
//!     println!("mongo reachable on {:?}", state.address(27017));
//!
//!     manager.stop("mongo", "several users").await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod builder;
pub mod config;
pub mod docker;
pub mod error;
pub mod manager;
pub mod mock;
pub mod naming;
pub mod readiness;
pub mod runtime;

pub use builder::ImageBuilder;
pub use config::{ConfigData, ConfigSource, PortBinding, Protocol, StateConfig, StateProviderConfig};
pub use docker::{DaemonEndpoint, DockerRuntime};
pub use error::{StateError, StateResult};
pub use manager::{Manager, ManagerOptions, StateContainer};
pub use mock::{CapturedCall, MockContainer, MockRuntime};
pub use naming::{context_path, image_name, Naming};
pub use readiness::{ReadinessDetector, DEFAULT_POLL_INTERVAL};
pub use runtime::{
    ContainerEntry, ContainerInfo, CreateRequest, LogsRequest, RemoveRequest, RuntimeClient,
    RuntimeError, RuntimeResult,
};
pub use tokio_util::sync::CancellationToken;

//! Lifecycle of state containers: build, start and stop.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::builder::ImageBuilder;
use crate::config::{ConfigSource, PortBinding};
use crate::docker::DockerRuntime;
use crate::error::{StateError, StateResult};
use crate::naming::{is_state_name, Naming};
use crate::readiness::ReadinessDetector;
use crate::runtime::{CreateRequest, RemoveRequest, RuntimeClient};

/// A started state container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateContainer {
    /// Container ID
    pub id: String,
    /// Container name, equal to the image name
    pub name: String,
    /// Host the published ports are reachable on
    pub host: String,
    /// Published ports
    pub ports: Vec<PortBinding>,
    /// When the container was found ready
    pub started_at: DateTime<Utc>,
}

impl StateContainer {
    /// `host:port` under which a container port is reachable.
    pub fn address(&self, container_port: u16) -> Option<String> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port)
            .map(|p| format!("{}:{}", self.host, p.host_port))
    }
}

/// Connection settings for [`Manager::connect`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Docker daemon address, e.g. `tcp://192.168.59.103:2376`
    pub host: String,
    /// Directory holding `cert.pem`, `key.pem` and `ca.pem`
    pub cert_path: PathBuf,
    /// Directory holding the `<provider>/'<fixture>'` trees
    pub states_dir: PathBuf,
    /// Readiness poll interval override
    pub poll_interval: Option<Duration>,
}

impl ManagerOptions {
    pub fn new(
        host: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        states_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            cert_path: cert_path.into(),
            states_dir: states_dir.into(),
            poll_interval: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

/// Builds, starts and stops state containers.
///
/// Nothing is remembered between calls: every operation derives the
/// image/container name from the provider and fixture again. Operations on
/// the same fixture are serialized; different fixtures run concurrently.
pub struct Manager {
    runtime: Arc<dyn RuntimeClient>,
    naming: Naming,
    config: Arc<dyn ConfigSource>,
    host: String,
    builder: ImageBuilder,
    readiness: ReadinessDetector,
    locks: FixtureLocks,
}

impl Manager {
    /// Create a manager over an existing runtime client.
    ///
    /// `host` is the address state containers are reachable on, without
    /// scheme or port.
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        naming: Naming,
        config: Arc<dyn ConfigSource>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            builder: ImageBuilder::new(runtime.clone(), naming.clone()),
            runtime,
            naming,
            config,
            host: host.into(),
            readiness: ReadinessDetector::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to a TLS-protected Docker daemon.
    pub async fn connect(
        options: ManagerOptions,
        config: Arc<dyn ConfigSource>,
    ) -> StateResult<Self> {
        let docker = DockerRuntime::connect_tls(&options.host, &options.cert_path).await?;
        let host = docker.endpoint().host().to_string();

        let mut manager = Self::new(Arc::new(docker), Naming::new(options.states_dir), config, host);
        if let Some(interval) = options.poll_interval {
            manager = manager.with_poll_interval(interval);
        }
        Ok(manager)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.readiness = ReadinessDetector::new(interval);
        self
    }

    pub fn states_dir(&self) -> &Path {
        self.naming.base_dir()
    }

    /// Image and container name of a fixture.
    pub fn image_name(&self, provider: &str, fixture: &str) -> String {
        self.naming.image_name_for(provider, fixture)
    }

    /// Build the image of a fixture, streaming the build log to `output`.
    pub async fn build<W>(&self, provider: &str, fixture: &str, output: &mut W) -> StateResult<String>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.build_with_cancel(provider, fixture, output, &CancellationToken::new())
            .await
    }

    pub async fn build_with_cancel<W>(
        &self,
        provider: &str,
        fixture: &str,
        output: &mut W,
        cancel: &CancellationToken,
    ) -> StateResult<String>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let _guard = self.lock_fixture(&self.image_name(provider, fixture)).await;

        self.builder.build(provider, fixture, output, cancel).await
    }

    /// Start a container from a previously built fixture image and wait
    /// until it reports ready.
    ///
    /// A container that fails to become ready is left in place; call
    /// [`Manager::stop`] to remove it.
    pub async fn start(&self, provider: &str, fixture: &str) -> StateResult<StateContainer> {
        self.start_with_cancel(provider, fixture, &CancellationToken::new())
            .await
    }

    pub async fn start_with_cancel(
        &self,
        provider: &str,
        fixture: &str,
        cancel: &CancellationToken,
    ) -> StateResult<StateContainer> {
        let config = self
            .config
            .state_provider(provider)
            .ok_or_else(|| StateError::ConfigNotFound {
                provider: provider.to_string(),
            })?;

        let name = self.image_name(provider, fixture);
        let _guard = self.lock_fixture(&name).await;

        info!("Starting state {}/{} from image {}", provider, fixture, name);

        let request = CreateRequest {
            name: name.clone(),
            image: name.clone(),
            command: config.command.clone(),
            ports: config.ports.clone(),
        };
        let id = or_cancel(cancel, self.runtime.create_container(&request))
            .await?
            .map_err(|e| {
                if e.is_conflict() {
                    StateError::ContainerExists { name: name.clone() }
                } else {
                    StateError::ContainerCreateError {
                        image: name.clone(),
                        message: e.message,
                    }
                }
            })?;
        debug!("Created container {} for {}", id, name);

        or_cancel(cancel, self.runtime.start_container(&id))
            .await?
            .map_err(|e| StateError::ContainerStartError {
                image: name.clone(),
                message: e.message,
            })?;

        self.readiness
            .wait_ready(
                self.runtime.as_ref(),
                &id,
                &config.ready_pattern,
                config.ready_timeout,
                cancel,
            )
            .await?;

        let info = self
            .runtime
            .inspect_container(&id)
            .await
            .map_err(|e| StateError::InspectError {
                container: name.clone(),
                message: e.message,
            })?;

        info!("State {} ready on {}", name, self.host);
        Ok(StateContainer {
            id: info.id,
            name,
            host: self.host.clone(),
            ports: config.ports.clone(),
            started_at: Utc::now(),
        })
    }

    /// Force-remove the container of a fixture, including its volumes.
    pub async fn stop(&self, provider: &str, fixture: &str) -> StateResult<()> {
        let name = self.image_name(provider, fixture);
        let _guard = self.lock_fixture(&name).await;

        let containers = self.runtime.list_containers(true).await?;
        let container = containers
            .into_iter()
            .filter(|c| c.names.iter().any(|n| is_state_name(n)))
            .find(|c| c.has_name(&name))
            .ok_or_else(|| StateError::ContainerNotFound { name: name.clone() })?;

        self.runtime
            .remove_container(&container.id, &RemoveRequest::force())
            .await
            .map_err(|e| StateError::RemoveError {
                name: name.clone(),
                message: e.message,
            })?;

        info!("Removed state container {} ({})", name, container.id);
        Ok(())
    }

    /// Serialize operations on one fixture. The lock entry is dropped again
    /// once nobody holds or waits for it.
    async fn lock_fixture(&self, name: &str) -> FixtureGuard<'_> {
        let mut fixture = FixtureGuard {
            locks: &self.locks,
            name: name.to_string(),
            guard: None,
        };
        let lock = self
            .locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        fixture.guard = Some(lock.lock_owned().await);
        fixture
    }
}

type FixtureLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

struct FixtureGuard<'a> {
    locks: &'a FixtureLocks,
    name: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for FixtureGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        if locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.name);
        }
    }
}

async fn or_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> StateResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StateError::Cancelled),
        output = fut => Ok(output),
    }
}

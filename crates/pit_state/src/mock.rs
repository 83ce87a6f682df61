//! Mock container runtime for testing.
//!
//! Keeps images and containers in memory and replays scripted container
//! output, so the manager can be exercised without a Docker daemon.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::runtime::{
    ContainerEntry, ContainerInfo, CreateRequest, LogsRequest, RemoveRequest, RuntimeClient,
    RuntimeError, RuntimeResult,
};

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    /// Image name, container id or container name the call was about
    pub target: Option<String>,
}

/// Container known to the mock runtime.
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub ports: Vec<crate::config::PortBinding>,
    started_at: Option<Instant>,
}

impl MockContainer {
    pub fn running(&self) -> bool {
        self.started_at.is_some()
    }
}

/// In-memory runtime client.
///
/// Clones share state, so a clone handed to the manager can be inspected
/// from the test afterwards.
#[derive(Clone)]
pub struct MockRuntime {
    /// Images that "exist".
    images: Arc<RwLock<Vec<String>>>,
    /// Created containers.
    containers: Arc<RwLock<Vec<MockContainer>>>,
    /// Output lines and the delay after start at which they appear.
    log_script: Arc<RwLock<Vec<(Duration, String)>>>,
    /// Lines written to the sink on every build.
    build_output: Arc<RwLock<Vec<String>>>,
    /// Simulated failures, keyed by method name.
    failures: Arc<RwLock<HashMap<String, RuntimeError>>>,
    /// Simulated latency, keyed by method name.
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    /// Captured calls for verification.
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    next_id: Arc<AtomicUsize>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            images: Arc::new(RwLock::new(Vec::new())),
            containers: Arc::new(RwLock::new(Vec::new())),
            log_script: Arc::new(RwLock::new(Vec::new())),
            build_output: Arc::new(RwLock::new(vec![
                "Step 1/1 : FROM scratch\n".to_string(),
                " ---> Running in 5f1c2a\n".to_string(),
                "Successfully built 5f1c2a9e0b7d\n".to_string(),
            ])),
            failures: Arc::new(RwLock::new(HashMap::new())),
            delays: Arc::new(RwLock::new(HashMap::new())),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Add an image that should "exist".
    pub fn add_existing_image(self, image: impl Into<String>) -> Self {
        self.images.write().push(image.into());
        self
    }

    /// Emit `line` once a container has been running for `after`.
    pub fn add_log_line(self, after: Duration, line: impl Into<String>) -> Self {
        self.log_script.write().push((after, line.into()));
        self
    }

    /// Replace the build log written on `build_image`.
    pub fn with_build_output(self, lines: Vec<String>) -> Self {
        *self.build_output.write() = lines;
        self
    }

    /// Make every call to `method` fail with `message`.
    pub fn fail_on(self, method: &str, message: impl Into<String>) -> Self {
        self.failures
            .write()
            .insert(method.to_string(), RuntimeError::new(message));
        self
    }

    /// Make every call to `method` take `delay` before it answers.
    pub fn with_delay(self, method: &str, delay: Duration) -> Self {
        self.delays.write().insert(method.to_string(), delay);
        self
    }

    /// Stop failing calls to `method`.
    pub fn clear_failure(&self, method: &str) {
        self.failures.write().remove(method);
    }

    pub fn images(&self) -> Vec<String> {
        self.images.read().clone()
    }

    pub fn containers(&self) -> Vec<MockContainer> {
        self.containers.read().clone()
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls
            .read()
            .iter()
            .any(|c| c.method == method)
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    fn record_call(&self, method: &str, target: Option<&str>) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            target: target.map(str::to_string),
        });
    }

    fn check_failure(&self, method: &str) -> RuntimeResult<()> {
        match self.failures.read().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn simulate_latency(&self, method: &str) {
        let delay = self.delays.read().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn no_such_container(id: &str) -> RuntimeError {
        RuntimeError::with_status(404, format!("No such container: {}", id))
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.record_call("ping", None);
        self.check_failure("ping")
    }

    async fn build_image(
        &self,
        name: &str,
        _context: Vec<u8>,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> RuntimeResult<()> {
        self.record_call("build_image", Some(name));
        self.simulate_latency("build_image").await;

        let lines = self.build_output.read().clone();
        for line in lines {
            output.write_all(line.as_bytes()).await?;
        }
        output.flush().await?;
        self.check_failure("build_image")?;

        let mut images = self.images.write();
        if !images.iter().any(|i| i == name) {
            images.push(name.to_string());
        }
        Ok(())
    }

    async fn create_container(&self, request: &CreateRequest) -> RuntimeResult<String> {
        self.record_call("create_container", Some(&request.name));
        self.check_failure("create_container")?;

        if !self.images.read().contains(&request.image) {
            return Err(RuntimeError::with_status(
                404,
                format!("No such image: {}", request.image),
            ));
        }

        let mut containers = self.containers.write();
        if containers.iter().any(|c| c.name == request.name) {
            return Err(RuntimeError::with_status(
                409,
                format!("Conflict. The container name \"/{}\" is already in use", request.name),
            ));
        }

        let id = format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst));
        containers.push(MockContainer {
            id: id.clone(),
            name: request.name.clone(),
            image: request.image.clone(),
            command: request.command.clone(),
            ports: request.ports.clone(),
            started_at: None,
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.record_call("start_container", Some(id));
        self.check_failure("start_container")?;

        let mut containers = self.containers.write();
        let container = containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Self::no_such_container(id))?;
        container.started_at.get_or_insert_with(Instant::now);
        Ok(())
    }

    async fn logs(&self, id: &str, request: &LogsRequest) -> RuntimeResult<String> {
        self.record_call("logs", Some(id));
        self.simulate_latency("logs").await;
        self.check_failure("logs")?;

        let started_at = self
            .containers
            .read()
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Self::no_such_container(id))?
            .started_at;

        let Some(started_at) = started_at else {
            return Ok(String::new());
        };
        if !request.stdout && !request.stderr {
            return Ok(String::new());
        }

        let elapsed = started_at.elapsed();
        Ok(self
            .log_script
            .read()
            .iter()
            .filter(|(after, _)| *after <= elapsed)
            .map(|(_, line)| line.as_str())
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        self.record_call("inspect_container", Some(id));
        self.check_failure("inspect_container")?;

        self.containers
            .read()
            .iter()
            .find(|c| c.id == id || c.name == id)
            .map(|c| ContainerInfo {
                id: c.id.clone(),
                name: c.name.clone(),
                running: c.running(),
            })
            .ok_or_else(|| Self::no_such_container(id))
    }

    async fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerEntry>> {
        self.record_call("list_containers", None);
        self.check_failure("list_containers")?;

        Ok(self
            .containers
            .read()
            .iter()
            .filter(|c| all || c.running())
            .map(|c| ContainerEntry {
                id: c.id.clone(),
                names: vec![format!("/{}", c.name)],
            })
            .collect())
    }

    async fn remove_container(&self, id: &str, request: &RemoveRequest) -> RuntimeResult<()> {
        self.record_call("remove_container", Some(id));
        self.check_failure("remove_container")?;

        let mut containers = self.containers.write();
        let index = containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| Self::no_such_container(id))?;
        if containers[index].running() && !request.force {
            return Err(RuntimeError::with_status(
                409,
                format!("You cannot remove a running container {}", id),
            ));
        }
        containers.remove(index);
        Ok(())
    }
}

//! Container runtime abstraction.
//!
//! Everything the manager needs from the container daemon goes through
//! [`RuntimeClient`]. [`crate::docker::DockerRuntime`] is the production
//! implementation and [`crate::mock::MockRuntime`] the in-memory one.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::config::PortBinding;

/// Result type alias for runtime calls.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failure reported by the container daemon or the transport to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RuntimeError {
    /// HTTP status returned by the daemon, when there was one
    pub status: Option<u16>,
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status == Some(409)
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Container creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Container name
    pub name: String,
    /// Image to create the container from
    pub image: String,
    /// Entrypoint arguments (empty keeps the image default)
    pub command: Vec<String>,
    /// Ports to publish on the daemon host
    pub ports: Vec<PortBinding>,
}

/// Which output streams to read from a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogsRequest {
    pub stdout: bool,
    pub stderr: bool,
}

impl LogsRequest {
    /// Full combined stdout and stderr, from the beginning.
    pub fn snapshot() -> Self {
        Self {
            stdout: true,
            stderr: true,
        }
    }
}

/// Container removal options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveRequest {
    /// Kill the container if it is running
    pub force: bool,
    /// Remove anonymous volumes attached to the container
    pub remove_volumes: bool,
}

impl RemoveRequest {
    /// Kill and remove together with volumes.
    pub fn force() -> Self {
        Self {
            force: true,
            remove_volumes: true,
        }
    }
}

/// Result of a container inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Canonical container identifier
    pub id: String,
    pub name: String,
    pub running: bool,
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub id: String,
    /// Names as reported by the daemon, usually with a leading `/`
    pub names: Vec<String>,
}

impl ContainerEntry {
    /// Whether any of the container names equals `name` exactly.
    pub fn has_name(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|n| n.strip_prefix('/').unwrap_or(n) == name)
    }
}

/// Operations on the container daemon.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Check that the daemon answers.
    async fn ping(&self) -> RuntimeResult<()>;

    /// Build an image tagged `name` from a tar build context, writing the
    /// build log to `output` as it arrives.
    async fn build_image(
        &self,
        name: &str,
        context: Vec<u8>,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> RuntimeResult<()>;

    /// Create a container and return its identifier.
    async fn create_container(&self, request: &CreateRequest) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Read the container output collected so far.
    async fn logs(&self, id: &str, request: &LogsRequest) -> RuntimeResult<String>;

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo>;

    /// List containers; `all` includes stopped ones.
    async fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerEntry>>;

    async fn remove_container(&self, id: &str, request: &RemoveRequest) -> RuntimeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_name_strips_slash() {
        let entry = ContainerEntry {
            id: "abc".to_string(),
            names: vec!["/pitstate_mongo_1".to_string(), "alias".to_string()],
        };
        assert!(entry.has_name("pitstate_mongo_1"));
        assert!(entry.has_name("alias"));
        assert!(!entry.has_name("pitstate_mongo"));
    }

    #[test]
    fn test_error_status() {
        assert!(RuntimeError::with_status(404, "No such container").is_not_found());
        assert!(RuntimeError::with_status(409, "Conflict").is_conflict());
        assert!(!RuntimeError::new("boom").is_not_found());
    }
}

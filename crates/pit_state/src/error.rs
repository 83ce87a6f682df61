//! Error types for state operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while building, starting or stopping a state.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("No state provider configured for '{provider}'")]
    ConfigNotFound { provider: String },

    #[error("Invalid state configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to archive build context {}: {source}", .path.display())]
    ArchiveError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image build failed for {image}: {message}")]
    BuildError { image: String, message: String },

    #[error("Failed to create container from image {image} (was the state built?): {message}")]
    ContainerCreateError { image: String, message: String },

    #[error("Container {name} already exists, stop it first")]
    ContainerExists { name: String },

    #[error("Failed to start container from image {image}: {message}")]
    ContainerStartError { image: String, message: String },

    #[error("Container {container} not ready after {}", format_duration(.timeout))]
    ReadinessTimeout { container: String, timeout: Duration },

    #[error("Failed to fetch logs of container {container}: {message}")]
    LogFetchError { container: String, message: String },

    #[error("Failed to inspect container {container}: {message}")]
    InspectError { container: String, message: String },

    #[error("No container found with name {name}")]
    ContainerNotFound { name: String },

    #[error("Failed to remove container {name}: {message}")]
    RemoveError { name: String, message: String },

    #[error("Docker connection failed: {0}")]
    Connection(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_duration(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

impl StateError {
    /// Whether the error means the requested state does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. } | Self::ContainerNotFound { .. }
        )
    }
}

//! State provider configuration.
//!
//! Providers are declared in a YAML (or JSON) file:
//!
//! ```yaml
//! state_providers:
//!   mongo:
//!     ports: ["27017:30000"]
//!     ready_pattern: ".*waiting for connections.*"
//!     ready_timeout: "1s"
//!     cmd: ["--nojournal"]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Readiness timeout used when a provider does not declare one.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport protocol of a port binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Container port published on a host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    pub fn new(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(mut self) -> Self {
        self.protocol = Protocol::Udp;
        self
    }

    /// Port key as used by the Docker API, e.g. `27017/tcp`.
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

impl FromStr for PortBinding {
    type Err = StateError;

    /// Parses `<container>:<host>` with an optional `/tcp` or `/udp` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            StateError::InvalidConfig(format!("invalid port binding '{}': {}", s, reason))
        };

        let (ports, protocol) = match s.trim().split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some(_) => return Err(invalid("protocol must be tcp or udp")),
            None => (s.trim(), Protocol::Tcp),
        };

        let (container, host) = ports
            .split_once(':')
            .ok_or_else(|| invalid("expected <container>:<host>"))?;
        let container_port = container
            .parse::<u16>()
            .map_err(|_| invalid("container port is not a number"))?;
        let host_port = host
            .parse::<u16>()
            .map_err(|_| invalid("host port is not a number"))?;

        Ok(Self {
            container_port,
            host_port,
            protocol,
        })
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container_port, self.host_port)?;
        if self.protocol == Protocol::Udp {
            write!(f, "/udp")?;
        }
        Ok(())
    }
}

/// Resolved settings for one state provider.
#[derive(Debug, Clone)]
pub struct StateProviderConfig {
    /// Arguments passed to the image entrypoint (empty keeps the image default)
    pub command: Vec<String>,
    /// Published ports
    pub ports: Vec<PortBinding>,
    /// Pattern matched against the container output to detect readiness
    pub ready_pattern: Regex,
    /// Maximum time to wait for the pattern
    pub ready_timeout: Duration,
}

impl StateProviderConfig {
    pub fn new(ready_pattern: &str) -> StateResult<Self> {
        Ok(Self {
            command: Vec::new(),
            ports: Vec::new(),
            ready_pattern: compile_pattern(ready_pattern)?,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        })
    }

    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    pub fn port(mut self, binding: PortBinding) -> Self {
        self.ports.push(binding);
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Host port published for a container port, if any.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port)
            .map(|p| p.host_port)
    }
}

fn compile_pattern(pattern: &str) -> StateResult<Regex> {
    Regex::new(pattern).map_err(|e| {
        StateError::InvalidConfig(format!("invalid ready pattern '{}': {}", pattern, e))
    })
}

/// Provider settings as written in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateProviderConfigData {
    #[serde(default)]
    pub ports: Vec<String>,
    pub ready_pattern: String,
    #[serde(default)]
    pub ready_timeout: Option<String>,
    #[serde(default, alias = "command")]
    pub cmd: Vec<String>,
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigData {
    #[serde(default)]
    pub state_providers: BTreeMap<String, StateProviderConfigData>,
}

/// Source of provider settings consulted by the manager.
pub trait ConfigSource: Send + Sync {
    /// Settings for a provider, or `None` when it is not configured.
    fn state_provider(&self, provider: &str) -> Option<&StateProviderConfig>;
}

/// In-memory provider configuration.
#[derive(Debug, Clone, Default)]
pub struct StateConfig {
    providers: HashMap<String, StateProviderConfig>,
}

impl StateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, name: impl Into<String>, config: StateProviderConfig) -> Self {
        self.providers.insert(name.into(), config);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, config: StateProviderConfig) {
        self.providers.insert(name.into(), config);
    }

    /// Names of all configured providers, sorted.
    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validate raw file data into resolved settings.
    pub fn parse(data: ConfigData) -> StateResult<Self> {
        let mut config = Self::new();

        for (name, raw) in data.state_providers {
            let in_provider = |e: StateError| {
                let reason = match e {
                    StateError::InvalidConfig(reason) => reason,
                    other => other.to_string(),
                };
                StateError::InvalidConfig(format!("provider '{}': {}", name, reason))
            };

            let mut provider = StateProviderConfig::new(&raw.ready_pattern)
                .map_err(in_provider)?
                .command(raw.cmd);

            for port in &raw.ports {
                provider = provider.port(port.parse().map_err(in_provider)?);
            }

            if let Some(timeout) = raw.ready_timeout.as_deref() {
                let timeout = humantime::parse_duration(timeout).map_err(|e| {
                    StateError::InvalidConfig(format!(
                        "provider '{}': invalid ready timeout '{}': {}",
                        name, timeout, e
                    ))
                })?;
                provider = provider.ready_timeout(timeout);
            }

            config.insert(name, provider);
        }

        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> StateResult<Self> {
        let data: ConfigData = serde_yaml::from_str(content)
            .map_err(|e| StateError::InvalidConfig(e.to_string()))?;
        Self::parse(data)
    }

    pub fn from_json_str(content: &str) -> StateResult<Self> {
        let data: ConfigData = serde_json::from_str(content)
            .map_err(|e| StateError::InvalidConfig(e.to_string()))?;
        Self::parse(data)
    }

    /// Load a configuration file, choosing the format by extension.
    pub fn load(path: &Path) -> StateResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }
}

impl ConfigSource for StateConfig {
    fn state_provider(&self, provider: &str) -> Option<&StateProviderConfig> {
        self.providers.get(provider)
    }
}

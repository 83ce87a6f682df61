//! Docker implementation of RuntimeClient.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::BuildInfo;
use bollard::service::{HostConfig, PortBinding as DockerPortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::runtime::{
    ContainerEntry, ContainerInfo, CreateRequest, LogsRequest, RemoveRequest, RuntimeClient,
    RuntimeError, RuntimeResult,
};

/// Request timeout for daemon calls, in seconds.
const DOCKER_TIMEOUT_SECS: u64 = 120;

impl From<bollard::errors::Error> for RuntimeError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => RuntimeError::with_status(status_code, message),
            other => RuntimeError::new(other.to_string()),
        }
    }
}

/// Address of the Docker daemon.
///
/// Accepts `tcp://host:port`, `http://host:port`, `https://host:port` or a
/// bare `host:port`. Connections always use https.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonEndpoint {
    host: String,
    port: Option<u16>,
}

impl DaemonEndpoint {
    pub fn parse(address: &str) -> StateResult<Self> {
        let rest = address
            .trim()
            .trim_start_matches("tcp://")
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');

        if rest.is_empty() || rest.contains("://") {
            return Err(StateError::InvalidConfig(format!(
                "invalid Docker host '{}'",
                address
            )));
        }

        // Bracketed IPv6 literal, e.g. [::1]:2376
        if let Some(stripped) = rest.strip_prefix('[') {
            let (host, tail) = stripped.split_once(']').ok_or_else(|| {
                StateError::InvalidConfig(format!("invalid Docker host '{}'", address))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(parse_port(p, address)?),
                None => None,
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match rest.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Ok(Self {
                host: host.to_string(),
                port: Some(parse_port(port, address)?),
            }),
            _ => Ok(Self {
                host: rest.to_string(),
                port: None,
            }),
        }
    }

    /// Host segment only, without scheme or port.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Address used for the TLS connection.
    pub fn https_url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.port {
            Some(port) => format!("https://{}:{}", host, port),
            None => format!("https://{}", host),
        }
    }
}

fn parse_port(port: &str, address: &str) -> StateResult<u16> {
    port.parse().map_err(|_| {
        StateError::InvalidConfig(format!("invalid port in Docker host '{}'", address))
    })
}

/// One item of a build stream, as far as the build log is concerned.
#[derive(Debug, PartialEq, Eq)]
enum BuildEvent {
    Log(String),
    Failed(String),
}

/// The daemon reports a failing build step as a stream error carrying the
/// step's message; that message belongs in the build log too.
fn build_event(
    result: Result<BuildInfo, bollard::errors::Error>,
) -> RuntimeResult<Option<BuildEvent>> {
    match result {
        Ok(info) => Ok(info.stream.map(BuildEvent::Log)),
        Err(bollard::errors::Error::DockerStreamError { error }) => {
            Ok(Some(BuildEvent::Failed(error)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Docker-based runtime client.
pub struct DockerRuntime {
    client: Docker,
    endpoint: DaemonEndpoint,
}

impl DockerRuntime {
    /// Connect over TLS using `cert.pem`, `key.pem` and `ca.pem` from
    /// `cert_dir`. The daemon certificate is verified against `ca.pem`.
    pub async fn connect_tls(host: &str, cert_dir: &Path) -> StateResult<Self> {
        let endpoint = DaemonEndpoint::parse(host)?;
        let url = endpoint.https_url();

        let client = Docker::connect_with_ssl(
            &url,
            &cert_dir.join("key.pem"),
            &cert_dir.join("cert.pem"),
            &cert_dir.join("ca.pem"),
            DOCKER_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| StateError::Connection(format!("{}: {}", url, e)))?;

        let runtime = Self { client, endpoint };
        runtime
            .ping()
            .await
            .map_err(|e| StateError::Connection(format!("{}: {}", url, e)))?;

        info!("Connected to Docker daemon at {}", url);
        Ok(runtime)
    }

    pub fn endpoint(&self) -> &DaemonEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        self.client.ping().await?;
        Ok(())
    }

    async fn build_image(
        &self,
        name: &str,
        context: Vec<u8>,
        output: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> RuntimeResult<()> {
        info!("Building image {} ({} byte context)", name, context.len());

        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: name,
            rm: true,
            ..Default::default()
        };

        let mut stream = self.client.build_image(options, None, Some(context.into()));

        while let Some(result) = stream.next().await {
            match build_event(result)? {
                Some(BuildEvent::Log(line)) => {
                    debug!("Build: {}", line.trim_end());
                    output.write_all(line.as_bytes()).await?;
                    output.flush().await?;
                }
                Some(BuildEvent::Failed(error)) => {
                    output.write_all(error.as_bytes()).await?;
                    output.flush().await?;
                    return Err(RuntimeError::new(error));
                }
                None => {}
            }
        }

        Ok(())
    }

    async fn create_container(&self, request: &CreateRequest) -> RuntimeResult<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &request.ports {
            exposed_ports.insert(port.container_key(), HashMap::new());
            port_bindings.insert(
                port.container_key(),
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let config = Config {
            image: Some(request.image.clone()),
            cmd: if request.command.is_empty() {
                None
            } else {
                Some(request.command.clone())
            },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: request.name.clone(),
            platform: None,
        };

        let response = self.client.create_container(Some(options), config).await?;
        for warning in &response.warnings {
            debug!("Create {}: {}", request.name, warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn logs(&self, id: &str, request: &LogsRequest) -> RuntimeResult<String> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: request.stdout,
            stderr: request.stderr,
            ..Default::default()
        };

        let mut output = String::new();
        let mut stream = self.client.logs(id, Some(options));

        while let Some(result) = stream.next().await {
            match result? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(output)
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        let response = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let id = response
            .id
            .ok_or_else(|| RuntimeError::new("inspect response carries no container id"))?;
        let name = response
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let running = response
            .state
            .and_then(|s| s.running)
            .unwrap_or(false);

        Ok(ContainerInfo { id, name, running })
    }

    async fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerEntry>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerEntry {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn remove_container(&self, id: &str, request: &RemoveRequest) -> RuntimeResult<()> {
        self.client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: request.force,
                    v: request.remove_volumes,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

//! Docker Engine API driver
//!
//! Talks to a Docker-compatible daemon over HTTP. Images must already be
//! present on the daemon; nothing is pulled or built here.

use super::{
    ContainerState, CreateOptions, NetworkHandle, NetworkRequest, RuntimeDriver, RuntimeHandle,
    VolumeRequest,
};
use crate::compose::manifest::{MountSource, ServiceSpec};
use crate::error::{DriverError, DriverResult};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Default daemon address when `DOCKER_HOST` is not set
pub const DEFAULT_HOST: &str = "http://localhost:2375";

/// API version prefix for every request
const API_VERSION: &str = "v1.41";

/// Docker Engine client
pub struct DockerRuntime {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateNetworkBody<'a> {
    name: &'a str,
    driver: &'a str,
    internal: bool,
    check_duplicate: bool,
    labels: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateVolumeBody<'a> {
    name: &'a str,
    driver: &'a str,
    labels: &'a HashMap<String, String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerBody {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cmd: Option<Vec<String>>,
    env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<String>,
    labels: HashMap<String, String>,
    exposed_ports: BTreeMap<String, Empty>,
    volumes: BTreeMap<String, Empty>,
    host_config: HostConfig,
    networking_config: NetworkingConfig,
}

#[derive(Debug, Default, Serialize)]
struct Empty {}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    port_bindings: BTreeMap<String, Vec<HostPort>>,
    binds: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostPort {
    host_ip: String,
    host_port: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkingConfig {
    endpoints_config: BTreeMap<String, EndpointConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointConfig {
    aliases: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConnectBody<'a> {
    container: &'a str,
    endpoint_config: EndpointConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkResponse {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    state: InspectState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

impl DockerRuntime {
    /// Create a client for the daemon at `host` (`tcp://` or `http://`)
    pub fn new(host: &str) -> DriverResult<Self> {
        let base_url = normalize_host(host)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.base_url, API_VERSION, path)
    }

    async fn connect_network(
        &self,
        network: &NetworkHandle,
        container: &str,
        aliases: Vec<String>,
    ) -> DriverResult<()> {
        let body = ConnectBody {
            container,
            endpoint_config: EndpointConfig { aliases },
        };
        let response = self
            .client
            .post(self.url(&format!("/networks/{}/connect", network.id)))
            .json(&body)
            .send()
            .await?;
        check(response).await.map(|_| ())
    }
}

#[async_trait]
impl RuntimeDriver for DockerRuntime {
    async fn create_network(&self, request: &NetworkRequest) -> DriverResult<NetworkHandle> {
        if let Some(existing) = self.find_network(&request.name).await? {
            return Ok(existing);
        }

        let body = CreateNetworkBody {
            name: &request.name,
            driver: request.driver.as_deref().unwrap_or("bridge"),
            internal: request.internal,
            check_duplicate: true,
            labels: &request.labels,
        };
        let response = self
            .client
            .post(self.url("/networks/create"))
            .json(&body)
            .send()
            .await?;

        match check(response).await {
            Ok(response) => {
                let created: IdResponse = response.json().await?;
                Ok(NetworkHandle {
                    id: created.id,
                    name: request.name.clone(),
                })
            }
            // Lost a race with another creator
            Err(DriverError::Conflict(message)) => self
                .find_network(&request.name)
                .await?
                .ok_or(DriverError::Conflict(message)),
            Err(e) => Err(e),
        }
    }

    async fn find_network(&self, name: &str) -> DriverResult<Option<NetworkHandle>> {
        let response = self
            .client
            .get(self.url(&format!("/networks/{}", name)))
            .send()
            .await?;

        match check(response).await {
            Ok(response) => {
                let network: NetworkResponse = response.json().await?;
                Ok(Some(NetworkHandle {
                    id: network.id,
                    name: network.name,
                }))
            }
            Err(DriverError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn remove_network(&self, network: &NetworkHandle) -> DriverResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/networks/{}", network.id)))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn create_volume(&self, request: &VolumeRequest) -> DriverResult<String> {
        let body = CreateVolumeBody {
            name: &request.name,
            driver: request.driver.as_deref().unwrap_or("local"),
            labels: &request.labels,
        };
        let response = self
            .client
            .post(self.url("/volumes/create"))
            .json(&body)
            .send()
            .await?;

        let volume: VolumeResponse = check(response).await?.json().await?;
        Ok(volume.name)
    }

    async fn remove_volume(&self, name: &str) -> DriverResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/volumes/{}", name)))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn create_container(
        &self,
        service: &ServiceSpec,
        options: &CreateOptions,
    ) -> DriverResult<RuntimeHandle> {
        let body = container_body(service, options)?;
        let response = self
            .client
            .post(self.url("/containers/create"))
            .query(&[("name", options.name.as_str())])
            .json(&body)
            .send()
            .await?;

        let created: IdResponse = check(response).await?.json().await?;
        let handle = RuntimeHandle::new(created.id);

        // Only the first network can be attached at create time
        for binding in options.networks.iter().skip(1) {
            if let Err(e) = self
                .connect_network(&binding.network, handle.id(), binding.aliases.clone())
                .await
            {
                if let Err(cleanup) = self.remove(&handle, true).await {
                    tracing::warn!("Failed to remove half-created container {}: {}", handle, cleanup);
                }
                return Err(e);
            }
        }

        Ok(handle)
    }

    async fn find_container(&self, name: &str) -> DriverResult<Option<RuntimeHandle>> {
        let response = self
            .client
            .get(self.url(&format!("/containers/{}/json", name)))
            .send()
            .await?;

        match check(response).await {
            Ok(response) => {
                let found: IdResponse = response.json().await?;
                Ok(Some(RuntimeHandle::new(found.id)))
            }
            Err(DriverError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn start(&self, handle: &RuntimeHandle) -> DriverResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/start", handle)))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn stop(&self, handle: &RuntimeHandle, timeout: Duration) -> DriverResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/stop", handle)))
            .query(&[("t", stop_seconds(timeout).to_string())])
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn remove(&self, handle: &RuntimeHandle, force: bool) -> DriverResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/containers/{}", handle)))
            .query(&[("force", force.to_string())])
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn inspect(&self, handle: &RuntimeHandle) -> DriverResult<ContainerState> {
        let response = self
            .client
            .get(self.url(&format!("/containers/{}/json", handle)))
            .send()
            .await?;

        match check(response).await {
            Ok(response) => {
                let inspect: InspectResponse = response.json().await?;
                Ok(container_state(&inspect.state.status))
            }
            Err(DriverError::NotFound(_)) => Ok(ContainerState::Missing),
            Err(e) => Err(e),
        }
    }
}

/// Turn `tcp://host:port` into an HTTP base URL
fn normalize_host(host: &str) -> DriverResult<String> {
    let host = host.trim_end_matches('/');
    if let Some((scheme, _)) = host
        .split_once("://")
        .filter(|(scheme, _)| !matches!(*scheme, "tcp" | "http" | "https"))
    {
        return Err(DriverError::Other(format!(
            "{}:// endpoints are not supported; expose the daemon over TCP (e.g. tcp://localhost:2375)",
            scheme
        )));
    }

    Ok(match host.strip_prefix("tcp://") {
        Some(rest) => format!("http://{}", rest),
        None if host.starts_with("http://") || host.starts_with("https://") => host.to_string(),
        None => format!("http://{}", host),
    })
}

/// Grace period in whole seconds for the `t` query parameter, rounded up
fn stop_seconds(timeout: Duration) -> u64 {
    let secs = timeout
        .as_secs()
        .saturating_add(u64::from(timeout.subsec_nanos() > 0));
    secs.min(i32::MAX as u64)
}

fn container_state(status: &str) -> ContainerState {
    match status {
        "created" => ContainerState::Created,
        "running" | "restarting" | "paused" => ContainerState::Running,
        _ => ContainerState::Exited,
    }
}

/// Map a non-success response onto a driver error
async fn check(response: Response) -> DriverResult<Response> {
    let status = response.status();
    // 304: already started or stopped
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, &body))
}

fn api_error(status: StatusCode, body: &str) -> DriverError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::NOT_FOUND => DriverError::NotFound(message),
        StatusCode::CONFLICT => DriverError::Conflict(message),
        _ => DriverError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn container_body(service: &ServiceSpec, options: &CreateOptions) -> DriverResult<CreateContainerBody> {
    let mut body = CreateContainerBody {
        image: options.image.clone(),
        cmd: (!service.command.is_empty()).then(|| service.command.clone()),
        env: service
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect(),
        working_dir: service.working_dir.clone(),
        labels: service.labels.clone(),
        ..Default::default()
    };
    body.labels.extend(options.labels.clone());

    for port in &service.ports {
        let key = format!("{}/{}", port.container_port, port.protocol);
        body.exposed_ports.insert(key.clone(), Empty {});
        if let Some(host_port) = port.host_port {
            body.host_config
                .port_bindings
                .entry(key)
                .or_default()
                .push(HostPort {
                    host_ip: port.host_ip.clone().unwrap_or_default(),
                    host_port: host_port.to_string(),
                });
        }
    }

    for mount in &service.mounts {
        let source = match &mount.source {
            MountSource::Volume(key) => options.volumes.get(key).cloned().ok_or_else(|| {
                DriverError::NotFound(format!("volume {} was not created", key))
            })?,
            MountSource::Bind(path) => path.clone(),
            MountSource::Anonymous => {
                body.volumes.insert(mount.target.clone(), Empty {});
                continue;
            }
        };
        let mode = if mount.read_only { ":ro" } else { "" };
        body.host_config
            .binds
            .push(format!("{}:{}{}", source, mount.target, mode));
    }

    if let Some(first) = options.networks.first() {
        body.networking_config.endpoints_config.insert(
            first.network.name.clone(),
            EndpointConfig {
                aliases: first.aliases.clone(),
            },
        );
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::manifest::Manifest;
    use crate::compose::parser::ComposeParser;
    use crate::driver::NetworkBinding;

    fn web() -> ServiceSpec {
        let yaml = r#"
services:
  web:
    image: nginx:alpine
    command: ["nginx", "-g", "daemon off;"]
    environment:
      MODE: prod
    ports:
      - "8080:80"
      - "127.0.0.1:5353:53/udp"
      - "9000"
    volumes:
      - static:/srv:ro
      - ./conf:/etc/nginx/conf.d
      - /cache
volumes:
  static:
"#;
        let config = ComposeParser::parse_str(yaml, &HashMap::new()).unwrap();
        let manifest = Manifest::from_config(config, &HashMap::new()).unwrap();
        manifest.service("web").unwrap().clone()
    }

    fn options() -> CreateOptions {
        CreateOptions {
            name: "shop-web-1".into(),
            image: "nginx:alpine".into(),
            networks: vec![
                NetworkBinding {
                    network: NetworkHandle {
                        id: "n1".into(),
                        name: "shop_default".into(),
                    },
                    aliases: vec!["web".into()],
                },
                NetworkBinding {
                    network: NetworkHandle {
                        id: "n2".into(),
                        name: "shop_back".into(),
                    },
                    aliases: vec![],
                },
            ],
            volumes: HashMap::from([("static".to_string(), "shop_static".to_string())]),
            labels: HashMap::from([(
                "com.docker.compose.project".to_string(),
                "shop".to_string(),
            )]),
        }
    }

    #[test]
    fn test_container_body() {
        let body = container_body(&web(), &options()).unwrap();
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["Image"], "nginx:alpine");
        assert_eq!(json["Cmd"][2], "daemon off;");
        assert_eq!(json["Env"][0], "MODE=prod");
        assert_eq!(json["Labels"]["com.docker.compose.project"], "shop");

        let bindings = &json["HostConfig"]["PortBindings"];
        assert_eq!(bindings["80/tcp"][0]["HostPort"], "8080");
        assert_eq!(bindings["53/udp"][0]["HostIp"], "127.0.0.1");
        assert!(bindings.get("9000/tcp").is_none());
        assert!(json["ExposedPorts"].get("9000/tcp").is_some());

        assert_eq!(json["HostConfig"]["Binds"][0], "shop_static:/srv:ro");
        assert_eq!(json["HostConfig"]["Binds"][1], "./conf:/etc/nginx/conf.d");
        assert!(json["Volumes"].get("/cache").is_some());

        // Only the first network goes into the create call
        let endpoints = json["NetworkingConfig"]["EndpointsConfig"].as_object().unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints["shop_default"]["Aliases"][0], "web");
    }

    #[test]
    fn test_container_body_requires_created_volume() {
        let mut opts = options();
        opts.volumes.clear();
        assert!(matches!(
            container_body(&web(), &opts),
            Err(DriverError::NotFound(_))
        ));
    }

    #[test]
    fn test_api_error_mapping() {
        let err = api_error(StatusCode::NOT_FOUND, r#"{"message":"No such container: x"}"#);
        assert!(matches!(err, DriverError::NotFound(m) if m == "No such container: x"));

        let err = api_error(StatusCode::CONFLICT, "name in use");
        assert!(matches!(err, DriverError::Conflict(_)));

        let err = api_error(StatusCode::INTERNAL_SERVER_ERROR, r#"{"message":"boom"}"#);
        assert!(matches!(err, DriverError::Api { status: 500, .. }));
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("tcp://10.0.0.2:2375").unwrap(), "http://10.0.0.2:2375");
        assert_eq!(normalize_host("http://localhost:2375/").unwrap(), "http://localhost:2375");
        assert_eq!(normalize_host("docker:2375").unwrap(), "http://docker:2375");

        let err = normalize_host("unix:///var/run/docker.sock").unwrap_err();
        assert!(err.to_string().contains("unix:// endpoints are not supported"));
        assert!(normalize_host("npipe:////./pipe/docker_engine").is_err());
        assert!(DockerRuntime::new("unix:///var/run/docker.sock").is_err());
    }

    #[test]
    fn test_stop_seconds_rounds_up() {
        assert_eq!(stop_seconds(Duration::from_secs(10)), 10);
        assert_eq!(stop_seconds(Duration::from_millis(500)), 1);
        assert_eq!(stop_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(stop_seconds(Duration::ZERO), 0);
        assert_eq!(stop_seconds(Duration::MAX), i32::MAX as u64);
    }

    #[test]
    fn test_container_state() {
        assert_eq!(container_state("running"), ContainerState::Running);
        assert_eq!(container_state("created"), ContainerState::Created);
        assert_eq!(container_state("dead"), ContainerState::Exited);
    }
}

//! Validated, typed service manifest
//!
//! A [`Manifest`] is built once from a [`ComposeConfig`] and never mutated.
//! All reference checks (dependencies, networks, host ports) happen here, so
//! the resolver and the orchestrator can assume a consistent declaration.

use super::config::{
    BuildConfig, CommandConfig, ComposeConfig, DependsOnConfig, EnvironmentConfig,
    NetworksConfig, PortConfig, ServiceConfig, VolumeMount as VolumeMountConfig,
};
use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the network every service joins when it declares none
pub const DEFAULT_NETWORK: &str = "default";

/// Where a service's image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Pre-built image reference
    Image(String),
    /// Build context directory
    Build {
        context: PathBuf,
        dockerfile: Option<String>,
    },
}

/// Transport protocol of a port binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unsupported protocol '{}'", other)),
        }
    }
}

/// A container port, optionally published on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    /// Parse the short syntax: `80`, `8080:80`, `127.0.0.1:8080:80`, `53:53/udp`
    pub fn parse(spec: &str) -> std::result::Result<Self, String> {
        let (ports, protocol) = match spec.rsplit_once('/') {
            Some((ports, proto)) => (ports, proto.parse::<Protocol>()?),
            None => (spec, Protocol::Tcp),
        };

        let parts: Vec<&str> = ports.rsplitn(3, ':').collect();
        let (host_ip, host_port, container_port) = match parts.as_slice() {
            [container] => (None, None, *container),
            [container, host] => (None, Some(*host), *container),
            [container, host, ip] => (Some(*ip), Some(*host), *container),
            _ => return Err("expected [ip:][host:]container".to_string()),
        };

        let container_port = parse_port(container_port)?;
        let host_port = match host_port {
            Some("") | None => None,
            Some(p) => Some(parse_port(p)?),
        };
        let host_ip = host_ip
            .map(|ip| ip.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|ip| !ip.is_empty());

        Ok(Self {
            host_ip,
            host_port,
            container_port,
            protocol,
        })
    }

    /// Whether two published bindings would claim the same host socket
    fn conflicts_with(&self, other: &PortBinding) -> bool {
        match (self.host_port, other.host_port) {
            (Some(a), Some(b)) if a == b && self.protocol == other.protocol => {
                match (&self.host_ip, &other.host_ip) {
                    (Some(x), Some(y)) => x == y,
                    _ => true,
                }
            }
            _ => false,
        }
    }
}

fn parse_port(s: &str) -> std::result::Result<u16, String> {
    if s.contains('-') {
        return Err("port ranges are not supported".to_string());
    }
    match s.trim().parse::<u16>() {
        Ok(0) => Err("port 0 is not allowed".to_string()),
        Ok(port) => Ok(port),
        Err(_) => Err(format!("'{}' is not a port number", s)),
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ip) = &self.host_ip {
            write!(f, "{}:", ip)?;
        }
        if let Some(port) = self.host_port {
            write!(f, "{}->", port)?;
        }
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

/// Mount of a volume or host path into a service's containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountSource {
    /// Named volume declared under top-level `volumes`
    Volume(String),
    /// Host path
    Bind(String),
    /// Anonymous volume
    Anonymous,
}

/// One declared service
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub source: ImageSource,
    pub command: Vec<String>,
    pub container_name: Option<String>,
    pub ports: Vec<PortBinding>,
    /// Environment, sorted by key for stable container configs
    pub environment: BTreeMap<String, String>,
    /// Dependencies in declaration order
    pub depends_on: Vec<String>,
    /// Network memberships with their aliases
    pub networks: Vec<(String, Vec<String>)>,
    pub mounts: Vec<Mount>,
    pub labels: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub stop_grace_period: Option<Duration>,
}

impl ServiceSpec {
    /// Image reference used to create containers for this service
    pub fn image_reference(&self, project: &str) -> String {
        match &self.source {
            ImageSource::Image(image) => image.clone(),
            ImageSource::Build { .. } => format!("{}-{}:latest", project, self.name),
        }
    }

    /// Container name used for the first replica
    pub fn container_name(&self, project: &str) -> String {
        self.container_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}-1", project, self.name))
    }
}

/// Declared network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Key in the compose file
    pub key: String,
    /// Explicit runtime name, if any
    pub name: Option<String>,
    pub driver: Option<String>,
    pub external: bool,
    pub internal: bool,
    pub labels: HashMap<String, String>,
}

impl NetworkSpec {
    fn implicit_default() -> Self {
        Self {
            key: DEFAULT_NETWORK.to_string(),
            name: None,
            driver: None,
            external: false,
            internal: false,
            labels: HashMap::new(),
        }
    }

    /// Name the runtime knows this network by
    pub fn runtime_name(&self, project: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None if self.external => self.key.clone(),
            None => format!("{}_{}", project, self.key),
        }
    }
}

/// Declared volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub key: String,
    pub name: Option<String>,
    pub driver: Option<String>,
    pub external: bool,
    pub labels: HashMap<String, String>,
}

impl VolumeSpec {
    /// Name the runtime knows this volume by
    pub fn runtime_name(&self, project: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None if self.external => self.key.clone(),
            None => format!("{}_{}", project, self.key),
        }
    }
}

/// Validated multi-service declaration
#[derive(Debug, Clone)]
pub struct Manifest {
    name: Option<String>,
    services: Vec<ServiceSpec>,
    index: HashMap<String, usize>,
    networks: Vec<NetworkSpec>,
    volumes: Vec<VolumeSpec>,
    warnings: Vec<String>,
}

impl Manifest {
    /// Validate a parsed compose document into a manifest
    ///
    /// `env` resolves bare environment keys (`- KEY` or `KEY:` with no value).
    pub fn from_config(
        config: ComposeConfig,
        env: &HashMap<String, String>,
    ) -> Result<Self, ManifestError> {
        if config.services.is_empty() {
            return Err(ManifestError::NoServices);
        }

        let mut warnings = Vec::new();

        let mut networks: Vec<NetworkSpec> = config
            .networks
            .into_iter()
            .map(|(key, net)| {
                let net = net.unwrap_or_default();
                let external = net.external.as_ref().is_some_and(|e| e.is_external());
                let name = net
                    .name
                    .clone()
                    .or_else(|| net.external.as_ref().and_then(|e| e.name()).map(String::from));
                NetworkSpec {
                    key,
                    name,
                    driver: net.driver,
                    external,
                    internal: net.internal.unwrap_or(false),
                    labels: net.labels.map(|l| l.to_map()).unwrap_or_default(),
                }
            })
            .collect();

        let mut volumes: Vec<VolumeSpec> = config
            .volumes
            .into_iter()
            .map(|(key, vol)| {
                let vol = vol.unwrap_or_default();
                let external = vol.external.as_ref().is_some_and(|e| e.is_external());
                let name = vol
                    .name
                    .clone()
                    .or_else(|| vol.external.as_ref().and_then(|e| e.name()).map(String::from));
                VolumeSpec {
                    key,
                    name,
                    driver: vol.driver,
                    external,
                    labels: vol.labels.map(|l| l.to_map()).unwrap_or_default(),
                }
            })
            .collect();

        let names: HashSet<&str> = config.services.iter().map(|(n, _)| n.as_str()).collect();
        let mut services = Vec::with_capacity(config.services.len());

        for (name, service) in &config.services {
            let spec = build_service(name, service, env, &names, &networks, &mut warnings)?;
            services.push(spec);
        }

        // Services without explicit networks land on the implicit default network
        let uses_default = services
            .iter()
            .any(|s| s.networks.iter().any(|(n, _)| n == DEFAULT_NETWORK));
        if uses_default && !networks.iter().any(|n| n.key == DEFAULT_NETWORK) {
            networks.push(NetworkSpec::implicit_default());
        }

        for service in &services {
            for mount in &service.mounts {
                if let MountSource::Volume(volume) = &mount.source {
                    if !volumes.iter().any(|v| v.key == *volume) {
                        warnings.push(format!(
                            "Service '{}' references undefined volume '{}' (will be created)",
                            service.name, volume
                        ));
                        volumes.push(VolumeSpec {
                            key: volume.clone(),
                            name: None,
                            driver: None,
                            external: false,
                            labels: HashMap::new(),
                        });
                    }
                }
            }
        }

        check_names(&services, &networks, &volumes)?;
        check_host_ports(&services)?;

        let index = services
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        Ok(Self {
            name: config.name,
            services,
            index,
            networks,
            volumes,
            warnings,
        })
    }

    /// Project name declared in the file
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Services in declaration order
    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    /// Declaration position of a service
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn networks(&self) -> &[NetworkSpec] {
        &self.networks
    }

    pub fn network(&self, key: &str) -> Option<&NetworkSpec> {
        self.networks.iter().find(|n| n.key == key)
    }

    pub fn volumes(&self) -> &[VolumeSpec] {
        &self.volumes
    }

    pub fn volume(&self, key: &str) -> Option<&VolumeSpec> {
        self.volumes.iter().find(|v| v.key == key)
    }

    /// Non-fatal findings from validation
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn build_service(
    name: &str,
    service: &ServiceConfig,
    env: &HashMap<String, String>,
    names: &HashSet<&str>,
    networks: &[NetworkSpec],
    warnings: &mut Vec<String>,
) -> Result<ServiceSpec, ManifestError> {
    let source = match (&service.image, &service.build) {
        (Some(_), Some(_)) => return Err(ManifestError::ImageAndBuild(name.to_string())),
        (None, None) => return Err(ManifestError::MissingImage(name.to_string())),
        (Some(image), None) => ImageSource::Image(image.clone()),
        (None, Some(BuildConfig::Simple(path))) => ImageSource::Build {
            context: PathBuf::from(path),
            dockerfile: None,
        },
        (None, Some(BuildConfig::Full(full))) => ImageSource::Build {
            context: PathBuf::from(full.context.as_deref().unwrap_or(".")),
            dockerfile: full.dockerfile.clone(),
        },
    };

    let mut depends_on: Vec<String> = Vec::new();
    if let Some(depends) = &service.depends_on {
        let deps: Vec<(String, Option<String>)> = match depends {
            DependsOnConfig::Array(arr) => arr.iter().map(|d| (d.clone(), None)).collect(),
            DependsOnConfig::Map(map) => map
                .iter()
                .map(|(d, c)| (d.clone(), c.condition.clone()))
                .collect(),
        };
        for (dep, condition) in deps {
            if dep == name {
                return Err(ManifestError::SelfDependency(name.to_string()));
            }
            if !names.contains(dep.as_str()) {
                return Err(ManifestError::UnknownDependency {
                    service: name.to_string(),
                    dependency: dep,
                });
            }
            if let Some(condition) = condition.filter(|c| c != "service_started") {
                warnings.push(format!(
                    "Service '{}' waits on '{}' with condition '{}'; treated as service_started",
                    name, dep, condition
                ));
            }
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }
    }

    let service_networks: Vec<(String, Vec<String>)> = match &service.networks {
        None => vec![(DEFAULT_NETWORK.to_string(), Vec::new())],
        Some(NetworksConfig::Array(arr)) => arr.iter().map(|n| (n.clone(), Vec::new())).collect(),
        Some(NetworksConfig::Map(map)) => map
            .iter()
            .map(|(n, cfg)| {
                let aliases = cfg
                    .as_ref()
                    .and_then(|c| c.aliases.clone())
                    .unwrap_or_default();
                (n.clone(), aliases)
            })
            .collect(),
    };
    for (net, _) in &service_networks {
        if net != DEFAULT_NETWORK && !networks.iter().any(|n| n.key == *net) {
            return Err(ManifestError::UnknownNetwork {
                service: name.to_string(),
                network: net.clone(),
            });
        }
    }

    let mut ports = Vec::new();
    for port in service.ports.iter().flatten() {
        let binding = match port {
            PortConfig::Number(p) => PortBinding::parse(&p.to_string()),
            PortConfig::Short(s) => PortBinding::parse(s),
            PortConfig::Long(long) => {
                let protocol = match &long.protocol {
                    Some(p) => p.parse::<Protocol>(),
                    None => Ok(Protocol::Tcp),
                };
                let published = long
                    .published
                    .as_ref()
                    .map(|p| parse_port(&p.to_string()))
                    .transpose();
                match (protocol, published) {
                    (Ok(protocol), Ok(host_port)) if long.target != 0 => Ok(PortBinding {
                        host_ip: long.host_ip.clone(),
                        host_port,
                        container_port: long.target,
                        protocol,
                    }),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                    _ => Err("port 0 is not allowed".to_string()),
                }
            }
        };
        let binding = binding.map_err(|reason| ManifestError::InvalidPort {
            service: name.to_string(),
            spec: describe_port(port),
            reason,
        })?;
        if ports
            .iter()
            .any(|p: &PortBinding| p.container_port == binding.container_port && p.protocol == binding.protocol)
        {
            return Err(ManifestError::DuplicateContainerPort {
                service: name.to_string(),
                port: binding.container_port,
                protocol: binding.protocol.to_string(),
            });
        }
        ports.push(binding);
    }

    let mut environment = BTreeMap::new();
    match &service.environment {
        None => {}
        Some(EnvironmentConfig::Array(arr)) => {
            for item in arr {
                match item.split_once('=') {
                    Some(("", _)) => {
                        return Err(ManifestError::InvalidEnvironment {
                            service: name.to_string(),
                            entry: item.clone(),
                        })
                    }
                    Some((key, value)) => {
                        environment.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        if let Some(value) = env.get(item) {
                            environment.insert(item.clone(), value.clone());
                        }
                    }
                }
            }
        }
        Some(EnvironmentConfig::Map(map)) => {
            for (key, value) in map {
                match value {
                    Some(v) => {
                        environment.insert(key.clone(), v.to_string());
                    }
                    None => {
                        if let Some(v) = env.get(key) {
                            environment.insert(key.clone(), v.clone());
                        }
                    }
                }
            }
        }
    }

    let mut mounts = Vec::new();
    for mount in service.volumes.iter().flatten() {
        mounts.push(parse_mount(name, mount)?);
    }

    let command = match &service.command {
        None => Vec::new(),
        Some(CommandConfig::Shell(s)) => s.split_whitespace().map(String::from).collect(),
        Some(CommandConfig::Exec(arr)) => arr.clone(),
    };

    let stop_grace_period = service
        .stop_grace_period
        .as_deref()
        .map(|value| {
            parse_duration(value).ok_or_else(|| ManifestError::InvalidDuration {
                service: name.to_string(),
                value: value.to_string(),
            })
        })
        .transpose()?;

    Ok(ServiceSpec {
        name: name.to_string(),
        source,
        command,
        container_name: service.container_name.clone(),
        ports,
        environment,
        depends_on,
        networks: service_networks,
        mounts,
        labels: service.labels.as_ref().map(|l| l.to_map()).unwrap_or_default(),
        working_dir: service.working_dir.clone(),
        stop_grace_period,
    })
}

fn describe_port(port: &PortConfig) -> String {
    match port {
        PortConfig::Number(p) => p.to_string(),
        PortConfig::Short(s) => s.clone(),
        PortConfig::Long(long) => format!("target: {}", long.target),
    }
}

fn parse_mount(service: &str, mount: &VolumeMountConfig) -> Result<Mount, ManifestError> {
    let invalid = |spec: &str| ManifestError::InvalidVolume {
        service: service.to_string(),
        spec: spec.to_string(),
    };

    match mount {
        VolumeMountConfig::Short(spec) => {
            let parts: Vec<&str> = spec.split(':').collect();
            let (source, target, mode) = match parts.as_slice() {
                [target] => (None, *target, None),
                [source, target] => (Some(*source), *target, None),
                [source, target, mode] => (Some(*source), *target, Some(*mode)),
                _ => return Err(invalid(spec)),
            };
            if target.is_empty() {
                return Err(invalid(spec));
            }
            let read_only = match mode {
                None | Some("rw") => false,
                Some("ro") => true,
                Some(_) => return Err(invalid(spec)),
            };
            Ok(Mount {
                source: classify_source(source),
                target: target.to_string(),
                read_only,
            })
        }
        VolumeMountConfig::Long(long) => {
            if long.target.is_empty() {
                return Err(invalid("<long syntax>"));
            }
            let source = match long.mount_type.as_deref() {
                Some("bind") => match &long.source {
                    Some(path) => MountSource::Bind(path.clone()),
                    None => return Err(invalid(&long.target)),
                },
                Some("volume") | None => classify_source(long.source.as_deref()),
                Some("tmpfs") => MountSource::Anonymous,
                Some(_) => return Err(invalid(&long.target)),
            };
            Ok(Mount {
                source,
                target: long.target.clone(),
                read_only: long.read_only.unwrap_or(false),
            })
        }
    }
}

fn classify_source(source: Option<&str>) -> MountSource {
    match source {
        None | Some("") => MountSource::Anonymous,
        Some(s) if s.starts_with('/') || s.starts_with('.') || s.starts_with('~') => {
            MountSource::Bind(s.to_string())
        }
        Some(s) => MountSource::Volume(s.to_string()),
    }
}

fn check_host_ports(services: &[ServiceSpec]) -> Result<(), ManifestError> {
    let mut published: Vec<(&str, &PortBinding)> = Vec::new();
    for service in services {
        for port in service.ports.iter().filter(|p| p.host_port.is_some()) {
            if let Some((owner, _)) = published.iter().find(|(_, p)| p.conflicts_with(port)) {
                return Err(ManifestError::DuplicateHostPort {
                    port: port.host_port.unwrap_or_default(),
                    protocol: port.protocol.to_string(),
                    first: owner.to_string(),
                    second: service.name.clone(),
                });
            }
            published.push((service.name.as_str(), port));
        }
    }
    Ok(())
}

/// Names that reach the runtime, where they become container, network and
/// volume identifiers (and paths for the local runtime)
fn check_names(
    services: &[ServiceSpec],
    networks: &[NetworkSpec],
    volumes: &[VolumeSpec],
) -> Result<(), ManifestError> {
    let pattern = regex::Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$")
        .map_err(|e| ManifestError::Parse(e.to_string()))?;
    let check = |kind: &str, name: &str| {
        if pattern.is_match(name) {
            Ok(())
        } else {
            Err(ManifestError::InvalidName {
                kind: kind.to_string(),
                name: name.to_string(),
            })
        }
    };

    for service in services {
        check("service", &service.name)?;
        if let Some(container_name) = &service.container_name {
            check("container", container_name)?;
        }
    }
    for network in networks {
        check("network", &network.key)?;
        if let Some(name) = &network.name {
            check("network", name)?;
        }
    }
    for volume in volumes {
        check("volume", &volume.key)?;
        if let Some(name) = &volume.name {
            check("volume", name)?;
        }
    }
    Ok(())
}

/// Parse compose durations such as `10s`, `1m30s`, `500ms`, `1h`
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let re = regex::Regex::new(r"(\d+(?:\.\d+)?)(ms|us|h|m|s)").ok()?;
    let mut total = Duration::ZERO;
    let mut consumed = 0;
    for caps in re.captures_iter(value) {
        let whole = caps.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();
        let amount: f64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            _ => 0.000_001,
        };
        let part = Duration::try_from_secs_f64(amount * unit).ok()?;
        total = total.checked_add(part)?;
    }
    (consumed == value.len()).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::parser::ComposeParser;

    fn manifest(yaml: &str) -> Result<Manifest, ManifestError> {
        let config = ComposeParser::parse_str(yaml, &HashMap::new())?;
        Manifest::from_config(config, &HashMap::new())
    }

    #[test]
    fn test_preserves_declaration_order() {
        let m = manifest(
            r#"
services:
  zeta:
    image: busybox
  alpha:
    image: busybox
  mid:
    build: ./mid
"#,
        )
        .unwrap();

        let names: Vec<&str> = m.services().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(m.position("alpha"), Some(1));
        assert!(matches!(m.service("mid").unwrap().source, ImageSource::Build { .. }));
    }

    #[test]
    fn test_image_and_build_are_exclusive() {
        let err = manifest(
            r#"
services:
  web:
    image: nginx
    build: .
"#,
        )
        .unwrap_err();
        assert_eq!(err, ManifestError::ImageAndBuild("web".into()));

        let err = manifest("services:\n  web:\n    ports: [\"80:80\"]\n").unwrap_err();
        assert_eq!(err, ManifestError::MissingImage("web".into()));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = manifest(
            r#"
services:
  web:
    image: nginx
    depends_on: [db]
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ManifestError::UnknownDependency {
                service: "web".into(),
                dependency: "db".into()
            }
        );
    }

    #[test]
    fn test_duplicate_host_port_rejected() {
        let err = manifest(
            r#"
services:
  a:
    image: nginx
    ports: ["8080:80"]
  b:
    image: httpd
    ports: ["8080:80"]
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ManifestError::DuplicateHostPort { port: 8080, ref first, ref second, .. }
                if first == "a" && second == "b"
        ));
    }

    #[test]
    fn test_host_port_protocol_and_ip_separate_bindings() {
        let m = manifest(
            r#"
services:
  dns:
    image: coredns
    ports: ["53:53/udp", "127.0.0.1:8080:8080"]
  web:
    image: nginx
    ports: ["53:53", "127.0.0.2:8080:80", "9000"]
"#,
        )
        .unwrap();
        assert_eq!(m.service("web").unwrap().ports.len(), 3);

        let err = manifest(
            r#"
services:
  a:
    image: nginx
    ports: ["127.0.0.1:8080:80"]
  b:
    image: nginx
    ports: ["8080:80"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateHostPort { .. }));
    }

    #[test]
    fn test_duplicate_container_port_in_service() {
        let err = manifest(
            r#"
services:
  web:
    image: nginx
    ports: ["8080:80", "8081:80"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateContainerPort { port: 80, .. }));
    }

    #[test]
    fn test_port_parsing() {
        let p = PortBinding::parse("0.0.0.0:8080:80/udp").unwrap();
        assert_eq!(p.host_ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(p.host_port, Some(8080));
        assert_eq!(p.container_port, 80);
        assert_eq!(p.protocol, Protocol::Udp);

        let p = PortBinding::parse("3000").unwrap();
        assert_eq!(p.host_port, None);

        assert!(PortBinding::parse("abc:80").is_err());
        assert!(PortBinding::parse("8000-8010:80").is_err());
        assert!(PortBinding::parse("80/sctp").is_err());
    }

    #[test]
    fn test_networks_and_default() {
        let m = manifest(
            r#"
services:
  web:
    image: nginx
    networks:
      front:
        aliases: [www]
  worker:
    image: worker
networks:
  front:
"#,
        )
        .unwrap();

        assert_eq!(m.service("web").unwrap().networks, vec![("front".to_string(), vec!["www".to_string()])]);
        assert_eq!(m.service("worker").unwrap().networks[0].0, DEFAULT_NETWORK);
        let keys: Vec<&str> = m.networks().iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["front", "default"]);
        assert_eq!(m.network("front").unwrap().runtime_name("shop"), "shop_front");
    }

    #[test]
    fn test_undeclared_network_rejected() {
        let err = manifest(
            r#"
services:
  web:
    image: nginx
    networks: [back]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownNetwork { .. }));
    }

    #[test]
    fn test_environment_forms() {
        let mut env = HashMap::new();
        env.insert("FROM_HOST".to_string(), "yes".to_string());
        let config = ComposeParser::parse_str(
            r#"
services:
  a:
    image: app
    environment:
      - MODE=prod
      - FROM_HOST
      - MISSING
  b:
    image: app
    environment:
      PORT: 5432
      DEBUG: false
      FROM_HOST:
"#,
            &HashMap::new(),
        )
        .unwrap();
        let m = Manifest::from_config(config, &env).unwrap();

        let a = &m.service("a").unwrap().environment;
        assert_eq!(a.get("MODE").map(String::as_str), Some("prod"));
        assert_eq!(a.get("FROM_HOST").map(String::as_str), Some("yes"));
        assert!(!a.contains_key("MISSING"));

        let b = &m.service("b").unwrap().environment;
        assert_eq!(b.get("PORT").map(String::as_str), Some("5432"));
        assert_eq!(b.get("DEBUG").map(String::as_str), Some("false"));
        assert_eq!(b.get("FROM_HOST").map(String::as_str), Some("yes"));
    }

    #[test]
    fn test_volume_mounts_and_warning() {
        let m = manifest(
            r#"
services:
  db:
    image: postgres
    volumes:
      - data:/var/lib/postgresql/data
      - ./init:/docker-entrypoint-initdb.d:ro
      - cache:/cache
volumes:
  data:
"#,
        )
        .unwrap();

        let mounts = &m.service("db").unwrap().mounts;
        assert_eq!(mounts[0].source, MountSource::Volume("data".into()));
        assert_eq!(mounts[1].source, MountSource::Bind("./init".into()));
        assert!(mounts[1].read_only);
        assert!(m.volume("cache").is_some());
        assert_eq!(m.warnings().len(), 1);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("15"), Some(Duration::from_secs(15)));
        assert_eq!(parse_duration("ten"), None);
        assert_eq!(parse_duration("10s junk"), None);
        assert_eq!(parse_duration("99999999999999999999999h"), None);
    }

    #[test]
    fn test_oversized_grace_period_rejected() {
        let err = manifest(
            r#"
services:
  web:
    image: nginx
    stop_grace_period: 99999999999999999999999h
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDuration { .. }));
    }

    #[test]
    fn test_resource_names_validated() {
        let err = manifest(
            r#"
services:
  db:
    image: postgres
    volumes:
      - data:/var/lib/postgresql/data
volumes:
  data:
    name: "../../runtime"
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ManifestError::InvalidName {
                kind: "volume".into(),
                name: "../../runtime".into(),
            }
        );

        let err = manifest(
            r#"
services:
  web:
    image: nginx
    networks: [front]
networks:
  front:
    name: "a/b"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName { ref kind, .. } if kind == "network"));

        let err = manifest(
            r#"
services:
  web:
    image: nginx
    container_name: "-web"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName { ref kind, .. } if kind == "container"));

        let m = manifest(
            r#"
services:
  web:
    image: nginx
    container_name: shop.web_1
volumes:
  data:
    name: shop-data.v2
"#,
        )
        .unwrap();
        assert_eq!(m.volume("data").unwrap().name.as_deref(), Some("shop-data.v2"));
    }
}

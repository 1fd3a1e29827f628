//! In-process runtime driver
//!
//! Tracks containers, networks and volumes under a state directory. It
//! records lifecycle transitions only; process isolation is left to a real
//! runtime behind [`DockerRuntime`](super::DockerRuntime).

use super::{
    ContainerState, CreateOptions, NetworkHandle, NetworkRequest, RuntimeDriver, RuntimeHandle,
    VolumeRequest,
};
use crate::compose::manifest::{MountSource, ServiceSpec};
use crate::container::{ContainerConfig, ContainerManager, ContainerStatus};
use crate::error::{DriverError, DriverResult};
use crate::network::{NetworkDriver, NetworkManager};
use crate::storage::VolumeManager;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Local runtime backed by on-disk records
pub struct LocalRuntime {
    containers: ContainerManager,
    networks: NetworkManager,
    volumes: VolumeManager,
}

impl LocalRuntime {
    /// Open (or initialize) the runtime state under `base_path`
    pub fn new(base_path: &Path) -> DriverResult<Self> {
        Ok(Self {
            containers: ContainerManager::new(base_path.join("containers"))?,
            networks: NetworkManager::new(base_path.join("networks"))?,
            volumes: VolumeManager::new(base_path.join("volumes"))?,
        })
    }

    /// Container records known to this runtime
    pub fn containers(&self) -> &ContainerManager {
        &self.containers
    }

    fn build_config(
        &self,
        service: &ServiceSpec,
        options: &CreateOptions,
    ) -> DriverResult<ContainerConfig> {
        let mut config = ContainerConfig::new(&options.name, &options.image);
        config.cmd = service.command.clone();
        config.env = service.environment.clone();
        if let Some(wd) = &service.working_dir {
            config.working_dir = wd.clone();
        }
        config.ports = service.ports.clone();
        config.labels = service.labels.clone();
        config.labels.extend(options.labels.clone());

        config.mounts = service
            .mounts
            .iter()
            .map(|mount| {
                let mut mount = mount.clone();
                if let MountSource::Volume(key) = &mount.source {
                    let name = options.volumes.get(key).ok_or_else(|| {
                        DriverError::NotFound(format!("volume {} was not created", key))
                    })?;
                    mount.source = MountSource::Volume(name.clone());
                }
                Ok(mount)
            })
            .collect::<DriverResult<Vec<_>>>()?;

        for binding in &options.networks {
            config = config.network(&binding.network.name, binding.aliases.clone());
        }

        Ok(config)
    }

    fn volume_names(config: &ContainerConfig) -> impl Iterator<Item = &str> {
        config.mounts.iter().filter_map(|m| match &m.source {
            MountSource::Volume(name) => Some(name.as_str()),
            _ => None,
        })
    }

    fn attach(&self, config: &mut ContainerConfig) -> DriverResult<()> {
        for volume in Self::volume_names(config) {
            self.volumes.add_reference(volume)?;
        }
        for attachment in &mut config.networks {
            let endpoint = self.networks.connect(
                &attachment.network,
                &config.id,
                &config.name,
                attachment.aliases.clone(),
            )?;
            attachment.ipv4_address = Some(endpoint.ipv4_address.to_string());
        }
        Ok(())
    }

    fn detach(&self, config: &ContainerConfig) {
        if let Err(e) = self.networks.disconnect_all(&config.id) {
            tracing::warn!("Failed to disconnect container {}: {}", config.id, e);
        }
        for volume in Self::volume_names(config) {
            if let Err(e) = self.volumes.remove_reference(volume) {
                tracing::warn!("Failed to release volume {}: {}", volume, e);
            }
        }
    }
}

#[async_trait]
impl RuntimeDriver for LocalRuntime {
    async fn create_network(&self, request: &NetworkRequest) -> DriverResult<NetworkHandle> {
        let driver = match &request.driver {
            Some(d) => d.parse::<NetworkDriver>()?,
            None => NetworkDriver::Bridge,
        };

        let (config, created) =
            self.networks
                .ensure(&request.name, driver, request.internal, request.labels.clone())?;
        if created {
            tracing::debug!("Created network {} ({})", config.name, config.subnet);
        }

        Ok(NetworkHandle {
            id: config.id,
            name: config.name,
        })
    }

    async fn find_network(&self, name: &str) -> DriverResult<Option<NetworkHandle>> {
        Ok(self.networks.get(name)?.map(|config| NetworkHandle {
            id: config.id,
            name: config.name,
        }))
    }

    async fn remove_network(&self, network: &NetworkHandle) -> DriverResult<()> {
        self.networks.remove(&network.name)
    }

    async fn create_volume(&self, request: &VolumeRequest) -> DriverResult<String> {
        let volume = self.volumes.ensure(
            &request.name,
            request.driver.as_deref(),
            request.labels.clone(),
        )?;
        Ok(volume.name)
    }

    async fn remove_volume(&self, name: &str) -> DriverResult<()> {
        self.volumes.remove(name, false)
    }

    async fn create_container(
        &self,
        service: &ServiceSpec,
        options: &CreateOptions,
    ) -> DriverResult<RuntimeHandle> {
        let mut config = self.build_config(service, options)?;

        if let Err(e) = self.attach(&mut config) {
            self.detach(&config);
            return Err(e);
        }

        match self.containers.create(config.clone()) {
            Ok(id) => Ok(RuntimeHandle::new(id)),
            Err(e) => {
                self.detach(&config);
                Err(e)
            }
        }
    }

    async fn find_container(&self, name: &str) -> DriverResult<Option<RuntimeHandle>> {
        Ok(self
            .containers
            .find_by_name(name)?
            .map(|config| RuntimeHandle::new(config.id)))
    }

    async fn start(&self, handle: &RuntimeHandle) -> DriverResult<()> {
        self.containers.start(handle.id())
    }

    async fn stop(&self, handle: &RuntimeHandle, _timeout: Duration) -> DriverResult<()> {
        // Records stop immediately, so the grace period never elapses
        self.containers.stop(handle.id())
    }

    async fn remove(&self, handle: &RuntimeHandle, force: bool) -> DriverResult<()> {
        let config = self.containers.remove(handle.id(), force)?;
        self.detach(&config);
        Ok(())
    }

    async fn inspect(&self, handle: &RuntimeHandle) -> DriverResult<ContainerState> {
        match self.containers.get(handle.id()) {
            Ok(config) => Ok(match config.status {
                ContainerStatus::Created => ContainerState::Created,
                ContainerStatus::Running => ContainerState::Running,
                ContainerStatus::Exited | ContainerStatus::Removing => ContainerState::Exited,
            }),
            Err(DriverError::NotFound(_)) => Ok(ContainerState::Missing),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::manifest::Manifest;
    use crate::compose::parser::ComposeParser;
    use crate::driver::NetworkBinding;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn service(yaml: &str, name: &str) -> ServiceSpec {
        let config = ComposeParser::parse_str(yaml, &HashMap::new()).unwrap();
        let manifest = Manifest::from_config(config, &HashMap::new()).unwrap();
        manifest.service(name).unwrap().clone()
    }

    #[tokio::test]
    async fn test_container_lifecycle_with_network_and_volume() {
        let temp = tempdir().unwrap();
        let runtime = LocalRuntime::new(temp.path()).unwrap();
        let db = service(
            "services:\n  db:\n    image: postgres\n    volumes: [\"data:/var/lib/data\"]\nvolumes:\n  data:\n",
            "db",
        );

        let network = runtime
            .create_network(&NetworkRequest {
                name: "shop_default".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let again = runtime
            .create_network(&NetworkRequest {
                name: "shop_default".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(network, again);

        let volume = runtime
            .create_volume(&VolumeRequest {
                name: "shop_data".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let options = CreateOptions {
            name: "shop-db-1".into(),
            image: "postgres".into(),
            networks: vec![NetworkBinding {
                network: network.clone(),
                aliases: vec!["db".into()],
            }],
            volumes: HashMap::from([("data".to_string(), volume.clone())]),
            labels: HashMap::new(),
        };
        let handle = runtime.create_container(&db, &options).await.unwrap();
        assert_eq!(runtime.inspect(&handle).await.unwrap(), ContainerState::Created);
        assert_eq!(
            runtime.find_container("shop-db-1").await.unwrap(),
            Some(handle.clone())
        );

        runtime.start(&handle).await.unwrap();
        assert_eq!(runtime.inspect(&handle).await.unwrap(), ContainerState::Running);

        // Attached resources cannot be removed while the container exists
        assert!(runtime.remove_network(&network).await.is_err());
        assert!(runtime.remove_volume(&volume).await.is_err());

        runtime.stop(&handle, Duration::from_secs(1)).await.unwrap();
        runtime.remove(&handle, false).await.unwrap();
        assert_eq!(runtime.inspect(&handle).await.unwrap(), ContainerState::Missing);

        runtime.remove_network(&network).await.unwrap();
        runtime.remove_volume(&volume).await.unwrap();
        assert!(runtime.find_network("shop_default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_missing_network() {
        let temp = tempdir().unwrap();
        let runtime = LocalRuntime::new(temp.path()).unwrap();
        let web = service("services:\n  web:\n    image: nginx\n", "web");

        let options = CreateOptions {
            name: "shop-web-1".into(),
            image: "nginx".into(),
            networks: vec![NetworkBinding {
                network: NetworkHandle {
                    id: "gone".into(),
                    name: "gone".into(),
                },
                aliases: Vec::new(),
            }],
            ..Default::default()
        };

        let err = runtime.create_container(&web, &options).await.unwrap_err();
        assert!(matches!(err, DriverError::NotFound(_)));
        assert!(runtime.containers().list(true).unwrap().is_empty());
    }
}

//! Bridge network implementation

use super::config::{IpAllocator, NetworkConfig, NetworkContainer, NetworkDriver};
use crate::container::lifecycle::lock_error;
use crate::error::{DriverError, DriverResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

const STATE_FILE: &str = "networks.json";

/// Bridge network with its address pool
pub struct BridgeNetwork {
    /// Network configuration
    pub config: NetworkConfig,
    /// IP allocator
    allocator: IpAllocator,
}

impl BridgeNetwork {
    /// Create a bridge network, re-reserving addresses of already connected containers
    pub fn new(config: NetworkConfig) -> DriverResult<Self> {
        let mut allocator = IpAllocator::new(&config.subnet)?;
        for container in config.containers.values() {
            allocator.reserve(container.ipv4_address);
        }

        Ok(Self { config, allocator })
    }

    /// Connect a container to this network
    pub fn connect(
        &mut self,
        container_id: &str,
        container_name: &str,
        aliases: Vec<String>,
    ) -> DriverResult<NetworkContainer> {
        if let Some(existing) = self.config.containers.get(container_id) {
            return Ok(existing.clone());
        }

        let ipv4_address = self.allocator.allocate()?;
        let container = NetworkContainer {
            container_id: container_id.to_string(),
            name: container_name.to_string(),
            aliases,
            endpoint_id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            ipv4_address,
        };

        self.config
            .containers
            .insert(container_id.to_string(), container.clone());

        Ok(container)
    }

    /// Disconnect a container from this network
    pub fn disconnect(&mut self, container_id: &str) -> DriverResult<()> {
        let container = self.config.containers.remove(container_id).ok_or_else(|| {
            DriverError::NotFound(format!(
                "container {} is not connected to network {}",
                container_id, self.config.name
            ))
        })?;

        self.allocator.release(container.ipv4_address);
        Ok(())
    }
}

/// Network manager for handling all networks
pub struct NetworkManager {
    /// Networks indexed by name
    networks: Arc<RwLock<HashMap<String, BridgeNetwork>>>,
    /// State file
    state_path: PathBuf,
}

impl NetworkManager {
    /// Create a network manager, loading networks already on disk
    pub fn new(base_path: PathBuf) -> DriverResult<Self> {
        std::fs::create_dir_all(&base_path)?;
        let state_path = base_path.join(STATE_FILE);

        let mut networks = HashMap::new();
        if state_path.is_file() {
            let data = std::fs::read(&state_path)?;
            let configs: Vec<NetworkConfig> =
                serde_json::from_slice(&data).map_err(|e| DriverError::Other(e.to_string()))?;
            for config in configs {
                networks.insert(config.name.clone(), BridgeNetwork::new(config)?);
            }
        }

        Ok(Self {
            networks: Arc::new(RwLock::new(networks)),
            state_path,
        })
    }

    /// Create a network, or return the existing one with the same name
    ///
    /// The returned flag is `true` when the network was newly created.
    pub fn ensure(
        &self,
        name: &str,
        driver: NetworkDriver,
        internal: bool,
        labels: HashMap<String, String>,
    ) -> DriverResult<(NetworkConfig, bool)> {
        let mut networks = self.networks.write().map_err(|_| lock_error())?;

        if let Some(existing) = networks.get(name) {
            return Ok((existing.config.clone(), false));
        }

        let subnet = next_subnet(networks.values().map(|n| n.config.subnet.as_str()))?;
        let config = NetworkConfig::new(name, &subnet)?
            .driver(driver)
            .internal(internal)
            .labels(labels);

        networks.insert(name.to_string(), BridgeNetwork::new(config.clone())?);
        self.save(&networks)?;

        Ok((config, true))
    }

    /// Remove a network
    pub fn remove(&self, name: &str) -> DriverResult<()> {
        let mut networks = self.networks.write().map_err(|_| lock_error())?;

        let network = networks
            .get(name)
            .ok_or_else(|| DriverError::NotFound(format!("network {}", name)))?;

        if !network.config.containers.is_empty() {
            return Err(DriverError::Conflict(format!(
                "network {} has active endpoints",
                name
            )));
        }

        networks.remove(name);
        self.save(&networks)
    }

    /// Get a network by name
    pub fn get(&self, name: &str) -> DriverResult<Option<NetworkConfig>> {
        let networks = self.networks.read().map_err(|_| lock_error())?;
        Ok(networks.get(name).map(|n| n.config.clone()))
    }

    /// Connect a container to a network
    pub fn connect(
        &self,
        name: &str,
        container_id: &str,
        container_name: &str,
        aliases: Vec<String>,
    ) -> DriverResult<NetworkContainer> {
        let mut networks = self.networks.write().map_err(|_| lock_error())?;

        let network = networks
            .get_mut(name)
            .ok_or_else(|| DriverError::NotFound(format!("network {}", name)))?;

        let endpoint = network.connect(container_id, container_name, aliases)?;
        self.save(&networks)?;
        Ok(endpoint)
    }

    /// Disconnect a container from every network it is attached to
    pub fn disconnect_all(&self, container_id: &str) -> DriverResult<()> {
        let mut networks = self.networks.write().map_err(|_| lock_error())?;

        for network in networks.values_mut() {
            if network.config.containers.contains_key(container_id) {
                network.disconnect(container_id)?;
            }
        }

        self.save(&networks)
    }

    fn save(&self, networks: &HashMap<String, BridgeNetwork>) -> DriverResult<()> {
        let configs: Vec<&NetworkConfig> = networks.values().map(|n| &n.config).collect();
        let json =
            serde_json::to_vec_pretty(&configs).map_err(|e| DriverError::Other(e.to_string()))?;
        std::fs::write(&self.state_path, json)?;
        Ok(())
    }
}

/// Pick the first free /16 in 172.18.0.0 - 172.31.0.0
fn next_subnet<'a>(used: impl Iterator<Item = &'a str>) -> DriverResult<String> {
    let used: Vec<&str> = used.collect();
    (18..=31)
        .map(|octet| format!("172.{}.0.0/16", octet))
        .find(|candidate| !used.contains(&candidate.as_str()))
        .ok_or_else(|| DriverError::Other("no free subnet left for a new network".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_is_idempotent() {
        let temp = tempdir().unwrap();
        let manager = NetworkManager::new(temp.path().to_path_buf()).unwrap();

        let (first, created) = manager
            .ensure("shop_default", NetworkDriver::Bridge, false, HashMap::new())
            .unwrap();
        assert!(created);
        assert_eq!(first.subnet, "172.18.0.0/16");

        let (second, created) = manager
            .ensure("shop_default", NetworkDriver::Bridge, false, HashMap::new())
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let (other, _) = manager
            .ensure("shop_back", NetworkDriver::Bridge, true, HashMap::new())
            .unwrap();
        assert_eq!(other.subnet, "172.19.0.0/16");
    }

    #[test]
    fn test_connect_and_remove() {
        let temp = tempdir().unwrap();
        let manager = NetworkManager::new(temp.path().to_path_buf()).unwrap();
        manager
            .ensure("test-network", NetworkDriver::Bridge, false, HashMap::new())
            .unwrap();

        let endpoint = manager
            .connect("test-network", "c1", "web-1", vec!["web".to_string()])
            .unwrap();
        assert_eq!(endpoint.ipv4_address.to_string(), "172.18.0.2");

        assert!(matches!(manager.remove("test-network"), Err(DriverError::Conflict(_))));
        manager.disconnect_all("c1").unwrap();
        manager.remove("test-network").unwrap();
        assert!(manager.get("test-network").unwrap().is_none());
    }

    #[test]
    fn test_networks_survive_reload() {
        let temp = tempdir().unwrap();
        {
            let manager = NetworkManager::new(temp.path().to_path_buf()).unwrap();
            manager
                .ensure("persisted", NetworkDriver::Bridge, false, HashMap::new())
                .unwrap();
            manager.connect("persisted", "c1", "one", Vec::new()).unwrap();
        }

        let manager = NetworkManager::new(temp.path().to_path_buf()).unwrap();
        let endpoint = manager.connect("persisted", "c2", "two", Vec::new()).unwrap();
        assert_eq!(endpoint.ipv4_address.to_string(), "172.18.0.3");
    }
}

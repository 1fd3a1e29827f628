//! Container lifecycle management
//!
//! Each container's record lives in `<base>/<id>/config.json`, so a later
//! process sees the containers an earlier one created.

use super::config::{ContainerConfig, ContainerStatus};
use super::runtime::Container;
use crate::error::{DriverError, DriverResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const RECORD_FILE: &str = "config.json";

/// Container manager for handling container lifecycle
pub struct ContainerManager {
    /// All containers indexed by ID
    containers: Arc<RwLock<HashMap<String, Container>>>,
    /// Base path for container storage
    base_path: PathBuf,
}

impl ContainerManager {
    /// Create a container manager, loading records already on disk
    pub fn new(base_path: PathBuf) -> DriverResult<Self> {
        std::fs::create_dir_all(&base_path)?;

        let mut containers = HashMap::new();
        for entry in std::fs::read_dir(&base_path)? {
            let record = entry?.path().join(RECORD_FILE);
            if !record.is_file() {
                continue;
            }
            match load_record(&record) {
                Ok(config) => {
                    containers.insert(config.id.clone(), Container::new(config));
                }
                Err(e) => tracing::warn!("Skipping unreadable container record {}: {}", record.display(), e),
            }
        }

        tracing::debug!("Loaded {} container record(s) from {}", containers.len(), base_path.display());

        Ok(Self {
            containers: Arc::new(RwLock::new(containers)),
            base_path,
        })
    }

    /// Create a new container
    pub fn create(&self, config: ContainerConfig) -> DriverResult<String> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| lock_error())?;

        if containers.values().any(|c| c.name() == config.name) {
            return Err(DriverError::Conflict(format!(
                "container name {} is already in use",
                config.name
            )));
        }

        let container = Container::new(config);
        let id = container.id().to_string();
        self.persist(&container)?;
        containers.insert(id.clone(), container);

        Ok(id)
    }

    /// Start a container
    pub fn start(&self, id: &str) -> DriverResult<()> {
        self.update(id, |container| container.start())
    }

    /// Stop a container
    pub fn stop(&self, id: &str) -> DriverResult<()> {
        self.update(id, |container| {
            container.stop();
            Ok(())
        })
    }

    /// Remove a container and its record
    pub fn remove(&self, id: &str, force: bool) -> DriverResult<ContainerConfig> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| lock_error())?;

        let container = containers
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(format!("container {}", id)))?;
        container.begin_remove(force)?;

        let bundle = self.base_path.join(id);
        if bundle.exists() {
            std::fs::remove_dir_all(&bundle)?;
        }

        containers
            .remove(id)
            .map(|c| c.config)
            .ok_or_else(|| DriverError::NotFound(format!("container {}", id)))
    }

    /// Get container by ID
    pub fn get(&self, id: &str) -> DriverResult<ContainerConfig> {
        let containers = self
            .containers
            .read()
            .map_err(|_| lock_error())?;

        containers
            .get(id)
            .map(|c| c.config.clone())
            .ok_or_else(|| DriverError::NotFound(format!("container {}", id)))
    }

    /// List all containers
    pub fn list(&self, all: bool) -> DriverResult<Vec<ContainerConfig>> {
        let containers = self
            .containers
            .read()
            .map_err(|_| lock_error())?;

        Ok(containers
            .values()
            .filter(|c| all || c.config.status == ContainerStatus::Running)
            .map(|c| c.config.clone())
            .collect())
    }

    /// Find container by name
    pub fn find_by_name(&self, name: &str) -> DriverResult<Option<ContainerConfig>> {
        let containers = self
            .containers
            .read()
            .map_err(|_| lock_error())?;

        Ok(containers
            .values()
            .find(|c| c.name() == name)
            .map(|c| c.config.clone()))
    }

    fn update<F>(&self, id: &str, f: F) -> DriverResult<()>
    where
        F: FnOnce(&mut Container) -> DriverResult<()>,
    {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| lock_error())?;

        let container = containers
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(format!("container {}", id)))?;

        f(container)?;
        self.persist(container)
    }

    fn persist(&self, container: &Container) -> DriverResult<()> {
        let bundle = self.base_path.join(container.id());
        std::fs::create_dir_all(&bundle)?;
        let json = serde_json::to_vec_pretty(&container.config)
            .map_err(|e| DriverError::Other(e.to_string()))?;
        std::fs::write(bundle.join(RECORD_FILE), json)?;
        Ok(())
    }
}

fn load_record(path: &Path) -> DriverResult<ContainerConfig> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| DriverError::Other(e.to_string()))
}

pub(crate) fn lock_error() -> DriverError {
    DriverError::Other("Failed to acquire lock".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_start_remove() {
        let temp = tempdir().unwrap();
        let manager = ContainerManager::new(temp.path().to_path_buf()).unwrap();

        let id = manager.create(ContainerConfig::new("web-1", "nginx")).unwrap();
        manager.start(&id).unwrap();
        assert_eq!(manager.get(&id).unwrap().status, ContainerStatus::Running);
        assert_eq!(manager.list(false).unwrap().len(), 1);

        assert!(manager.remove(&id, false).is_err());
        manager.stop(&id).unwrap();
        manager.remove(&id, false).unwrap();
        assert!(manager.get(&id).is_err());
        assert!(!temp.path().join(&id).exists());
    }

    #[test]
    fn test_duplicate_name_conflicts() {
        let temp = tempdir().unwrap();
        let manager = ContainerManager::new(temp.path().to_path_buf()).unwrap();

        manager.create(ContainerConfig::new("db-1", "postgres")).unwrap();
        let err = manager.create(ContainerConfig::new("db-1", "postgres")).unwrap_err();
        assert!(matches!(err, DriverError::Conflict(_)));
    }

    #[test]
    fn test_records_survive_reload() {
        let temp = tempdir().unwrap();
        let id = {
            let manager = ContainerManager::new(temp.path().to_path_buf()).unwrap();
            let id = manager.create(ContainerConfig::new("cache-1", "redis")).unwrap();
            manager.start(&id).unwrap();
            id
        };

        let manager = ContainerManager::new(temp.path().to_path_buf()).unwrap();
        let config = manager.get(&id).unwrap();
        assert_eq!(config.status, ContainerStatus::Running);
        assert_eq!(manager.find_by_name("cache-1").unwrap().unwrap().id, id);
    }
}

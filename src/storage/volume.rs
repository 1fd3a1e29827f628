//! Volume management

use crate::container::lifecycle::lock_error;
use crate::error::{DriverError, DriverResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

const METADATA_FILE: &str = "volume.json";

/// Volume record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// Volume driver
    pub driver: String,
    /// Mount point on host
    pub mountpoint: PathBuf,
    /// Volume labels
    pub labels: HashMap<String, String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Number of containers using this volume
    #[serde(default)]
    pub ref_count: u32,
}

impl Volume {
    /// Create a new volume record
    pub fn new(name: &str, base_path: &Path) -> Self {
        Self {
            name: name.to_string(),
            driver: "local".to_string(),
            mountpoint: base_path.join(name).join("_data"),
            labels: HashMap::new(),
            created_at: Utc::now(),
            ref_count: 0,
        }
    }
}

/// Volume manager
pub struct VolumeManager {
    /// Volumes indexed by name
    volumes: Arc<RwLock<HashMap<String, Volume>>>,
    /// Base path for volume storage
    base_path: PathBuf,
}

impl VolumeManager {
    /// Create a volume manager, loading volumes already on disk
    pub fn new(base_path: PathBuf) -> DriverResult<Self> {
        std::fs::create_dir_all(&base_path)?;

        let mut volumes = HashMap::new();
        for entry in std::fs::read_dir(&base_path)? {
            let metadata = entry?.path().join(METADATA_FILE);
            if !metadata.is_file() {
                continue;
            }
            let data = std::fs::read(&metadata)?;
            match serde_json::from_slice::<Volume>(&data) {
                Ok(volume) => {
                    volumes.insert(volume.name.clone(), volume);
                }
                Err(e) => tracing::warn!("Skipping unreadable volume {}: {}", metadata.display(), e),
            }
        }

        Ok(Self {
            volumes: Arc::new(RwLock::new(volumes)),
            base_path,
        })
    }

    /// Create a volume, or return the existing one with the same name
    pub fn ensure(
        &self,
        name: &str,
        driver: Option<&str>,
        labels: HashMap<String, String>,
    ) -> DriverResult<Volume> {
        let mut volumes = self.volumes.write().map_err(|_| lock_error())?;

        if let Some(existing) = volumes.get(name) {
            return Ok(existing.clone());
        }

        self.volume_dir(name)?;

        if let Some(driver) = driver.filter(|d| *d != "local") {
            return Err(DriverError::Other(format!(
                "volume driver '{}' is not supported by the local runtime",
                driver
            )));
        }

        let mut volume = Volume::new(name, &self.base_path);
        volume.labels = labels;

        std::fs::create_dir_all(&volume.mountpoint)?;
        self.persist(&volume)?;
        volumes.insert(name.to_string(), volume.clone());

        Ok(volume)
    }

    /// Get a volume by name
    pub fn get(&self, name: &str) -> DriverResult<Volume> {
        let volumes = self.volumes.read().map_err(|_| lock_error())?;

        volumes
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(format!("volume {}", name)))
    }

    /// Remove a volume
    pub fn remove(&self, name: &str, force: bool) -> DriverResult<()> {
        let mut volumes = self.volumes.write().map_err(|_| lock_error())?;

        let volume = volumes
            .get(name)
            .ok_or_else(|| DriverError::NotFound(format!("volume {}", name)))?;

        if volume.ref_count > 0 && !force {
            return Err(DriverError::Conflict(format!(
                "volume {} is in use by {} container(s)",
                name, volume.ref_count
            )));
        }

        let dir = self.volume_dir(name)?;
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }

        volumes.remove(name);
        Ok(())
    }

    /// Increment reference count for a volume
    pub fn add_reference(&self, name: &str) -> DriverResult<()> {
        self.adjust_references(name, |count| count + 1)
    }

    /// Decrement reference count for a volume
    pub fn remove_reference(&self, name: &str) -> DriverResult<()> {
        self.adjust_references(name, |count| count.saturating_sub(1))
    }

    fn adjust_references(&self, name: &str, f: impl FnOnce(u32) -> u32) -> DriverResult<()> {
        let mut volumes = self.volumes.write().map_err(|_| lock_error())?;

        let volume = volumes
            .get_mut(name)
            .ok_or_else(|| DriverError::NotFound(format!("volume {}", name)))?;

        volume.ref_count = f(volume.ref_count);
        self.persist(volume)
    }

    /// Directory of a volume; the name must be a single path component
    fn volume_dir(&self, name: &str) -> DriverResult<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.base_path.join(name)),
            _ => Err(DriverError::Other(format!("invalid volume name '{}'", name))),
        }
    }

    fn persist(&self, volume: &Volume) -> DriverResult<()> {
        let dir = self.volume_dir(&volume.name)?;
        std::fs::create_dir_all(&dir)?;
        let json =
            serde_json::to_vec_pretty(volume).map_err(|e| DriverError::Other(e.to_string()))?;
        std::fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_volume() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.ensure("shop_data", None, HashMap::new()).unwrap();
        assert_eq!(volume.name, "shop_data");
        assert!(volume.mountpoint.exists());

        let again = manager.ensure("shop_data", None, HashMap::new()).unwrap();
        assert_eq!(again.created_at, volume.created_at);

        assert!(manager.ensure("nfs_data", Some("nfs"), HashMap::new()).is_err());
    }

    #[test]
    fn test_volume_reference_counting() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
        manager.ensure("test-volume", None, HashMap::new()).unwrap();

        manager.add_reference("test-volume").unwrap();
        manager.add_reference("test-volume").unwrap();
        assert_eq!(manager.get("test-volume").unwrap().ref_count, 2);
        assert!(manager.remove("test-volume", false).is_err());

        manager.remove_reference("test-volume").unwrap();
        manager.remove_reference("test-volume").unwrap();
        manager.remove("test-volume", false).unwrap();
        assert!(manager.get("test-volume").is_err());
    }

    #[test]
    fn test_volume_name_stays_under_base() {
        let temp = tempdir().unwrap();
        let base = temp.path().join("volumes");
        let manager = VolumeManager::new(base).unwrap();

        for name in ["../../runtime", "..", "a/b", "/etc", ""] {
            assert!(manager.ensure(name, None, HashMap::new()).is_err(), "{}", name);
        }
        let entries: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_volumes_survive_reload() {
        let temp = tempdir().unwrap();
        {
            let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
            manager.ensure("kept", None, HashMap::new()).unwrap();
            manager.add_reference("kept").unwrap();
        }

        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
        assert_eq!(manager.get("kept").unwrap().ref_count, 1);
    }
}

//! Container configuration

use crate::compose::manifest::{Mount, PortBinding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container has exited
    Exited,
    /// Container is being removed
    Removing,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Removing => write!(f, "removing"),
        }
    }
}

/// Attachment of a container to a network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Network name
    pub network: String,
    /// DNS aliases on that network
    pub aliases: Vec<String>,
    /// Assigned address, once connected
    pub ipv4_address: Option<String>,
}

/// Container configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Unique container ID
    pub id: String,
    /// Container name
    pub name: String,
    /// Image name/tag
    pub image: String,
    /// Command to run
    pub cmd: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub working_dir: String,
    /// Published and exposed ports
    pub ports: Vec<PortBinding>,
    /// Mounts, with named volumes already resolved to runtime names
    pub mounts: Vec<Mount>,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Network attachments
    pub networks: Vec<Attachment>,
    /// Current status
    pub status: ContainerStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Stop time
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code
    pub exit_code: Option<i32>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            name: String::new(),
            image: String::new(),
            cmd: Vec::new(),
            env: BTreeMap::new(),
            working_dir: "/".to_string(),
            ports: Vec::new(),
            mounts: Vec::new(),
            labels: HashMap::new(),
            networks: Vec::new(),
            status: ContainerStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
        }
    }
}

impl ContainerConfig {
    /// Create a new container configuration
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            ..Self::default()
        }
    }

    /// Attach to a network
    pub fn network(mut self, network: &str, aliases: Vec<String>) -> Self {
        self.networks.push(Attachment {
            network: network.to_string(),
            aliases,
            ipv4_address: None,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_config_builder() {
        let config = ContainerConfig::new("shop-web-1", "nginx:latest")
            .network("shop_default", vec!["web".to_string()]);

        assert_eq!(config.id.len(), 12);
        assert_eq!(config.status, ContainerStatus::Created);
        assert!(config.labels.is_empty());
        assert_eq!(config.networks[0].aliases, vec!["web"]);
    }
}

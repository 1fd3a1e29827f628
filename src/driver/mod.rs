//! Runtime driver boundary
//!
//! [`RuntimeDriver`] is the only thing that touches a container runtime.
//! It performs no orchestration: every call maps onto one runtime operation
//! and failures are passed through as [`DriverError`]s for the orchestrator
//! to tag with the service they belong to.
//!
//! Two implementations ship with the crate:
//!
//! - [`LocalRuntime`]: in-process bookkeeping runtime persisted under the
//!   state directory
//! - [`DockerRuntime`]: Docker Engine API client over HTTP

pub mod docker;
pub mod local;

pub use docker::DockerRuntime;
pub use local::LocalRuntime;

use crate::compose::manifest::ServiceSpec;
use crate::error::DriverResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Opaque identifier of one container instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeHandle(String);

impl RuntimeHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    /// Short form for display
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a runtime network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub id: String,
    pub name: String,
}

/// Parameters for creating a network
#[derive(Debug, Clone, Default)]
pub struct NetworkRequest {
    pub name: String,
    pub driver: Option<String>,
    pub internal: bool,
    pub labels: HashMap<String, String>,
}

/// Parameters for creating a volume
#[derive(Debug, Clone, Default)]
pub struct VolumeRequest {
    pub name: String,
    pub driver: Option<String>,
    pub labels: HashMap<String, String>,
}

/// A network the container should join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkBinding {
    pub network: NetworkHandle,
    pub aliases: Vec<String>,
}

/// Runtime-level settings the orchestrator derives for a service's container
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Networks to attach, in the service's declared order
    pub networks: Vec<NetworkBinding>,
    /// Compose volume key to runtime volume name
    pub volumes: HashMap<String, String>,
    /// Labels identifying project and service
    pub labels: HashMap<String, String>,
}

/// Container state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Missing,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Missing => write!(f, "missing"),
        }
    }
}

/// Capability interface over an external container runtime
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Create a network, returning the existing one if the name is taken
    async fn create_network(&self, request: &NetworkRequest) -> DriverResult<NetworkHandle>;

    /// Look up a network by name
    async fn find_network(&self, name: &str) -> DriverResult<Option<NetworkHandle>>;

    async fn remove_network(&self, network: &NetworkHandle) -> DriverResult<()>;

    /// Create a volume, returning the existing one if the name is taken
    async fn create_volume(&self, request: &VolumeRequest) -> DriverResult<String>;

    async fn remove_volume(&self, name: &str) -> DriverResult<()>;

    /// Create (but do not start) a container for a service
    async fn create_container(
        &self,
        service: &ServiceSpec,
        options: &CreateOptions,
    ) -> DriverResult<RuntimeHandle>;

    /// Look up a container by name
    async fn find_container(&self, name: &str) -> DriverResult<Option<RuntimeHandle>>;

    async fn start(&self, handle: &RuntimeHandle) -> DriverResult<()>;

    /// Stop a container, giving it `timeout` to exit before it is killed
    async fn stop(&self, handle: &RuntimeHandle, timeout: Duration) -> DriverResult<()>;

    /// Remove a container; `force` kills it first if it is still running
    async fn remove(&self, handle: &RuntimeHandle, force: bool) -> DriverResult<()>;

    async fn inspect(&self, handle: &RuntimeHandle) -> DriverResult<ContainerState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_handle() {
        assert_eq!(RuntimeHandle::new("3f2a9c1d7e5b8a0f").short(), "3f2a9c1d7e5b");
        assert_eq!(RuntimeHandle::new("abc").short(), "abc");
        assert_eq!(RuntimeHandle::new("ééééééééééééé").short(), "éééééééééééé");
        assert_eq!(RuntimeHandle::new("abcdefghijké").short(), "abcdefghijké");
    }
}

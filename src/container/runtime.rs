//! Container instance state transitions

use super::config::{ContainerConfig, ContainerStatus};
use crate::error::DriverError;
use chrono::Utc;

/// Container instance
#[derive(Debug, Clone)]
pub struct Container {
    /// Container configuration
    pub config: ContainerConfig,
}

impl Container {
    /// Create a new container
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    /// Get container ID
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Get container name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Check if container is running
    pub fn is_running(&self) -> bool {
        self.config.status == ContainerStatus::Running
    }

    /// Start the container
    pub fn start(&mut self) -> Result<(), DriverError> {
        match self.config.status {
            ContainerStatus::Running => Ok(()),
            ContainerStatus::Created | ContainerStatus::Exited => {
                self.config.status = ContainerStatus::Running;
                self.config.started_at = Some(Utc::now());
                self.config.finished_at = None;
                self.config.exit_code = None;
                Ok(())
            }
            ContainerStatus::Removing => Err(DriverError::Conflict(format!(
                "container {} is being removed",
                self.config.id
            ))),
        }
    }

    /// Stop the container; stopping a stopped container is a no-op
    pub fn stop(&mut self) {
        if self.is_running() {
            self.config.status = ContainerStatus::Exited;
            self.config.finished_at = Some(Utc::now());
            self.config.exit_code = Some(0);
        }
    }

    /// Kill the container
    pub fn kill(&mut self) {
        if self.is_running() {
            self.config.status = ContainerStatus::Exited;
            self.config.finished_at = Some(Utc::now());
            self.config.exit_code = Some(137);
        }
    }

    /// Mark the container for removal
    pub fn begin_remove(&mut self, force: bool) -> Result<(), DriverError> {
        if self.is_running() {
            if !force {
                return Err(DriverError::Conflict(format!(
                    "cannot remove running container {}",
                    self.config.id
                )));
            }
            self.kill();
        }
        self.config.status = ContainerStatus::Removing;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_cycle() {
        let mut container = Container::new(ContainerConfig::new("c", "alpine"));
        container.start().unwrap();
        assert!(container.is_running());
        container.start().unwrap();

        container.stop();
        assert_eq!(container.config.status, ContainerStatus::Exited);
        assert_eq!(container.config.exit_code, Some(0));

        container.start().unwrap();
        assert!(container.config.exit_code.is_none());
    }

    #[test]
    fn test_remove_requires_force_when_running() {
        let mut container = Container::new(ContainerConfig::new("c", "alpine"));
        container.start().unwrap();

        assert!(container.begin_remove(false).is_err());
        container.begin_remove(true).unwrap();
        assert_eq!(container.config.exit_code, Some(137));
        assert!(container.start().is_err());
    }
}

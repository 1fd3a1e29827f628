//! Per-project session state
//!
//! A [`SessionState`] records, for one project, each service's lifecycle
//! status and the runtime handle it owns, plus the networks and volumes the
//! project brought up. Only the orchestrator mutates it. Between commands it
//! lives as JSON under `<state dir>/projects/<project>.json`.

use super::resolver::Stage;
use crate::driver::{NetworkHandle, RuntimeHandle};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle status of a service within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ServiceStatus {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        matches!(
            (self, next),
            (Pending, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Pending | Starting | Running, Failed)
                // stop/remove failed during teardown
                | (Stopping, Failed)
                // `start` after `stop`
                | (Stopped, Starting)
        )
    }

    /// Terminal for the current session
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One service's entry in the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub status: ServiceStatus,
    pub handle: Option<RuntimeHandle>,
    /// Last failure recorded for this service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Network the session attached containers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    /// Key in the compose file
    pub key: String,
    pub handle: NetworkHandle,
    /// Owned by the project (removed on `down`) rather than external
    pub owned: bool,
}

/// Volume the session made available to containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub key: String,
    pub name: String,
    pub owned: bool,
}

/// State of one orchestration session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub project: String,
    /// Stage order of the last successful resolve
    pub stages: Vec<Stage>,
    services: Vec<ServiceEntry>,
    pub networks: Vec<NetworkEntry>,
    pub volumes: Vec<VolumeEntry>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            stages: Vec::new(),
            services: Vec::new(),
            networks: Vec::new(),
            volumes: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Service entries in the order they were first tracked
    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.service(name).map(|s| s.status)
    }

    pub fn handle(&self, name: &str) -> Option<&RuntimeHandle> {
        self.service(name).and_then(|s| s.handle.as_ref())
    }

    /// Start tracking a service as Pending, or reset a finished entry so it
    /// can be brought up again. Running entries are left untouched.
    pub fn track(&mut self, name: &str) {
        match self.services.iter_mut().find(|s| s.name == name) {
            Some(entry) if entry.status.is_terminal() && entry.handle.is_none() => {
                entry.status = ServiceStatus::Pending;
                entry.error = None;
            }
            Some(_) => {}
            None => self.services.push(ServiceEntry {
                name: name.to_string(),
                status: ServiceStatus::Pending,
                handle: None,
                error: None,
            }),
        }
    }

    /// Move a service to `next`, returning whether the transition was legal
    pub fn transition(&mut self, name: &str, next: ServiceStatus) -> bool {
        let Some(entry) = self.services.iter_mut().find(|s| s.name == name) else {
            return false;
        };

        if entry.status == next {
            return true;
        }
        if !entry.status.can_transition_to(next) {
            tracing::warn!(
                "Ignoring illegal transition for service {}: {} -> {}",
                name,
                entry.status,
                next
            );
            return false;
        }

        tracing::debug!("Service {}: {} -> {}", name, entry.status, next);
        entry.status = next;
        true
    }

    /// Record a failure; the status becomes Failed when that is legal
    pub fn fail(&mut self, name: &str, reason: impl Into<String>) {
        if let Some(entry) = self.services.iter_mut().find(|s| s.name == name) {
            if entry.status.can_transition_to(ServiceStatus::Failed) {
                entry.status = ServiceStatus::Failed;
            }
            entry.error = Some(reason.into());
        }
    }

    /// Take over a container found running on the runtime
    pub fn adopt(&mut self, name: &str) {
        if let Some(entry) = self.services.iter_mut().find(|s| s.name == name) {
            entry.status = ServiceStatus::Running;
            entry.error = None;
        }
    }

    /// Back to Pending so the service is created afresh
    pub fn reset(&mut self, name: &str) {
        if let Some(entry) = self.services.iter_mut().find(|s| s.name == name) {
            entry.status = ServiceStatus::Pending;
            entry.error = None;
        }
    }

    pub fn set_handle(&mut self, name: &str, handle: Option<RuntimeHandle>) {
        if let Some(entry) = self.services.iter_mut().find(|s| s.name == name) {
            entry.handle = handle;
        }
    }

    /// Services that still hold a runtime handle
    pub fn handles(&self) -> impl Iterator<Item = (&str, &RuntimeHandle)> {
        self.services
            .iter()
            .filter_map(|s| s.handle.as_ref().map(|h| (s.name.as_str(), h)))
    }

    /// True when no runtime handle is referenced
    pub fn is_clear(&self) -> bool {
        self.handles().next().is_none()
    }

    /// Drop service entries that no longer own anything
    pub fn prune(&mut self) {
        self.services.retain(|s| s.handle.is_some());
    }

    pub fn network(&self, key: &str) -> Option<&NetworkEntry> {
        self.networks.iter().find(|n| n.key == key)
    }

    pub fn volume(&self, key: &str) -> Option<&VolumeEntry> {
        self.volumes.iter().find(|v| v.key == key)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// On-disk store of session files
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Store rooted at `<state_dir>/projects`
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("projects"),
        }
    }

    pub fn path(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.json", project))
    }

    /// Load the saved session for a project, if there is one
    pub fn load(&self, project: &str) -> Result<Option<SessionState>> {
        let path = self.path(project);
        if !path.is_file() {
            return Ok(None);
        }

        let data = std::fs::read(&path)?;
        let state = serde_json::from_slice(&data)?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &SessionState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path(&state.project);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, project: &str) -> Result<()> {
        let path = self.path(project);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_status_transitions() {
        use ServiceStatus::*;

        assert!(Pending.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        for from in [Pending, Starting, Running] {
            assert!(from.can_transition_to(Failed));
        }

        assert!(!Pending.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Stopping));
    }

    #[test]
    fn test_illegal_transition_is_not_applied() {
        let mut state = SessionState::new("shop");
        state.track("db");

        assert!(!state.transition("db", ServiceStatus::Running));
        assert_eq!(state.status("db"), Some(ServiceStatus::Pending));

        assert!(state.transition("db", ServiceStatus::Starting));
        state.fail("db", "image not found");
        let entry = state.service("db").unwrap();
        assert_eq!(entry.status, ServiceStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("image not found"));
    }

    #[test]
    fn test_track_resets_finished_entries_only() {
        let mut state = SessionState::new("shop");
        state.track("db");
        state.track("web");
        state.transition("db", ServiceStatus::Starting);
        state.transition("db", ServiceStatus::Running);
        state.set_handle("db", Some(RuntimeHandle::new("abc")));
        state.fail("web", "boom");

        state.track("db");
        state.track("web");
        assert_eq!(state.status("db"), Some(ServiceStatus::Running));
        assert_eq!(state.status("web"), Some(ServiceStatus::Pending));
        assert!(state.service("web").unwrap().error.is_none());
        assert_eq!(state.services().len(), 2);
    }

    #[test]
    fn test_handles_and_prune() {
        let mut state = SessionState::new("shop");
        state.track("db");
        state.track("web");
        state.set_handle("db", Some(RuntimeHandle::new("abc")));

        let handles: Vec<_> = state.handles().map(|(name, _)| name).collect();
        assert_eq!(handles, vec!["db"]);
        assert!(!state.is_clear());

        state.prune();
        assert_eq!(state.services().len(), 1);

        state.set_handle("db", None);
        assert!(state.is_clear());
    }

    #[test]
    fn test_store_save_load_remove() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        assert!(store.load("shop").unwrap().is_none());

        let mut state = SessionState::new("shop");
        state.stages = vec![vec!["db".into()], vec!["web".into()]];
        state.track("db");
        state.set_handle("db", Some(RuntimeHandle::new("abc")));
        state.networks.push(NetworkEntry {
            key: "default".into(),
            handle: NetworkHandle {
                id: "n1".into(),
                name: "shop_default".into(),
            },
            owned: true,
        });
        store.save(&state).unwrap();

        assert!(store.path("shop").ends_with("projects/shop.json"));
        let loaded = store.load("shop").unwrap().unwrap();
        assert_eq!(loaded, state);

        store.remove("shop").unwrap();
        assert!(store.load("shop").unwrap().is_none());
        store.remove("shop").unwrap();
    }
}

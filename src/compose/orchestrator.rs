//! Compose orchestrator
//!
//! Drives a [`RuntimeDriver`] through the resolved stage order. Services in
//! one stage are launched concurrently on a [`JoinSet`] and the stage is a
//! join barrier: the next stage starts only after every task has reported
//! back. Task outcomes are applied to the [`SessionState`] here, never from
//! inside the tasks.

use super::manifest::{Manifest, MountSource, ServiceSpec};
use super::resolver::{self, DependencyGraph, Stage};
use super::session::{NetworkEntry, ServiceStatus, SessionState, VolumeEntry};
use crate::driver::{
    ContainerState, CreateOptions, NetworkBinding, NetworkRequest, RuntimeDriver, RuntimeHandle,
    VolumeRequest,
};
use crate::error::{ComposeError, DriverError, DriverResult, Operation, Result, RuntimeError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Label carrying the project name
pub const PROJECT_LABEL: &str = "com.docker.compose.project";
/// Label carrying the service name
pub const SERVICE_LABEL: &str = "com.docker.compose.service";

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Grace period for `stop` when a service sets none
    pub stop_timeout: Duration,
    /// Extra time the runtime gets to answer a stop after the grace period
    pub stop_slack: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            stop_slack: Duration::from_secs(5),
        }
    }
}

/// Decides when a started container counts as Running
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn ready(
        &self,
        driver: &dyn RuntimeDriver,
        service: &ServiceSpec,
        handle: &RuntimeHandle,
    ) -> DriverResult<()>;
}

/// Ready as soon as `start` returns
#[derive(Debug, Default, Clone, Copy)]
pub struct StartedReadiness;

#[async_trait]
impl ReadinessCheck for StartedReadiness {
    async fn ready(
        &self,
        _driver: &dyn RuntimeDriver,
        _service: &ServiceSpec,
        _handle: &RuntimeHandle,
    ) -> DriverResult<()> {
        Ok(())
    }
}

/// Ready once the runtime reports the container running
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningReadiness;

#[async_trait]
impl ReadinessCheck for RunningReadiness {
    async fn ready(
        &self,
        driver: &dyn RuntimeDriver,
        _service: &ServiceSpec,
        handle: &RuntimeHandle,
    ) -> DriverResult<()> {
        match driver.inspect(handle).await? {
            ContainerState::Running => Ok(()),
            state => Err(DriverError::Other(format!("container is {}", state))),
        }
    }
}

/// Failures collected during a best-effort teardown
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub failures: Vec<RuntimeError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn log(&self) {
        for failure in &self.failures {
            tracing::warn!("Teardown: {}", failure);
        }
    }
}

/// What one per-service task reports back to the stage barrier
struct StepOutcome {
    service: String,
    handle: Option<RuntimeHandle>,
    result: std::result::Result<(), RuntimeError>,
}

/// Compose orchestrator
pub struct ComposeOrchestrator {
    project: String,
    manifest: Arc<Manifest>,
    driver: Arc<dyn RuntimeDriver>,
    readiness: Arc<dyn ReadinessCheck>,
    options: OrchestratorOptions,
}

impl ComposeOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        project: &str,
        manifest: Manifest,
        driver: Arc<dyn RuntimeDriver>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            project: project.to_string(),
            manifest: Arc::new(manifest),
            driver,
            readiness: Arc::new(StartedReadiness),
            options,
        }
    }

    /// Use a different readiness check after `start`
    pub fn with_readiness(mut self, readiness: Arc<dyn ReadinessCheck>) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Bring the project (or the given services and their dependencies) up
    ///
    /// On any failure, or when `cancel` fires, every container the session
    /// holds is torn down before the error is returned.
    pub async fn up(
        &self,
        session: &mut SessionState,
        cancel: &CancellationToken,
        services: &[String],
    ) -> Result<()> {
        let stages = resolver::resolve(&self.manifest)?;
        let selected = self.select(services)?;
        let plan: Vec<Stage> = stages
            .iter()
            .map(|stage| {
                stage
                    .iter()
                    .filter(|s| selected.contains(s.as_str()))
                    .cloned()
                    .collect::<Stage>()
            })
            .filter(|stage| !stage.is_empty())
            .collect();

        session.stages = stages;

        if cancel.is_cancelled() {
            return Err(ComposeError::Cancelled);
        }

        tracing::info!("Starting compose project: {}", self.project);

        if let Err(e) = self.prepare_resources(session, &selected).await {
            return Err(self.abort(session, e).await);
        }

        for (index, stage) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("Cancelled before stage {}", index + 1);
                return Err(self.abort(session, ComposeError::Cancelled).await);
            }

            tracing::info!("Stage {}: {}", index + 1, stage.join(", "));

            let launch = match self.reconcile(session, stage).await {
                Ok(launch) => launch,
                Err(e) => return Err(self.abort(session, e.into()).await),
            };

            let mut set = JoinSet::new();
            for name in &launch {
                let Some(service) = self.manifest.service(name) else {
                    continue;
                };
                session.transition(name, ServiceStatus::Starting);
                set.spawn(launch_service(
                    self.driver.clone(),
                    self.readiness.clone(),
                    service.clone(),
                    self.create_options(session, service),
                ));
            }

            let outcomes = self.join_stage(set, &launch, Operation::Start).await;
            let mut primary = None;
            for outcome in outcomes {
                if outcome.handle.is_some() {
                    session.set_handle(&outcome.service, outcome.handle);
                }
                match outcome.result {
                    Ok(()) => {
                        tracing::info!("Service {} is running", outcome.service);
                        session.transition(&outcome.service, ServiceStatus::Running);
                    }
                    Err(e) => {
                        tracing::error!("{}", e);
                        session.fail(&outcome.service, e.to_string());
                        // Outcomes are in declaration order
                        primary.get_or_insert(e);
                    }
                }
            }
            session.touch();

            if let Some(e) = primary {
                return Err(self.abort(session, e.into()).await);
            }
            if cancel.is_cancelled() {
                tracing::warn!("Cancelled during stage {}", index + 1);
                return Err(self.abort(session, ComposeError::Cancelled).await);
            }
        }

        tracing::info!("Compose project {} is up", self.project);
        Ok(())
    }

    /// Stop and remove every container in reverse stage order, then remove
    /// project networks (and volumes when asked)
    pub async fn down(
        &self,
        session: &mut SessionState,
        remove_volumes: bool,
    ) -> Result<TeardownReport> {
        tracing::info!("Stopping compose project: {}", self.project);

        if session.stages.is_empty() {
            session.stages = resolver::resolve(&self.manifest)?;
        }
        self.discover(session).await?;

        let mut report = self.teardown(session).await;

        let mut networks = std::mem::take(&mut session.networks);
        networks.reverse();
        for entry in networks {
            if !entry.owned {
                continue;
            }
            match self.driver.remove_network(&entry.handle).await {
                Ok(()) | Err(DriverError::NotFound(_)) => {
                    tracing::info!("Removed network {}", entry.handle.name);
                }
                Err(e) => {
                    report.failures.push(RuntimeError::network(
                        &entry.handle.name,
                        Operation::RemoveNetwork,
                        e,
                    ));
                    session.networks.push(entry);
                }
            }
        }

        if remove_volumes {
            for entry in std::mem::take(&mut session.volumes) {
                if !entry.owned {
                    continue;
                }
                match self.driver.remove_volume(&entry.name).await {
                    Ok(()) | Err(DriverError::NotFound(_)) => {
                        tracing::info!("Removed volume {}", entry.name);
                    }
                    Err(e) => {
                        report.failures.push(RuntimeError::volume(
                            &entry.name,
                            Operation::RemoveVolume,
                            e,
                        ));
                        session.volumes.push(entry);
                    }
                }
            }
        }

        session.prune();
        session.touch();
        report.log();
        Ok(report)
    }

    /// Stop running services in reverse stage order, keeping their containers
    pub async fn stop(&self, session: &mut SessionState) -> Result<TeardownReport> {
        tracing::info!("Stopping services of project: {}", self.project);

        let mut report = TeardownReport::default();
        for stage in resolver::teardown_order(&self.session_stages(session)?) {
            let targets: Vec<String> = stage
                .into_iter()
                .filter(|name| session.status(name) == Some(ServiceStatus::Running))
                .filter(|name| session.handle(name).is_some())
                .collect();

            let mut set = JoinSet::new();
            for name in &targets {
                let Some(handle) = session.handle(name).cloned() else {
                    continue;
                };
                session.transition(name, ServiceStatus::Stopping);
                let driver = self.driver.clone();
                let grace = self.grace_period(name);
                let slack = self.options.stop_slack;
                let service = name.clone();
                set.spawn(async move {
                    let result = stop_container(driver.as_ref(), &handle, grace, slack)
                        .await
                        .map_err(|e| RuntimeError::service(&service, Operation::Stop, e));
                    StepOutcome {
                        service,
                        handle: Some(handle),
                        result,
                    }
                });
            }

            for outcome in self.join_stage(set, &targets, Operation::Stop).await {
                match outcome.result {
                    Ok(()) => {
                        tracing::info!("Stopped service {}", outcome.service);
                        session.transition(&outcome.service, ServiceStatus::Stopped);
                    }
                    Err(e) => {
                        session.fail(&outcome.service, e.to_string());
                        report.failures.push(e);
                    }
                }
            }
        }

        session.touch();
        report.log();
        Ok(report)
    }

    /// Start previously stopped services in stage order
    pub async fn start(&self, session: &mut SessionState) -> Result<()> {
        tracing::info!("Starting services of project: {}", self.project);

        let mut started_any = false;
        for stage in self.session_stages(session)? {
            let mut targets = Vec::new();
            for name in stage {
                match (session.status(&name), session.handle(&name)) {
                    (Some(ServiceStatus::Stopped), Some(_)) => targets.push(name),
                    (Some(ServiceStatus::Running), Some(_)) => started_any = true,
                    _ => tracing::warn!("Service {} has no container; run up first", name),
                }
            }

            let mut set = JoinSet::new();
            for name in &targets {
                let (Some(service), Some(handle)) =
                    (self.manifest.service(name), session.handle(name).cloned())
                else {
                    continue;
                };
                session.transition(name, ServiceStatus::Starting);
                let driver = self.driver.clone();
                let readiness = self.readiness.clone();
                let service = service.clone();
                set.spawn(async move {
                    let result = start_and_wait(driver.as_ref(), readiness.as_ref(), &service, &handle)
                        .await;
                    StepOutcome {
                        service: service.name.clone(),
                        handle: Some(handle),
                        result,
                    }
                });
            }

            let mut primary = None;
            for outcome in self.join_stage(set, &targets, Operation::Start).await {
                match outcome.result {
                    Ok(()) => {
                        started_any = true;
                        session.transition(&outcome.service, ServiceStatus::Running);
                    }
                    Err(e) => {
                        session.fail(&outcome.service, e.to_string());
                        primary.get_or_insert(e);
                    }
                }
            }
            session.touch();

            if let Some(e) = primary {
                return Err(e.into());
            }
        }

        if !started_any {
            return Err(ComposeError::InvalidConfig(format!(
                "project {} has no created containers",
                self.project
            )));
        }
        Ok(())
    }

    /// Services to bring up: the requested ones plus everything they depend on
    fn select(&self, services: &[String]) -> Result<HashSet<String>> {
        if services.is_empty() {
            return Ok(self
                .manifest
                .services()
                .iter()
                .map(|s| s.name.clone())
                .collect());
        }

        if let Some(missing) = services.iter().find(|s| self.manifest.service(s).is_none()) {
            return Err(ComposeError::ServiceNotFound(missing.clone()));
        }
        Ok(DependencyGraph::from_manifest(&self.manifest).closure(services))
    }

    fn session_stages(&self, session: &SessionState) -> Result<Vec<Stage>> {
        if session.stages.is_empty() {
            Ok(resolver::resolve(&self.manifest)?)
        } else {
            Ok(session.stages.clone())
        }
    }

    fn grace_period(&self, service: &str) -> Duration {
        self.manifest
            .service(service)
            .and_then(|s| s.stop_grace_period)
            .unwrap_or(self.options.stop_timeout)
    }

    /// Create the volumes and networks the selected services use
    async fn prepare_resources(
        &self,
        session: &mut SessionState,
        selected: &HashSet<String>,
    ) -> Result<()> {
        let services: Vec<&ServiceSpec> = self
            .manifest
            .services()
            .iter()
            .filter(|s| selected.contains(&s.name))
            .collect();

        for volume in self.manifest.volumes() {
            let used = services.iter().any(|s| {
                s.mounts
                    .iter()
                    .any(|m| m.source == MountSource::Volume(volume.key.clone()))
            });
            if !used || session.volume(&volume.key).is_some() {
                continue;
            }

            let name = volume.runtime_name(&self.project);
            let name = if volume.external {
                name
            } else {
                let request = VolumeRequest {
                    name: name.clone(),
                    driver: volume.driver.clone(),
                    labels: self.resource_labels(&volume.labels),
                };
                self.driver
                    .create_volume(&request)
                    .await
                    .map_err(|e| RuntimeError::volume(&name, Operation::CreateVolume, e))?
            };
            tracing::debug!("Volume {} ready", name);
            session.volumes.push(VolumeEntry {
                key: volume.key.clone(),
                name,
                owned: !volume.external,
            });
        }

        for network in self.manifest.networks() {
            let used = services
                .iter()
                .any(|s| s.networks.iter().any(|(key, _)| *key == network.key));
            if !used {
                continue;
            }

            let name = network.runtime_name(&self.project);
            let handle = if network.external {
                self.driver
                    .find_network(&name)
                    .await
                    .map_err(|e| RuntimeError::network(&name, Operation::CreateNetwork, e))?
                    .ok_or_else(|| {
                        RuntimeError::network(
                            &name,
                            Operation::CreateNetwork,
                            DriverError::NotFound(format!("external network {}", name)),
                        )
                    })?
            } else {
                let request = NetworkRequest {
                    name: name.clone(),
                    driver: network.driver.clone(),
                    internal: network.internal,
                    labels: self.resource_labels(&network.labels),
                };
                self.driver
                    .create_network(&request)
                    .await
                    .map_err(|e| RuntimeError::network(&name, Operation::CreateNetwork, e))?
            };

            tracing::info!("Network {} ready", handle.name);
            session.networks.retain(|n| n.key != network.key);
            session.networks.push(NetworkEntry {
                key: network.key.clone(),
                handle,
                owned: !network.external,
            });
        }

        session.touch();
        Ok(())
    }

    /// Work out which services of a stage need launching
    ///
    /// Running services whose container is still alive are kept as is.
    /// Leftover containers from an earlier run are removed so the service
    /// can be recreated.
    async fn reconcile(
        &self,
        session: &mut SessionState,
        stage: &Stage,
    ) -> std::result::Result<Vec<String>, RuntimeError> {
        let mut launch = Vec::new();

        for name in stage {
            session.track(name);

            let handle = match session.handle(name).cloned() {
                Some(handle) => Some(handle),
                None => {
                    let container = self.container_name(name);
                    self.driver
                        .find_container(&container)
                        .await
                        .map_err(|e| RuntimeError::service(name, Operation::Create, e))?
                }
            };

            let Some(handle) = handle else {
                launch.push(name.clone());
                continue;
            };

            let state = self
                .driver
                .inspect(&handle)
                .await
                .map_err(|e| RuntimeError::service(name, Operation::Create, e))?;

            if state == ContainerState::Running {
                tracing::info!("Service {} is already running", name);
                session.set_handle(name, Some(handle));
                if session.status(name) != Some(ServiceStatus::Running) {
                    session.adopt(name);
                }
                continue;
            }

            if state != ContainerState::Missing {
                tracing::debug!("Removing stale container {} for service {}", handle, name);
                match self.driver.remove(&handle, true).await {
                    Ok(()) | Err(DriverError::NotFound(_)) => {}
                    Err(e) => return Err(RuntimeError::service(name, Operation::Remove, e)),
                }
            }
            session.set_handle(name, None);
            session.reset(name);
            launch.push(name.clone());
        }

        Ok(launch)
    }

    /// Adopt containers and networks that exist on the runtime but are not
    /// recorded in the session
    async fn discover(&self, session: &mut SessionState) -> Result<()> {
        for service in self.manifest.services() {
            if session.handle(&service.name).is_some() {
                continue;
            }
            let container = service.container_name(&self.project);
            let found = self
                .driver
                .find_container(&container)
                .await
                .map_err(|e| RuntimeError::service(&service.name, Operation::Remove, e))?;
            if let Some(handle) = found {
                tracing::debug!("Found container {} for service {}", handle, service.name);
                session.track(&service.name);
                session.set_handle(&service.name, Some(handle));
                session.adopt(&service.name);
            }
        }

        for network in self.manifest.networks() {
            if network.external || session.network(&network.key).is_some() {
                continue;
            }
            let name = network.runtime_name(&self.project);
            let found = self
                .driver
                .find_network(&name)
                .await
                .map_err(|e| RuntimeError::network(&name, Operation::RemoveNetwork, e))?;
            if let Some(handle) = found {
                session.networks.push(NetworkEntry {
                    key: network.key.clone(),
                    handle,
                    owned: true,
                });
            }
        }

        Ok(())
    }

    /// Reverse-order stop and remove of every container in the session
    async fn teardown(&self, session: &mut SessionState) -> TeardownReport {
        let mut stages = session.stages.clone();
        let known: HashSet<&String> = stages.iter().flatten().collect();
        let orphans: Stage = session
            .handles()
            .map(|(name, _)| name.to_string())
            .filter(|name| !known.contains(name))
            .collect();
        if !orphans.is_empty() {
            stages.push(orphans);
        }

        let mut report = TeardownReport::default();
        for stage in resolver::teardown_order(&stages) {
            let targets: Vec<String> = stage
                .into_iter()
                .filter(|name| session.handle(name).is_some())
                .collect();
            if targets.is_empty() {
                continue;
            }

            let mut set = JoinSet::new();
            for name in &targets {
                let Some(handle) = session.handle(name).cloned() else {
                    continue;
                };
                if session.status(name) == Some(ServiceStatus::Running) {
                    session.transition(name, ServiceStatus::Stopping);
                }
                let driver = self.driver.clone();
                let grace = self.grace_period(name);
                let slack = self.options.stop_slack;
                let service = name.clone();
                set.spawn(async move {
                    let result = stop_and_remove(driver.as_ref(), &service, &handle, grace, slack).await;
                    StepOutcome {
                        service,
                        handle: Some(handle),
                        result,
                    }
                });
            }

            for outcome in self.join_stage(set, &targets, Operation::Remove).await {
                match outcome.result {
                    Ok(()) => {
                        tracing::info!("Removed service {}", outcome.service);
                        session.set_handle(&outcome.service, None);
                        if session.status(&outcome.service) == Some(ServiceStatus::Stopping) {
                            session.transition(&outcome.service, ServiceStatus::Stopped);
                        }
                    }
                    Err(e) => {
                        session.fail(&outcome.service, e.to_string());
                        report.failures.push(e);
                    }
                }
            }
        }

        report
    }

    /// Tear everything down after a failed or cancelled `up`, keeping the
    /// original error
    async fn abort(&self, session: &mut SessionState, error: ComposeError) -> ComposeError {
        tracing::warn!("Tearing down project {} after: {}", self.project, error);
        let report = self.teardown(session).await;
        session.touch();
        report.log();
        error
    }

    /// Wait for every task of a stage and order outcomes by declaration
    async fn join_stage(
        &self,
        mut set: JoinSet<StepOutcome>,
        expected: &[String],
        operation: Operation,
    ) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(expected.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Service task failed to complete: {}", e),
            }
        }

        // A task that panicked never reported; count it as failed
        for name in expected {
            if !outcomes.iter().any(|o| &o.service == name) {
                outcomes.push(StepOutcome {
                    service: name.clone(),
                    handle: None,
                    result: Err(RuntimeError::service(
                        name,
                        operation,
                        DriverError::Other("task did not complete".to_string()),
                    )),
                });
            }
        }

        outcomes.sort_by_key(|o| self.manifest.position(&o.service).unwrap_or(usize::MAX));
        outcomes
    }

    fn container_name(&self, service: &str) -> String {
        match self.manifest.service(service) {
            Some(spec) => spec.container_name(&self.project),
            None => format!("{}-{}-1", self.project, service),
        }
    }

    fn resource_labels(&self, declared: &HashMap<String, String>) -> HashMap<String, String> {
        let mut labels = declared.clone();
        labels.insert(PROJECT_LABEL.to_string(), self.project.clone());
        labels
    }

    fn create_options(&self, session: &SessionState, service: &ServiceSpec) -> CreateOptions {
        let networks = service
            .networks
            .iter()
            .filter_map(|(key, aliases)| {
                let entry = session.network(key)?;
                let mut aliases = aliases.clone();
                if !aliases.contains(&service.name) {
                    aliases.insert(0, service.name.clone());
                }
                Some(NetworkBinding {
                    network: entry.handle.clone(),
                    aliases,
                })
            })
            .collect();

        let volumes = session
            .volumes
            .iter()
            .map(|v| (v.key.clone(), v.name.clone()))
            .collect();

        let mut labels = HashMap::new();
        labels.insert(PROJECT_LABEL.to_string(), self.project.clone());
        labels.insert(SERVICE_LABEL.to_string(), service.name.clone());

        CreateOptions {
            name: service.container_name(&self.project),
            image: service.image_reference(&self.project),
            networks,
            volumes,
            labels,
        }
    }
}

/// Create, start and wait for one service
async fn launch_service(
    driver: Arc<dyn RuntimeDriver>,
    readiness: Arc<dyn ReadinessCheck>,
    service: ServiceSpec,
    options: CreateOptions,
) -> StepOutcome {
    tracing::debug!("Creating container {} for service {}", options.name, service.name);

    let handle = match driver.create_container(&service, &options).await {
        Ok(handle) => handle,
        Err(e) => {
            return StepOutcome {
                result: Err(RuntimeError::service(&service.name, Operation::Create, e)),
                service: service.name,
                handle: None,
            }
        }
    };

    let result = start_and_wait(driver.as_ref(), readiness.as_ref(), &service, &handle).await;
    StepOutcome {
        service: service.name,
        handle: Some(handle),
        result,
    }
}

async fn start_and_wait(
    driver: &dyn RuntimeDriver,
    readiness: &dyn ReadinessCheck,
    service: &ServiceSpec,
    handle: &RuntimeHandle,
) -> std::result::Result<(), RuntimeError> {
    driver
        .start(handle)
        .await
        .map_err(|e| RuntimeError::service(&service.name, Operation::Start, e))?;
    readiness
        .ready(driver, service, handle)
        .await
        .map_err(|e| RuntimeError::service(&service.name, Operation::Ready, e))
}

/// Stop with a grace period, bounded by the grace period plus `slack`
async fn stop_container(
    driver: &dyn RuntimeDriver,
    handle: &RuntimeHandle,
    grace: Duration,
    slack: Duration,
) -> DriverResult<()> {
    let deadline = grace.saturating_add(slack);
    match tokio::time::timeout(deadline, driver.stop(handle, grace)).await {
        Ok(Ok(())) | Ok(Err(DriverError::NotFound(_))) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(DriverError::Timeout(deadline)),
    }
}

/// Stop then remove; a stop that fails or overruns escalates to forced removal
async fn stop_and_remove(
    driver: &dyn RuntimeDriver,
    service: &str,
    handle: &RuntimeHandle,
    grace: Duration,
    slack: Duration,
) -> std::result::Result<(), RuntimeError> {
    let force = match stop_container(driver, handle, grace, slack).await {
        Ok(()) => false,
        Err(e) => {
            tracing::warn!("Stopping {} failed ({}), forcing removal", service, e);
            true
        }
    };

    match driver.remove(handle, force).await {
        Ok(()) | Err(DriverError::NotFound(_)) => Ok(()),
        Err(e) => Err(RuntimeError::service(service, Operation::Remove, e)),
    }
}

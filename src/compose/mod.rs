//! Compose-style multi-service orchestration
//!
//! The compose file is parsed into [`ComposeConfig`], validated into a
//! [`Manifest`], resolved into start stages, and driven through a runtime
//! driver by the [`ComposeOrchestrator`].

pub mod config;
pub mod manifest;
pub mod orchestrator;
pub mod parser;
pub mod project;
pub mod resolver;
pub mod session;

pub use config::{ComposeConfig, ServiceConfig};
pub use manifest::{Manifest, ServiceSpec};
pub use orchestrator::{
    ComposeOrchestrator, OrchestratorOptions, ReadinessCheck, RunningReadiness, StartedReadiness,
    TeardownReport,
};
pub use parser::ComposeParser;
pub use project::{Project, ProjectOptions};
pub use resolver::{resolve, teardown_order, DependencyGraph, Stage};
pub use session::{ServiceStatus, SessionState, SessionStore};

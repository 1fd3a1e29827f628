//! Container management module
//!
//! Bookkeeping for containers owned by the local runtime: creation,
//! start/stop transitions and removal, persisted under the state directory.

pub mod config;
pub mod lifecycle;
pub mod runtime;

pub use config::{Attachment, ContainerConfig, ContainerStatus};
pub use lifecycle::ContainerManager;
pub use runtime::Container;

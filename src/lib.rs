//! Rune Compose - declarative multi-service container orchestration
//!
//! Rune Compose brings up a set of interdependent services described in a
//! compose file. It provides:
//!
//! - Compose file parsing and validation into a typed manifest
//! - Dependency resolution into concurrent start stages
//! - A runtime driver interface with local and Docker Engine backends
//! - Staged `up`/`down` with teardown on failure and cancellation

pub mod compose;
pub mod container;
pub mod driver;
pub mod error;
pub mod network;
pub mod storage;

pub use error::{ComposeError, Result};

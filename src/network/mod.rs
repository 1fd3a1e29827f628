//! Network management module
//!
//! Bridge networks and address allocation for the local runtime.

pub mod bridge;
pub mod config;

pub use bridge::{BridgeNetwork, NetworkManager};
pub use config::{NetworkConfig, NetworkDriver};

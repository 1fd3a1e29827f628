//! Storage management module
//!
//! Named volumes for the local runtime.

pub mod volume;

pub use volume::{Volume, VolumeManager};

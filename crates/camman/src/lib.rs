//! camman: camera manager.
//!
//! Composes the device registry, the settings store and an optional
//! inference overlay behind [`CamManager`], configured through [`Config`].

pub mod config;
pub mod manager;

pub use camman_core::{DetectionRecord, Effect, Mode};
pub use camman_hw::{DeviceKey, Frame};
pub use config::{Config, ConfigError};
pub use manager::{CamManager, ManagerError};

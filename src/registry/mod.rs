//! Target registry
//!
//! Loads the monitor configuration, validates the target list and keeps it
//! available for the scheduler. The list can be swapped at runtime with
//! [`TargetRegistry::reload`].

pub mod config;
pub mod loader;
pub mod target;

pub use config::{
    ConfigError, ErrorPolicy, MonitorConfig, NotificationConfig, Provider, Settings,
    TargetConfig,
};
pub use loader::{load, RegistryDiff, TargetRegistry, MAX_INTERVAL, MAX_TIMEOUT};
pub use target::{ActiveHours, ExpectedResponse, Protocol, Target};

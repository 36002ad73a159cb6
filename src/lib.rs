//! Pulsewatch: multi-target availability monitor
//!
//! Polls a set of HTTP and TCP targets, each on its own timer, derives an
//! UP/DOWN status per target with failure hysteresis, and pushes alerts for
//! status transitions through a webhook or ServerChan, with deduplication and
//! retry.
//!
//! # Example
//!
//! ```no_run
//! use pulsewatch::monitor::Monitor;
//! use pulsewatch::registry::MonitorConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig::from_file("pulsewatch.toml".as_ref())?;
//! let monitor = Monitor::new(config.settings()?)?;
//! monitor.start();
//!
//! tokio::signal::ctrl_c().await?;
//! monitor.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod state;

// Re-export commonly used types
pub use monitor::{Monitor, MonitorError};
pub use notify::{DeliveryOutcome, Notifier};
pub use probe::{CheckResult, HealthCheck, Outcome, Prober};
pub use registry::{ConfigError, MonitorConfig, Settings, Target};
pub use state::{AlertEvent, Status, TargetState};

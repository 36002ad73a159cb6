//! Health probes
//!
//! A probe runs one check against one target and classifies it as UP, DOWN
//! or ERROR. Probes never outlive their deadline.

pub mod prober;
pub mod result;

pub use prober::{
    deadline_after, probe_once, HealthCheck, ProbeError, Prober, CRITERIA_MISMATCH, DEADLINE_TOLERANCE,
    TIMEOUT_REASON,
};
pub use result::{CheckResult, Outcome};

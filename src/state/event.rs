//! Status values and alert events

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived status of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Up,
    Down,
    /// No conclusive result yet
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Up => write!(f, "UP"),
            Status::Down => write!(f, "DOWN"),
            Status::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A qualifying status transition. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub target: String,
    pub address: String,
    pub previous: Status,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

impl AlertEvent {
    pub fn new(
        target: impl Into<String>,
        address: impl Into<String>,
        previous: Status,
        status: Status,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            address: address.into(),
            previous,
            status,
            timestamp: Utc::now(),
            reason: reason.into(),
        }
    }

    /// Dedup identity: same target, same new status
    pub fn key(&self) -> (String, Status) {
        (self.target.clone(), self.status)
    }

    /// Short one-line title, e.g. `[DOWN] api`
    pub fn title(&self) -> String {
        format!("[{}] {}", self.status, self.target)
    }

    /// Human-readable body
    pub fn body(&self) -> String {
        let mut lines = vec![
            format!("Target: {} ({})", self.target, self.address),
            format!("Status: {} -> {}", self.previous, self.status),
            format!("Time: {}", self.timestamp.to_rfc3339()),
        ];
        if !self.reason.is_empty() {
            lines.push(format!("Reason: {}", self.reason));
        }
        lines.join("\n")
    }
}

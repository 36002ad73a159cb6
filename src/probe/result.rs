//! Check result types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    /// Reachable and criteria satisfied
    Up,
    /// Unreachable, timed out, or criteria not met
    Down,
    /// The check itself could not be built; not a health signal
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Up => write!(f, "UP"),
            Outcome::Down => write!(f, "DOWN"),
            Outcome::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of one probe against one target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    /// Target name
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub latency: Duration,
    /// Failure category or diagnostic
    pub message: Option<String>,
}

impl CheckResult {
    pub fn up(target: impl Into<String>, latency: Duration) -> Self {
        Self {
            target: target.into(),
            timestamp: Utc::now(),
            outcome: Outcome::Up,
            latency,
            message: None,
        }
    }

    pub fn down(target: impl Into<String>, reason: impl Into<String>, latency: Duration) -> Self {
        Self {
            target: target.into(),
            timestamp: Utc::now(),
            outcome: Outcome::Down,
            latency,
            message: Some(reason.into()),
        }
    }

    pub fn error(target: impl Into<String>, reason: impl Into<String>, latency: Duration) -> Self {
        Self {
            target: target.into(),
            timestamp: Utc::now(),
            outcome: Outcome::Error,
            latency,
            message: Some(reason.into()),
        }
    }

    pub fn is_up(&self) -> bool {
        self.outcome == Outcome::Up
    }

    /// Reason text, empty when there is none
    pub fn reason(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let up = CheckResult::up("a", Duration::from_millis(12));
        assert!(up.is_up());
        assert_eq!(up.reason(), "");

        let down = CheckResult::down("a", "timeout", Duration::from_secs(1));
        assert_eq!(down.outcome, Outcome::Down);
        assert_eq!(down.reason(), "timeout");

        let err = CheckResult::error("a", "invalid url", Duration::ZERO);
        assert_eq!(err.outcome, Outcome::Error);
        assert!(!err.is_up());
    }

    #[test]
    fn test_outcome_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Outcome::Down).unwrap(), "\"DOWN\"");
        assert_eq!(Outcome::Error.to_string(), "ERROR");
    }
}

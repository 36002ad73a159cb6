//! Per-target status tracking with asymmetric hysteresis
//!
//! A target is declared DOWN only after `failure_threshold` consecutive
//! non-UP results, and declared UP again on the first UP that follows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::event::{AlertEvent, Status};
use crate::probe::{CheckResult, Outcome};
use crate::registry::{ErrorPolicy, Target};

/// Mutable record for one target. Written only by its tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub status: Status,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_transition: Option<DateTime<Utc>>,
    /// Status of the last alert that reached a terminal delivery state
    pub last_notified: Option<Status>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub alert_in_flight: bool,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            status: Status::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition: None,
            last_notified: None,
            last_checked: None,
            last_message: None,
            alert_in_flight: false,
        }
    }
}

/// Owns the [`TargetState`] of a single target
#[derive(Debug)]
pub struct StateTracker {
    target: String,
    address: String,
    failure_threshold: u32,
    error_policy: ErrorPolicy,
    state: TargetState,
    /// Alert emitted but not yet delivered or given up on
    in_flight: Option<AlertEvent>,
}

impl StateTracker {
    pub fn new(target: &Target, error_policy: ErrorPolicy) -> Self {
        Self {
            target: target.name.clone(),
            address: target.address.clone(),
            failure_threshold: target.failure_threshold.max(1),
            error_policy,
            state: TargetState::default(),
            in_flight: None,
        }
    }

    /// Seed from a persisted state. Counters start from zero.
    ///
    /// The status resumes from the last notified one, so a transition whose
    /// alert never reached a terminal delivery state fires again.
    pub fn restore(target: &Target, error_policy: ErrorPolicy, saved: &TargetState) -> Self {
        let mut tracker = Self::new(target, error_policy);
        tracker.state.status = saved.last_notified.unwrap_or(Status::Unknown);
        tracker.state.last_transition = saved.last_transition;
        tracker.state.last_notified = saved.last_notified;
        tracker
    }

    pub fn state(&self) -> &TargetState {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.state.status
    }

    pub fn in_flight(&self) -> Option<&AlertEvent> {
        self.in_flight.as_ref()
    }

    /// Feed one check result. Returns an alert on a qualifying transition.
    ///
    /// While an earlier alert is still in flight the counters keep moving
    /// but no transition is evaluated.
    pub fn observe(&mut self, result: &CheckResult) -> Option<AlertEvent> {
        self.state.last_checked = Some(result.timestamp);
        self.state.last_message = result.message.clone();

        let failed = match result.outcome {
            Outcome::Up => false,
            Outcome::Down => true,
            Outcome::Error => {
                warn!(
                    target_name = %self.target,
                    error = %result.reason(),
                    "check could not be performed"
                );
                match self.error_policy {
                    ErrorPolicy::CountAsFailure => true,
                    ErrorPolicy::Ignore => return None,
                }
            }
        };

        if failed {
            self.state.consecutive_successes = 0;
            self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        } else {
            self.state.consecutive_failures = 0;
            self.state.consecutive_successes = self.state.consecutive_successes.saturating_add(1);
        }

        if self.in_flight.is_some() {
            debug!(target_name = %self.target, "alert in flight, transition deferred");
            return None;
        }

        self.evaluate(failed, result)
    }

    fn evaluate(&mut self, failed: bool, result: &CheckResult) -> Option<AlertEvent> {
        let status = self.state.status;

        if failed {
            if status != Status::Down && self.state.consecutive_failures >= self.failure_threshold {
                let reason = match result.reason() {
                    "" => "check failed".to_string(),
                    r => r.to_string(),
                };
                self.state.consecutive_failures = 0;
                return Some(self.transition(Status::Down, reason, result.timestamp));
            }
            return None;
        }

        match status {
            Status::Down => {
                self.state.consecutive_successes = 0;
                Some(self.transition(Status::Up, "recovered".to_string(), result.timestamp))
            }
            Status::Unknown => {
                // First sighting of a healthy target is not worth an alert
                info!(target_name = %self.target, "target is UP");
                self.state.status = Status::Up;
                self.state.last_transition = Some(result.timestamp);
                None
            }
            Status::Up => None,
        }
    }

    fn transition(&mut self, to: Status, reason: String, at: DateTime<Utc>) -> AlertEvent {
        let from = self.state.status;
        match to {
            Status::Down => warn!(
                target_name = %self.target,
                from = %from,
                reason = %reason,
                "target is DOWN"
            ),
            _ => info!(target_name = %self.target, from = %from, "target is UP"),
        }

        self.state.status = to;
        self.state.last_transition = Some(at);
        self.state.alert_in_flight = true;

        let event = AlertEvent {
            target: self.target.clone(),
            address: self.address.clone(),
            previous: from,
            status: to,
            timestamp: at,
            reason,
        };
        self.in_flight = Some(event.clone());
        event
    }

    /// Mark the in-flight alert as finished.
    ///
    /// `notified` is true when delivery succeeded or was given up on after
    /// failing; only then does `last_notified` move.
    pub fn complete(&mut self, notified: bool) {
        if let Some(event) = self.in_flight.take() {
            if notified {
                self.state.last_notified = Some(event.status);
            }
            self.state.alert_in_flight = false;
        }
    }
}

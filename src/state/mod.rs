//! Target state tracking
//!
//! Turns a stream of check results into status transitions and alert
//! events, and exposes the latest state of every target.

pub mod board;
pub mod event;
pub mod tracker;

pub use board::{SnapshotError, StatusBoard};
pub use event::{AlertEvent, Status};
pub use tracker::{StateTracker, TargetState};

//! Per-target polling
//!
//! Every target gets its own worker task and timer. Workers share nothing
//! mutable except their own entry on the [`StatusBoard`](crate::state::StatusBoard).

#[allow(clippy::module_inception)]
pub mod scheduler;
mod worker;

pub use scheduler::Scheduler;

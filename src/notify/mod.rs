//! Alert notification
//!
//! Alert events are deduplicated, pushed through a [`PushSink`] and retried
//! with exponential backoff on transient failures.

pub mod dedup;
pub mod notifier;
pub mod retry;
pub mod sink;

pub use dedup::{DedupDecision, DedupWindow};
pub use notifier::{DeliveryOutcome, Notifier};
pub use retry::{DeliveryAttempt, DeliverySequence, RetryPolicy, SequenceState};
pub use sink::{build_sink, DeliveryError, Notification, PushSink, ServerChanSink, WebhookSink};

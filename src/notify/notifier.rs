//! Alert delivery: dedup, push, retry

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::dedup::{DedupDecision, DedupWindow};
use super::retry::{DeliverySequence, RetryPolicy, SequenceState};
use super::sink::{build_sink, DeliveryError, Notification, PushSink};
use crate::registry::NotificationConfig;
use crate::state::AlertEvent;

/// Terminal result of one `notify` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Identical alert already sent inside the dedup window
    Suppressed { duplicates: u32 },
    /// No credential configured
    Disabled,
    /// Endpoint refused the alert; no further attempts
    Rejected { attempts: u32, error: String },
    /// Every attempt failed transiently
    Exhausted { attempts: u32, error: String },
    /// Shutdown interrupted delivery
    Cancelled { attempts: u32 },
}

impl DeliveryOutcome {
    /// Whether the alert reached a terminal delivery state
    pub fn notified(&self) -> bool {
        matches!(
            self,
            DeliveryOutcome::Delivered { .. }
                | DeliveryOutcome::Rejected { .. }
                | DeliveryOutcome::Exhausted { .. }
        )
    }
}

/// Delivers alert events through a [`PushSink`]
pub struct Notifier {
    sink: Option<Arc<dyn PushSink>>,
    dedup: DedupWindow,
    policy: RetryPolicy,
    cancel: watch::Sender<bool>,
}

impl Notifier {
    /// Build from resolved settings. No credential means no sink.
    pub fn new(config: &NotificationConfig) -> Result<Self, DeliveryError> {
        let sink = build_sink(config)?;
        let policy = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
            ..RetryPolicy::default()
        };
        Ok(Self::with_sink(sink, config.dedup_window, policy))
    }

    pub fn with_sink(
        sink: Option<Arc<dyn PushSink>>,
        dedup_window: Duration,
        policy: RetryPolicy,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            sink,
            dedup: DedupWindow::new(dedup_window),
            policy,
            cancel,
        }
    }

    /// Notifier that only logs
    pub fn disabled() -> Self {
        Self::with_sink(None, Duration::ZERO, RetryPolicy::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Abort backoff waits of all pending and future deliveries
    pub fn cancel_pending(&self) {
        self.cancel.send_replace(true);
    }

    /// Drop dedup state for a target that left the registry
    pub fn forget_target(&self, target: &str) {
        self.dedup.forget(target);
    }

    /// Deliver `event`, retrying transient failures with backoff
    pub async fn notify(&self, event: &AlertEvent) -> DeliveryOutcome {
        let Some(sink) = &self.sink else {
            tracing::info!(
                target_name = %event.target,
                status = %event.status,
                reason = %event.reason,
                "Notifications disabled, alert logged only: {}",
                event.title()
            );
            return DeliveryOutcome::Disabled;
        };

        let now = Instant::now();
        self.dedup.prune(now);
        let suppressed = match self.dedup.check(event, now) {
            DedupDecision::Send { suppressed } => suppressed,
            DedupDecision::Suppress { count } => {
                tracing::info!(
                    target_name = %event.target,
                    status = %event.status,
                    duplicates = count,
                    "Duplicate alert suppressed"
                );
                return DeliveryOutcome::Suppressed { duplicates: count };
            }
        };

        let notification = Notification::from_event(event, suppressed);
        let mut cancel = self.cancel.subscribe();
        let mut sequence = DeliverySequence::new(self.policy.clone(), now);

        while let Some(due) = sequence.next_due() {
            if *cancel.borrow() {
                return self.cancelled(event, &sequence);
            }
            if due > Instant::now() {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = cancel.wait_for(|c| *c) => {
                        return self.cancelled(event, &sequence);
                    }
                }
            }

            let result = sink.push(&notification).await;
            let attempt = sequence.attempt_count() + 1;
            match sequence.record(result, Instant::now()) {
                SequenceState::Retry { at } => {
                    tracing::warn!(
                        target_name = %event.target,
                        sink = sink.name(),
                        attempt,
                        error = sequence.last_error().unwrap_or_default(),
                        retry_in_ms = (at.saturating_duration_since(Instant::now()).as_millis() as u64),
                        "Alert delivery failed, retrying"
                    );
                }
                SequenceState::Delivered => {
                    tracing::info!(
                        target_name = %event.target,
                        status = %event.status,
                        sink = sink.name(),
                        attempts = attempt,
                        suppressed,
                        "Alert delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                SequenceState::Rejected => {
                    let error = sequence.last_error().unwrap_or_default().to_string();
                    tracing::error!(
                        target_name = %event.target,
                        status = %event.status,
                        sink = sink.name(),
                        attempts = attempt,
                        error = %error,
                        "Alert delivery rejected"
                    );
                    return DeliveryOutcome::Rejected {
                        attempts: attempt,
                        error,
                    };
                }
                SequenceState::Exhausted => {
                    let error = sequence.last_error().unwrap_or_default().to_string();
                    tracing::error!(
                        target_name = %event.target,
                        status = %event.status,
                        sink = sink.name(),
                        attempts = attempt,
                        error = %error,
                        "Alert delivery exhausted retries"
                    );
                    return DeliveryOutcome::Exhausted {
                        attempts: attempt,
                        error,
                    };
                }
            }
        }

        // Sequences always end in a terminal state above
        DeliveryOutcome::Cancelled {
            attempts: sequence.attempt_count(),
        }
    }

    fn cancelled(&self, event: &AlertEvent, sequence: &DeliverySequence) -> DeliveryOutcome {
        tracing::warn!(
            target_name = %event.target,
            status = %event.status,
            attempts = sequence.attempt_count(),
            "Alert delivery cancelled by shutdown"
        );
        DeliveryOutcome::Cancelled {
            attempts: sequence.attempt_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Status;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Sink that replays scripted results, then succeeds
    #[derive(Default)]
    struct ScriptedSink {
        script: Mutex<Vec<Result<(), DeliveryError>>>,
        pushed: Mutex<Vec<(Instant, Notification)>>,
    }

    impl ScriptedSink {
        fn failing(n: usize, error: DeliveryError) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(vec![Err(error); n]),
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.pushed.lock().len()
        }
    }

    #[async_trait]
    impl PushSink for ScriptedSink {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn push(&self, notification: &Notification) -> Result<(), DeliveryError> {
            self.pushed.lock().push((Instant::now(), notification.clone()));
            let mut script = self.script.lock();
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }

    fn network() -> DeliveryError {
        DeliveryError::Network("connection refused".to_string())
    }

    fn down_event(target: &str) -> AlertEvent {
        AlertEvent::new(target, "http://x/", Status::Up, Status::Down, "timeout")
    }

    fn notifier(sink: Arc<ScriptedSink>, window: Duration, max_attempts: u32) -> Notifier {
        Notifier::with_sink(Some(sink), window, policy(max_attempts))
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        let outcome = notifier.notify(&down_event("a")).await;
        assert_eq!(outcome, DeliveryOutcome::Disabled);
        assert!(!outcome.notified());
    }

    #[tokio::test]
    async fn test_no_credential_is_disabled() {
        let notifier = Notifier::new(&NotificationConfig::disabled()).unwrap();
        assert!(!notifier.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_first_try() {
        let sink = Arc::new(ScriptedSink::default());
        let notifier = notifier(sink.clone(), Duration::from_secs(300), 3);

        let outcome = notifier.notify(&down_event("a")).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert!(outcome.notified());
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_then_succeeds() {
        let sink = ScriptedSink::failing(2, network());
        let notifier = notifier(sink.clone(), Duration::from_secs(300), 5);
        let start = Instant::now();

        let outcome = notifier.notify(&down_event("a")).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });

        let times: Vec<_> = sink.pushed.lock().iter().map(|(t, _)| *t - start).collect();
        let expected = [Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)];
        assert_eq!(times.len(), expected.len());
        for (got, want) in times.iter().zip(expected) {
            // Timer resolution is one millisecond
            assert!(*got >= want && *got < want + Duration::from_millis(5), "{got:?} vs {want:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let sink = ScriptedSink::failing(10, network());
        let notifier = notifier(sink.clone(), Duration::from_secs(300), 3);

        let outcome = notifier.notify(&down_event("a")).await;
        match &outcome {
            DeliveryOutcome::Exhausted { attempts, error } => {
                assert_eq!(*attempts, 3);
                assert!(error.contains("connection refused"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(outcome.notified());
        assert_eq!(sink.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_is_not_retried() {
        let sink = ScriptedSink::failing(
            10,
            DeliveryError::Status {
                code: 403,
                body: "forbidden".into(),
            },
        );
        let notifier = notifier(sink.clone(), Duration::from_secs(300), 3);

        let outcome = notifier.notify(&down_event("a")).await;
        assert!(matches!(outcome, DeliveryOutcome::Rejected { attempts: 1, .. }));
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_suppressed_then_rearmed() {
        let sink = Arc::new(ScriptedSink::default());
        let notifier = notifier(sink.clone(), Duration::from_secs(60), 3);
        let event = down_event("a");

        assert!(notifier.notify(&event).await.notified());
        assert_eq!(
            notifier.notify(&event).await,
            DeliveryOutcome::Suppressed { duplicates: 1 }
        );
        assert_eq!(sink.calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(notifier.notify(&event).await.notified());
        assert_eq!(sink.calls(), 2);

        let pushed = sink.pushed.lock();
        assert_eq!(pushed[1].1.suppressed, 1);
        assert!(pushed[1].1.message.contains("(1 duplicate alerts suppressed)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_not_suppressed() {
        let sink = Arc::new(ScriptedSink::default());
        let notifier = notifier(sink.clone(), Duration::from_secs(300), 3);

        notifier.notify(&down_event("a")).await;
        let up = AlertEvent::new("a", "http://x/", Status::Down, Status::Up, "recovered");
        assert!(notifier.notify(&up).await.notified());
        assert_eq!(sink.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let sink = ScriptedSink::failing(10, network());
        let notifier = Arc::new(notifier(sink.clone(), Duration::from_secs(300), 10));

        let task = {
            let notifier = notifier.clone();
            tokio::spawn(async move { notifier.notify(&down_event("a")).await })
        };

        // Let the first attempt fail and the backoff begin
        tokio::time::sleep(Duration::from_millis(500)).await;
        notifier.cancel_pending();

        let outcome = task.await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Cancelled { attempts: 1 });
        assert!(!outcome.notified());
        assert_eq!(sink.calls(), 1);
    }
}

//! The check loop for a single target

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::notify::{DeliveryOutcome, Notifier};
use crate::probe::{deadline_after, HealthCheck};
use crate::registry::Target;
use crate::state::{StateTracker, StatusBoard};

/// Shared collaborators handed to every worker
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub checker: Arc<dyn HealthCheck>,
    pub notifier: Arc<Notifier>,
    pub board: Arc<StatusBoard>,
}

/// Delivery started by a worker. Dropping it aborts the push, so a worker
/// that is aborted never leaves an alert running behind its replacement.
struct DeliveryTask(JoinHandle<DeliveryOutcome>);

impl Drop for DeliveryTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Poll `target` until `shutdown` fires.
///
/// Checks run inline, so one target never has two checks outstanding. Ticks
/// missed while a check overruns its interval are skipped, not queued. A
/// check already running when `shutdown` fires is allowed to finish; the
/// caller bounds how long that may take.
pub(crate) async fn run_target_loop(
    target: Arc<Target>,
    mut tracker: StateTracker,
    ctx: WorkerContext,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(target.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut delivery: Option<DeliveryTask> = None;

    ctx.board.publish(&target.name, tracker.state().clone());
    info!(
        target_name = %target.name,
        address = %target.address,
        interval_ms = target.interval.as_millis() as u64,
        "target worker started"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            joined = wait_delivery(&mut delivery), if delivery.is_some() => {
                delivery = None;
                finish_delivery(&target, &mut tracker, joined);
                ctx.board.publish(&target.name, tracker.state().clone());
            }

            _ = ticker.tick() => {
                if !target.is_active_at(Utc::now()) {
                    debug!(target_name = %target.name, "outside active hours, tick skipped");
                    continue;
                }

                let deadline = deadline_after(Instant::now(), target.timeout);
                let result = ctx.checker.probe(&target, deadline).await;
                debug!(
                    target_name = %target.name,
                    outcome = %result.outcome,
                    latency_ms = result.latency.as_millis() as u64,
                    message = result.message.as_deref().unwrap_or(""),
                    "check completed"
                );

                if let Some(event) = tracker.observe(&result) {
                    let notifier = Arc::clone(&ctx.notifier);
                    delivery = Some(DeliveryTask(tokio::spawn(async move {
                        notifier.notify(&event).await
                    })));
                }
                ctx.board.publish(&target.name, tracker.state().clone());
            }
        }
    }

    // Let a delivery already under way settle so the final state is accurate
    if let Some(mut task) = delivery.take() {
        let joined = (&mut task.0).await;
        finish_delivery(&target, &mut tracker, joined);
    }
    ctx.board.publish(&target.name, tracker.state().clone());
    debug!(target_name = %target.name, "target worker stopped");
}

async fn wait_delivery(
    delivery: &mut Option<DeliveryTask>,
) -> Result<DeliveryOutcome, JoinError> {
    match delivery {
        Some(task) => (&mut task.0).await,
        None => std::future::pending().await,
    }
}

fn finish_delivery(
    target: &Target,
    tracker: &mut StateTracker,
    joined: Result<DeliveryOutcome, JoinError>,
) {
    match joined {
        Ok(outcome) => tracker.complete(outcome.notified()),
        Err(e) => {
            warn!(target_name = %target.name, error = %e, "alert delivery task failed");
            tracker.complete(false);
        }
    }
}

//! Runs one independent worker per target

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::worker::{run_target_loop, WorkerContext};
use crate::notify::Notifier;
use crate::probe::HealthCheck;
use crate::registry::{ErrorPolicy, RegistryDiff, Target};
use crate::state::{StateTracker, Status, StatusBoard};

/// A running worker
struct WorkerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerSlot {
    /// Signal and abort immediately
    fn cancel(self) {
        self.shutdown_tx.send_replace(true);
        self.handle.abort();
    }

    /// Signal, then give the worker `grace` to finish its check and settle
    /// any alert it has in flight before aborting it
    async fn retire(self, grace: Duration) {
        self.shutdown_tx.send_replace(true);
        let abort = self.handle.abort_handle();
        if tokio::time::timeout(grace, self.handle).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "worker did not stop within grace period, aborting"
            );
            abort.abort();
        }
    }
}

/// Drives polling for every target
pub struct Scheduler {
    ctx: WorkerContext,
    error_policy: ErrorPolicy,
    workers: Mutex<HashMap<String, WorkerSlot>>,
}

impl Scheduler {
    pub fn new(
        checker: Arc<dyn HealthCheck>,
        notifier: Arc<Notifier>,
        board: Arc<StatusBoard>,
        error_policy: ErrorPolicy,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                checker,
                notifier,
                board,
            },
            error_policy,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.ctx.board
    }

    /// Start a worker for every target. The first check runs immediately.
    pub fn start(&self, targets: &[Arc<Target>]) {
        for target in targets {
            self.spawn(Arc::clone(target));
        }
        info!(targets = targets.len(), "scheduler started");
    }

    /// Apply a registry change. Unchanged targets are left alone.
    ///
    /// A changed target's old worker is retired before the new one starts,
    /// waiting at most `grace`, so the target never has two alerts in flight.
    pub async fn apply(&self, diff: &RegistryDiff, grace: Duration) {
        for name in &diff.removed {
            self.stop(name);
            self.ctx.board.remove(name);
            self.ctx.notifier.forget_target(name);
            info!(target_name = %name, "target removed");
        }
        for target in &diff.changed {
            let slot = self.workers.lock().remove(&target.name);
            if let Some(slot) = slot {
                slot.retire(grace).await;
            }
            self.spawn(Arc::clone(target));
            info!(target_name = %target.name, "target changed, worker restarted");
        }
        for target in &diff.added {
            self.spawn(Arc::clone(target));
            info!(target_name = %target.name, "target added");
        }
    }

    /// Names of targets with a live worker, sorted
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.workers.lock().contains_key(name)
    }

    /// Stop every worker, giving in-flight work `grace` to finish
    pub async fn shutdown(&self, grace: Duration) {
        let slots: Vec<WorkerSlot> = self.workers.lock().drain().map(|(_, slot)| slot).collect();
        if slots.is_empty() {
            return;
        }

        for slot in &slots {
            slot.shutdown_tx.send_replace(true);
        }
        self.ctx.notifier.cancel_pending();

        let aborts: Vec<_> = slots.iter().map(|s| s.handle.abort_handle()).collect();
        let handles = slots.into_iter().map(|s| s.handle);

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => info!("all target workers stopped"),
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "shutdown grace period elapsed, abandoning in-flight work"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }

    fn spawn(&self, target: Arc<Target>) {
        let tracker = match self.ctx.board.get(&target.name) {
            Some(saved) if saved.status != Status::Unknown => {
                debug!(target_name = %target.name, status = %saved.status, "restoring saved state");
                StateTracker::restore(&target, self.error_policy, &saved)
            }
            _ => StateTracker::new(&target, self.error_policy),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = target.name.clone();
        let handle = tokio::spawn(run_target_loop(
            target,
            tracker,
            self.ctx.clone(),
            shutdown_rx,
        ));

        let previous = self.workers.lock().insert(
            name,
            WorkerSlot {
                handle,
                shutdown_tx,
            },
        );
        if let Some(old) = previous {
            old.cancel();
        }
    }

    fn stop(&self, name: &str) {
        let slot = self.workers.lock().remove(name);
        if let Some(slot) = slot {
            slot.cancel();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, slot) in self.workers.get_mut().drain() {
            slot.cancel();
        }
    }
}

//! Wires registry, prober, trackers, scheduler and notifier together

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::AppState;
use crate::notify::{DeliveryError, Notifier};
use crate::probe::{HealthCheck, ProbeError, Prober};
use crate::registry::{RegistryDiff, Settings, Target, TargetRegistry};
use crate::scheduler::Scheduler;
use crate::state::StatusBoard;

/// A running monitor
pub struct Monitor {
    registry: Arc<TargetRegistry>,
    board: Arc<StatusBoard>,
    notifier: Arc<Notifier>,
    scheduler: Scheduler,
    shutdown_grace: Duration,
    state_file: Option<PathBuf>,
}

impl Monitor {
    /// Build a monitor probing with the default [`Prober`]
    pub fn new(settings: Settings) -> Result<Self, MonitorError> {
        let prober = Prober::new()?;
        Self::with_checker(settings, Arc::new(prober))
    }

    /// Build a monitor around any [`HealthCheck`]
    pub fn with_checker(
        settings: Settings,
        checker: Arc<dyn HealthCheck>,
    ) -> Result<Self, MonitorError> {
        let notifier = Arc::new(Notifier::new(&settings.notification)?);
        if notifier.is_enabled() {
            tracing::info!(
                provider = ?settings.notification.provider,
                "Push notifications enabled"
            );
        } else {
            tracing::warn!("No push credential configured, alerts will only be logged");
        }

        let registry = Arc::new(TargetRegistry::new(settings.targets));
        let board = Arc::new(load_board(settings.state_file.as_deref(), &registry));
        let scheduler = Scheduler::new(
            checker,
            Arc::clone(&notifier),
            Arc::clone(&board),
            settings.error_policy,
        );

        Ok(Self {
            registry,
            board,
            notifier,
            scheduler,
            shutdown_grace: settings.shutdown_grace,
            state_file: settings.state_file,
        })
    }

    /// Start polling every registered target
    pub fn start(&self) {
        self.scheduler.start(&self.registry.targets());
    }

    /// Replace the target list and reschedule what changed
    pub async fn reload(&self, targets: Vec<Target>) -> RegistryDiff {
        let diff = self.registry.replace(targets);
        if diff.is_empty() {
            tracing::info!("Config reloaded, targets unchanged");
        } else {
            tracing::info!(
                added = diff.added.len(),
                removed = diff.removed.len(),
                changed = diff.changed.len(),
                "Config reloaded"
            );
            self.scheduler.apply(&diff, self.shutdown_grace).await;
        }
        diff
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// State for the status API
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            registry: Arc::clone(&self.registry),
            board: Arc::clone(&self.board),
            notifications_enabled: self.notifier.is_enabled(),
        })
    }

    /// Stop all workers within the grace period, then persist state
    pub async fn shutdown(&self) {
        tracing::info!(
            grace_ms = self.shutdown_grace.as_millis() as u64,
            "Shutting down"
        );
        self.scheduler.shutdown(self.shutdown_grace).await;

        if let Some(path) = &self.state_file {
            match self.board.save(path) {
                Ok(()) => tracing::info!(path = %path.display(), "State saved"),
                Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to save state"),
            }
        }
    }
}

/// Seed the board from the state file. Problems are logged, never fatal.
fn load_board(path: Option<&std::path::Path>, registry: &TargetRegistry) -> StatusBoard {
    let Some(path) = path else {
        return StatusBoard::new();
    };

    let states = match StatusBoard::load(path) {
        Ok(states) => states,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable state file");
            return StatusBoard::new();
        }
    };

    let board = StatusBoard::with_states(states);
    let targets = registry.targets();
    board.retain_targets(targets.iter().map(|t| t.name.as_str()));
    tracing::info!(path = %path.display(), restored = board.len(), "State file loaded");
    board
}

/// Startup failures after the config was accepted
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Prober setup failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Notifier setup failed: {0}")]
    Notifier(#[from] DeliveryError),
}

//! Suppression of repeated identical alerts
//!
//! Alerts are identical when they share target and new status. Within the
//! window only the first is sent; later ones are counted and the count is
//! handed to the next alert that does go out for the same key.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::state::{AlertEvent, Status};

/// What to do with an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// Deliver it; `suppressed` duplicates were dropped since the last send
    Send { suppressed: u32 },
    /// Drop it; `count` duplicates dropped so far in this window
    Suppress { count: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    sent_at: Instant,
    suppressed: u32,
}

/// Per-key suppression window
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    slots: DashMap<(String, Status), Slot>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide for `event` at `now`, recording the decision
    pub fn check(&self, event: &AlertEvent, now: Instant) -> DedupDecision {
        match self.slots.entry(event.key()) {
            Entry::Occupied(mut slot) => {
                let slot = slot.get_mut();
                if now.saturating_duration_since(slot.sent_at) < self.window {
                    slot.suppressed += 1;
                    DedupDecision::Suppress {
                        count: slot.suppressed,
                    }
                } else {
                    let suppressed = slot.suppressed;
                    *slot = Slot {
                        sent_at: now,
                        suppressed: 0,
                    };
                    DedupDecision::Send { suppressed }
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    sent_at: now,
                    suppressed: 0,
                });
                DedupDecision::Send { suppressed: 0 }
            }
        }
    }

    /// Drop expired keys that carry no suppressed count
    pub fn prune(&self, now: Instant) {
        self.slots.retain(|_, slot| {
            slot.suppressed > 0 || now.saturating_duration_since(slot.sent_at) < self.window
        });
    }

    /// Forget everything about a target
    pub fn forget(&self, target: &str) {
        self.slots.retain(|(name, _), _| name != target);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

//! Mode controller - the Online/Island state machine
//!
//! ```text
//!             unreachable / ForceDisconnect
//!   ┌────────┐ ─────────────────────────────▶ ┌────────┐
//!   │ Online │                                │ Island │
//!   └────────┘ ◀───────────────────────────── └────────┘
//!             reachable / ForceReconnect
//!             (drained cache handed to sync)
//! ```
//!
//! Every change passes through `Transitioning` so a second report cannot race
//! the first. Same-mode reports are no-ops. A manual override that lands while
//! a transition is in flight is applied once that transition commits.
//!
//! Locking: controller state, the update cache and the listener list each
//! have their own `RwLock`, and no code path holds two of them at once.
//! Sync runs are serialized by `sync_gate`; at most one more run waits behind
//! the active one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::cache::{OverflowPolicy, UpdateCache};
use super::{Mode, Update};
use crate::error::{IslandError, Result};
use crate::sync::{partition, SyncCollaborator};

/// Callback invoked with (old, new) after every committed transition
pub type ModeListener = Arc<dyn Fn(Mode, Mode) + Send + Sync>;

struct ControllerState {
    mode: Mode,
    /// Mode being left while `mode == Transitioning`
    leaving: Mode,
    /// Set by `force_disconnect`, cleared by `force_reconnect`
    pinned_offline: bool,
    /// Manual override that arrived while a transition was in flight
    pending_override: Option<bool>,
    last_sync_at: DateTime<Utc>,
    syncs_completed: u64,
    syncs_failed: u64,
    last_sync_error: Option<String>,
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: Mode,
    pub cached_updates: usize,
    /// Handed to the sync collaborator and not yet acknowledged
    pub in_flight_updates: usize,
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub pinned_offline: bool,
    pub last_sync_at: DateTime<Utc>,
    pub time_since_last_sync_ms: u64,
    pub syncs_completed: u64,
    pub syncs_failed: u64,
    pub last_sync_error: Option<String>,
}

/// Outcome of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub batch_id: Uuid,
    pub attempted: usize,
    pub acknowledged: usize,
    pub readmitted: usize,
    /// Unacknowledged updates that no longer fit in the cache
    pub dropped: usize,
}

pub struct ModeController {
    state: RwLock<ControllerState>,
    cache: RwLock<UpdateCache>,
    listeners: RwLock<Vec<ModeListener>>,
    sync: Arc<dyn SyncCollaborator>,
    sync_gate: Mutex<()>,
    sync_queued: AtomicBool,
}

impl ModeController {
    /// Create a controller in `Online` mode
    pub fn new(cache: UpdateCache, sync: Arc<dyn SyncCollaborator>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(ControllerState {
                mode: Mode::Online,
                leaving: Mode::Online,
                pinned_offline: false,
                pending_override: None,
                last_sync_at: Utc::now(),
                syncs_completed: 0,
                syncs_failed: 0,
                last_sync_error: None,
            }),
            cache: RwLock::new(cache),
            listeners: RwLock::new(Vec::new()),
            sync,
            sync_gate: Mutex::new(()),
            sync_queued: AtomicBool::new(false),
        })
    }

    pub async fn mode(&self) -> Mode {
        self.state.read().await.mode
    }

    pub async fn is_online(&self) -> bool {
        self.mode().await == Mode::Online
    }

    /// The mode a persisted record should carry: the mode being left while a
    /// transition is still in flight, otherwise the current one.
    pub async fn committed_mode(&self) -> Mode {
        let state = self.state.read().await;
        match state.mode {
            Mode::Transitioning => state.leaving,
            mode => mode,
        }
    }

    /// Feed an observed reachability from the monitor.
    ///
    /// Ignored while pinned offline. Returns true if a transition committed.
    pub async fn report_reachability(self: &Arc<Self>, reachable: bool) -> bool {
        self.transition(reachable, false).await
    }

    /// Operator override: go Island and stay there until `force_reconnect`
    pub async fn force_disconnect(self: &Arc<Self>) -> bool {
        self.transition(false, true).await
    }

    /// Operator override: clear the pin and go Online
    pub async fn force_reconnect(self: &Arc<Self>) -> bool {
        self.transition(true, true).await
    }

    async fn transition(self: &Arc<Self>, reachable: bool, manual: bool) -> bool {
        match self.begin_transition(reachable, manual).await {
            Some((from, to)) => {
                self.complete_transition(from, to).await;
                true
            }
            None => false,
        }
    }

    /// Enter `Transitioning` if the report calls for a change.
    ///
    /// A manual override that lands mid-transition updates the pin and is
    /// queued for the transition in flight to apply once it commits.
    async fn begin_transition(&self, reachable: bool, manual: bool) -> Option<(Mode, Mode)> {
        let mut state = self.state.write().await;

        if manual {
            state.pinned_offline = !reachable;
            if state.mode == Mode::Transitioning {
                debug!(reachable, "Override during transition, deferring");
                state.pending_override = Some(reachable);
                return None;
            }
        } else if state.pinned_offline && reachable {
            trace!("Pinned offline, ignoring reachable report");
            return None;
        }

        let to = match (state.mode, reachable) {
            (Mode::Online, false) => Mode::Island,
            (Mode::Island, true) => Mode::Online,
            // Same mode, or another transition is in flight
            _ => return None,
        };

        let from = state.mode;
        state.leaving = from;
        state.mode = Mode::Transitioning;
        Some((from, to))
    }

    async fn complete_transition(self: &Arc<Self>, mut from: Mode, mut to: Mode) {
        loop {
            if to == Mode::Online {
                self.dispatch_sync();
            }

            let deferred = {
                let mut state = self.state.write().await;
                state.mode = to;
                state
                    .pending_override
                    .take()
                    .filter(|&reachable| reachable != (to == Mode::Online))
            };

            info!(from = %from, to = %to, "Mode changed");
            self.notify(from, to).await;

            let Some(reachable) = deferred else { return };
            match self.begin_transition(reachable, false).await {
                Some((next_from, next_to)) => {
                    from = next_from;
                    to = next_to;
                }
                None => return,
            }
        }
    }

    /// Buffer an update for delivery.
    ///
    /// In Island (or mid-transition) the update waits in the cache. In Online
    /// it also goes through the cache, and a sync is dispatched right away, so
    /// delivery is at-least-once in both modes.
    pub async fn cache_update(self: &Arc<Self>, update: Update) -> Result<()> {
        let mode = self.mode().await;

        self.cache.write().await.add(update)?;

        if mode == Mode::Online {
            self.dispatch_sync();
        }
        Ok(())
    }

    /// Copy of the buffered updates, oldest first
    pub async fn cached_updates(&self) -> Vec<Update> {
        self.cache.read().await.snapshot()
    }

    /// Buffered updates plus any awaiting acknowledgment, oldest first
    pub async fn pending_updates(&self) -> Vec<Update> {
        self.cache.read().await.pending()
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.count()
    }

    pub async fn add_listener<F>(&self, listener: F)
    where
        F: Fn(Mode, Mode) + Send + Sync + 'static,
    {
        self.listeners.write().await.push(Arc::new(listener));
    }

    pub async fn status(&self) -> ControllerStatus {
        let (cached_updates, in_flight_updates, capacity, overflow_policy) = {
            let cache = self.cache.read().await;
            (cache.count(), cache.in_flight(), cache.capacity(), cache.policy())
        };

        let state = self.state.read().await;
        let since = Utc::now().signed_duration_since(state.last_sync_at);

        ControllerStatus {
            mode: state.mode,
            cached_updates,
            in_flight_updates,
            capacity,
            overflow_policy,
            pinned_offline: state.pinned_offline,
            last_sync_at: state.last_sync_at,
            time_since_last_sync_ms: since.num_milliseconds().max(0) as u64,
            syncs_completed: state.syncs_completed,
            syncs_failed: state.syncs_failed,
            last_sync_error: state.last_sync_error.clone(),
        }
    }

    /// Dispatch a background sync if Online. Returns false when offline.
    pub async fn force_sync(self: &Arc<Self>) -> bool {
        if !self.is_online().await {
            debug!("Offline, skipping forced sync");
            return false;
        }
        self.dispatch_sync();
        true
    }

    /// Run a sync inline and wait for its outcome.
    ///
    /// `Ok(None)` when there was nothing to send or the node is in Island.
    pub async fn sync_now(&self) -> Result<Option<SyncReport>> {
        self.run_sync().await
    }

    /// Re-admit updates read back from a recovery record
    pub async fn restore_updates(&self, updates: Vec<Update>) -> usize {
        if updates.is_empty() {
            return 0;
        }
        self.cache.write().await.restore(updates)
    }

    /// Apply a mode read back from a recovery record.
    ///
    /// Listeners see the change like any other transition. Restoring Online
    /// with a non-empty cache dispatches a sync.
    pub async fn restore_mode(self: &Arc<Self>, mode: Mode) {
        let target = match mode {
            Mode::Transitioning => {
                warn!("Recovered mode was mid-transition, resuming Online");
                Mode::Online
            }
            mode => mode,
        };

        let from = {
            let mut state = self.state.write().await;
            let from = state.mode;
            state.mode = target;
            state.leaving = target;
            from
        };

        if from != target {
            info!(from = %from, to = %target, "Mode restored from recovery record");
            self.notify(from, target).await;
        }

        if target == Mode::Online && self.cached_count().await > 0 {
            self.dispatch_sync();
        }
    }

    fn dispatch_sync(self: &Arc<Self>) {
        if self.sync_queued.swap(true, Ordering::AcqRel) {
            trace!("Sync already queued");
            return;
        }

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = controller.run_sync().await {
                warn!(error = %e, "Background sync failed, updates retained");
            }
        });
    }

    async fn run_sync(&self) -> Result<Option<SyncReport>> {
        let _gate = self.sync_gate.lock().await;
        self.sync_queued.store(false, Ordering::Release);

        if self.mode().await == Mode::Island {
            debug!("In island mode, leaving cache for next reconnect");
            return Ok(None);
        }

        let batch = self.cache.write().await.begin_delivery();
        if batch.is_empty() {
            return Ok(None);
        }

        let batch_id = Uuid::new_v4();
        let attempted = batch.len();
        info!(batch_id = %batch_id, updates = attempted, "Syncing cached updates");

        match self.sync.sync(&batch).await {
            Ok(ack) => {
                let (acknowledged, rejected) = partition(batch, &ack);
                let readmitted = rejected.len();
                let dropped = self.cache.write().await.settle(rejected);

                {
                    let mut state = self.state.write().await;
                    state.last_sync_at = Utc::now();
                    state.syncs_completed += 1;
                    state.last_sync_error = None;
                }

                if readmitted > 0 {
                    warn!(batch_id = %batch_id, readmitted, "Sync partially acknowledged, re-admitted rest");
                } else {
                    info!(batch_id = %batch_id, acknowledged, "Sync complete");
                }

                Ok(Some(SyncReport {
                    batch_id,
                    attempted,
                    acknowledged,
                    readmitted: readmitted - dropped,
                    dropped,
                }))
            }
            Err(e) => {
                let dropped = self.cache.write().await.settle(batch);
                {
                    let mut state = self.state.write().await;
                    state.syncs_failed += 1;
                    state.last_sync_error = Some(e.to_string());
                }
                warn!(batch_id = %batch_id, error = %e, dropped, "Sync failed, updates re-admitted");
                Err(IslandError::Sync(e))
            }
        }
    }

    async fn notify(&self, from: Mode, to: Mode) {
        let listeners: Vec<ModeListener> = self.listeners.read().await.clone();
        for listener in listeners {
            tokio::spawn(async move { listener(from, to) });
        }
    }
}

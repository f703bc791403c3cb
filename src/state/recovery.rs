//! Recovery coordinator - persists a consistent view of node state and
//! restores it after a restart
//!
//! The record carries the latest snapshot, the buffered updates and the mode
//! at persist time. Nothing from a record is trusted until its snapshot has
//! been reconciled with the live chain; a record that fails that check leaves
//! live state exactly as it was.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::chain::{SharedChain, Snapshot};
use super::write_atomic;
use crate::error::{IslandError, Result};
use crate::island::{Mode, ModeController, Update};

/// On-disk recovery record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub timestamp: DateTime<Utc>,
    pub snapshot: Option<Snapshot>,
    #[serde(default)]
    pub updates: Vec<Update>,
    pub mode: Mode,
}

/// What `recover` found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No record on disk, normal first start
    ColdStart,
    Restored {
        mode: Mode,
        updates: usize,
        /// Recovered updates that did not fit in the cache
        dropped: usize,
        snapshot_round: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStatus {
    pub available: bool,
    pub path: PathBuf,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

pub struct RecoveryCoordinator {
    chain: SharedChain,
    controller: Arc<ModeController>,
    path: PathBuf,
    /// Persists share one staging file, so they run one at a time
    write_lock: Mutex<()>,
}

impl RecoveryCoordinator {
    pub fn new(chain: SharedChain, controller: Arc<ModeController>, path: impl Into<PathBuf>) -> Self {
        Self {
            chain,
            controller,
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current state to the recovery path.
    ///
    /// Each component is read under its own lock in turn, never two at once.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let snapshot = self.chain.read().await.latest().cloned();
        let updates = self.controller.pending_updates().await;
        let mode = self.controller.committed_mode().await;

        let record = RecoveryRecord {
            timestamp: Utc::now(),
            snapshot,
            updates,
            mode,
        };
        let data = serde_json::to_vec_pretty(&record)?;

        write_atomic(&self.path, &data)
            .await
            .map_err(|e| IslandError::persistence(&self.path, e))?;

        info!(
            path = %self.path.display(),
            mode = %record.mode,
            updates = record.updates.len(),
            snapshot_round = ?record.snapshot.as_ref().map(|s| s.round),
            bytes = data.len(),
            "Recovery state persisted"
        );
        Ok(())
    }

    /// Restore state from the recovery path.
    ///
    /// A missing record is a cold start. On `Integrity` errors nothing has
    /// been applied and the caller should carry on with fresh state.
    pub async fn recover(&self) -> Result<RecoveryOutcome> {
        let Some(record) = load_record(&self.path).await? else {
            info!(path = %self.path.display(), "No recovery record, cold start");
            return Ok(RecoveryOutcome::ColdStart);
        };

        debug!(
            persisted_at = %record.timestamp,
            mode = %record.mode,
            updates = record.updates.len(),
            "Recovery record loaded"
        );

        let snapshot_round = record.snapshot.as_ref().map(|s| s.round);
        if let Some(snapshot) = record.snapshot {
            if let Err(e) = self.reconcile_snapshot(snapshot).await {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Recovered state failed integrity check, starting fresh"
                );
                return Err(e);
            }
        }

        let updates = record.updates.len();
        let dropped = self.controller.restore_updates(record.updates).await;
        self.controller.restore_mode(record.mode).await;

        info!(mode = %record.mode, updates, dropped, "State recovered");
        Ok(RecoveryOutcome::Restored {
            mode: record.mode,
            updates,
            dropped,
            snapshot_round,
        })
    }

    async fn reconcile_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut chain = self.chain.write().await;

        chain.verify().into_result()?;
        chain.accept_recovered(snapshot)?;
        chain.verify().into_result()
    }

    /// Remove the persisted record, if any
    pub async fn clear_recovery_data(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Recovery data cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IslandError::persistence(&self.path, e)),
        }
    }

    pub async fn status(&self) -> RecoveryStatus {
        recovery_status(&self.path).await
    }
}

/// Read and parse a recovery record; `None` when the file does not exist
pub async fn load_record(path: &Path) -> Result<Option<RecoveryRecord>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IslandError::persistence(path, e)),
    };

    Ok(Some(serde_json::from_slice(&data)?))
}

pub async fn recovery_status(path: &Path) -> RecoveryStatus {
    match tokio::fs::metadata(path).await {
        Ok(meta) => RecoveryStatus {
            available: true,
            path: path.to_path_buf(),
            size: Some(meta.len()),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        },
        Err(_) => RecoveryStatus {
            available: false,
            path: path.to_path_buf(),
            size: None,
            modified: None,
        },
    }
}

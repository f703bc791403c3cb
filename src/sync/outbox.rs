//! Outbox sync - spools delivered batches to disk for a separate shipper
//!
//! Directory structure:
//!   <outbox_dir>/
//!     ├── 6f1c...e2.json   # One file per acknowledged batch
//!     └── 9a04...7b.json
//!
//! Each file is written to a temporary name and renamed into place, so a
//! shipper never observes a partial batch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{SyncAck, SyncCollaborator, SyncError};
use crate::island::Update;
use crate::state::write_atomic;

/// A spooled batch as written to the outbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxBatch {
    pub batch_id: Uuid,
    pub node_id: String,
    pub written_at: DateTime<Utc>,
    pub updates: Vec<Update>,
}

pub struct OutboxSync {
    node_id: String,
    outbox_dir: PathBuf,
}

impl OutboxSync {
    pub fn new(node_id: impl Into<String>, outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            outbox_dir: outbox_dir.into(),
        }
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.outbox_dir
    }

    /// List spooled batch files, oldest first
    pub async fn pending_batches(&self) -> Result<Vec<PathBuf>, SyncError> {
        let mut entries = match tokio::fs::read_dir(&self.outbox_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::Io(e.to_string())),
        };

        let mut batches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(|e| SyncError::Io(e.to_string()))?;
            batches.push((path, modified));
        }

        batches.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(batches.into_iter().map(|(p, _)| p).collect())
    }
}

#[async_trait]
impl SyncCollaborator for OutboxSync {
    async fn sync(&self, updates: &[Update]) -> Result<SyncAck, SyncError> {
        if updates.is_empty() {
            return Ok(SyncAck::all());
        }

        let batch = OutboxBatch {
            batch_id: Uuid::new_v4(),
            node_id: self.node_id.clone(),
            written_at: Utc::now(),
            updates: updates.to_vec(),
        };
        let data = serde_json::to_vec(&batch).map_err(|e| SyncError::Io(e.to_string()))?;
        let path = self.outbox_dir.join(format!("{}.json", batch.batch_id));

        debug!(batch_id = %batch.batch_id, bytes = data.len(), "Spooling batch");
        write_atomic(&path, &data)
            .await
            .map_err(|e| SyncError::Io(e.to_string()))?;

        info!(
            batch_id = %batch.batch_id,
            updates = updates.len(),
            path = %path.display(),
            "Batch spooled to outbox"
        );
        Ok(SyncAck::all())
    }
}

//! Error types for island-node

use std::path::PathBuf;

use thiserror::Error;

use crate::sync::SyncError;

#[derive(Error, Debug)]
pub enum IslandError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Update cache full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("Persistence error at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Integrity check failed at snapshot {index:?}: {reason}")]
    Integrity { index: Option<usize>, reason: String },

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Digest computation failed: {0}")]
    Digest(String),
}

impl IslandError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn integrity(index: Option<usize>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            index,
            reason: reason.into(),
        }
    }

    /// True for tamper or chain-link failures, which callers treat as
    /// "start fresh" rather than "abort".
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

pub type Result<T> = std::result::Result<T, IslandError>;

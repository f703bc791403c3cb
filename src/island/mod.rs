//! Island mode - autonomous operation while the coordinating tier is unreachable
//!
//! Handles:
//! - Online/Island mode state machine (`controller`)
//! - Bounded buffering of updates produced while offline (`cache`)
//! - Periodic reachability polling (`monitor`, `probe`)

pub mod cache;
pub mod controller;
pub mod monitor;
pub mod probe;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Re-exports
pub use cache::{OverflowPolicy, UpdateCache};
pub use controller::{ControllerStatus, ModeController, ModeListener, SyncReport};
pub use monitor::{ConnectivityMonitor, MonitorHandle};
pub use probe::{HttpProbe, ReachabilityProbe, StaticProbe, TcpProbe};

/// String-keyed metadata attached to updates and snapshots.
///
/// A `BTreeMap` keeps key order stable, which the snapshot digest relies on.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Operational mode of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Coordinating tier reachable, updates flow live
    #[default]
    Online,
    /// Coordinating tier unreachable, updates buffered locally
    Island,
    /// A mode change is in progress
    Transitioning,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Online => write!(f, "online"),
            Mode::Island => write!(f, "island"),
            Mode::Transitioning => write!(f, "transitioning"),
        }
    }
}

/// A locally produced learning update awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub timestamp: DateTime<Utc>,
    pub round: u64,
    /// Opaque model delta
    pub payload: Vec<u8>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Peer that produced the update
    pub origin: String,
}

impl Update {
    pub fn new(round: u64, payload: Vec<u8>, origin: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            round,
            payload,
            metadata: Metadata::new(),
            origin: origin.into(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Island).unwrap(), "\"island\"");
        let mode: Mode = serde_json::from_str("\"transitioning\"").unwrap();
        assert_eq!(mode, Mode::Transitioning);
        assert_eq!(Mode::default(), Mode::Online);
    }
}

//! Island Node - offline-resilient state for federated learning nodes
//!
//! Keeps a node training while the coordinating tier is unreachable and hands
//! the buffered work back once it returns.
//!
//! ## Architecture
//!
//! - **ConnectivityMonitor**: polls a reachability probe, reports to the controller
//! - **ModeController**: Online/Island state machine, owns the update cache
//! - **UpdateCache**: bounded buffer with a configured overflow policy
//! - **SnapshotChain**: hash-linked checkpoints of local state
//! - **RecoveryCoordinator**: atomic persist, verified restore after restart
//!
//! ## Modes
//!
//! | Mode | Updates | On entry |
//! |------|---------|----------|
//! | Online | cached, synced immediately | drained cache handed to sync |
//! | Island | cached until reconnect | listeners notified |
//! | Transitioning | cached | transient, resolves to one of the above |
//!
//! ## Storage Layout
//!
//! ```text
//! <data_dir>/
//! ├── recovery/
//! │   └── state.json         # Latest snapshot, cached updates, mode
//! └── outbox/
//!     └── <batch-uuid>.json  # Batches acknowledged by the outbox collaborator
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod island;
pub mod node;
pub mod state;
pub mod sync;

// Re-exports
pub use config::Config;
pub use error::{IslandError, Result};
pub use island::{
    ConnectivityMonitor, ControllerStatus, Metadata, Mode, ModeController, OverflowPolicy,
    ReachabilityProbe, Update, UpdateCache,
};
pub use node::{IslandNode, NodeStatus};
pub use state::{ChainVerdict, RecoveryCoordinator, RecoveryOutcome, Snapshot, SnapshotChain};
pub use sync::{OutboxSync, SyncAck, SyncCollaborator, SyncError};

//! Snapshot chain - append-only, bounded, hash-linked log of state checkpoints
//!
//! Each snapshot's `hash` is the SHA-256 of a canonical JSON encoding of every
//! other field, and `previous_hash` is the hash of the entry before it. Any
//! edit to a retained snapshot breaks either its own digest or the link from
//! its successor.
//!
//! Retention is FIFO: once `capacity` is reached the oldest entry is evicted
//! and the next one becomes the root. Verification only covers the retained
//! suffix, so the root's `previous_hash` is not checked.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{IslandError, Result};
use crate::island::Metadata;

/// Chain shared between the node, the recovery coordinator and the API
pub type SharedChain = Arc<RwLock<SnapshotChain>>;

/// Tamper-evident checkpoint of node state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub round: u64,
    /// Checksum of the model/state at this checkpoint
    pub state_checksum: String,
    pub update_count: u64,
    #[serde(default)]
    pub metadata: Metadata,
    /// Hash of the preceding snapshot, empty for the first
    #[serde(default)]
    pub previous_hash: String,
    pub hash: String,
}

/// Canonical form hashed for `Snapshot::hash`. Field order is fixed by the
/// struct and `Metadata` is key-ordered, so equal snapshots encode equally.
#[derive(Serialize)]
struct Preimage<'a> {
    timestamp_nanos: i64,
    round: u64,
    state_checksum: &'a str,
    update_count: u64,
    metadata: &'a Metadata,
    previous_hash: &'a str,
}

impl Snapshot {
    /// Recompute the digest over every field except `hash`
    pub fn compute_digest(&self) -> Result<String> {
        let timestamp_nanos = self.timestamp.timestamp_nanos_opt().ok_or_else(|| {
            IslandError::Digest(format!("timestamp {} out of range", self.timestamp))
        })?;

        let preimage = Preimage {
            timestamp_nanos,
            round: self.round,
            state_checksum: &self.state_checksum,
            update_count: self.update_count,
            metadata: &self.metadata,
            previous_hash: &self.previous_hash,
        };
        let bytes = serde_json::to_vec(&preimage).map_err(|e| IslandError::Digest(e.to_string()))?;

        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Check the stored hash against a fresh digest
    pub fn verify_digest(&self) -> std::result::Result<(), ChainFault> {
        match self.compute_digest() {
            Ok(computed) if computed == self.hash => Ok(()),
            Ok(computed) => Err(ChainFault::HashMismatch {
                stored: self.hash.clone(),
                computed,
            }),
            Err(e) => Err(ChainFault::Digest { reason: e.to_string() }),
        }
    }
}

/// Why verification stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainFault {
    /// Stored hash does not match the snapshot's contents
    HashMismatch { stored: String, computed: String },
    /// `previous_hash` does not match the predecessor's hash
    BrokenLink { expected: String, found: String },
    Digest { reason: String },
}

impl std::fmt::Display for ChainFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainFault::HashMismatch { stored, computed } => {
                write!(f, "hash mismatch (stored {}, computed {})", stored, computed)
            }
            ChainFault::BrokenLink { expected, found } => {
                write!(f, "chain broken (expected previous {}, found {})", expected, found)
            }
            ChainFault::Digest { reason } => write!(f, "digest failed: {}", reason),
        }
    }
}

/// Result of `SnapshotChain::verify`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainVerdict {
    Valid,
    Broken { index: usize, fault: ChainFault },
}

impl ChainVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerdict::Valid)
    }

    pub fn broken_index(&self) -> Option<usize> {
        match self {
            ChainVerdict::Valid => None,
            ChainVerdict::Broken { index, .. } => Some(*index),
        }
    }

    /// Convert a broken verdict into an `IslandError::Integrity`
    pub fn into_result(self) -> Result<()> {
        match self {
            ChainVerdict::Valid => Ok(()),
            ChainVerdict::Broken { index, fault } => {
                Err(IslandError::integrity(Some(index), fault.to_string()))
            }
        }
    }
}

/// Bounded hash chain of snapshots
#[derive(Debug)]
pub struct SnapshotChain {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
    last_snapshot: Instant,
}

impl SnapshotChain {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(IslandError::Config(
                "snapshot retention must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
            last_snapshot: Instant::now(),
        })
    }

    pub fn shared(capacity: usize) -> Result<SharedChain> {
        Ok(Arc::new(RwLock::new(Self::new(capacity)?)))
    }

    /// Create, hash and append a snapshot linked to the current tail
    pub fn create_snapshot(
        &mut self,
        round: u64,
        state_checksum: impl Into<String>,
        update_count: u64,
        metadata: Metadata,
    ) -> Result<Snapshot> {
        let previous_hash = self
            .snapshots
            .back()
            .map(|s| s.hash.clone())
            .unwrap_or_default();

        let mut snapshot = Snapshot {
            timestamp: Utc::now(),
            round,
            state_checksum: state_checksum.into(),
            update_count,
            metadata,
            previous_hash,
            hash: String::new(),
        };
        snapshot.hash = snapshot.compute_digest()?;

        self.push(snapshot.clone());
        self.last_snapshot = Instant::now();

        debug!(round, hash = %snapshot.hash, retained = self.snapshots.len(), "Snapshot created");
        Ok(snapshot)
    }

    /// Re-derive every digest and link, stopping at the first failure
    pub fn verify(&self) -> ChainVerdict {
        let mut previous: Option<&Snapshot> = None;

        for (index, snapshot) in self.snapshots.iter().enumerate() {
            if let Err(fault) = snapshot.verify_digest() {
                return ChainVerdict::Broken { index, fault };
            }

            if let Some(prev) = previous {
                if snapshot.previous_hash != prev.hash {
                    return ChainVerdict::Broken {
                        index,
                        fault: ChainFault::BrokenLink {
                            expected: prev.hash.clone(),
                            found: snapshot.previous_hash.clone(),
                        },
                    };
                }
            }
            previous = Some(snapshot);
        }

        ChainVerdict::Valid
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    /// Copy of the retained snapshots, oldest first
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn time_since_last_snapshot(&self) -> Duration {
        self.last_snapshot.elapsed()
    }

    /// Drop all retained snapshots
    pub fn clear(&mut self) {
        info!(dropped = self.snapshots.len(), "Clearing snapshot chain");
        self.snapshots.clear();
    }

    /// Reconcile a snapshot read back from a recovery record.
    ///
    /// The snapshot's own digest must hold. It is then accepted when the chain
    /// is empty (it becomes the root), when the chain already holds it, or when
    /// it links directly onto the tail. Anything else has diverged from live
    /// history and is refused.
    pub fn accept_recovered(&mut self, snapshot: Snapshot) -> Result<()> {
        snapshot
            .verify_digest()
            .map_err(|fault| IslandError::integrity(None, format!("recovered snapshot: {}", fault)))?;

        if self.snapshots.iter().any(|s| s.hash == snapshot.hash) {
            return Ok(());
        }

        let links = match self.snapshots.back() {
            None => true,
            Some(tail) => snapshot.previous_hash == tail.hash,
        };
        if !links {
            return Err(IslandError::integrity(
                None,
                format!(
                    "recovered snapshot {} (round {}) diverges from live chain",
                    snapshot.hash, snapshot.round
                ),
            ));
        }

        self.push(snapshot);
        Ok(())
    }

    fn push(&mut self, snapshot: Snapshot) {
        if self.snapshots.len() >= self.capacity {
            if let Some(evicted) = self.snapshots.pop_front() {
                debug!(round = evicted.round, hash = %evicted.hash, "Evicted oldest snapshot");
            }
        }
        self.snapshots.push_back(snapshot);
    }

    #[cfg(test)]
    pub(crate) fn snapshot_mut(&mut self, index: usize) -> Option<&mut Snapshot> {
        self.snapshots.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_with(count: u64, capacity: usize) -> SnapshotChain {
        let mut chain = SnapshotChain::new(capacity).unwrap();
        for round in 0..count {
            let mut metadata = Metadata::new();
            metadata.insert("loss".to_string(), serde_json::json!(0.5 / (round + 1) as f64));
            chain
                .create_snapshot(round, format!("sha256:{:04}", round), round * 2, metadata)
                .unwrap();
        }
        chain
    }

    #[test]
    fn test_created_chain_verifies() {
        for count in 0..6 {
            let chain = chain_with(count, 10);
            assert_eq!(chain.verify(), ChainVerdict::Valid, "count {}", count);
        }
    }

    #[test]
    fn test_links_follow_predecessor() {
        let chain = chain_with(4, 10);
        let snapshots = chain.snapshots();

        assert!(snapshots[0].previous_hash.is_empty());
        for pair in snapshots.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash);
        }
        assert_eq!(chain.latest().unwrap().round, 3);
    }

    #[test]
    fn test_retention_evicts_oldest_and_suffix_verifies() {
        let chain = chain_with(7, 3);
        assert_eq!(chain.len(), 3);

        let rounds: Vec<u64> = chain.snapshots().iter().map(|s| s.round).collect();
        assert_eq!(rounds, vec![4, 5, 6]);
        assert!(!chain.snapshots()[0].previous_hash.is_empty());
        assert!(chain.verify().is_valid());
    }

    #[test]
    fn test_tampering_any_field_is_detected_at_its_index() {
        type Tamper = fn(&mut Snapshot);
        let tampers: [(&str, Tamper); 7] = [
            ("timestamp", |s| s.timestamp += chrono::Duration::seconds(1)),
            ("round", |s| s.round += 100),
            ("state_checksum", |s| s.state_checksum.push('x')),
            ("update_count", |s| s.update_count += 1),
            ("metadata", |s| {
                s.metadata.insert("injected".to_string(), serde_json::json!(true));
            }),
            ("previous_hash", |s| s.previous_hash = "00".repeat(32)),
            ("hash", |s| s.hash = "ff".repeat(32)),
        ];

        for index in 0..4 {
            for (field, tamper) in &tampers {
                let mut chain = chain_with(4, 10);
                tamper(chain.snapshot_mut(index).unwrap());

                let verdict = chain.verify();
                assert_eq!(
                    verdict.broken_index(),
                    Some(index),
                    "tampering {} at {} gave {:?}",
                    field,
                    index,
                    verdict
                );
            }
        }
    }

    #[test]
    fn test_rehashed_forgery_breaks_successor_link() {
        let mut chain = chain_with(3, 10);
        {
            let forged = chain.snapshot_mut(1).unwrap();
            forged.state_checksum = "forged".to_string();
            forged.hash = forged.compute_digest().unwrap();
        }

        match chain.verify() {
            ChainVerdict::Broken { index, fault: ChainFault::BrokenLink { .. } } => assert_eq!(index, 2),
            other => panic!("expected broken link at 2, got {:?}", other),
        }
    }

    #[test]
    fn test_digest_survives_json_round_trip() {
        let chain = chain_with(2, 10);
        let snapshot = chain.latest().unwrap().clone();

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, snapshot);
        assert!(restored.verify_digest().is_ok());
    }

    #[test]
    fn test_accept_recovered_into_empty_chain() {
        let source = chain_with(3, 10);
        let latest = source.latest().unwrap().clone();

        let mut fresh = SnapshotChain::new(10).unwrap();
        fresh.accept_recovered(latest.clone()).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh.latest(), Some(&latest));
        assert!(fresh.verify().is_valid());
    }

    #[test]
    fn test_accept_recovered_existing_or_successor() {
        let mut chain = chain_with(2, 10);
        let existing = chain.snapshots()[0].clone();
        chain.accept_recovered(existing).unwrap();
        assert_eq!(chain.len(), 2);

        let mut ahead = chain_with(2, 10);
        let mut successor_chain = SnapshotChain::new(10).unwrap();
        for s in chain.snapshots() {
            successor_chain.accept_recovered(s).unwrap();
        }
        let next = successor_chain
            .create_snapshot(9, "sha256:next", 0, Metadata::new())
            .unwrap();
        chain.accept_recovered(next).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain.verify().is_valid());

        // A chain with unrelated history refuses it
        let foreign = ahead.create_snapshot(5, "sha256:other", 0, Metadata::new()).unwrap();
        let err = chain.accept_recovered(foreign).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_accept_recovered_rejects_bad_digest() {
        let source = chain_with(1, 10);
        let mut snapshot = source.latest().unwrap().clone();
        snapshot.update_count += 1;

        let mut fresh = SnapshotChain::new(10).unwrap();
        let err = fresh.accept_recovered(snapshot).unwrap_err();
        assert!(err.is_integrity());
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(SnapshotChain::new(0), Err(IslandError::Config(_))));
    }
}

//! Sync collaborator - delivers buffered updates once connectivity returns
//!
//! The controller hands a drained batch to a `SyncCollaborator` and re-admits
//! whatever the collaborator does not acknowledge.

pub mod outbox;

use async_trait::async_trait;
use thiserror::Error;

use crate::island::Update;

pub use outbox::OutboxSync;

/// Acknowledgment for one delivered batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncAck {
    /// Indices into the batch that were NOT accepted, sorted and unique
    rejected: Vec<usize>,
}

impl SyncAck {
    /// Every update in the batch was accepted
    pub fn all() -> Self {
        Self::default()
    }

    /// Everything accepted except the given batch indices
    pub fn rejecting(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut rejected: Vec<usize> = indices.into_iter().collect();
        rejected.sort_unstable();
        rejected.dedup();
        Self { rejected }
    }

    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn rejected(&self) -> &[usize] {
        &self.rejected
    }

    pub fn is_rejected(&self, index: usize) -> bool {
        self.rejected.binary_search(&index).is_ok()
    }
}

/// Sync errors
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Coordinating tier unreachable: {0}")]
    Unreachable(String),

    #[error("Batch rejected: {0}")]
    Rejected(String),

    #[error("Sync timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(String),
}

/// Delivers updates to the coordinating tier.
///
/// `Err` means nothing in the batch was delivered.
#[async_trait]
pub trait SyncCollaborator: Send + Sync {
    async fn sync(&self, updates: &[Update]) -> Result<SyncAck, SyncError>;
}

/// Split a batch into (acknowledged, rejected) according to `ack`.
pub(crate) fn partition(updates: Vec<Update>, ack: &SyncAck) -> (usize, Vec<Update>) {
    if ack.is_complete() {
        return (updates.len(), Vec::new());
    }

    let total = updates.len();
    let rejected: Vec<Update> = updates
        .into_iter()
        .enumerate()
        .filter(|(i, _)| ack.is_rejected(*i))
        .map(|(_, u)| u)
        .collect();

    (total - rejected.len(), rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_splits_rejected() {
        let updates: Vec<Update> = (0..4).map(|r| Update::new(r, vec![], "peer")).collect();
        let ack = SyncAck::rejecting([3, 1, 1]);

        let (acked, rejected) = partition(updates, &ack);
        assert_eq!(acked, 2);
        assert_eq!(rejected.iter().map(|u| u.round).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_unsorted_rejections_all_readmitted() {
        let updates: Vec<Update> = (0..3).map(|r| Update::new(r, vec![], "peer")).collect();
        let ack = SyncAck::rejecting(vec![2, 0]);
        assert_eq!(ack.rejected(), &[0, 2]);

        let (acked, rejected) = partition(updates, &ack);
        assert_eq!(acked, 1);
        assert_eq!(rejected.iter().map(|u| u.round).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_partition_ignores_out_of_range() {
        let updates: Vec<Update> = (0..2).map(|r| Update::new(r, vec![], "peer")).collect();
        let (acked, rejected) = partition(updates, &SyncAck::rejecting([7]));
        assert_eq!(acked, 2);
        assert!(rejected.is_empty());
    }
}

//! Bounded buffer of updates produced while the node cannot deliver them

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Update;
use crate::error::{IslandError, Result};

/// What `UpdateCache::add` does when the cache is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new update with `CapacityExceeded`, cache unchanged
    #[default]
    RejectNew,
    /// Drop the earliest buffered update to admit the new one
    EvictOldest,
}

/// FIFO cache of pending updates with a hard capacity.
///
/// Updates handed out by `begin_delivery` stay accounted for until `settle`.
/// Under RejectNew they keep occupying capacity, so a failed delivery always
/// has room to come back.
#[derive(Debug)]
pub struct UpdateCache {
    updates: VecDeque<Update>,
    in_flight: Vec<Update>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl UpdateCache {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(IslandError::Config(
                "update cache capacity must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            updates: VecDeque::with_capacity(capacity),
            in_flight: Vec::new(),
            capacity,
            policy,
        })
    }

    /// Buffer an update, applying the overflow policy when full
    pub fn add(&mut self, update: Update) -> Result<()> {
        match self.policy {
            OverflowPolicy::RejectNew if self.updates.len() + self.in_flight.len() >= self.capacity => {
                debug!(
                    capacity = self.capacity,
                    in_flight = self.in_flight.len(),
                    round = update.round,
                    "Update cache full, rejecting"
                );
                return Err(IslandError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
            OverflowPolicy::EvictOldest if self.updates.len() >= self.capacity => {
                if let Some(dropped) = self.updates.pop_front() {
                    warn!(
                        round = dropped.round,
                        origin = %dropped.origin,
                        "Update cache full, dropping oldest update"
                    );
                }
            }
            _ => {}
        }

        self.updates.push_back(update);
        Ok(())
    }

    /// Remove and return everything, oldest first
    pub fn drain(&mut self) -> Vec<Update> {
        self.updates.drain(..).collect()
    }

    /// Re-admit updates ahead of anything buffered since they were taken.
    ///
    /// Used for sync retries and recovery. The re-admitted batch is older than
    /// the current contents, so when space runs out its oldest entries are the
    /// ones dropped. Returns the number dropped.
    pub fn restore(&mut self, updates: Vec<Update>) -> usize {
        let room = self.capacity - self.updates.len();
        let dropped = updates.len().saturating_sub(room);

        for update in updates.into_iter().skip(dropped).rev() {
            self.updates.push_front(update);
        }

        if dropped > 0 {
            warn!(dropped, capacity = self.capacity, "Update cache full, dropped re-admitted updates");
        }
        dropped
    }

    /// Move everything into flight and return a copy for delivery
    pub fn begin_delivery(&mut self) -> Vec<Update> {
        self.in_flight.extend(self.updates.drain(..));
        self.in_flight.clone()
    }

    /// End the current delivery, re-admitting what was not acknowledged.
    /// Returns the number dropped for lack of room.
    pub fn settle(&mut self, unacknowledged: Vec<Update>) -> usize {
        self.in_flight.clear();
        self.restore(unacknowledged)
    }

    /// Updates handed out by `begin_delivery` and not yet settled
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// In-flight updates followed by buffered ones, oldest first
    pub fn pending(&self) -> Vec<Update> {
        self.in_flight.iter().chain(self.updates.iter()).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Copy of the buffered updates, oldest first
    pub fn snapshot(&self) -> Vec<Update> {
        self.updates.iter().cloned().collect()
    }
}

//! Replicated State Primitives
//!
//! A fixed-capacity ordered list whose authoritative copy lives on the
//! state authority, plus the publish/feed seams the runtime uses to carry
//! snapshots to replicas. Insertion order survives replication.

use thiserror::Error;

use crate::network::protocol::WorldSnapshot;

/// Replication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// List is full.
    #[error("replicated list is full (capacity {capacity})")]
    CapacityExceeded {
        /// Configured capacity.
        capacity: usize,
    },

    /// Snapshot content does not match its digest.
    #[error("snapshot digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch {
        /// Digest carried by the snapshot (hex prefix).
        expected: String,
        /// Digest of the applied content (hex prefix).
        actual: String,
    },

    /// Snapshot is older than the state already applied.
    #[error("stale snapshot (generation {generation}, version {version})")]
    StaleSnapshot {
        /// Snapshot generation.
        generation: u32,
        /// Snapshot version.
        version: u32,
    },
}

/// Fixed-capacity, ordered, append-only container.
///
/// Mutated by the state authority only; read by every peer.
pub trait ReplicatedList<T> {
    /// Maximum number of elements.
    fn capacity(&self) -> usize;

    /// Elements in insertion order.
    fn as_slice(&self) -> &[T];

    /// Append at the end.
    fn push(&mut self, value: T) -> Result<(), ReplicationError>;

    /// Remove every element.
    fn clear(&mut self);

    /// Replace the whole content with the authority's copy.
    fn assign(&mut self, items: &[T]) -> Result<(), ReplicationError>
    where
        T: Clone;

    /// Number of elements.
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Is the list empty?
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Has the list reached capacity?
    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

/// In-memory [`ReplicatedList`] backed by a preallocated `Vec`.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkList<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> NetworkList<T> {
    /// Create an empty list holding at most `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }
}

impl<T> ReplicatedList<T> for NetworkList<T> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn as_slice(&self) -> &[T] {
        &self.items
    }

    fn push(&mut self, value: T) -> Result<(), ReplicationError> {
        if self.items.len() >= self.capacity {
            return Err(ReplicationError::CapacityExceeded { capacity: self.capacity });
        }
        self.items.push(value);
        Ok(())
    }

    fn clear(&mut self) {
        self.items.clear();
    }

    fn assign(&mut self, items: &[T]) -> Result<(), ReplicationError>
    where
        T: Clone,
    {
        if items.len() > self.capacity {
            return Err(ReplicationError::CapacityExceeded { capacity: self.capacity });
        }
        self.items.clear();
        self.items.extend_from_slice(items);
        Ok(())
    }
}

// =============================================================================
// SNAPSHOT TRANSPORT SEAMS
// =============================================================================

/// Authority side: hands the latest world state to the runtime.
pub trait SnapshotPublisher: Send {
    /// Publish the latest authoritative snapshot. Replaces any older one.
    fn publish(&mut self, snapshot: WorldSnapshot);
}

/// Replica side: yields the latest world state once per change.
///
/// Intermediate snapshots may be skipped; only the newest matters.
pub trait SnapshotFeed: Send {
    /// Newest snapshot not yet seen, if any.
    fn latest(&mut self) -> Option<WorldSnapshot>;
}

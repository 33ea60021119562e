//! Finish Registry
//!
//! Single source of truth for race completion order.
//!
//! ## Model
//!
//! ```text
//! authority:  register(p) ──► entries.push(p) ──► version += 1
//!                                   │
//!                          snapshot (generation, version, entries, digest)
//!                                   │
//! every peer: poll_changes() ── (generation, version) != last seen ──► ResultsChanged
//! ```
//!
//! Only the state authority mutates `entries`; it handles registrations one
//! at a time inside its tick, so append order is the finish order. Duplicate
//! registrations (RPC retries, re-entering the finish volume) are no-ops.

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::core::clock::SimTime;
use crate::core::hash::{compute_standings_hash, short_hex, StateHash};
use crate::network::authority::{AuthorityRole, ObjectId};
use crate::network::replicated::{NetworkList, ReplicatedList, ReplicationError};
use crate::race::identity::{DisplayName, PlayerId};

/// Buffered notifications per subscriber before it starts lagging.
const CHANGE_CHANNEL_SIZE: usize = 64;

/// One finisher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinishEntry {
    /// Who finished
    pub player_id: PlayerId,
    /// Simulation time at registration (informational)
    pub finish_time: SimTime,
}

/// Result of a successful `register` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New entry appended.
    Registered {
        /// 1-based position
        position: u32,
    },
    /// Player was already in the list; nothing changed.
    AlreadyFinished {
        /// Existing 1-based position
        position: u32,
    },
}

impl RegisterOutcome {
    /// Position of the player after the call.
    pub fn position(self) -> u32 {
        match self {
            RegisterOutcome::Registered { position } | RegisterOutcome::AlreadyFinished { position } => position,
        }
    }
}

/// Registry errors. Diagnostic only; never fail the race.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Mutation attempted without state authority.
    #[error("no state authority over finish registry {object_id}")]
    NotAuthority {
        /// Registry object.
        object_id: ObjectId,
    },

    /// More finishers than the list holds.
    #[error("finish list full ({capacity}), {player_id} not registered")]
    CapacityExceeded {
        /// List capacity.
        capacity: usize,
        /// Rejected player.
        player_id: PlayerId,
    },

    /// Replicated state could not be applied.
    #[error(transparent)]
    Replication(#[from] ReplicationError),
}

/// Replicated registry state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Registry object
    pub object_id: ObjectId,
    /// Reset count
    pub generation: u32,
    /// Successful registrations since the last reset
    pub version: u32,
    /// Finishers in order
    pub entries: Vec<FinishEntry>,
    /// Digest over generation, version and entries
    pub digest: StateHash,
}

/// "Results changed" notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultsChanged {
    /// Registry generation
    pub generation: u32,
    /// Registry version
    pub version: u32,
    /// Display names (or raw ids) in finish order
    pub standings: Vec<String>,
}

/// Authoritative finish order with replicated read access.
pub struct FinishRegistry<L = NetworkList<FinishEntry>> {
    object_id: ObjectId,
    authority: Arc<dyn AuthorityRole>,
    entries: L,
    generation: u32,
    version: u32,
    /// (generation, version) last notified; `None` before the first poll
    last_seen: Option<(u32, u32)>,
    display_names: BTreeMap<PlayerId, String>,
    changes: broadcast::Sender<ResultsChanged>,
}

impl FinishRegistry<NetworkList<FinishEntry>> {
    /// Registry backed by an in-memory list of `capacity` entries.
    pub fn new(object_id: ObjectId, authority: Arc<dyn AuthorityRole>, capacity: usize) -> Self {
        Self::with_list(object_id, authority, NetworkList::with_capacity(capacity))
    }
}

impl<L: ReplicatedList<FinishEntry>> FinishRegistry<L> {
    /// Registry over a runtime-provided list.
    pub fn with_list(object_id: ObjectId, authority: Arc<dyn AuthorityRole>, entries: L) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            object_id,
            authority,
            entries,
            generation: 0,
            version: 0,
            last_seen: None,
            display_names: BTreeMap::new(),
            changes,
        }
    }

    /// Registry object.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Successful registrations since the last reset.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of resets so far.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Finishers in order.
    pub fn entries(&self) -> &[FinishEntry] {
        self.entries.as_slice()
    }

    /// List capacity.
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Does this process hold write authority over the registry?
    pub fn has_authority(&self) -> bool {
        self.authority.has_state_authority(self.object_id)
    }

    /// Clear all entries and set the version to 0. Authority only.
    pub fn reset(&mut self) -> Result<(), RegistryError> {
        self.require_authority("reset")?;

        self.entries.clear();
        self.version = 0;
        self.generation = self.generation.wrapping_add(1);
        debug!("Finish registry {} reset (generation {})", self.object_id, self.generation);
        Ok(())
    }

    /// Append `player_id` to the finish order. Authority only, idempotent.
    pub fn register(&mut self, player_id: &PlayerId, now: SimTime) -> Result<RegisterOutcome, RegistryError> {
        self.require_authority("register")?;

        let position = self.position_of(player_id);
        if position > 0 {
            debug!("{} already finished at position {}", player_id, position);
            return Ok(RegisterOutcome::AlreadyFinished { position });
        }

        let entry = FinishEntry { player_id: player_id.clone(), finish_time: now };
        match self.entries.push(entry) {
            Ok(()) => {}
            Err(ReplicationError::CapacityExceeded { capacity }) => {
                warn!("Finish list full ({}), ignoring {}", capacity, player_id);
                return Err(RegistryError::CapacityExceeded { capacity, player_id: player_id.clone() });
            }
            Err(e) => return Err(e.into()),
        }

        self.version += 1;
        let position = self.entries.len() as u32;
        debug!("{} finished at position {} (t={:.3}, version {})", player_id, position, now, self.version);
        Ok(RegisterOutcome::Registered { position })
    }

    /// 1-based rank of `player_id`, or 0 if not finished.
    pub fn position_of(&self, player_id: &PlayerId) -> u32 {
        self.entries
            .as_slice()
            .iter()
            .position(|entry| entry.player_id == *player_id)
            .map_or(0, |index| index as u32 + 1)
    }

    /// Have at least `total_players` players finished?
    pub fn is_complete(&self, total_players: usize) -> bool {
        self.entries.len() >= total_players
    }

    /// Cache a display name for standings. Empty names are not cached.
    pub fn remember_display_name(&mut self, player_id: &PlayerId, name: &DisplayName) {
        if name.is_empty() {
            return;
        }
        self.display_names.insert(player_id.clone(), name.as_str().to_string());
    }

    /// Finishers as display names, falling back to the raw id.
    pub fn current_standings(&self) -> Vec<String> {
        self.entries
            .as_slice()
            .iter()
            .map(|entry| match self.display_names.get(&entry.player_id) {
                Some(name) => name.clone(),
                None => {
                    warn!("No display name cached for {}, showing raw id", entry.player_id);
                    entry.player_id.to_string()
                }
            })
            .collect()
    }

    /// Digest of the replicated state.
    pub fn digest(&self) -> StateHash {
        digest_of(self.generation, self.version, self.entries.as_slice())
    }

    /// Replicated state for publication.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            object_id: self.object_id,
            generation: self.generation,
            version: self.version,
            entries: self.entries.as_slice().to_vec(),
            digest: self.digest(),
        }
    }

    /// Apply the authority's state on a replica.
    ///
    /// Returns `Ok(false)` on the authority (its copy is canonical) or when
    /// the snapshot is already applied.
    pub fn apply_snapshot(&mut self, snapshot: &RegistrySnapshot) -> Result<bool, RegistryError> {
        if self.has_authority() {
            return Ok(false);
        }

        let incoming = (snapshot.generation, snapshot.version);
        let current = (self.generation, self.version);
        if incoming < current {
            return Err(ReplicationError::StaleSnapshot {
                generation: snapshot.generation,
                version: snapshot.version,
            }
            .into());
        }
        if incoming == current && snapshot.entries.as_slice() == self.entries.as_slice() {
            return Ok(false);
        }

        let computed = digest_of(snapshot.generation, snapshot.version, &snapshot.entries);
        if computed != snapshot.digest {
            return Err(ReplicationError::DigestMismatch {
                expected: short_hex(&snapshot.digest),
                actual: short_hex(&computed),
            }
            .into());
        }

        self.entries.assign(&snapshot.entries)?;
        self.generation = snapshot.generation;
        self.version = snapshot.version;
        debug!(
            "Applied finish snapshot {} (generation {}, version {}, {} entries)",
            short_hex(&snapshot.digest),
            self.generation,
            self.version,
            snapshot.entries.len()
        );
        Ok(true)
    }

    /// Subscribe to "results changed" notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ResultsChanged> {
        self.changes.subscribe()
    }

    /// Once per tick: notify if the version moved since the last poll.
    pub fn poll_changes(&mut self) -> Option<ResultsChanged> {
        let current = (self.generation, self.version);
        if self.last_seen == Some(current) {
            return None;
        }
        self.last_seen = Some(current);

        let change = ResultsChanged {
            generation: self.generation,
            version: self.version,
            standings: self.current_standings(),
        };
        // No subscribers is fine: the change is also returned.
        let _ = self.changes.send(change.clone());
        Some(change)
    }

    fn require_authority(&self, operation: &str) -> Result<(), RegistryError> {
        if self.has_authority() {
            Ok(())
        } else {
            error!(
                "{} attempted {} on finish registry {} without authority",
                self.authority.local_peer(),
                operation,
                self.object_id
            );
            Err(RegistryError::NotAuthority { object_id: self.object_id })
        }
    }
}

fn digest_of(generation: u32, version: u32, entries: &[FinishEntry]) -> StateHash {
    compute_standings_hash(generation, version, |hasher| {
        hasher.update_u32(entries.len() as u32);
        for entry in entries {
            hasher.update_str(entry.player_id.as_str());
            hasher.update_time(entry.finish_time);
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================

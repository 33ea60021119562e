//! Standings Hashing for Verification
//!
//! Provides deterministic hashing of replicated race state for:
//! - Integrity verification between authority and replicas
//! - Compact logging of the current standings

use sha2::{Sha256, Digest};
use super::clock::SimTime;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for race state.
///
/// Wraps SHA-256 with helpers for the types the race replicates.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for finish standings.
    pub fn for_standings() -> Self {
        Self::new(b"RACE_FINISH_STANDINGS_V1")
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a simulation timestamp (IEEE-754 bits, little-endian).
    #[inline]
    pub fn update_time(&mut self, value: SimTime) {
        self.update_u64(value.to_bits());
    }

    /// Update with a length-prefixed string.
    ///
    /// The prefix keeps `["ab", "c"]` and `["a", "bc"]` distinct.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute standings hash for replica verification.
///
/// Called by `FinishRegistry::digest()`. The closure adds the entries.
pub fn compute_standings_hash<F>(generation: u32, version: u32, add_entries: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_standings();

    // Always hash generation and version first
    hasher.update_u32(generation);
    hasher.update_u32(version);

    add_entries(&mut hasher);

    hasher.finalize()
}

/// Short hex prefix of a hash, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..4])
}

// =============================================================================
// TESTS
// =============================================================================

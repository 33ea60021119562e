//! Core deterministic primitives.
//!
//! Clock, ordinal formatting and standings hashing. Nothing in here
//! touches the network.

pub mod clock;
pub mod ordinal;
pub mod hash;

// Re-export core types
pub use clock::{SimClock, SimTime};
pub use ordinal::{ordinal_suffix, format_ordinal, finish_message};
pub use hash::{StateHash, StateHasher, compute_standings_hash};

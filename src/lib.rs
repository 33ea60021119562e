//! # Race Finish Server
//!
//! Authoritative finish-order tracking for networked races.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RACE FINISH SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── clock.rs    - Fixed-rate simulation clock               │
//! │  ├── ordinal.rs  - 1st / 2nd / 3rd formatting                │
//! │  └── hash.rs     - Standings digest                          │
//! │                                                              │
//! │  race/           - Race logic                                │
//! │  ├── identity.rs - Player id, display name, finish mirror    │
//! │  ├── registry.rs - Authoritative finish order                │
//! │  ├── detector.rs - Finish volume observer                    │
//! │  ├── presenter.rs- Results panel                             │
//! │  └── controls.rs - Vehicle locomotion gate                   │
//! │                                                              │
//! │  network/        - Peer plumbing                             │
//! │  ├── authority.rs- State authority queries                   │
//! │  ├── replicated.rs- Bounded replicated list                  │
//! │  ├── rpc.rs      - Calls to the authority                    │
//! │  ├── protocol.rs - Wire encoding                             │
//! │  ├── loopback.rs - In-process runtime                        │
//! │  └── session.rs  - Per-peer tick loop                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Exactly one peer (the host) writes the finish list:
//! - Finishes are appended in the order their registrations arrive
//! - Registering the same player twice changes nothing
//! - Every other peer holds a read-only replica and polls its version
//!
//! Given the same arrival order, every peer shows the same standings.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod network;
pub mod race;

// Re-export commonly used types
pub use core::clock::{SimClock, SimTime};
pub use core::ordinal::{finish_message, format_ordinal, ordinal_suffix};
pub use network::authority::{AuthorityRole, HostAuthority, ObjectId, PeerId};
pub use network::loopback::LoopbackNetwork;
pub use network::session::{RacePeer, SessionConfig};
pub use race::identity::{DisplayName, PlayerId};
pub use race::registry::FinishRegistry;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Default capacity of the replicated finish list
pub const FINISH_CAPACITY: usize = 16;

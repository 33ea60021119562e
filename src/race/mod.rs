//! Race Logic Module
//!
//! Finish tracking and its consumers.
//!
//! ## Module Structure
//!
//! - `identity`: Player id, display name, finish mirror
//! - `registry`: Authoritative finish order
//! - `detector`: Finish-volume observer
//! - `presenter`: Standings and finish message output
//! - `controls`: Locomotion stop

pub mod identity;
pub mod registry;
pub mod detector;
pub mod presenter;
pub mod controls;

// Re-export key types
pub use identity::{PlayerId, DisplayName, PlayerIdentity, IdentityState, IdentityError};
pub use registry::{FinishRegistry, FinishEntry, RegisterOutcome, RegistryError, RegistrySnapshot, ResultsChanged};
pub use detector::{FinishDetector, FinishSubmission};
pub use presenter::{ResultsPresenter, ResultsDisplay, StandingsBoard, StandingRow};
pub use controls::{Locomotion, VehicleControls};

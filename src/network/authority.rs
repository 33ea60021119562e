//! Authority Roles
//!
//! Answers "may this process write object X?". Exactly one peer holds state
//! authority over any networked object; everyone else holds a read-only
//! replica and must route writes through a remote call.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Identifier of a connected peer (process) in the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u16);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Identifier of a networked object, stable across all peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Authority query provided by the network runtime.
pub trait AuthorityRole: Send + Sync {
    /// The peer this process runs as.
    fn local_peer(&self) -> PeerId;

    /// The peer holding state authority over `object`.
    fn state_authority(&self, object: ObjectId) -> PeerId;

    /// Does this process hold write authority for `object`?
    fn has_state_authority(&self, object: ObjectId) -> bool {
        self.state_authority(object) == self.local_peer()
    }
}

/// Host-mode authority: one host peer owns the state of every object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostAuthority {
    local: PeerId,
    host: PeerId,
}

impl HostAuthority {
    /// Authority view for `local` in a session hosted by `host`.
    pub fn new(local: PeerId, host: PeerId) -> Self {
        Self { local, host }
    }
}

impl AuthorityRole for HostAuthority {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn state_authority(&self, _object: ObjectId) -> PeerId {
        self.host
    }
}

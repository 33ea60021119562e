//! Protocol Messages
//!
//! Wire format between peers. JSON for debugging ease, binary (bincode)
//! for the transport. Enums use serde's default external tagging so both
//! encodings work.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::network::rpc::RpcEnvelope;
use crate::race::identity::IdentityState;
use crate::race::registry::RegistrySnapshot;

/// Encoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encode/decode failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encode/decode failed.
    #[error("binary: {0}")]
    Binary(#[from] bincode::Error),
}

// =============================================================================
// AUTHORITY -> REPLICA
// =============================================================================

/// Everything the authority replicates, published once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Authority tick at publication
    pub tick: u32,
    /// Finish registry state
    pub registry: RegistrySnapshot,
    /// Identity of every spawned avatar
    pub players: Vec<IdentityState>,
}

// =============================================================================
// ENCODING
// =============================================================================

macro_rules! wire_codec {
    ($ty:ty) => {
        impl $ty {
            /// Serialize to JSON string.
            pub fn to_json(&self) -> Result<String, ProtocolError> {
                Ok(serde_json::to_string(self)?)
            }

            /// Deserialize from JSON string.
            pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
                Ok(serde_json::from_str(s)?)
            }

            /// Serialize to binary.
            pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
                Ok(bincode::serialize(self)?)
            }

            /// Deserialize from binary.
            pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
                Ok(bincode::deserialize(data)?)
            }
        }
    };
}

wire_codec!(RpcEnvelope);
wire_codec!(WorldSnapshot);

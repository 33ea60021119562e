//! Remote Procedure Calls
//!
//! Fire-and-forget calls from any peer to the state authority.
//! The runtime guarantees at-least-once delivery while connected, so every
//! handler on the authority side must be idempotent.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::network::authority::{ObjectId, PeerId};

/// RPC errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The authority is no longer reachable. The call is lost.
    #[error("authority unreachable, call dropped")]
    Disconnected,

    /// The call could not be encoded for the transport.
    #[error("call encoding failed: {0}")]
    Encoding(String),
}

/// Calls routed to the state authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCall {
    /// A player crossed the finish boundary of `object_id`.
    RegisterFinish {
        /// Finish line object.
        object_id: ObjectId,
        /// Raw player identifier.
        player_id: String,
    },

    /// Assign the player id of an avatar.
    SetPlayerId {
        /// Avatar object.
        object_id: ObjectId,
        /// Requested identifier.
        player_id: String,
    },

    /// Assign the display name of an avatar.
    SetDisplayName {
        /// Avatar object.
        object_id: ObjectId,
        /// Requested name.
        display_name: String,
    },

    /// Mirror the finish position of an avatar.
    SetFinished {
        /// Avatar object.
        object_id: ObjectId,
        /// 1-based position.
        position: u32,
    },
}

impl RemoteCall {
    /// Object the call is addressed to.
    pub fn object_id(&self) -> ObjectId {
        match self {
            RemoteCall::RegisterFinish { object_id, .. }
            | RemoteCall::SetPlayerId { object_id, .. }
            | RemoteCall::SetDisplayName { object_id, .. }
            | RemoteCall::SetFinished { object_id, .. } => *object_id,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCall::RegisterFinish { .. } => "register_finish",
            RemoteCall::SetPlayerId { .. } => "set_player_id",
            RemoteCall::SetDisplayName { .. } => "set_display_name",
            RemoteCall::SetFinished { .. } => "set_finished",
        }
    }
}

/// A call together with the peer that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    /// Issuing peer.
    pub source: PeerId,
    /// The call.
    pub call: RemoteCall,
}

/// Sending side of the remote-call primitive.
pub trait RemoteCallChannel: Send + Sync {
    /// Issue `call` to the state authority. No return value.
    fn send_to_authority(&self, call: RemoteCall) -> Result<(), RpcError>;
}

/// Receiving side, drained by the authority once per tick.
pub trait RpcInbox: Send {
    /// Next delivered call, or `None` when the inbox is empty.
    fn try_next(&mut self) -> Option<RpcEnvelope>;
}

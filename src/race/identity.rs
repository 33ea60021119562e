//! Player Identity
//!
//! Stable identifier and display name of a player avatar. The owning peer
//! requests both from the state authority at spawn so id assignment has a
//! single writer; finish status is authority-written and mirrored elsewhere.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::network::authority::{AuthorityRole, ObjectId, PeerId};
use crate::network::rpc::{RemoteCall, RemoteCallChannel};

/// Maximum encoded length of a player id (bytes).
pub const MAX_PLAYER_ID_LEN: usize = 64;

/// Maximum encoded length of a display name (bytes).
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Identity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Identifier is empty.
    #[error("player id is empty")]
    Empty,

    /// Identifier does not fit the replicated string.
    #[error("player id is {len} bytes, limit is {max}")]
    TooLong {
        /// Actual length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// A different id was already assigned to this avatar.
    #[error("{object_id} already has player id {current}")]
    AlreadyAssigned {
        /// Avatar object.
        object_id: ObjectId,
        /// The id that stays.
        current: PlayerId,
    },

    /// Write attempted without state authority.
    #[error("no state authority over {object_id}")]
    NotAuthority {
        /// Avatar object.
        object_id: ObjectId,
    },

    /// Identity request issued by a peer that does not own the avatar.
    #[error("{peer} does not own {object_id}")]
    NotOwner {
        /// Avatar object.
        object_id: ObjectId,
        /// Offending peer.
        peer: PeerId,
    },
}

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier.
///
/// Sourced from a per-session token, never from the display name, so two
/// players with the same name never merge in the standings.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(String);

impl PlayerId {
    /// Validate a raw identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }
        if raw.len() > MAX_PLAYER_ID_LEN {
            return Err(IdentityError::TooLong { len: raw.len(), max: MAX_PLAYER_ID_LEN });
        }
        Ok(Self(raw))
    }

    /// Identifier derived from a session token.
    pub fn from_session_token(token: Uuid) -> Self {
        Self(token.hyphenated().to_string())
    }

    /// Fresh identifier from a random session token.
    pub fn generate() -> Self {
        Self::from_session_token(Uuid::new_v4())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// DISPLAY NAME
// =============================================================================

/// Short human-readable name. May be empty when the player never set one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayName(String);

impl DisplayName {
    /// Trim surrounding whitespace and cut to [`MAX_DISPLAY_NAME_LEN`] bytes
    /// on a character boundary.
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let mut end = trimmed.len().min(MAX_DISPLAY_NAME_LEN);
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        Self(trimmed[..end].to_string())
    }

    /// Is the name unset?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// IDENTITY STATE
// =============================================================================

/// Replicated part of an avatar's identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityState {
    /// Avatar object
    pub object_id: ObjectId,
    /// Peer with input authority (the player's own process)
    pub owner: PeerId,
    /// Assigned id, `None` until the authority applies it
    pub player_id: Option<PlayerId>,
    /// Display name, possibly empty
    pub display_name: DisplayName,
    /// Authority-written finish flag
    pub has_finished: bool,
    /// Authority-written 1-based position, 0 while racing
    pub finish_position: u32,
}

/// Identity component of one player avatar on one peer.
#[derive(Clone, Debug)]
pub struct PlayerIdentity {
    state: IdentityState,
    /// Position last mirrored to the authority by the owner
    reported_position: u32,
    /// Position last confirmed on this peer
    observed_position: u32,
}

impl PlayerIdentity {
    /// Identity of a freshly spawned avatar.
    pub fn new(object_id: ObjectId, owner: PeerId) -> Self {
        Self {
            state: IdentityState {
                object_id,
                owner,
                player_id: None,
                display_name: DisplayName::default(),
                has_finished: false,
                finish_position: 0,
            },
            reported_position: 0,
            observed_position: 0,
        }
    }

    /// Avatar object.
    pub fn object_id(&self) -> ObjectId {
        self.state.object_id
    }

    /// Owning peer.
    pub fn owner(&self) -> PeerId {
        self.state.owner
    }

    /// Assigned id, if resolved.
    pub fn player_id(&self) -> Option<&PlayerId> {
        self.state.player_id.as_ref()
    }

    /// Display name.
    pub fn display_name(&self) -> &DisplayName {
        &self.state.display_name
    }

    /// Finish flag.
    pub fn has_finished(&self) -> bool {
        self.state.has_finished
    }

    /// Finish position, 0 while racing.
    pub fn finish_position(&self) -> u32 {
        self.state.finish_position
    }

    /// Replicated state.
    pub fn state(&self) -> &IdentityState {
        &self.state
    }

    /// Does this process own (drive) the avatar?
    pub fn is_local(&self, authority: &dyn AuthorityRole) -> bool {
        self.state.owner == authority.local_peer()
    }

    /// Ask the authority to assign id and name. Owner only.
    ///
    /// Applied in place when the owner is also the state authority.
    pub fn request_identity(
        &mut self,
        authority: &dyn AuthorityRole,
        channel: &dyn RemoteCallChannel,
        player_id: PlayerId,
        display_name: DisplayName,
    ) -> Result<(), IdentityError> {
        let object_id = self.state.object_id;
        if !self.is_local(authority) {
            return Err(IdentityError::NotOwner { object_id, peer: authority.local_peer() });
        }

        if authority.has_state_authority(object_id) {
            self.assign_player_id(authority, player_id)?;
            self.assign_display_name(authority, display_name)?;
            return Ok(());
        }

        let calls = [
            RemoteCall::SetPlayerId { object_id, player_id: player_id.to_string() },
            RemoteCall::SetDisplayName { object_id, display_name: display_name.to_string() },
        ];
        for call in calls {
            if let Err(e) = channel.send_to_authority(call) {
                warn!("Identity request for {} lost: {}", object_id, e);
            }
        }
        Ok(())
    }

    /// Assign the player id. Authority only, write-once.
    ///
    /// Returns `true` when the id changed, `false` for a repeated request.
    pub fn assign_player_id(
        &mut self,
        authority: &dyn AuthorityRole,
        player_id: PlayerId,
    ) -> Result<bool, IdentityError> {
        self.require_authority(authority)?;

        match &self.state.player_id {
            None => {
                debug!("{} assigned player id {}", self.state.object_id, player_id);
                self.state.player_id = Some(player_id);
                Ok(true)
            }
            Some(current) if *current == player_id => Ok(false),
            Some(current) => Err(IdentityError::AlreadyAssigned {
                object_id: self.state.object_id,
                current: current.clone(),
            }),
        }
    }

    /// Assign the display name. Authority only.
    pub fn assign_display_name(
        &mut self,
        authority: &dyn AuthorityRole,
        display_name: DisplayName,
    ) -> Result<(), IdentityError> {
        self.require_authority(authority)?;
        self.state.display_name = display_name;
        Ok(())
    }

    /// Record the finish position. Authority only.
    pub fn mark_finished(
        &mut self,
        authority: &dyn AuthorityRole,
        position: u32,
    ) -> Result<bool, IdentityError> {
        self.require_authority(authority)?;
        if position == 0 || (self.state.has_finished && self.state.finish_position == position) {
            return Ok(false);
        }
        self.state.has_finished = true;
        self.state.finish_position = position;
        Ok(true)
    }

    /// Overwrite with the authority's replicated state.
    ///
    /// Ignored on the authority itself, whose copy is the source of truth.
    pub fn apply_replica(&mut self, authority: &dyn AuthorityRole, state: &IdentityState) {
        if authority.has_state_authority(self.state.object_id) {
            return;
        }
        if state.object_id != self.state.object_id {
            warn!("Replica for {} applied to {}", state.object_id, self.state.object_id);
            return;
        }
        self.state = state.clone();
    }

    /// Per-tick check against the registry's position for this player.
    ///
    /// Mirrors the position into the identity (directly on the authority,
    /// via one `SetFinished` call from the owner otherwise) and returns
    /// `Some(position)` the first time a finish is confirmed on this peer.
    pub fn observe_position(
        &mut self,
        position: u32,
        authority: &dyn AuthorityRole,
        channel: &dyn RemoteCallChannel,
    ) -> Option<u32> {
        if position == 0 {
            // Registry was reset: a later finish is a new one.
            self.observed_position = 0;
            self.reported_position = 0;
            if self.state.has_finished && authority.has_state_authority(self.state.object_id) {
                debug!("{} finish cleared after registry reset", self.state.object_id);
                self.state.has_finished = false;
                self.state.finish_position = 0;
            }
            return None;
        }

        let object_id = self.state.object_id;
        if authority.has_state_authority(object_id) {
            if let Err(e) = self.mark_finished(authority, position) {
                error!("Finish mirror for {} failed: {}", object_id, e);
            }
        } else if self.is_local(authority) && self.reported_position != position {
            match channel.send_to_authority(RemoteCall::SetFinished { object_id, position }) {
                Ok(()) => self.reported_position = position,
                Err(e) => warn!("Finish mirror for {} lost: {}", object_id, e),
            }
        }

        if self.observed_position == position {
            return None;
        }
        self.observed_position = position;
        Some(position)
    }

    fn require_authority(&self, authority: &dyn AuthorityRole) -> Result<(), IdentityError> {
        let object_id = self.state.object_id;
        if authority.has_state_authority(object_id) {
            Ok(())
        } else {
            error!("{} attempted identity write on {} without authority", authority.local_peer(), object_id);
            Err(IdentityError::NotAuthority { object_id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use crate::network::authority::HostAuthority;
    use crate::network::rpc::RpcError;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<RemoteCall>>,
    }

    impl RemoteCallChannel for RecordingChannel {
        fn send_to_authority(&self, call: RemoteCall) -> Result<(), RpcError> {
            self.sent.lock().unwrap().push(call);
            Ok(())
        }
    }

    const HOST: PeerId = PeerId(0);
    const CLIENT: PeerId = PeerId(1);
    const AVATAR: ObjectId = ObjectId(10);

    #[test]
    fn test_player_id_validation() {
        assert_eq!(PlayerId::new(""), Err(IdentityError::Empty));
        assert!(matches!(PlayerId::new("x".repeat(65)), Err(IdentityError::TooLong { len: 65, .. })));
        assert_eq!(PlayerId::new("abc").unwrap().as_str(), "abc");

        let generated = PlayerId::generate();
        assert_eq!(generated.as_str().len(), 36);
        assert_ne!(generated, PlayerId::generate());
    }

    #[test]
    fn test_display_name_trims_and_truncates() {
        assert_eq!(DisplayName::new("  Ayla ").as_str(), "Ayla");
        assert!(DisplayName::new("   ").is_empty());

        let long = "é".repeat(40); // 80 bytes
        let name = DisplayName::new(&long);
        assert!(name.as_str().len() <= MAX_DISPLAY_NAME_LEN);
        assert_eq!(name.as_str().chars().count(), 32);
    }

    #[test]
    fn test_client_request_goes_through_rpc() {
        let authority = HostAuthority::new(CLIENT, HOST);
        let channel = RecordingChannel::default();
        let mut identity = PlayerIdentity::new(AVATAR, CLIENT);

        let id = PlayerId::new("session-1").unwrap();
        identity
            .request_identity(&authority, &channel, id, DisplayName::new("Bo"))
            .unwrap();

        // Replica is untouched until the authority replies
        assert!(identity.player_id().is_none());
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            RemoteCall::SetPlayerId { object_id: AVATAR, player_id: "session-1".to_string() }
        );
    }

    #[test]
    fn test_host_request_applies_directly() {
        let authority = HostAuthority::new(HOST, HOST);
        let channel = RecordingChannel::default();
        let mut identity = PlayerIdentity::new(AVATAR, HOST);

        identity
            .request_identity(&authority, &channel, PlayerId::new("h").unwrap(), DisplayName::new("Host"))
            .unwrap();

        assert_eq!(identity.player_id().map(PlayerId::as_str), Some("h"));
        assert_eq!(identity.display_name().as_str(), "Host");
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_non_owner_cannot_request() {
        let authority = HostAuthority::new(PeerId(2), HOST);
        let channel = RecordingChannel::default();
        let mut identity = PlayerIdentity::new(AVATAR, CLIENT);

        let err = identity
            .request_identity(&authority, &channel, PlayerId::generate(), DisplayName::default())
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotOwner { .. }));
    }

    #[test]
    fn test_player_id_is_write_once() {
        let authority = HostAuthority::new(HOST, HOST);
        let mut identity = PlayerIdentity::new(AVATAR, CLIENT);
        let first = PlayerId::new("first").unwrap();

        assert_eq!(identity.assign_player_id(&authority, first.clone()), Ok(true));
        assert_eq!(identity.assign_player_id(&authority, first.clone()), Ok(false));

        let err = identity
            .assign_player_id(&authority, PlayerId::new("second").unwrap())
            .unwrap_err();
        assert_eq!(err, IdentityError::AlreadyAssigned { object_id: AVATAR, current: first });
    }

    #[test]
    fn test_replica_cannot_write() {
        let authority = HostAuthority::new(CLIENT, HOST);
        let mut identity = PlayerIdentity::new(AVATAR, CLIENT);

        assert_eq!(
            identity.mark_finished(&authority, 1),
            Err(IdentityError::NotAuthority { object_id: AVATAR })
        );
        assert!(!identity.has_finished());
    }

    #[test]
    fn test_observe_position_on_client_mirrors_once() {
        let authority = HostAuthority::new(CLIENT, HOST);
        let channel = RecordingChannel::default();
        let mut identity = PlayerIdentity::new(AVATAR, CLIENT);

        assert_eq!(identity.observe_position(0, &authority, &channel), None);
        assert_eq!(identity.observe_position(2, &authority, &channel), Some(2));
        assert_eq!(identity.observe_position(2, &authority, &channel), None);

        let sent = channel.sent.lock().unwrap();
        assert_eq!(*sent, vec![RemoteCall::SetFinished { object_id: AVATAR, position: 2 }]);
    }

    #[test]
    fn test_observe_position_on_host_writes_directly() {
        let authority = HostAuthority::new(HOST, HOST);
        let channel = RecordingChannel::default();
        let mut identity = PlayerIdentity::new(AVATAR, CLIENT);

        assert_eq!(identity.observe_position(3, &authority, &channel), Some(3));
        assert!(identity.has_finished());
        assert_eq!(identity.finish_position(), 3);
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reset_clears_finish_on_host() {
        let authority = HostAuthority::new(HOST, HOST);
        let channel = RecordingChannel::default();
        let mut identity = PlayerIdentity::new(AVATAR, CLIENT);

        assert_eq!(identity.observe_position(2, &authority, &channel), Some(2));
        assert_eq!(identity.observe_position(0, &authority, &channel), None);
        assert!(!identity.has_finished());
        assert_eq!(identity.finish_position(), 0);

        // Next race reports the new finish again
        assert_eq!(identity.observe_position(1, &authority, &channel), Some(1));
        assert_eq!(identity.finish_position(), 1);
    }

    #[test]
    fn test_apply_replica_skipped_on_authority() {
        let host = HostAuthority::new(HOST, HOST);
        let client = HostAuthority::new(CLIENT, HOST);

        let mut remote = PlayerIdentity::new(AVATAR, CLIENT);
        remote.assign_player_id(&host, PlayerId::new("r").unwrap()).unwrap();
        remote.mark_finished(&host, 1).unwrap();

        let mut replica = PlayerIdentity::new(AVATAR, CLIENT);
        replica.apply_replica(&client, remote.state());
        assert_eq!(replica.state(), remote.state());

        let mut on_host = PlayerIdentity::new(AVATAR, CLIENT);
        on_host.apply_replica(&host, remote.state());
        assert!(on_host.player_id().is_none());
    }
}

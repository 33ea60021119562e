//! Finish Detector
//!
//! Observes the finish volume. When a tracked player enters it, the finish
//! is registered in place on the authority or sent there as a remote call.
//! Registration is idempotent, so repeated trigger events and RPC
//! redeliveries are harmless.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::clock::SimTime;
use crate::network::authority::{AuthorityRole, ObjectId};
use crate::network::replicated::ReplicatedList;
use crate::network::rpc::{RemoteCall, RemoteCallChannel};
use crate::race::controls::Locomotion;
use crate::race::identity::PlayerIdentity;
use crate::race::registry::{FinishEntry, FinishRegistry, RegisterOutcome, RegistryError};

/// What happened to a boundary-enter event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishSubmission {
    /// Not a tracked player, or identity not resolved yet.
    Ignored,
    /// Registered on this process (authority).
    Local(RegisterOutcome),
    /// Authority refused it (e.g. finish list full).
    Rejected(RegistryError),
    /// Sent to the authority.
    Remote,
    /// Authority unreachable; the finish is lost for this player.
    Dropped,
}

/// Finish-volume observer for one finish line.
pub struct FinishDetector {
    line: ObjectId,
    authority: Arc<dyn AuthorityRole>,
    channel: Arc<dyn RemoteCallChannel>,
}

impl FinishDetector {
    /// Detector for the finish line object `line`.
    pub fn new(line: ObjectId, authority: Arc<dyn AuthorityRole>, channel: Arc<dyn RemoteCallChannel>) -> Self {
        Self { line, authority, channel }
    }

    /// Finish line object.
    pub fn line(&self) -> ObjectId {
        self.line
    }

    /// An entity entered the finish volume.
    ///
    /// `identity` is `None` for non-player colliders. On the authority the
    /// player's locomotion is stopped as soon as the registration resolves.
    pub fn on_boundary_enter<L: ReplicatedList<FinishEntry>>(
        &self,
        identity: Option<&PlayerIdentity>,
        controls: &mut dyn Locomotion,
        registry: &mut FinishRegistry<L>,
        now: SimTime,
    ) -> FinishSubmission {
        let Some(identity) = identity else {
            return FinishSubmission::Ignored;
        };
        let Some(player_id) = identity.player_id() else {
            debug!("{} crossed the finish before its id resolved", identity.object_id());
            return FinishSubmission::Ignored;
        };

        info!(
            "Player crossed the finish line: id={}, name={:?}",
            player_id,
            identity.display_name().as_str()
        );
        registry.remember_display_name(player_id, identity.display_name());

        if self.authority.has_state_authority(self.line) {
            return match registry.register(player_id, now) {
                Ok(outcome) => {
                    controls.stop();
                    FinishSubmission::Local(outcome)
                }
                Err(e) => FinishSubmission::Rejected(e),
            };
        }

        let call = RemoteCall::RegisterFinish {
            object_id: self.line,
            player_id: player_id.to_string(),
        };
        match self.channel.send_to_authority(call) {
            Ok(()) => FinishSubmission::Remote,
            Err(e) => {
                warn!("Finish of {} not delivered: {}", player_id, e);
                FinishSubmission::Dropped
            }
        }
    }

    /// Stop `controls` once the replicated state confirms the finish.
    ///
    /// Returns `true` when locomotion was stopped by this call.
    pub fn acknowledge<L: ReplicatedList<FinishEntry>>(
        &self,
        identity: &PlayerIdentity,
        controls: &mut dyn Locomotion,
        registry: &FinishRegistry<L>,
    ) -> bool {
        if controls.is_stopped() {
            return false;
        }
        let confirmed = identity.has_finished()
            || identity.player_id().is_some_and(|id| registry.position_of(id) > 0);
        if confirmed {
            controls.stop();
        }
        confirmed
    }
}

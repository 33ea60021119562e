//! Race Session
//!
//! One peer's view of a race: the finish registry, the finish detector, the
//! results presenter and every spawned avatar, driven by one cooperative
//! tick per network frame.
//!
//! ## Tick order
//!
//! 1. Host: apply queued RPCs in arrival order. Replica: apply the newest snapshot.
//! 2. Every avatar: mirror its registry position, stop confirmed finishers,
//!    show the local player's finish message.
//! 3. Poll the registry version and feed the presenter.
//! 4. Host: publish the world snapshot if anything changed.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::clock::{SimClock, SimTime};
use crate::core::hash::{short_hex, StateHash};
use crate::network::authority::{AuthorityRole, ObjectId, PeerId};
use crate::network::loopback::LoopbackNetwork;
use crate::network::protocol::WorldSnapshot;
use crate::network::replicated::{SnapshotFeed, SnapshotPublisher};
use crate::network::rpc::{RemoteCall, RemoteCallChannel, RpcEnvelope, RpcInbox};
use crate::race::controls::VehicleControls;
use crate::race::detector::{FinishDetector, FinishSubmission};
use crate::race::identity::{DisplayName, IdentityError, IdentityState, PlayerId, PlayerIdentity};
use crate::race::presenter::{ResultsDisplay, ResultsPresenter, StandingsBoard};
use crate::race::registry::FinishRegistry;
use crate::{FINISH_CAPACITY, TICK_RATE};

/// Environment key for the tick rate.
pub const ENV_TICK_RATE: &str = "RACE_TICK_RATE";
/// Environment key for the finish list capacity.
pub const ENV_FINISH_CAPACITY: &str = "RACE_FINISH_CAPACITY";
/// Environment key for the number of racers.
pub const ENV_TOTAL_PLAYERS: &str = "RACE_TOTAL_PLAYERS";
/// Environment key for the delay between revealed result rows.
pub const ENV_RESULTS_DELAY: &str = "RACE_RESULTS_DELAY";

/// Upper bound for the finish list capacity.
pub const MAX_FINISH_CAPACITY: usize = 64;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Value does not parse.
    #[error("{key}={value:?} is not a valid value")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// Value parses but is outside the accepted range.
    #[error("{key}={value} is out of range ({expected})")]
    OutOfRange {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Accepted range.
        expected: &'static str,
    },
}

/// Configuration for a race session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Capacity of the replicated finish list.
    pub finish_capacity: usize,
    /// Racers needed for the race to count as complete.
    pub total_players: usize,
    /// Seconds between revealed result rows.
    pub results_delay: SimTime,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            finish_capacity: FINISH_CAPACITY,
            total_players: 4,
            results_delay: 2.0,
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables. Unset keys keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TICK_RATE) {
            config.tick_rate = parse(ENV_TICK_RATE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_FINISH_CAPACITY) {
            config.finish_capacity = parse(ENV_FINISH_CAPACITY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TOTAL_PLAYERS) {
            config.total_players = parse(ENV_TOTAL_PLAYERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RESULTS_DELAY) {
            config.results_delay = parse(ENV_RESULTS_DELAY, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::OutOfRange {
                key: ENV_TICK_RATE,
                value: self.tick_rate.to_string(),
                expected: "> 0",
            });
        }
        if !(1..=MAX_FINISH_CAPACITY).contains(&self.finish_capacity) {
            return Err(ConfigError::OutOfRange {
                key: ENV_FINISH_CAPACITY,
                value: self.finish_capacity.to_string(),
                expected: "1..=64",
            });
        }
        if !(1..=self.finish_capacity).contains(&self.total_players) {
            return Err(ConfigError::OutOfRange {
                key: ENV_TOTAL_PLAYERS,
                value: self.total_players.to_string(),
                expected: "1..=finish capacity",
            });
        }
        if !self.results_delay.is_finite() || self.results_delay < 0.0 {
            return Err(ConfigError::OutOfRange {
                key: ENV_RESULTS_DELAY,
                value: self.results_delay.to_string(),
                expected: ">= 0",
            });
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw.to_string() })
}

// =============================================================================
// PEER
// =============================================================================

/// How this peer is attached to the session.
pub enum PeerLink {
    /// State authority: receives calls, publishes state.
    Host {
        /// Delivered calls
        inbox: Box<dyn RpcInbox>,
        /// Snapshot output
        publisher: Box<dyn SnapshotPublisher>,
    },
    /// Read-only replica.
    Replica {
        /// Snapshot input
        feed: Box<dyn SnapshotFeed>,
    },
}

/// A spawned player avatar on this peer.
#[derive(Debug, Clone)]
pub struct Avatar {
    /// Identity component
    pub identity: PlayerIdentity,
    /// Car controls
    pub controls: VehicleControls,
}

impl Avatar {
    fn new(object_id: ObjectId, owner: PeerId) -> Self {
        Self {
            identity: PlayerIdentity::new(object_id, owner),
            controls: VehicleControls::default(),
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number after advancing
    pub tick: u32,
    /// RPCs handled (host only)
    pub calls_applied: usize,
    /// A replicated snapshot was applied (replica only)
    pub snapshot_applied: bool,
    /// The local player's finish position, the tick it is confirmed
    pub own_finish: Option<u32>,
    /// The registry version changed
    pub results_changed: bool,
}

/// One peer of a race session.
pub struct RacePeer<D = StandingsBoard> {
    config: SessionConfig,
    authority: Arc<dyn AuthorityRole>,
    channel: Arc<dyn RemoteCallChannel>,
    link: PeerLink,
    clock: SimClock,
    registry: FinishRegistry,
    detector: FinishDetector,
    presenter: ResultsPresenter<D>,
    avatars: BTreeMap<ObjectId, Avatar>,
    last_published: Option<(StateHash, Vec<IdentityState>)>,
    completion_logged: bool,
}

impl RacePeer<StandingsBoard> {
    /// Host peer of a loopback session. `None` if the host link was taken.
    pub fn loopback_host(net: &mut LoopbackNetwork, config: SessionConfig, line: ObjectId) -> Option<Self> {
        let host = net.host();
        let (inbox, publisher) = net.take_host_link()?;
        Some(Self::new(
            config,
            line,
            net.authority(host),
            net.channel(host),
            PeerLink::Host { inbox: Box::new(inbox), publisher: Box::new(publisher) },
            StandingsBoard::default(),
        ))
    }

    /// Replica peer of a loopback session.
    pub fn loopback_replica(net: &LoopbackNetwork, peer: PeerId, config: SessionConfig, line: ObjectId) -> Self {
        Self::new(
            config,
            line,
            net.authority(peer),
            net.channel(peer),
            PeerLink::Replica { feed: Box::new(net.feed()) },
            StandingsBoard::default(),
        )
    }
}

impl<D: ResultsDisplay> RacePeer<D> {
    /// Wire a peer. The authority initializes the registry right away.
    pub fn new(
        config: SessionConfig,
        line: ObjectId,
        authority: Arc<dyn AuthorityRole>,
        channel: Arc<dyn RemoteCallChannel>,
        link: PeerLink,
        display: D,
    ) -> Self {
        let mut registry = FinishRegistry::new(line, authority.clone(), config.finish_capacity);
        if registry.has_authority() {
            if let Err(e) = registry.reset() {
                warn!("Finish registry {} not initialized: {}", line, e);
            }
        }
        let presenter = ResultsPresenter::new(display, registry.subscribe(), config.results_delay);
        let detector = FinishDetector::new(line, authority.clone(), channel.clone());

        Self {
            clock: SimClock::new(config.tick_rate),
            config,
            authority,
            channel,
            link,
            registry,
            detector,
            presenter,
            avatars: BTreeMap::new(),
            last_published: None,
            completion_logged: false,
        }
    }

    /// The peer this session runs as.
    pub fn local_peer(&self) -> PeerId {
        self.authority.local_peer()
    }

    /// Is this peer the state authority of the finish line?
    pub fn is_authority(&self) -> bool {
        self.registry.has_authority()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Simulation clock.
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Finish registry (read access for any component).
    pub fn registry(&self) -> &FinishRegistry {
        &self.registry
    }

    /// Results display.
    pub fn display(&self) -> &D {
        self.presenter.display()
    }

    /// Spawned avatar.
    pub fn avatar(&self, object_id: ObjectId) -> Option<&Avatar> {
        self.avatars.get(&object_id)
    }

    /// Has everyone in the session finished?
    pub fn race_complete(&self) -> bool {
        self.registry.is_complete(self.config.total_players)
    }

    /// Hide the results panel.
    pub fn hide_results(&mut self) {
        self.presenter.hide();
    }

    /// Spawn an avatar owned by `owner`. Repeated spawns are no-ops.
    pub fn spawn_avatar(&mut self, object_id: ObjectId, owner: PeerId) {
        self.avatars.entry(object_id).or_insert_with(|| Avatar::new(object_id, owner));
    }

    /// Remove an avatar. Its finish entry, if any, stays.
    pub fn despawn_avatar(&mut self, object_id: ObjectId) -> bool {
        self.avatars.remove(&object_id).is_some()
    }

    /// Spawn the local player's avatar and request its identity from the
    /// authority. The id comes from a fresh session token.
    pub fn join_local(&mut self, object_id: ObjectId, display_name: &str) -> Result<PlayerId, IdentityError> {
        let local = self.local_peer();
        self.spawn_avatar(object_id, local);

        let player_id = PlayerId::generate();
        let name = DisplayName::new(display_name);
        let Some(avatar) = self.avatars.get_mut(&object_id) else {
            return Err(IdentityError::NotOwner { object_id, peer: local });
        };
        avatar
            .identity
            .request_identity(&*self.authority, &*self.channel, player_id.clone(), name.clone())?;

        if self.registry.has_authority() {
            self.registry.remember_display_name(&player_id, &name);
        }
        info!("{} joined as {} ({:?})", local, player_id, name.as_str());
        Ok(player_id)
    }

    /// Feed driver input to a local avatar. `false` once it is stopped.
    pub fn drive(&mut self, object_id: ObjectId, throttle: f32, steer: f32) -> bool {
        let local = self.local_peer();
        match self.avatars.get_mut(&object_id) {
            Some(avatar) if avatar.identity.owner() == local => avatar.controls.apply_input(throttle, steer),
            _ => false,
        }
    }

    /// An entity entered the finish volume on this peer.
    pub fn on_finish_enter(&mut self, object_id: ObjectId) -> FinishSubmission {
        let now = self.clock.now();
        match self.avatars.get_mut(&object_id) {
            Some(Avatar { identity, controls }) => {
                self.detector.on_boundary_enter(Some(&*identity), controls, &mut self.registry, now)
            }
            None => {
                let mut inert = VehicleControls::default();
                self.detector.on_boundary_enter(None, &mut inert, &mut self.registry, now)
            }
        }
    }

    /// Advance one simulation tick.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport { tick: self.clock.advance(), ..Default::default() };
        let now = self.clock.now();

        #[cfg(feature = "debug-tracing")]
        tracing::trace!("{} tick {} (t={:.3})", self.local_peer(), report.tick, now);

        // 1. Inputs from the network
        let (calls, snapshot): (Vec<RpcEnvelope>, Option<WorldSnapshot>) = match &mut self.link {
            PeerLink::Host { inbox, .. } => (std::iter::from_fn(|| inbox.try_next()).collect(), None),
            PeerLink::Replica { feed } => (Vec::new(), feed.latest()),
        };
        report.calls_applied = calls.len();
        for envelope in calls {
            self.dispatch(envelope, now);
        }
        if let Some(snapshot) = snapshot {
            report.snapshot_applied = self.apply_world(&snapshot);
        }

        // 2. Avatars
        let local = self.local_peer();
        for avatar in self.avatars.values_mut() {
            let position = avatar
                .identity
                .player_id()
                .map_or(0, |id| self.registry.position_of(id));

            if let Some(position) = avatar.identity.observe_position(position, &*self.authority, &*self.channel) {
                if avatar.identity.owner() == local {
                    self.presenter.show_finish(position);
                    report.own_finish = Some(position);
                }
            }
            self.detector.acknowledge(&avatar.identity, &mut avatar.controls, &self.registry);
        }

        // 3. Results
        report.results_changed = self.registry.poll_changes().is_some();
        self.presenter.tick(now);

        if self.race_complete() && !self.completion_logged {
            self.completion_logged = true;
            info!("{}: race complete, standings {:?}", local, self.registry.current_standings());
        }

        // 4. Replication
        self.publish(report.tick);

        report
    }

    /// Handle one delivered call on the authority.
    fn dispatch(&mut self, envelope: RpcEnvelope, now: SimTime) {
        let RpcEnvelope { source, call } = envelope;
        debug!("{} -> {} {}", source, call.name(), call.object_id());

        match call {
            RemoteCall::RegisterFinish { object_id, player_id } => {
                if object_id != self.registry.object_id() {
                    warn!("Finish for unknown line {} from {}", object_id, source);
                    return;
                }
                let player_id = match PlayerId::new(player_id) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("Finish from {} with bad player id: {}", source, e);
                        return;
                    }
                };
                let Some(avatar) = self.avatar_of(&player_id) else {
                    warn!("Finish from {} for unknown player {}", source, player_id);
                    return;
                };
                let name = avatar.identity.display_name().clone();
                self.registry.remember_display_name(&player_id, &name);
                if let Err(e) = self.registry.register(&player_id, now) {
                    debug!("Finish of {} from {} dropped: {}", player_id, source, e);
                }
            }

            RemoteCall::SetPlayerId { object_id, player_id } => {
                let player_id = match PlayerId::new(player_id) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("Player id for {} from {} rejected: {}", object_id, source, e);
                        return;
                    }
                };
                if let Some(holder) = self.avatar_of(&player_id) {
                    if holder.identity.object_id() != object_id {
                        warn!("Player id {} already used by {}", player_id, holder.identity.object_id());
                        return;
                    }
                }
                let Some(avatar) = owned_avatar(&mut self.avatars, object_id, source) else {
                    return;
                };
                match avatar.identity.assign_player_id(&*self.authority, player_id.clone()) {
                    Ok(_) => {
                        let name = avatar.identity.display_name().clone();
                        self.registry.remember_display_name(&player_id, &name);
                    }
                    Err(e) => warn!("{}", e),
                }
            }

            RemoteCall::SetDisplayName { object_id, display_name } => {
                let Some(avatar) = owned_avatar(&mut self.avatars, object_id, source) else {
                    return;
                };
                let name = DisplayName::new(&display_name);
                if let Err(e) = avatar.identity.assign_display_name(&*self.authority, name.clone()) {
                    warn!("{}", e);
                    return;
                }
                let player_id = avatar.identity.player_id().cloned();
                if let Some(player_id) = player_id {
                    self.registry.remember_display_name(&player_id, &name);
                }
            }

            RemoteCall::SetFinished { object_id, position } => {
                let Some(avatar) = owned_avatar(&mut self.avatars, object_id, source) else {
                    return;
                };
                let confirmed = avatar
                    .identity
                    .player_id()
                    .map_or(0, |id| self.registry.position_of(id));
                if confirmed != position {
                    warn!("{} reports position {} for {}, registry says {}", source, position, object_id, confirmed);
                    return;
                }
                if let Err(e) = avatar.identity.mark_finished(&*self.authority, position) {
                    warn!("{}", e);
                }
            }
        }
    }

    /// Apply the authority's world state on a replica.
    fn apply_world(&mut self, snapshot: &WorldSnapshot) -> bool {
        let applied = match self.registry.apply_snapshot(&snapshot.registry) {
            Ok(applied) => applied,
            Err(e) => {
                warn!("{}: finish snapshot from tick {} rejected: {}", self.local_peer(), snapshot.tick, e);
                false
            }
        };

        for state in &snapshot.players {
            let avatar = self
                .avatars
                .entry(state.object_id)
                .or_insert_with(|| Avatar::new(state.object_id, state.owner));
            avatar.identity.apply_replica(&*self.authority, state);
            if let Some(player_id) = &state.player_id {
                self.registry.remember_display_name(player_id, &state.display_name);
            }
        }
        applied
    }

    /// Publish the world snapshot when it differs from the last one.
    fn publish(&mut self, tick: u32) {
        let PeerLink::Host { publisher, .. } = &mut self.link else {
            return;
        };

        let digest = self.registry.digest();
        let players: Vec<IdentityState> = self.avatars.values().map(|a| a.identity.state().clone()).collect();
        if self
            .last_published
            .as_ref()
            .is_some_and(|(last_digest, last_players)| *last_digest == digest && *last_players == players)
        {
            return;
        }

        debug!("Publishing world at tick {} (standings {})", tick, short_hex(&digest));
        publisher.publish(WorldSnapshot {
            tick,
            registry: self.registry.snapshot(),
            players: players.clone(),
        });
        self.last_published = Some((digest, players));
    }

    fn avatar_of(&self, player_id: &PlayerId) -> Option<&Avatar> {
        self.avatars
            .values()
            .find(|a| a.identity.player_id() == Some(player_id))
    }
}

/// Avatar addressed by a call that only its owner may issue.
fn owned_avatar(
    avatars: &mut BTreeMap<ObjectId, Avatar>,
    object_id: ObjectId,
    source: PeerId,
) -> Option<&mut Avatar> {
    let Some(avatar) = avatars.get_mut(&object_id) else {
        warn!("Identity call for unknown avatar {} from {}", object_id, source);
        return None;
    };
    if avatar.identity.owner() != source {
        warn!("{} does not own {}", source, object_id);
        return None;
    }
    Some(avatar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use rand::seq::SliceRandom;
    use crate::race::controls::Locomotion;
    use crate::race::registry::RegisterOutcome;

    const LINE: ObjectId = ObjectId(1);
    const HOST: PeerId = PeerId(0);

    fn avatar_of(index: usize) -> ObjectId {
        ObjectId(10 + index as u32)
    }

    fn peer_of(index: usize) -> PeerId {
        PeerId(index as u16 + 1)
    }

    /// Dedicated host plus one client per racer.
    struct Race {
        net: LoopbackNetwork,
        host: RacePeer,
        clients: Vec<RacePeer>,
    }

    impl Race {
        fn new(names: &[&str], redeliver: bool) -> Self {
            Self::with_capacity(names, redeliver, FINISH_CAPACITY)
        }

        fn with_capacity(names: &[&str], redeliver: bool, finish_capacity: usize) -> Self {
            let config = SessionConfig {
                total_players: names.len(),
                finish_capacity,
                results_delay: 0.0,
                ..SessionConfig::default()
            };
            let mut net = LoopbackNetwork::new(HOST).with_redelivery(redeliver);
            let mut host = RacePeer::loopback_host(&mut net, config.clone(), LINE).unwrap();

            let mut clients = Vec::new();
            for (index, name) in names.iter().enumerate() {
                host.spawn_avatar(avatar_of(index), peer_of(index));
                let mut client = RacePeer::loopback_replica(&net, peer_of(index), config.clone(), LINE);
                client.join_local(avatar_of(index), name).unwrap();
                clients.push(client);
            }

            let mut race = Self { net, host, clients };
            race.step();
            race
        }

        fn step(&mut self) {
            self.host.tick();
            for client in &mut self.clients {
                client.tick();
            }
        }

        fn cross(&mut self, index: usize) -> FinishSubmission {
            self.clients[index].on_finish_enter(avatar_of(index))
        }
    }

    fn shown(peer: &RacePeer) -> Vec<String> {
        peer.display().rows.iter().map(|row| row.name.clone()).collect()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identity_resolves_on_every_peer() {
        let race = Race::new(&["Ayla", "Bo"], false);

        let on_host = race.host.avatar(avatar_of(1)).unwrap();
        assert_eq!(on_host.identity.display_name().as_str(), "Bo");
        let id = on_host.identity.player_id().cloned();
        assert!(id.is_some());

        // Replicas learn about each other from the world snapshot
        let seen_by_ayla = race.clients[0].avatar(avatar_of(1)).unwrap();
        assert_eq!(seen_by_ayla.identity.player_id().cloned(), id);
    }

    #[test]
    fn test_concurrent_finishes_follow_arrival_order() {
        let mut race = Race::new(&["Ayla", "Bo", "Cy"], false);

        assert_eq!(race.cross(1), FinishSubmission::Remote);
        assert_eq!(race.cross(0), FinishSubmission::Remote);
        assert_eq!(race.cross(2), FinishSubmission::Remote);
        race.step();
        race.step();

        let expected = strings(&["Bo", "Ayla", "Cy"]);
        assert_eq!(race.host.registry().current_standings(), expected);
        assert_eq!(shown(&race.host), expected);
        for client in &race.clients {
            assert_eq!(client.registry().current_standings(), expected);
            assert_eq!(shown(client), expected);
        }
        assert!(race.host.race_complete());

        let ordinals: Vec<_> = race.clients[0].display().rows.iter().map(|r| r.ordinal.clone()).collect();
        assert_eq!(ordinals, strings(&["1st", "2nd", "3rd"]));
    }

    #[test]
    fn test_each_player_sees_own_position_once() {
        let mut race = Race::new(&["Ayla", "Bo", "Cy"], false);
        race.cross(1);
        race.cross(0);
        race.host.tick();

        let report = race.clients[0].tick();
        assert_eq!(report.own_finish, Some(2));
        assert!(report.snapshot_applied);
        assert_eq!(race.clients[1].tick().own_finish, Some(1));
        assert_eq!(race.clients[2].tick().own_finish, None);

        race.step();
        assert_eq!(race.clients[0].tick().own_finish, None);
        assert_eq!(
            race.clients[0].display().position_message.as_deref(),
            Some("You finished 2nd!")
        );
        assert_eq!(
            race.clients[1].display().position_message.as_deref(),
            Some("You finished 1st!")
        );
        assert_eq!(race.clients[2].display().position_message, None);
    }

    #[test]
    fn test_finish_mirrored_into_identity() {
        let mut race = Race::new(&["Ayla", "Bo"], false);
        race.cross(1);
        race.step();
        race.step();

        for peer in std::iter::once(&race.host).chain(race.clients.iter()) {
            let bo = peer.avatar(avatar_of(1)).unwrap();
            assert!(bo.identity.has_finished());
            assert_eq!(bo.identity.finish_position(), 1);

            let ayla = peer.avatar(avatar_of(0)).unwrap();
            assert!(!ayla.identity.has_finished());
        }
    }

    #[test]
    fn test_redelivered_calls_register_once() {
        let mut race = Race::new(&["Ayla", "Bo"], true);

        race.cross(0);
        race.cross(0);
        race.cross(1);
        race.step();
        race.step();

        assert_eq!(race.host.registry().entries().len(), 2);
        assert_eq!(race.host.registry().version(), 2);
        assert_eq!(shown(&race.clients[1]), strings(&["Ayla", "Bo"]));
    }

    #[test]
    fn test_missing_name_falls_back_to_id() {
        let mut race = Race::new(&["   "], false);
        race.cross(0);
        race.step();

        let id = race.clients[0].avatar(avatar_of(0)).unwrap().identity.player_id().cloned().unwrap();
        assert_eq!(race.host.registry().current_standings(), vec![id.to_string()]);
        assert_eq!(shown(&race.clients[0]), vec![id.to_string()]);
    }

    #[test]
    fn test_controls_stop_on_every_peer() {
        let mut race = Race::new(&["Ayla", "Bo"], false);
        assert!(race.clients[0].drive(avatar_of(0), 1.0, 0.0));

        race.cross(0);
        // Replica keeps driving until the authority confirms
        assert!(race.clients[0].drive(avatar_of(0), 1.0, 0.0));
        race.step();

        assert!(race.host.avatar(avatar_of(0)).unwrap().controls.is_stopped());
        assert!(race.clients[0].avatar(avatar_of(0)).unwrap().controls.is_stopped());
        assert!(race.clients[1].avatar(avatar_of(0)).unwrap().controls.is_stopped());
        assert!(!race.clients[0].drive(avatar_of(0), 1.0, 0.0));

        assert!(!race.clients[1].avatar(avatar_of(1)).unwrap().controls.is_stopped());
    }

    #[test]
    fn test_cannot_drive_remote_avatar() {
        let mut race = Race::new(&["Ayla", "Bo"], false);
        assert!(!race.clients[0].drive(avatar_of(1), 1.0, 0.0));
        assert!(!race.clients[0].drive(ObjectId(99), 1.0, 0.0));
    }

    #[test]
    fn test_host_player_finishes_in_place() {
        let config = SessionConfig { total_players: 1, results_delay: 0.0, ..SessionConfig::default() };
        let mut net = LoopbackNetwork::new(HOST);
        let mut host = RacePeer::loopback_host(&mut net, config, LINE).unwrap();
        host.join_local(ObjectId(10), "Hosty").unwrap();

        let submission = host.on_finish_enter(ObjectId(10));
        assert_eq!(submission, FinishSubmission::Local(RegisterOutcome::Registered { position: 1 }));
        assert!(host.avatar(ObjectId(10)).unwrap().controls.is_stopped());

        let report = host.tick();
        assert_eq!(report.own_finish, Some(1));
        assert!(report.results_changed);
        assert_eq!(shown(&host), strings(&["Hosty"]));
        assert!(host.race_complete());

        host.hide_results();
        assert!(!host.display().visible);
    }

    #[test]
    fn test_non_player_collider_ignored() {
        let mut race = Race::new(&["Ayla"], false);
        assert_eq!(race.host.on_finish_enter(ObjectId(99)), FinishSubmission::Ignored);
        assert_eq!(race.clients[0].on_finish_enter(ObjectId(99)), FinishSubmission::Ignored);
        race.step();
        assert!(race.host.registry().entries().is_empty());
    }

    #[test]
    fn test_identity_calls_from_other_peers_rejected() {
        let mut race = Race::new(&["Ayla", "Bo"], false);
        let spoofer = race.net.channel(peer_of(1));

        spoofer
            .send_to_authority(RemoteCall::SetDisplayName {
                object_id: avatar_of(0),
                display_name: "Mallory".to_string(),
            })
            .unwrap();
        spoofer
            .send_to_authority(RemoteCall::SetFinished { object_id: avatar_of(0), position: 1 })
            .unwrap();
        race.step();

        let ayla = race.host.avatar(avatar_of(0)).unwrap();
        assert_eq!(ayla.identity.display_name().as_str(), "Ayla");
        assert!(!ayla.identity.has_finished());
    }

    #[test]
    fn test_duplicate_player_id_rejected() {
        let mut race = Race::new(&["Ayla"], false);
        let taken = race.host.avatar(avatar_of(0)).unwrap().identity.player_id().cloned().unwrap();

        race.host.spawn_avatar(ObjectId(50), PeerId(9));
        race.net
            .channel(PeerId(9))
            .send_to_authority(RemoteCall::SetPlayerId {
                object_id: ObjectId(50),
                player_id: taken.to_string(),
            })
            .unwrap();
        race.step();

        assert!(race.host.avatar(ObjectId(50)).unwrap().identity.player_id().is_none());
    }

    #[test]
    fn test_unknown_finish_line_ignored() {
        let mut race = Race::new(&["Ayla"], false);
        race.net
            .channel(peer_of(0))
            .send_to_authority(RemoteCall::RegisterFinish {
                object_id: ObjectId(77),
                player_id: "whoever".to_string(),
            })
            .unwrap();

        let report = race.host.tick();
        assert_eq!(report.calls_applied, 1);
        assert!(race.host.registry().entries().is_empty());
    }

    #[test]
    fn test_finish_for_unknown_player_ignored() {
        let mut race = Race::new(&["Ayla"], false);
        let stranger = race.net.channel(PeerId(5));
        for n in 0..20 {
            stranger
                .send_to_authority(RemoteCall::RegisterFinish {
                    object_id: LINE,
                    player_id: format!("ghost{}", n),
                })
                .unwrap();
        }
        race.step();
        assert!(race.host.registry().entries().is_empty());

        // Real finishers still get a slot
        race.cross(0);
        race.step();
        assert_eq!(race.host.registry().current_standings(), strings(&["Ayla"]));
        assert!(race.clients[0].avatar(avatar_of(0)).unwrap().controls.is_stopped());
        assert!(race.host.race_complete());
    }

    #[test]
    fn test_finish_past_capacity_dropped_on_host() {
        let mut race = Race::with_capacity(&["Ayla", "Bo"], false, 1);
        race.cross(1);
        race.cross(0);
        race.step();

        assert_eq!(race.host.registry().current_standings(), strings(&["Bo"]));
        assert_eq!(race.host.registry().version(), 1);
        assert!(!race.clients[0].avatar(avatar_of(0)).unwrap().controls.is_stopped());
        assert!(race.clients[1].avatar(avatar_of(1)).unwrap().controls.is_stopped());
    }

    #[test]
    fn test_race_completes_after_last_finisher() {
        let mut race = Race::new(&["Ayla", "Bo"], false);
        race.cross(0);
        race.step();
        assert!(!race.host.race_complete());

        race.cross(1);
        race.step();
        assert!(race.host.race_complete());
        assert!(race.clients[0].race_complete());
    }

    #[test]
    fn test_shuffled_arrival_order_is_kept() {
        let names = ["Ayla", "Bo", "Cy", "Dee"];
        let mut rng = rand::thread_rng();

        for _ in 0..8 {
            let mut race = Race::new(&names, false);
            let mut order: Vec<usize> = (0..names.len()).collect();
            order.shuffle(&mut rng);

            for &index in &order {
                race.cross(index);
            }
            race.step();

            let expected: Vec<String> = order.iter().map(|&i| names[i].to_string()).collect();
            for client in &race.clients {
                assert_eq!(shown(client), expected);
            }
        }
    }

    #[test]
    fn test_results_revealed_with_delay() {
        let config = SessionConfig { tick_rate: 10, results_delay: 0.5, ..SessionConfig::default() };
        let mut net = LoopbackNetwork::new(HOST);
        let mut host = RacePeer::loopback_host(&mut net, config, LINE).unwrap();
        for (index, name) in ["Ayla", "Bo"].iter().enumerate() {
            host.spawn_avatar(avatar_of(index), HOST);
            host.join_local(avatar_of(index), name).unwrap();
            host.on_finish_enter(avatar_of(index));
        }

        host.tick();
        assert_eq!(host.display().rows.len(), 1);
        for _ in 0..5 {
            host.tick();
        }
        assert_eq!(shown(&host), strings(&["Ayla", "Bo"]));
    }

    // =========================================================================
    // CONFIG
    // =========================================================================

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.finish_capacity, 16);
        assert_eq!(config.total_players, 4);
    }

    #[test]
    fn test_config_overrides() {
        let config = SessionConfig::from_lookup(lookup(&[
            (ENV_TICK_RATE, "30"),
            (ENV_FINISH_CAPACITY, " 8 "),
            (ENV_TOTAL_PLAYERS, "3"),
            (ENV_RESULTS_DELAY, "0.25"),
        ]))
        .unwrap();

        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.finish_capacity, 8);
        assert_eq!(config.total_players, 3);
        assert_eq!(config.results_delay, 0.25);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let err = SessionConfig::from_lookup(lookup(&[(ENV_TICK_RATE, "fast")])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key: ENV_TICK_RATE, value: "fast".to_string() });

        let err = SessionConfig::from_lookup(lookup(&[(ENV_TICK_RATE, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: ENV_TICK_RATE, .. }));

        for capacity in ["0", "65"] {
            let err = SessionConfig::from_lookup(lookup(&[(ENV_FINISH_CAPACITY, capacity)])).unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange { key: ENV_FINISH_CAPACITY, .. }));
        }

        let err = SessionConfig::from_lookup(lookup(&[(ENV_TOTAL_PLAYERS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: ENV_TOTAL_PLAYERS, .. }));

        let err = SessionConfig::from_lookup(lookup(&[(ENV_FINISH_CAPACITY, "4"), (ENV_TOTAL_PLAYERS, "20")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: ENV_TOTAL_PLAYERS, .. }));

        let config = SessionConfig::from_lookup(lookup(&[(ENV_FINISH_CAPACITY, "4"), (ENV_TOTAL_PLAYERS, "4")]));
        assert!(config.is_ok());

        let err = SessionConfig::from_lookup(lookup(&[(ENV_RESULTS_DELAY, "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: ENV_RESULTS_DELAY, .. }));
    }
}

//! Race Finish Server
//!
//! Runs a hosted demo race in one process: a dedicated host plus one
//! client peer per racer, talking through the loopback runtime.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use race_finish::{
    core::hash::short_hex,
    format_ordinal,
    network::session::{RacePeer, SessionConfig},
    LoopbackNetwork, ObjectId, PeerId, VERSION,
};

/// Track length in meters.
const TRACK_LENGTH: f32 = 400.0;

/// Give up after this many seconds of simulated time.
const MAX_RACE_SECONDS: u32 = 120;

const RACER_NAMES: [&str; 8] = ["Ayla", "Bo", "Cy", "Dee", "Eun", "Fox", "Gil", "Hana"];

/// Finish line object id.
const FINISH_LINE: ObjectId = ObjectId(1);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let config = SessionConfig::from_env().context("Invalid race configuration")?;

    info!("Race Finish Server v{}", VERSION);
    info!("Tick Rate: {} Hz", config.tick_rate);
    info!("Racers: {} (finish list capacity {})", config.total_players, config.finish_capacity);

    demo_race(config)
}

/// A racer in the demo: its peer, avatar and odometer.
struct Racer {
    peer: RacePeer,
    avatar: ObjectId,
    speed: f32,
    distance: f32,
    crossed: bool,
}

/// Demo race with one client per racer.
fn demo_race(config: SessionConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Race ===");

    let host_peer = PeerId(0);
    let mut net = LoopbackNetwork::new(host_peer);
    let mut host = RacePeer::loopback_host(&mut net, config.clone(), FINISH_LINE)
        .context("Host link already taken")?;

    let racers_count = config.total_players.min(RACER_NAMES.len());
    let mut racers = Vec::with_capacity(racers_count);
    for (index, name) in RACER_NAMES.iter().take(racers_count).enumerate() {
        let peer = PeerId(index as u16 + 1);
        let avatar = ObjectId(100 + index as u32);

        host.spawn_avatar(avatar, peer);
        let mut client = RacePeer::loopback_replica(&net, peer, config.clone(), FINISH_LINE);
        client.join_local(avatar, name)?;

        racers.push(Racer {
            peer: client,
            avatar,
            // Staggered top speeds, roughly 28-40 m/s
            speed: 28.0 + ((index * 7) % 5) as f32 * 3.0 - index as f32 * 0.25,
            distance: 0.0,
            crossed: false,
        });
    }

    let dt = host.clock().delta() as f32;
    let max_ticks = MAX_RACE_SECONDS * config.tick_rate;

    for _ in 0..max_ticks {
        host.tick();

        for racer in &mut racers {
            let report = racer.peer.tick();
            if let Some(position) = report.own_finish {
                info!("{} confirmed in {} place", racer.peer.local_peer(), format_ordinal(position));
            }

            if racer.peer.drive(racer.avatar, 1.0, 0.0) {
                racer.distance += racer.speed * dt;
            }
            if !racer.crossed && racer.distance >= TRACK_LENGTH {
                racer.crossed = true;
                racer.peer.on_finish_enter(racer.avatar);
            }
        }

        if host.race_complete() && racers.iter().all(|r| r.peer.race_complete()) {
            break;
        }
    }

    // Let the last results replicate
    for _ in 0..2 {
        host.tick();
        for racer in &mut racers {
            racer.peer.tick();
        }
    }

    info!("=== Race Results ===");
    for (index, name) in host.registry().current_standings().iter().enumerate() {
        let position = index as u32 + 1;
        info!("{:>5}: {}", format_ordinal(position), name);
    }

    let digest = host.registry().digest();
    info!("Host standings digest: {}", hex::encode(digest));

    let in_sync = racers.iter().all(|r| r.peer.registry().digest() == digest);
    if in_sync {
        info!("REPLICAS IN SYNC: all {} peers at {}", racers.len(), short_hex(&digest));
    } else {
        info!("REPLICA DIVERGENCE: digests differ!");
    }

    if !host.race_complete() {
        info!(
            "Race ended after {} s with {} of {} finished",
            MAX_RACE_SECONDS,
            host.registry().entries().len(),
            config.total_players
        );
    }

    Ok(())
}

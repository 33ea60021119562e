//! Loopback Runtime
//!
//! In-process stand-in for the network runtime: every peer of a session
//! lives in the same process and talks through channels.
//!
//! - RPCs travel as bincode bytes over an unbounded `mpsc` to the host.
//!   With redelivery on, each call is delivered twice (at-least-once).
//! - Snapshots travel as bincode bytes over a `watch`, so replicas only
//!   ever see the newest state (eventually consistent).

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::network::authority::{HostAuthority, PeerId};
use crate::network::protocol::WorldSnapshot;
use crate::network::replicated::{SnapshotFeed, SnapshotPublisher};
use crate::network::rpc::{RemoteCall, RemoteCallChannel, RpcEnvelope, RpcError, RpcInbox};

/// A hosted session running inside one process.
pub struct LoopbackNetwork {
    host: PeerId,
    redeliver: bool,
    rpc_tx: mpsc::UnboundedSender<Vec<u8>>,
    rpc_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    state_tx: Option<watch::Sender<Option<Vec<u8>>>>,
    state_rx: watch::Receiver<Option<Vec<u8>>>,
}

impl LoopbackNetwork {
    /// Session hosted by `host`.
    pub fn new(host: PeerId) -> Self {
        let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(None);
        Self {
            host,
            redeliver: false,
            rpc_tx,
            rpc_rx: Some(rpc_rx),
            state_tx: Some(state_tx),
            state_rx,
        }
    }

    /// Deliver every RPC twice.
    pub fn with_redelivery(mut self, redeliver: bool) -> Self {
        self.redeliver = redeliver;
        self
    }

    /// The host peer.
    pub fn host(&self) -> PeerId {
        self.host
    }

    /// Authority view for `peer`.
    pub fn authority(&self, peer: PeerId) -> Arc<HostAuthority> {
        Arc::new(HostAuthority::new(peer, self.host))
    }

    /// RPC sender for `peer`.
    pub fn channel(&self, peer: PeerId) -> Arc<LoopbackChannel> {
        Arc::new(LoopbackChannel {
            source: peer,
            tx: self.rpc_tx.clone(),
            redeliver: self.redeliver,
        })
    }

    /// Host side of the session. Available once.
    pub fn take_host_link(&mut self) -> Option<(LoopbackInbox, LoopbackPublisher)> {
        let rx = self.rpc_rx.take()?;
        let tx = self.state_tx.take()?;
        Some((LoopbackInbox { rx }, LoopbackPublisher { tx }))
    }

    /// Snapshot feed for a replica peer.
    pub fn feed(&self) -> LoopbackFeed {
        LoopbackFeed { rx: self.state_rx.clone() }
    }
}

/// Peer-side RPC sender.
pub struct LoopbackChannel {
    source: PeerId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    redeliver: bool,
}

impl RemoteCallChannel for LoopbackChannel {
    fn send_to_authority(&self, call: RemoteCall) -> Result<(), RpcError> {
        let envelope = RpcEnvelope { source: self.source, call };
        let bytes = envelope
            .to_bytes()
            .map_err(|e| RpcError::Encoding(e.to_string()))?;

        let copies = if self.redeliver { 2 } else { 1 };
        for _ in 0..copies {
            self.tx.send(bytes.clone()).map_err(|_| RpcError::Disconnected)?;
        }
        Ok(())
    }
}

/// Host-side RPC receiver.
pub struct LoopbackInbox {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl RpcInbox for LoopbackInbox {
    fn try_next(&mut self) -> Option<RpcEnvelope> {
        while let Ok(bytes) = self.rx.try_recv() {
            match RpcEnvelope::from_bytes(&bytes) {
                Ok(envelope) => return Some(envelope),
                Err(e) => warn!("Dropping undecodable RPC ({} bytes): {}", bytes.len(), e),
            }
        }
        None
    }
}

/// Host-side snapshot sender.
pub struct LoopbackPublisher {
    tx: watch::Sender<Option<Vec<u8>>>,
}

impl SnapshotPublisher for LoopbackPublisher {
    fn publish(&mut self, snapshot: WorldSnapshot) {
        match snapshot.to_bytes() {
            Ok(bytes) => {
                self.tx.send_replace(Some(bytes));
            }
            Err(e) => warn!("Snapshot for tick {} not published: {}", snapshot.tick, e),
        }
    }
}

/// Replica-side snapshot receiver.
pub struct LoopbackFeed {
    rx: watch::Receiver<Option<Vec<u8>>>,
}

impl SnapshotFeed for LoopbackFeed {
    fn latest(&mut self) -> Option<WorldSnapshot> {
        if !self.rx.has_changed().unwrap_or(false) {
            return None;
        }
        let bytes = self.rx.borrow_and_update().clone()?;
        match WorldSnapshot::from_bytes(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Dropping undecodable snapshot ({} bytes): {}", bytes.len(), e);
                None
            }
        }
    }
}

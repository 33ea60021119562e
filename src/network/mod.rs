//! Network Layer
//!
//! Authority, replication and remote-call plumbing for a hosted session.
//! Race logic lives in `race/`; this layer only moves state between peers.

pub mod authority;
pub mod loopback;
pub mod protocol;
pub mod replicated;
pub mod rpc;
pub mod session;

pub use authority::{AuthorityRole, HostAuthority, ObjectId, PeerId};
pub use loopback::{LoopbackChannel, LoopbackFeed, LoopbackInbox, LoopbackNetwork, LoopbackPublisher};
pub use protocol::{ProtocolError, WorldSnapshot};
pub use replicated::{NetworkList, ReplicatedList, ReplicationError, SnapshotFeed, SnapshotPublisher};
pub use rpc::{RemoteCall, RemoteCallChannel, RpcEnvelope, RpcError, RpcInbox};
pub use session::{Avatar, ConfigError, PeerLink, RacePeer, SessionConfig, TickReport};

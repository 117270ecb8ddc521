//! `framesync_server`
//!
//! Authority-side systems:
//! - Entity id assignment on connect
//! - Channel relay: peer requests in, confirmed broadcasts out
//! - Pose relay between clients, plus server-owned world entities
//!
//! Networking model:
//! - TCP: handshake/membership/channel plane
//! - UDP: pose replication plane

pub mod server;

pub use server::SyncServer;

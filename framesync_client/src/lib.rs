//! `framesync_client`
//!
//! Peer-side systems:
//! - Connection management (reliable + unreliable channels)
//! - Session pump: membership, channel broadcasts, pose replication
//! - Local player pose publication

pub mod client;

pub use client::SyncClient;

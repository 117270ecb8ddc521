//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream (handshake, membership, channel broadcasts)
//! - An unreliable datagram socket (pose replication)
//! - A peer `SyncSession` owning the local player and one observer
//!   synchronizer per remote entity
//!
//! Channel sends are best-effort: if the authority is gone the envelopes
//! are dropped, not retried.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use framesync_shared::{
    channel::{ChannelRole, Delivery},
    config::SyncConfig,
    kinds::KindTag,
    net::{EntityId, NetMsg, ReliableConn, UnreliableConn, PROTOCOL_VERSION},
    session::SyncSession,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected to any server.
    Disconnected,
    /// Connected; sync running.
    Connected,
}

/// High-level sync client.
pub struct SyncClient {
    pub entity_id: EntityId,
    pub state: ClientState,
    pub session: SyncSession,

    reliable: ReliableConn,
    unreliable: UnreliableConn,
}

impl SyncClient {
    /// Connects to a server, performs the handshake, and builds the local
    /// session with the player entity and a freshly loaded scene.
    pub async fn connect(cfg: &SyncConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, "Connecting to server");

        // Bind UDP first so we can tell the server where to send poses.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let unreliable = UnreliableConn::connect(bind, server_addr).await?;
        let client_udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        let mut reliable = ReliableConn::new(stream);

        reliable
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;
        reliable.send(&NetMsg::UdpHello { client_udp_port }).await?;

        let welcome = reliable.recv().await?;
        let entity_id = match welcome {
            NetMsg::Welcome { entity_id } => entity_id,
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };

        info!(entity = %entity_id, "Connected to server");

        let mut session = SyncSession::new(ChannelRole::Peer, cfg.clone());
        session.load_standard_scene();
        session.add_entity(entity_id, true, KindTag::Player.instantiate());

        Ok(Self {
            entity_id,
            state: ClientState::Connected,
            session,
            reliable,
            unreliable,
        })
    }

    /// Polls the reliable connection for messages.
    pub async fn poll_reliable(&mut self) -> anyhow::Result<()> {
        loop {
            match self.reliable.recv_timeout(Duration::from_millis(1)).await {
                Ok(Some(msg)) => self.handle_reliable_message(msg),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Reliable connection error");
                    self.state = ClientState::Disconnected;
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_reliable_message(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::Broadcast { kind, payload } => {
                self.session.deliver_broadcast(kind, &payload);
            }
            NetMsg::EntityJoined { id, kind } => {
                if id != self.entity_id && !self.session.has_entity(id) {
                    debug!(entity = %id, ?kind, "Remote entity joined");
                    self.session.add_entity(id, false, kind.instantiate());
                }
            }
            NetMsg::EntityLeft { id } => {
                if id != self.entity_id {
                    self.session.remove_entity(id);
                }
            }
            NetMsg::Disconnect { reason } => {
                info!(%reason, "Disconnected by server");
                self.state = ClientState::Disconnected;
            }
            other => {
                debug!(?other, "Unhandled reliable message");
            }
        }
    }

    /// Receives pose datagrams; the server echoes back everything but our
    /// own, but the own-id guard stays for symmetric transports.
    pub async fn recv_poses(&mut self) -> anyhow::Result<()> {
        while let Some(msg) = self
            .unreliable
            .recv_timeout(Duration::from_millis(1))
            .await?
        {
            match msg {
                NetMsg::Pose(update) => {
                    if update.id != self.entity_id {
                        self.session.apply_remote_pose(update);
                    }
                }
                other => {
                    debug!(?other, "Unexpected UDP message");
                }
            }
        }
        Ok(())
    }

    /// Advances one client tick: run the session, flush channel envelopes
    /// over TCP and published poses over UDP.
    pub async fn tick(&mut self, dt: f32) -> anyhow::Result<()> {
        let out = self.session.step(dt);

        for envelope in out.outbound {
            if envelope.delivery != Delivery::ToAuthority {
                debug!(kind = envelope.kind, "Peer-side broadcast envelope; dropped");
                continue;
            }
            let msg = NetMsg::ToAuthority {
                kind: envelope.kind,
                payload: envelope.payload,
            };
            if let Err(e) = self.reliable.send(&msg).await {
                // Authority unreachable: best-effort semantics, no retry.
                debug!(error = %e, "Channel send dropped");
                self.state = ClientState::Disconnected;
            }
        }

        for update in out.poses {
            let _ = self.unreliable.send(&NetMsg::Pose(update)).await;
        }

        Ok(())
    }

    /// Collision glue: the local detector saw `entity` enter `sector`.
    pub fn report_sector_entry(&mut self, sector: &str) {
        self.session.report_sector_entry(self.entity_id, sector);
    }

    pub fn server_peer(&self) -> anyhow::Result<SocketAddr> {
        self.reliable.peer_addr()
    }
}

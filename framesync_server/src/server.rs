//! Server implementation.
//!
//! The server is the channel authority and the session membership source:
//! it assigns entity ids on connect, relays channel traffic (requests come
//! in over TCP, confirmed broadcasts fan out over TCP), and relays pose
//! datagrams between clients over UDP. It also runs its own `SyncSession`,
//! observing every player and owning world objects like the ship.
//!
//! Networking model (mirrors the control/gameplay split):
//! - TCP: handshake, membership, channel messages.
//! - UDP: frame-relative pose replication.

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use framesync_shared::{
    channel::{ChannelRole, Delivery, Envelope},
    config::SyncConfig,
    kinds::KindTag,
    net::{
        EntityId, NetMsg, PoseUpdate, ReliableConn, ReliableListener, PROTOCOL_VERSION,
    },
    session::SyncSession,
};
use tokio::{net::UdpSocket, time::Instant};
use tracing::{debug, info, warn};

/// Entity id the server itself signs channel messages with.
pub const SERVER_ENTITY: EntityId = EntityId(0);

/// Connected client state.
struct ClientConn {
    reliable: ReliableConn,
    udp_peer: SocketAddr,
    kind: KindTag,
}

/// Authority process.
pub struct SyncServer {
    pub cfg: SyncConfig,
    pub session: SyncSession,

    tcp: ReliableListener,
    udp: UdpSocket,
    clients: BTreeMap<EntityId, ClientConn>,

    next_entity: u32,
    tick: u64,
}

impl SyncServer {
    /// Binds sockets and loads the scene; the server is a host process
    /// like any other.
    pub async fn bind(cfg: SyncConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let udp = UdpSocket::bind(addr).await.context("udp bind")?;

        let mut session = SyncSession::new(ChannelRole::Authority, cfg.clone());
        session.load_standard_scene();

        Ok(Self {
            cfg,
            session,
            tcp,
            udp,
            clients: BTreeMap::new(),
            next_entity: 1,
            tick: 0,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn alloc_entity(&mut self) -> EntityId {
        let id = EntityId(self.next_entity);
        self.next_entity += 1;
        id
    }

    /// Spawns a server-owned world object (the ship). Broadcast to current
    /// and future clients like any other entity.
    pub async fn spawn_world_entity(&mut self, kind: KindTag) -> anyhow::Result<EntityId> {
        let id = self.alloc_entity();
        self.session.add_entity(id, true, kind.instantiate());
        self.broadcast(&NetMsg::EntityJoined { id, kind }).await;
        info!(entity = %id, ?kind, "World entity spawned");
        Ok(id)
    }

    /// Accepts exactly one client (handshake + membership replay).
    pub async fn accept_one(&mut self) -> anyhow::Result<EntityId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<EntityId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<EntityId> {
        let msg = conn.recv().await?;
        match msg {
            NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {
                let udp_hello = conn.recv().await?;
                let client_udp_port = match udp_hello {
                    NetMsg::UdpHello { client_udp_port } => client_udp_port,
                    other => anyhow::bail!("expected UdpHello, got {other:?}"),
                };

                let id = self.alloc_entity();
                conn.send(&NetMsg::Welcome { entity_id: id }).await?;

                // Replay current membership to the newcomer.
                for existing in self.session.entity_ids() {
                    let kind = self
                        .clients
                        .get(&existing)
                        .map(|c| c.kind)
                        .unwrap_or(KindTag::Ship);
                    conn.send(&NetMsg::EntityJoined { id: existing, kind }).await?;
                }

                // Everyone else learns about the newcomer.
                self.broadcast(&NetMsg::EntityJoined {
                    id,
                    kind: KindTag::Player,
                })
                .await;

                // The server observes the new player's transform.
                self.session.add_entity(id, false, KindTag::Player.instantiate());

                let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);
                self.clients.insert(
                    id,
                    ClientConn {
                        reliable: conn,
                        udp_peer,
                        kind: KindTag::Player,
                    },
                );

                info!(entity = %id, %udp_peer, "Client connected");
                Ok(id)
            }
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        }
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed step: pump inbound traffic, tick the session,
    /// flush outbound traffic.
    pub async fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.pump_reliable().await;
        self.pump_poses().await?;

        let out = self.session.step(dt_sec);

        for envelope in out.outbound {
            self.flush_envelope(envelope).await;
        }
        for update in out.poses {
            self.send_pose_to_all(update, None).await;
        }

        self.tick += 1;
        Ok(())
    }

    async fn pump_reliable(&mut self) {
        let ids: Vec<EntityId> = self.clients.keys().copied().collect();
        let mut dropped = Vec::new();

        for id in ids {
            loop {
                let Some(client) = self.clients.get_mut(&id) else {
                    break;
                };
                match client.reliable.recv_timeout(Duration::from_millis(1)).await {
                    Ok(Some(NetMsg::ToAuthority { kind, payload })) => {
                        self.session.deliver_to_authority(kind, &payload);
                    }
                    Ok(Some(NetMsg::Disconnect { reason })) => {
                        info!(entity = %id, %reason, "Client disconnected");
                        dropped.push(id);
                        break;
                    }
                    Ok(Some(other)) => {
                        debug!(entity = %id, ?other, "Unexpected reliable message");
                    }
                    Ok(None) => break, // nothing pending
                    Err(e) => {
                        warn!(entity = %id, error = %e, "Client connection lost");
                        dropped.push(id);
                        break;
                    }
                }
            }
        }

        for id in dropped {
            self.drop_client(id).await;
        }
    }

    async fn drop_client(&mut self, id: EntityId) {
        self.clients.remove(&id);
        self.session.remove_entity(id);
        self.broadcast(&NetMsg::EntityLeft { id }).await;
    }

    async fn pump_poses(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, _from)) => {
                    if let Ok(NetMsg::Pose(update)) = serde_json::from_slice::<NetMsg>(&buf[..n]) {
                        let owner = update.id;
                        self.session.apply_remote_pose(update);
                        self.send_pose_to_all(update, Some(owner)).await;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv")?,
            }
        }
        Ok(())
    }

    async fn flush_envelope(&mut self, envelope: Envelope) {
        match envelope.delivery {
            Delivery::ToAll => {
                let msg = NetMsg::Broadcast {
                    kind: envelope.kind,
                    payload: envelope.payload,
                };
                self.broadcast(&msg).await;
            }
            // The authority's to-authority sends loop back locally and
            // never reach the wire.
            Delivery::ToAuthority => {
                debug!(kind = envelope.kind, "Authority-bound envelope on the server; dropped")
            }
        }
    }

    async fn broadcast(&mut self, msg: &NetMsg) {
        let mut dead = Vec::new();
        for (id, client) in self.clients.iter_mut() {
            if let Err(e) = client.reliable.send(msg).await {
                warn!(entity = %id, error = %e, "Broadcast failed; dropping client");
                dead.push(*id);
            }
        }
        for id in dead {
            self.clients.remove(&id);
            self.session.remove_entity(id);
        }
    }

    async fn send_pose_to_all(&self, update: PoseUpdate, skip: Option<EntityId>) {
        let msg = NetMsg::Pose(update);
        let Ok(payload) = serde_json::to_vec(&msg) else {
            return;
        };
        for (id, client) in self.clients.iter() {
            if Some(*id) == skip {
                continue;
            }
            // Unreliable plane: losses are acceptable.
            let _ = self.udp.send_to(&payload, client.udp_peer).await;
        }
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(SyncServer, SyncConfig)> {
    let mut cfg = SyncConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };

    // Bind TCP first to get an ephemeral port, then bind UDP to that port.
    let tcp = ReliableListener::bind(cfg.server_addr.parse()?).await?;
    let addr = tcp.local_addr()?;
    cfg.server_addr = addr.to_string();

    let udp_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
    let udp = UdpSocket::bind(udp_bind).await?;

    let mut session = SyncSession::new(ChannelRole::Authority, cfg.clone());
    session.load_standard_scene();

    Ok((
        SyncServer {
            cfg: cfg.clone(),
            session,
            tcp,
            udp,
            clients: BTreeMap::new(),
            next_entity: 1,
            tick: 0,
        },
        cfg,
    ))
}

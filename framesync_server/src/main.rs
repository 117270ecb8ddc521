//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p framesync_server -- [--addr 127.0.0.1:41000] [--tick-hz 60]
//!
//! The server accepts clients, assigns entity ids, relays frame assignments
//! and poses, and owns the ship world object.

use std::env;
use std::time::Duration;

use anyhow::Context;
use framesync_server::server::{SyncServer, SERVER_ENTITY};
use framesync_shared::{config::SyncConfig, kinds::KindTag};
use tracing::info;

fn parse_args() -> SyncConfig {
    let mut cfg = SyncConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting server");

    let mut server = SyncServer::bind(cfg.clone()).await.context("bind")?;
    server.spawn_world_entity(KindTag::Ship).await?;

    let dt = Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    let mut awoken = false;

    loop {
        if let Some(id) = server.try_accept(Duration::from_millis(1)).await? {
            info!(entity = %id, clients = server.client_count(), "Accepted client");
            if !awoken {
                // First client in: the session is live.
                server.session.announce_wake_up(SERVER_ENTITY);
                awoken = true;
            }
        }

        server.step(dt.as_secs_f32()).await?;

        if server.session.tick() % (cfg.tick_hz as u64 * 10) == 0 {
            info!(
                tick = server.session.tick(),
                clients = server.client_count(),
                "Server running"
            );
        }

        tokio::time::sleep(dt).await;
    }
}

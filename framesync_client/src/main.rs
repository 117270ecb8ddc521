//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p framesync_client -- [--addr 127.0.0.1:41000] [--name Player]
//!
//! Connects, syncs the local player, and drifts it slowly so remote shadows
//! have something to follow. Reports a sector entry shortly after start to
//! exercise the frame negotiation path.

use std::env;
use std::time::Duration;

use anyhow::Context;
use framesync_client::client::{ClientState, SyncClient};
use framesync_shared::{
    config::SyncConfig,
    math::Vec3,
    scene::PLAYER_BODY,
};
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
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
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
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = SyncClient::connect(&cfg).await.context("connect")?;
    let dt = Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);

    loop {
        client.poll_reliable().await?;
        client.recv_poses().await?;

        if client.state == ClientState::Disconnected {
            info!("Disconnected from server");
            break;
        }

        // Stand-in for gameplay: drift the body so the pose stream moves.
        if let Some(body) = client.session.scene().lock().object(PLAYER_BODY) {
            let p = body.position();
            body.set_position(p + Vec3::new(0.5 * dt.as_secs_f32(), 0.0, 0.0));
        }

        // A little after start, pretend the collision volume entered the
        // comet's sector.
        if client.session.tick() == cfg.tick_hz as u64 * 2 {
            client.report_sector_entry("Comet");
        }

        client.tick(dt.as_secs_f32()).await?;

        if client.session.tick() % (cfg.tick_hz as u64 * 5) == 0 {
            info!(
                tick = client.session.tick(),
                awake = client.session.is_awake(),
                "Client running"
            );
        }

        tokio::time::sleep(dt).await;
    }

    Ok(())
}

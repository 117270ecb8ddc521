use framesync_server::server::bind_ephemeral;
use framesync_shared::kinds::KindTag;

/// Smoke test: server can run a few ticks without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(60).await?;
    server.spawn_world_entity(KindTag::Ship).await?;
    server.run_for_ticks(3).await?;
    Ok(())
}

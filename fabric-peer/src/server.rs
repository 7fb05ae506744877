use anyhow::Context;
use fabric_core::{seeder, Config};
use tokio::net::TcpListener;

/// Accepts inbound peer connections and services each with the seeder
/// state machine, sharing one worker map across the listener's lifetime.
pub async fn run(config: Config, listen: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    tracing::info!(%listen, "seeder listening");

    let workers = seeder::new_worker_map();
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        tracing::debug!(%peer_addr, "accepted connection");
        let workers = workers.clone();
        let torrent_files_dir = config.torrent_files_dir.clone();
        let files_dir = config.files_dir.clone();
        tokio::spawn(async move {
            seeder::handle_connection(stream, workers, torrent_files_dir, files_dir).await;
        });
    }
}

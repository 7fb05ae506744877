use std::time::Duration;

use anyhow::Context;
use fabric_core::{downloader, torrent, tracker, Config};

use crate::session::AnnouncedSet;

/// `create <tracker> <file...>`: builds a descriptor under
/// `config.torrent_files_dir` and prints its path.
pub async fn create(config: &Config, tracker_url: &str, files: &[String]) -> anyhow::Result<()> {
    let path = torrent::create(
        &config.files_dir,
        &config.torrent_files_dir,
        files,
        tracker_url,
    )
    .context("failed to create descriptor")?;
    println!("{}", path.display());
    Ok(())
}

/// `download <torrent_name> <peer_addr...>`: downloads every file in the
/// named descriptor and re-announces each to its tracker.
pub async fn download(
    config: &Config,
    self_addr: &str,
    torrent_name: &str,
    peers: &[String],
    announced: &mut AnnouncedSet,
) -> anyhow::Result<()> {
    let descriptor_path = config
        .torrent_files_dir
        .join(format!("{torrent_name}.torrent"));
    let reports = downloader::download(&descriptor_path, peers, self_addr, config)
        .await
        .context("download failed")?;
    for report in &reports {
        println!("{}", report.output_path.display());
        announced.record(&report.entry.announce, &report.entry.name);
    }
    Ok(())
}

/// `test <peer_addr>`: a bare liveness probe, reported to the operator.
pub async fn test_peer(config: &Config, peer_addr: &str) -> anyhow::Result<()> {
    match downloader::test_connection(peer_addr, config).await {
        Ok(()) => println!("{peer_addr}: alive"),
        Err(e) => println!("{peer_addr}: unreachable ({e})"),
    }
    Ok(())
}

/// `announcetotracker <tracker> <torrent_name>`: announces a file this
/// process already holds. Idempotent within the process's lifetime.
pub async fn announce_to_tracker(
    self_addr: &str,
    tracker_addr: &str,
    torrent_name: &str,
    timeout: Duration,
    announced: &mut AnnouncedSet,
) -> anyhow::Result<()> {
    if !announced.record(tracker_addr, torrent_name) {
        println!("already announced");
        return Ok(());
    }
    tracker::announce(tracker_addr, self_addr, torrent_name, timeout)
        .await
        .context("failed to announce to tracker")?;
    println!("announced");
    Ok(())
}

/// `getlistofpeers <tracker> <torrent_name>`.
pub async fn list_peers(
    tracker_addr: &str,
    torrent_name: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let peers = tracker::list_peers(tracker_addr, torrent_name, timeout)
        .await
        .context("failed to query tracker")?;
    for peer in peers {
        println!("{peer}");
    }
    Ok(())
}

/// `getlistoftrackers`: every `(tracker, file)` this process has announced
/// so far in its own lifetime.
pub fn list_trackers(announced: &AnnouncedSet) {
    if announced.is_empty() {
        println!("(nothing announced yet)");
        return;
    }
    for (tracker_addr, filename) in announced.iter() {
        println!("{tracker_addr} {filename}");
    }
}

/// Best-effort shutdown: withdraws from every tracker this process
/// announced to. Errors are logged, not propagated — exiting must not
/// hang or fail because a tracker is unreachable.
pub async fn withdraw_all(self_addr: &str, announced: &AnnouncedSet, timeout: Duration) {
    for (tracker_addr, _) in announced.iter() {
        if let Err(e) = tracker::withdraw_all(tracker_addr, self_addr, timeout).await {
            tracing::warn!(tracker = %tracker_addr, error = %e, "failed to withdraw on exit");
        }
    }
}

/// Runs the seeder accept loop in the background and drives the operator
/// REPL in the foreground. Typing `exit` or closing stdin both reach the
/// REPL's withdraw-on-exit path before this function returns.
pub async fn serve(config: &Config, self_addr: &str, listen: &str) -> anyhow::Result<()> {
    let accept_config = config.clone();
    let listen = listen.to_string();
    let acceptor = tokio::spawn(async move {
        if let Err(e) = crate::server::run(accept_config, &listen).await {
            tracing::error!(error = %e, "seeder accept loop exited");
        }
    });

    crate::repl::run(config.clone(), self_addr.to_string()).await;
    acceptor.abort();
    Ok(())
}

pub fn descriptor_path(config: &Config, torrent_name: &str) -> std::path::PathBuf {
    config.torrent_files_dir.join(format!("{torrent_name}.torrent"))
}

pub fn ensure_layout_exists(config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.files_dir)
        .with_context(|| format!("failed to create {}", config.files_dir.display()))?;
    std::fs::create_dir_all(&config.torrent_files_dir).with_context(|| {
        format!(
            "failed to create {}",
            config.torrent_files_dir.display()
        )
    })?;
    Ok(())
}

use anyhow::Context;
use clap::Parser;
use fabric_core::Config;

use crate::cli::{Cli, Command};

mod cli;
mod commands;
mod repl;
mod server;
mod session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let config = Config {
        files_dir: args.files_dir.clone(),
        torrent_files_dir: args.torrent_files_dir.clone(),
        ..Config::default()
    };
    commands::ensure_layout_exists(&config)?;

    match args.command {
        Command::Create { tracker, file } => {
            commands::create(&config, &tracker, &file)
                .await
                .context("create failed")?;
        }
        Command::Download {
            torrent_name,
            peer_addr,
        } => {
            let mut announced = session::AnnouncedSet::new();
            commands::download(
                &config,
                &args.self_addr,
                &torrent_name,
                &peer_addr,
                &mut announced,
            )
            .await
            .context("download failed")?;
        }
        Command::Test { peer_addr } => {
            commands::test_peer(&config, &peer_addr)
                .await
                .context("test failed")?;
        }
        Command::Announcetotracker {
            tracker,
            torrent_name,
        } => {
            let mut announced = session::AnnouncedSet::new();
            commands::announce_to_tracker(
                &args.self_addr,
                &tracker,
                &torrent_name,
                config.handshake_timeout,
                &mut announced,
            )
            .await
            .context("announce failed")?;
        }
        Command::Getlistofpeers {
            tracker,
            torrent_name,
        } => {
            commands::list_peers(&tracker, &torrent_name, config.handshake_timeout)
                .await
                .context("query failed")?;
        }
        Command::Getlistoftrackers => {
            commands::list_trackers(&session::AnnouncedSet::new());
        }
        Command::Serve { listen } => {
            commands::serve(&config, &args.self_addr, &listen)
                .await
                .context("serve failed")?;
        }
    }

    Ok(())
}

use anyhow::Context;
use clap::Parser;
use fabric_core::tracker::{self, Registry};
use tokio::net::TcpListener;

use crate::cli::Cli;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    tracing::info!(listen = %args.listen, "tracker listening");

    let registry = Registry::shared();
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        tracing::debug!(%peer_addr, "accepted connection");
        let registry = registry.clone();
        tokio::spawn(async move {
            tracker::handle_connection(stream, registry).await;
        });
    }
}

//! The tracker protocol: a peer registry keyed by file name, reachable
//! over TCP with one request per connection.
//!
//! This module holds both halves of the protocol: the server-side
//! `Registry` (used by the tracker process) and the client-side dialing
//! functions `announce`/`withdraw_one`/`withdraw_all`/`list_peers` (used
//! by the peer process to talk to a tracker).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// A single request line, unterminated, read from at most one 1024-byte
/// buffer per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCommand {
    /// `START:<peer_addr>:<filename>`
    Start { peer_addr: String, filename: String },
    /// `STOPONE:<peer_addr>:<filename>`
    StopOne { peer_addr: String, filename: String },
    /// `STOP:<peer_addr>`
    StopAll { peer_addr: String },
    /// `LIST:<filename>`
    List { filename: String },
}

impl TrackerCommand {
    pub fn parse(message: &str) -> Result<Self> {
        if let Some(rest) = message.strip_prefix("START:") {
            let (peer_addr, filename) = split_on_last_colon(rest)?;
            return Ok(TrackerCommand::Start { peer_addr, filename });
        }
        if let Some(rest) = message.strip_prefix("STOPONE:") {
            let (peer_addr, filename) = split_on_last_colon(rest)?;
            return Ok(TrackerCommand::StopOne { peer_addr, filename });
        }
        if let Some(rest) = message.strip_prefix("STOP:") {
            return Ok(TrackerCommand::StopAll {
                peer_addr: rest.to_string(),
            });
        }
        if let Some(rest) = message.strip_prefix("LIST:") {
            return Ok(TrackerCommand::List {
                filename: rest.to_string(),
            });
        }
        Err(Error::protocol("START:, STOPONE:, STOP:, or LIST:", message))
    }
}

/// Splits `<peer_addr>:<filename>` on the *last* colon, since `peer_addr`
/// is itself `host[:port]` and may contain one.
fn split_on_last_colon(s: &str) -> Result<(String, String)> {
    match s.rfind(':') {
        Some(idx) => Ok((s[..idx].to_string(), s[idx + 1..].to_string())),
        None => Err(Error::protocol("<peer_addr>:<filename>", s)),
    }
}

/// Process-local registry mapping file name to the set of peers currently
/// advertising it. Insertion order is preserved and duplicates are not
/// inserted; empty sets are pruned from the map.
#[derive(Debug, Default)]
pub struct Registry {
    files: RwLock<HashMap<String, IndexSet<String>>>,
}

pub type SharedRegistry = Arc<Registry>;

impl Registry {
    pub fn shared() -> SharedRegistry {
        Arc::new(Registry::default())
    }

    /// `START`: idempotent — announcing the same peer twice for the same
    /// file is a no-op the second time.
    pub async fn start(&self, peer_addr: &str, filename: &str) {
        let mut files = self.files.write().await;
        files
            .entry(filename.to_string())
            .or_default()
            .insert(peer_addr.to_string());
    }

    /// `STOPONE`: removes the peer from one file's set; prunes the
    /// mapping if the set becomes empty.
    pub async fn stop_one(&self, peer_addr: &str, filename: &str) {
        let mut files = self.files.write().await;
        if let Some(set) = files.get_mut(filename) {
            set.shift_remove(peer_addr);
            if set.is_empty() {
                files.remove(filename);
            }
        }
    }

    /// `STOP`: removes the peer from every file's set.
    pub async fn stop_all(&self, peer_addr: &str) {
        let mut files = self.files.write().await;
        let mut now_empty = Vec::new();
        for (filename, set) in files.iter_mut() {
            set.shift_remove(peer_addr);
            if set.is_empty() {
                now_empty.push(filename.clone());
            }
        }
        for filename in now_empty {
            files.remove(&filename);
        }
    }

    /// `LIST`: a consistent snapshot of one file's peers, in insertion
    /// order.
    pub async fn list(&self, filename: &str) -> Vec<String> {
        let files = self.files.read().await;
        files
            .get(filename)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The entire registry as a JSON object, `{ filename: [peer, ...] }`.
    /// Sent after every request in addition to any command-specific
    /// reply; see the crate docs for why this duplication is preserved.
    pub async fn snapshot_json(&self) -> String {
        let files = self.files.read().await;
        let plain: HashMap<&str, Vec<&str>> = files
            .iter()
            .map(|(name, peers)| (name.as_str(), peers.iter().map(String::as_str).collect()))
            .collect();
        serde_json::to_string(&plain).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Services one accepted tracker connection: a single bounded read, one
/// command, one reply terminated by `!`. Malformed input aborts only this
/// connection.
pub async fn handle_connection<S>(mut stream: S, registry: SharedRegistry)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 1024];
    let n = match stream.read(&mut buf).await {
        Ok(0) => return,
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "error reading tracker request");
            return;
        }
    };
    let message = String::from_utf8_lossy(&buf[..n]).into_owned();

    let command = match TrackerCommand::parse(&message) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(error = %e, message, "malformed tracker request");
            let _ = stream.write_all(format!("ERROR: {}!", e).as_bytes()).await;
            return;
        }
    };

    let mut reply = String::new();
    match command {
        TrackerCommand::Start { peer_addr, filename } => {
            registry.start(&peer_addr, &filename).await;
        }
        TrackerCommand::StopOne { peer_addr, filename } => {
            registry.stop_one(&peer_addr, &filename).await;
        }
        TrackerCommand::StopAll { peer_addr } => {
            registry.stop_all(&peer_addr).await;
        }
        TrackerCommand::List { filename } => {
            let peers = registry.list(&filename).await;
            reply.push_str(&format!("LIST:{}:[{}]\n", filename, peers.join(" ")));
        }
    }
    reply.push_str(&registry.snapshot_json().await);
    reply.push('!');
    let _ = stream.write_all(reply.as_bytes()).await;
}

fn timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out")
}

async fn dial(tracker_addr: &str, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect(tracker_addr))
        .await
        .map_err(|_| Error::network(tracker_addr, timed_out()))?
        .map_err(|e| Error::network(tracker_addr, e))
}

/// `START:<peer_addr>:<filename>`, fire-and-forget like the source.
pub async fn announce(
    tracker_addr: &str,
    peer_addr: &str,
    filename: &str,
    timeout: Duration,
) -> Result<()> {
    let mut stream = dial(tracker_addr, timeout).await?;
    let message = format!("START:{}:{}", peer_addr, filename);
    stream
        .write_all(message.as_bytes())
        .await
        .map_err(|e| Error::network(tracker_addr, e))
}

/// `STOPONE:<peer_addr>:<filename>`.
pub async fn withdraw_one(
    tracker_addr: &str,
    peer_addr: &str,
    filename: &str,
    timeout: Duration,
) -> Result<()> {
    let mut stream = dial(tracker_addr, timeout).await?;
    let message = format!("STOPONE:{}:{}", peer_addr, filename);
    stream
        .write_all(message.as_bytes())
        .await
        .map_err(|e| Error::network(tracker_addr, e))
}

/// `STOP:<peer_addr>`.
pub async fn withdraw_all(tracker_addr: &str, peer_addr: &str, timeout: Duration) -> Result<()> {
    let mut stream = dial(tracker_addr, timeout).await?;
    let message = format!("STOP:{}", peer_addr);
    stream
        .write_all(message.as_bytes())
        .await
        .map_err(|e| Error::network(tracker_addr, e))
}

/// `LIST:<filename>`, parsing the peer list out of the tracker's reply.
pub async fn list_peers(
    tracker_addr: &str,
    filename: &str,
    timeout: Duration,
) -> Result<Vec<String>> {
    let mut stream = dial(tracker_addr, timeout).await?;
    let message = format!("LIST:{}", filename);
    stream
        .write_all(message.as_bytes())
        .await
        .map_err(|e| Error::network(tracker_addr, e))?;

    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(|e| Error::network(tracker_addr, e))?;
    let reply = String::from_utf8_lossy(&buf);
    let body = reply.trim_end_matches('!');
    let prefix = format!("LIST:{}:[", filename);
    Ok(body
        .strip_prefix(prefix.as_str())
        .and_then(|rest| rest.split(']').next())
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn announce_then_list_is_idempotent_and_ordered() {
        let registry = Registry::shared();
        registry.start("10.0.0.1:8080", "x").await;
        registry.start("10.0.0.2:8080", "x").await;
        registry.start("10.0.0.1:8080", "x").await; // duplicate, no-op

        let peers = registry.list("x").await;
        assert_eq!(peers, vec!["10.0.0.1:8080", "10.0.0.2:8080"]);
    }

    #[tokio::test]
    async fn stop_one_removes_only_that_peer() {
        let registry = Registry::shared();
        registry.start("A", "x").await;
        registry.start("B", "x").await;
        registry.stop_one("A", "x").await;

        let peers = registry.list("x").await;
        assert_eq!(peers, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn stop_one_prunes_empty_mapping() {
        let registry = Registry::shared();
        registry.start("A", "x").await;
        registry.stop_one("A", "x").await;
        assert!(registry.list("x").await.is_empty());
    }

    #[tokio::test]
    async fn stop_all_removes_peer_from_every_file() {
        let registry = Registry::shared();
        registry.start("A", "x").await;
        registry.start("A", "y").await;
        registry.start("B", "y").await;
        registry.stop_all("A").await;

        assert!(registry.list("x").await.is_empty());
        assert_eq!(registry.list("y").await, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn start_then_stop_all_restores_prior_state() {
        let registry = Registry::shared();
        registry.start("A", "x").await;
        let before = registry.list("x").await;
        registry.start("A", "y").await;
        registry.stop_all("A").await;
        let after = registry.list("x").await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn handle_connection_replies_to_list_with_peers_and_json() {
        let registry = Registry::shared();
        registry.start("A", "x").await;

        let (mut client, server) = duplex(4096);
        tokio::spawn(handle_connection(server, registry));

        client.write_all(b"LIST:x").await.unwrap();
        client.shutdown().await.unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        let reply = String::from_utf8(buf).unwrap();
        assert!(reply.starts_with("LIST:x:[A]\n"));
        assert!(reply.ends_with('!'));
        assert!(reply.contains("\"x\":[\"A\"]"));
    }
}

//! The leecher half of the peer wire protocol: probing, handshaking, and
//! fetching pieces from a fixed set of candidate peers, then merging and
//! re-announcing the completed file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha1::Digest;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::piece::{PieceResult, PieceWork};
use crate::torrent::{self, FileEntry};
use crate::tracker;
use crate::wire;

fn timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out")
}

async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::network(addr, timed_out()))?
        .map_err(|e| Error::network(addr, e))
}

/// Reads one reply line under `deadline`. Applies only to command replies
/// (`OK`/`ERROR: ...`), never to an in-flight piece payload, which is
/// uncancellable once requested and bounded only by the TCP stack itself.
async fn read_reply_line<R>(reader: &mut R, addr: &str, deadline: Duration) -> Result<Option<String>>
where
    R: tokio::io::AsyncBufReadExt + Unpin,
{
    match tokio::time::timeout(deadline, wire::read_line(reader)).await {
        Ok(result) => result,
        Err(_) => Err(Error::network(addr, timed_out())),
    }
}

/// Liveness probe: dial, send `test:`, expect a bare `OK` line back.
pub async fn test_connection(addr: &str, config: &Config) -> Result<()> {
    let mut stream = dial(addr, config.probe_timeout).await?;
    stream
        .write_all(b"test:\n")
        .await
        .map_err(|e| Error::network(addr, e))?;
    let mut reader = BufReader::new(&mut stream);
    let reply = read_reply_line(&mut reader, addr, config.read_deadline).await?;
    match reply.as_deref() {
        Some("OK") => Ok(()),
        _ => Err(Error::protocol("OK", reply.unwrap_or_default())),
    }
}

/// Handshakes over a fresh connection for `info_hash_hex`, expecting `OK`.
pub async fn handshake(addr: &str, info_hash_hex: &str, config: &Config) -> Result<()> {
    let mut stream = dial(addr, config.handshake_timeout).await?;
    let message = format!("HANDSHAKE:{}\n", info_hash_hex);
    stream
        .write_all(message.as_bytes())
        .await
        .map_err(|e| Error::network(addr, e))?;
    let mut reader = BufReader::new(&mut stream);
    let reply = read_reply_line(&mut reader, addr, config.read_deadline).await?;
    match reply.as_deref() {
        Some("OK") => Ok(()),
        _ => Err(Error::protocol("OK", reply.unwrap_or_default())),
    }
}

/// Fetches one piece over a fresh connection: dial, handshake, request,
/// read the length-prefixed payload, then drop the connection. Every piece
/// gets its own connection, matching the one-request-per-dial shape the
/// wire protocol is built around. The payload read itself has no deadline
/// applied and cannot be cancelled once requested; only the handshake
/// reply is bounded by `read_deadline`.
pub async fn request_piece(
    addr: &str,
    info_hash_hex: &str,
    piece_index: usize,
    config: &Config,
) -> Result<Vec<u8>> {
    let mut stream = dial(addr, config.piece_dial_timeout).await?;

    let handshake_msg = format!("HANDSHAKE:{}\n", info_hash_hex);
    stream
        .write_all(handshake_msg.as_bytes())
        .await
        .map_err(|e| Error::network(addr, e))?;
    {
        let mut reader = BufReader::new(&mut stream);
        let reply = read_reply_line(&mut reader, addr, config.read_deadline).await?;
        if reply.as_deref() != Some("OK") {
            return Err(Error::protocol("OK", reply.unwrap_or_default()));
        }
    }

    let request = format!("Requesting:{}:{}\n", info_hash_hex, piece_index);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::network(addr, e))?;
    wire::read_piece(&mut stream).await
}

/// Probes every candidate in order (sequentially, not concurrently) and
/// returns those that answer within `config.probe_timeout`.
async fn probe_peers(candidates: &[String], config: &Config) -> Vec<String> {
    let mut alive = Vec::new();
    for peer in candidates {
        match test_connection(peer, config).await {
            Ok(()) => alive.push(peer.clone()),
            Err(e) => tracing::info!(peer, error = %e, "peer failed liveness probe"),
        }
    }
    alive
}

/// Drops peers that fail a standalone handshake for `info_hash_hex`.
async fn handshake_peers(candidates: &[String], info_hash_hex: &str, config: &Config) -> Vec<String> {
    let mut confirmed = Vec::new();
    for peer in candidates {
        match handshake(peer, info_hash_hex, config).await {
            Ok(()) => confirmed.push(peer.clone()),
            Err(e) => tracing::info!(peer, error = %e, "peer failed handshake"),
        }
    }
    confirmed
}

/// Fetches every piece of `entry` from `peers` using a fixed pool of
/// worker tasks bound round-robin to the peer set. A piece that fails
/// every attempt is simply absent from the result; a piece whose hash
/// does not match is kept anyway and only logged, matching the
/// best-effort integrity stance documented for this driver.
async fn download_file(
    entry: &FileEntry,
    peers: &[String],
    config: &Config,
) -> HashMap<usize, Vec<u8>> {
    let num_pieces = entry.num_pieces();
    let mut pieces_by_index = HashMap::with_capacity(num_pieces);
    if num_pieces == 0 {
        return pieces_by_index;
    }

    let (work_tx, work_rx) = tokio::sync::mpsc::channel::<PieceWork>(num_pieces);
    for index in 0..num_pieces {
        let work = PieceWork {
            index,
            expected_hash: entry.piece_hashes[index],
            nominal_size: entry.piece_size(index),
        };
        work_tx
            .try_send(work)
            .expect("channel capacity equals the piece count");
    }
    drop(work_tx);
    let work_rx = Arc::new(Mutex::new(work_rx));

    let (result_tx, mut result_rx) = tokio::sync::mpsc::channel::<PieceResult>(num_pieces);
    let info_hash_hex = entry.info_hash_hex();

    for worker_id in 0..config.num_workers {
        let peer = peers[worker_id % peers.len()].clone();
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        let info_hash_hex = info_hash_hex.clone();
        let config = config.clone();
        tokio::spawn(async move {
            loop {
                let work = { work_rx.lock().await.recv().await };
                let Some(work) = work else { break };
                let outcome =
                    request_piece(&peer, &info_hash_hex, work.index, &config).await;
                if result_tx
                    .send(PieceResult {
                        index: work.index,
                        outcome,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }
    // Every worker holds its own clone; once all have exited, the channel
    // closes and the loop below ends on its own.
    drop(result_tx);

    while let Some(result) = result_rx.recv().await {
        match result.outcome {
            Ok(data) => {
                let mut hasher = sha1::Sha1::new();
                hasher.update(&data);
                let hash: [u8; 20] = hasher.finalize().into();
                if hash != entry.piece_hashes[result.index] {
                    tracing::warn!(piece = result.index, "piece hash mismatch; keeping data anyway");
                }
                pieces_by_index.insert(result.index, data);
            }
            Err(e) => {
                tracing::warn!(piece = result.index, error = %e, "error fetching piece");
            }
        }
    }
    pieces_by_index
}

/// One file's download result: where the reassembled bytes landed, and the
/// entry they were downloaded against.
#[derive(Debug)]
pub struct DownloadReport {
    pub output_path: PathBuf,
    pub entry: FileEntry,
}

/// Downloads every file named in `descriptor_path` from `candidate_peers`,
/// merges each into `config.files_dir`, and re-announces the result to the
/// descriptor's tracker under `self_addr` so this process starts seeding
/// it. Re-announce failures are logged, not fatal: the download itself
/// already succeeded.
///
/// Returns `Error::NoPeers` if no candidate survives the liveness probe,
/// or if every surviving candidate then fails the handshake for the
/// descriptor's first file.
pub async fn download(
    descriptor_path: &Path,
    candidate_peers: &[String],
    self_addr: &str,
    config: &Config,
) -> Result<Vec<DownloadReport>> {
    let entries = torrent::open(descriptor_path)?;

    let alive = probe_peers(candidate_peers, config).await;
    if alive.is_empty() {
        return Err(Error::NoPeers);
    }

    // A descriptor's entries all live on the same seeder process, so a
    // handshake against the first entry is enough to confirm a peer can
    // serve this descriptor at all.
    let active_peers = match entries.first() {
        Some(first) => {
            let confirmed = handshake_peers(&alive, &first.info_hash_hex(), config).await;
            if confirmed.is_empty() {
                return Err(Error::NoPeers);
            }
            confirmed
        }
        None => alive,
    };

    let mut reports = Vec::with_capacity(entries.len());
    for entry in &entries {
        let pieces_by_index = download_file(entry, &active_peers, config).await;
        let output_path = config.files_dir.join(&entry.name);
        torrent::merge(&output_path, entry, &pieces_by_index)?;

        // Re-create a descriptor for the file now held locally, so this
        // process can seed it later, then announce under that descriptor's
        // tracker. The recreated descriptor need not be byte-identical to
        // the one downloaded from: info_hash depends only on the name.
        if let Err(e) = torrent::create(
            &config.files_dir,
            &config.torrent_files_dir,
            &[entry.name.clone()],
            &entry.announce,
        ) {
            tracing::warn!(file = %entry.name, error = %e, "failed to re-create descriptor after download");
        }
        if let Err(e) =
            tracker::announce(&entry.announce, self_addr, &entry.name, config.handshake_timeout)
                .await
        {
            tracing::warn!(tracker = %entry.announce, error = %e, "failed to re-announce downloaded file");
        }

        reports.push(DownloadReport {
            output_path,
            entry: entry.clone(),
        });
    }

    Ok(reports)
}

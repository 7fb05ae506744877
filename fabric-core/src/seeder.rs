//! The seeder half of the peer wire protocol: per-connection state machine
//! plus the process-wide `info_hash -> file worker` map.
//!
//! The map is guarded by a `tokio::sync::Mutex`: concurrent handshakes
//! racing to build a worker for the same info_hash must not both win.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::torrent::{self, FileEntry};
use crate::wire::{self, Command};

/// The seeder-side state for one torrent: the file path, its pieces held
/// in memory, and the hashes used to answer integrity checks elsewhere.
/// Pieces are handed out by read-only reference to each connection
/// handler; the worker itself is never mutated after construction.
pub struct FileWorker {
    pub file_path: PathBuf,
    pub pieces: Vec<Vec<u8>>,
    pub piece_hashes: Vec<[u8; 20]>,
}

impl FileWorker {
    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    fn from_entry(entry: &FileEntry, files_dir: &Path) -> Result<Self> {
        let file_path = files_dir.join(&entry.name);
        let pieces = torrent::stream_pieces(&file_path, entry.piece_length)?;
        Ok(FileWorker {
            file_path,
            pieces,
            piece_hashes: entry.piece_hashes.clone(),
        })
    }
}

/// Process-wide map from info_hash (hex) to file worker, populated lazily
/// on first successful handshake and reused by every later connection.
pub type WorkerMap = Arc<Mutex<HashMap<String, Arc<FileWorker>>>>;

pub fn new_worker_map() -> WorkerMap {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Returns the cached worker for `info_hash_hex`, or tries to build one by
/// scanning `torrent_files_dir` for a descriptor with a matching entry.
///
/// `Ok(None)` means no descriptor on disk can serve this info_hash: the
/// caller should close the connection without a reply, per the wire
/// protocol's handshake-failure behavior.
pub async fn resolve_or_build(
    workers: &WorkerMap,
    torrent_files_dir: &Path,
    files_dir: &Path,
    info_hash_hex: &str,
) -> Result<Option<Arc<FileWorker>>> {
    if let Some(worker) = workers.lock().await.get(info_hash_hex) {
        return Ok(Some(worker.clone()));
    }

    for name in torrent::list_descriptors(torrent_files_dir)? {
        let descriptor_path = torrent_files_dir.join(format!("{name}.torrent"));
        for entry in torrent::open(&descriptor_path)? {
            if entry.info_hash_hex() != info_hash_hex {
                continue;
            }
            let worker = Arc::new(FileWorker::from_entry(&entry, files_dir)?);
            let mut map = workers.lock().await;
            let worker = map
                .entry(info_hash_hex.to_string())
                .or_insert(worker)
                .clone();
            return Ok(Some(worker));
        }
    }
    Ok(None)
}

/// Drives one accepted connection through the seeder's state machine until
/// EOF or an unrecoverable error.
pub async fn handle_connection<S>(
    stream: S,
    workers: WorkerMap,
    torrent_files_dir: PathBuf,
    files_dir: PathBuf,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    loop {
        let line = match wire::read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "error reading from peer connection");
                return;
            }
        };

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                let _ = wire::write_error(&mut writer, &e.to_string()).await;
                continue;
            }
        };

        match command {
            Command::Test => {
                if wire::write_ok(&mut writer).await.is_err() {
                    return;
                }
            }
            Command::Handshake { info_hash_hex } => {
                match resolve_or_build(&workers, &torrent_files_dir, &files_dir, &info_hash_hex)
                    .await
                {
                    Ok(Some(_)) => {
                        if wire::write_ok(&mut writer).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(info_hash = %info_hash_hex, "no descriptor can serve this info_hash");
                        let _ = writer.shutdown().await;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to resolve handshake");
                        let _ = writer.shutdown().await;
                        return;
                    }
                }
            }
            Command::Requesting {
                info_hash_hex,
                piece_index,
            } => {
                let worker = workers.lock().await.get(&info_hash_hex).cloned();
                let worker = match worker {
                    Some(worker) => worker,
                    None => {
                        if wire::write_error(&mut writer, "Handshake required")
                            .await
                            .is_err()
                        {
                            return;
                        }
                        continue;
                    }
                };
                if piece_index >= worker.num_pieces() {
                    if wire::write_error(&mut writer, "Invalid piece index")
                        .await
                        .is_err()
                    {
                        return;
                    }
                    continue;
                }
                if wire::write_piece(&mut writer, &worker.pieces[piece_index])
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn setup(dir: &Path, contents: &[u8]) -> (PathBuf, PathBuf, FileEntry) {
        let files_dir = dir.join("files");
        let torrent_files_dir = dir.join("torrent_files");
        std::fs::create_dir_all(&files_dir).unwrap();
        std::fs::create_dir_all(&torrent_files_dir).unwrap();
        std::fs::write(files_dir.join("f.bin"), contents).unwrap();
        torrent::create(
            &files_dir,
            &torrent_files_dir,
            &["f.bin".to_string()],
            "tcp://tracker:8081",
        )
        .unwrap();
        let entry = torrent::open(
            &torrent_files_dir.join(
                torrent::list_descriptors(&torrent_files_dir).unwrap()[0].clone() + ".torrent",
            ),
        )
        .unwrap()
        .remove(0);
        (files_dir, torrent_files_dir, entry)
    }

    #[tokio::test]
    async fn test_probe_replies_ok() {
        let (client, server) = duplex(1024);
        let workers = new_worker_map();
        tokio::spawn(handle_connection(
            server,
            workers,
            PathBuf::from("torrent_files"),
            PathBuf::from("files"),
        ));

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(b"test:\n").await.unwrap();
        let line = wire::read_line(&mut BufReader::new(&mut read_half))
            .await
            .unwrap();
        assert_eq!(line, Some("OK".to_string()));
    }

    #[tokio::test]
    async fn unknown_info_hash_closes_without_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (files_dir, torrent_files_dir, _entry) = setup(dir.path(), b"hello world").await;

        let (client, server) = duplex(1024);
        let workers = new_worker_map();
        tokio::spawn(handle_connection(
            server,
            workers,
            torrent_files_dir,
            files_dir,
        ));

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half
            .write_all(b"HANDSHAKE:0000000000000000000000000000000000000000\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        use tokio::io::AsyncReadExt;
        let n = read_half.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn handshake_then_request_serves_piece() {
        let dir = tempfile::tempdir().unwrap();
        let (files_dir, torrent_files_dir, entry) = setup(dir.path(), b"hello world").await;

        let (client, server) = duplex(4096);
        let workers = new_worker_map();
        tokio::spawn(handle_connection(
            server,
            workers,
            torrent_files_dir,
            files_dir,
        ));

        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        let handshake = format!("HANDSHAKE:{}\n", entry.info_hash_hex());
        write_half.write_all(handshake.as_bytes()).await.unwrap();
        let reply = wire::read_line(&mut reader).await.unwrap();
        assert_eq!(reply, Some("OK".to_string()));

        let request = format!("Requesting:{}:0\n", entry.info_hash_hex());
        write_half.write_all(request.as_bytes()).await.unwrap();
        let piece = wire::read_piece(&mut reader).await.unwrap();
        assert_eq!(piece, b"hello world");
    }

    #[tokio::test]
    async fn request_without_handshake_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (files_dir, torrent_files_dir, entry) = setup(dir.path(), b"hello world").await;

        let (client, server) = duplex(4096);
        let workers = new_worker_map();
        tokio::spawn(handle_connection(
            server,
            workers,
            torrent_files_dir,
            files_dir,
        ));

        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        let request = format!("Requesting:{}:0\n", entry.info_hash_hex());
        write_half.write_all(request.as_bytes()).await.unwrap();
        let reply = wire::read_line(&mut reader).await.unwrap();
        assert_eq!(reply, Some("ERROR: Handshake required".to_string()));
    }
}

use std::path::PathBuf;
use std::time::Duration;

/// Nominal piece size: files are split into 256 KiB pieces, the last of
/// which may be shorter.
pub const PIECE_LENGTH: usize = 256 * 1024;

/// Number of worker tasks the downloader spawns per file, regardless of
/// how many peers are active. Workers are bound round-robin over the
/// active peer set (`worker[w] -> peers[w % peers.len()]`).
pub const NUM_WORKERS: usize = 3;

/// Settings shared by both the peer and tracker processes: where files and
/// descriptors live on disk, and the timeouts governing every dial a
/// downloader or seeder makes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding source and reassembled files.
    pub files_dir: PathBuf,
    /// Directory holding generated `.torrent` descriptors.
    pub torrent_files_dir: PathBuf,
    /// Timeout for a single liveness probe (`test:`).
    pub probe_timeout: Duration,
    /// Timeout for a standalone handshake dial during peer probing.
    pub handshake_timeout: Duration,
    /// Timeout for dialing a peer to request a piece.
    pub piece_dial_timeout: Duration,
    /// Deadline for reading a command's reply line (`OK`/`ERROR: ...`).
    /// Not applied to an in-flight piece payload, which is uncancellable
    /// once requested.
    pub read_deadline: Duration,
    /// Number of downloader worker tasks per file.
    pub num_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            files_dir: PathBuf::from("files"),
            torrent_files_dir: PathBuf::from("torrent_files"),
            probe_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            piece_dial_timeout: Duration::from_secs(60),
            read_deadline: Duration::from_secs(5),
            num_workers: NUM_WORKERS,
        }
    }
}

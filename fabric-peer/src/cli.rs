use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Directory holding source and reassembled files.
    #[arg(long, global = true, default_value = "files")]
    pub(crate) files_dir: PathBuf,

    /// Directory holding generated `.torrent` descriptors.
    #[arg(long, global = true, default_value = "torrent_files")]
    pub(crate) torrent_files_dir: PathBuf,

    /// This process's own advertised address, used when announcing to a
    /// tracker and when the tracker needs somewhere to point other peers.
    #[arg(long, global = true, default_value = "127.0.0.1:8080")]
    pub(crate) self_addr: String,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(clap::Subcommand)]
#[clap(rename_all = "snake_case")]
pub(crate) enum Command {
    /// Builds a descriptor for one or more files and writes it to
    /// `torrent_files_dir`.
    Create {
        tracker: String,
        #[arg(required = true)]
        file: Vec<String>,
    },
    /// Downloads every file named in a descriptor from the given peers.
    Download {
        torrent_name: String,
        #[arg(required = true)]
        peer_addr: Vec<String>,
    },
    /// Probes a peer's liveness.
    Test { peer_addr: String },
    /// Announces a file this process holds to a tracker.
    Announcetotracker {
        tracker: String,
        torrent_name: String,
    },
    /// Lists the peers a tracker currently has for a file.
    Getlistofpeers {
        tracker: String,
        torrent_name: String,
    },
    /// Lists the (tracker, file) pairs this process has announced during
    /// the current run.
    Getlistoftrackers,
    /// Runs the seeder: accepts inbound peer connections and serves
    /// pieces for every descriptor under `torrent_files_dir`.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,
    },
}

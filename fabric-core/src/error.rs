use std::path::PathBuf;

/// The error taxonomy shared by the torrent codec, the peer wire protocol,
/// and the tracker protocol.
///
/// Network and parse errors are usually recovered locally by the caller
/// (a bad piece or a dead peer does not abort a whole download); this type
/// exists so callers can match on *kind* rather than parse error strings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("network error talking to {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("protocol error: expected {expected}, got {got}")]
    Protocol { expected: String, got: String },

    #[error("hash mismatch for piece {0}")]
    HashMismatch(usize),

    #[error("missing piece {0}")]
    MissingPiece(usize),

    #[error("no peers available")]
    NoPeers,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn network(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        Error::Network {
            endpoint: endpoint.into(),
            source,
        }
    }

    pub fn protocol(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::Protocol {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

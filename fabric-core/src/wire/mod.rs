//! The peer wire protocol: line-oriented ASCII commands terminated by
//! `\n`, plus length-prefixed binary piece payloads.
//!
//! A single connection may carry multiple commands sequentially; see
//! `Command::READY` state machine description in the crate docs.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// A command sent by a client on one line of a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `test:`
    Test,
    /// `HANDSHAKE:<info_hash_hex>`
    Handshake { info_hash_hex: String },
    /// `Requesting:<info_hash_hex>:<piece_index>`
    Requesting {
        info_hash_hex: String,
        piece_index: usize,
    },
}

impl Command {
    /// Parses one already-trimmed line (no trailing `\n`) into a command.
    pub fn parse(line: &str) -> Result<Self> {
        if line == "test:" {
            return Ok(Command::Test);
        }
        if let Some(rest) = line.strip_prefix("HANDSHAKE:") {
            return Ok(Command::Handshake {
                info_hash_hex: rest.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("Requesting:") {
            let mut parts = rest.splitn(2, ':');
            let info_hash_hex = parts
                .next()
                .ok_or_else(|| Error::protocol("Requesting:<hash>:<index>", line))?
                .to_string();
            let index_str = parts
                .next()
                .ok_or_else(|| Error::protocol("Requesting:<hash>:<index>", line))?;
            let piece_index: usize = index_str
                .trim()
                .parse()
                .map_err(|_| Error::protocol("a numeric piece index", index_str))?;
            return Ok(Command::Requesting {
                info_hash_hex,
                piece_index,
            });
        }
        Err(Error::protocol("test:, HANDSHAKE:, or Requesting:", line))
    }
}

/// Reads one `\n`-terminated line from `reader` and returns it without the
/// trailing newline. Returns `Ok(None)` on a clean EOF before any bytes
/// were read (the peer closed the connection between commands).
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| Error::network("peer connection", e))?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Writes `OK\n`.
pub async fn write_ok<W>(writer: &mut W) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer
        .write_all(b"OK\n")
        .await
        .map_err(|e| Error::network("peer connection", e))
}

/// Writes `ERROR: <reason>\n`.
pub async fn write_error<W>(writer: &mut W, reason: &str) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let line = format!("ERROR: {}\n", reason);
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::network("peer connection", e))
}

/// Writes an 8-byte big-endian length prefix followed by `data`.
pub async fn write_piece<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let len = data.len() as u64;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| Error::network("peer connection", e))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| Error::network("peer connection", e))
}

/// Reads an 8-byte big-endian length prefix followed by exactly that many
/// bytes.
pub async fn read_piece<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 8];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| Error::network("peer connection", e))?;
    let len = u64::from_be_bytes(len_bytes) as usize;
    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|e| Error::network("peer connection", e))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_test_command() {
        assert_eq!(Command::parse("test:").unwrap(), Command::Test);
    }

    #[test]
    fn parses_handshake_command() {
        assert_eq!(
            Command::parse("HANDSHAKE:deadbeef").unwrap(),
            Command::Handshake {
                info_hash_hex: "deadbeef".to_string()
            }
        );
    }

    #[test]
    fn parses_requesting_command() {
        assert_eq!(
            Command::parse("Requesting:deadbeef:3").unwrap(),
            Command::Requesting {
                info_hash_hex: "deadbeef".to_string(),
                piece_index: 3
            }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Command::parse("nonsense").is_err());
    }

    #[test]
    fn rejects_non_numeric_piece_index() {
        assert!(Command::parse("Requesting:deadbeef:abc").is_err());
    }

    #[tokio::test]
    async fn round_trips_piece_frame() {
        let mut buf = Vec::new();
        write_piece(&mut buf, b"hello").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let data = read_piece(&mut cursor).await.unwrap();
        assert_eq!(data, b"hello");
    }
}

//! The torrent descriptor codec: file <-> pieces <-> hashes <-> descriptor.
//!
//! A descriptor is a bencoded dictionary with a single `announce` string and
//! an `info` list of per-file dictionaries (`{name, piece length, length,
//! pieces}`). This shape is non-standard relative to upstream BitTorrent
//! (which nests a single `info` dict, not a list) but is this system's wire
//! format; see the crate-level docs for why.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::config::PIECE_LENGTH;
use crate::error::{Error, Result};

/// On-disk bencoded descriptor: a tracker URL shared by every file entry,
/// plus one sub-dictionary per file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Descriptor {
    announce: String,
    info: Vec<FileInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileInfo {
    name: String,
    #[serde(rename = "piece length")]
    piece_length: usize,
    length: usize,
    pieces: Hashes,
}

/// A list of 20-byte SHA-1 digests, bencoded as their raw concatenation.
#[derive(Debug, Clone, Default)]
struct Hashes(Vec<[u8; 20]>);

impl Serialize for Hashes {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let concatenated: Vec<u8> = self.0.iter().flatten().copied().collect();
        serializer.serialize_bytes(&concatenated)
    }
}

impl<'de> Deserialize<'de> for Hashes {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        struct HashesVisitor;

        impl<'de> serde::de::Visitor<'de> for HashesVisitor {
            type Value = Hashes;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "a byte string whose length is a multiple of 20")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v.len() % 20 != 0 {
                    return Err(E::invalid_length(v.len(), &self));
                }
                Ok(Hashes(
                    v.chunks_exact(20)
                        .map(|chunk| chunk.try_into().expect("chunks_exact(20) yields 20 bytes"))
                        .collect(),
                ))
            }
        }

        deserializer.deserialize_bytes(HashesVisitor)
    }
}

/// A single shared file's metadata, reconstructed from (or about to be
/// written into) a descriptor.
///
/// `info_hash` is SHA-1 of the file name alone, not of the bencoded info
/// dictionary — see the crate-level docs for why this is preserved as-is.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub piece_length: usize,
    pub length: usize,
    pub piece_hashes: Vec<[u8; 20]>,
    pub info_hash: [u8; 20],
    pub announce: String,
}

impl FileEntry {
    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Expected size of piece `index`, accounting for a short final piece.
    pub fn piece_size(&self, index: usize) -> usize {
        if index == self.num_pieces() - 1 {
            let remainder = self.length % self.piece_length;
            if remainder == 0 {
                self.piece_length
            } else {
                remainder
            }
        } else {
            self.piece_length
        }
    }

    fn from_info(info: FileInfo, announce: String) -> Self {
        let info_hash: [u8; 20] = {
            let mut hasher = Sha1::new();
            hasher.update(info.name.as_bytes());
            hasher.finalize().into()
        };
        FileEntry {
            name: info.name,
            piece_length: info.piece_length,
            length: info.length,
            piece_hashes: info.pieces.0,
            info_hash,
            announce,
        }
    }

    fn to_info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            piece_length: self.piece_length,
            length: self.length,
            pieces: Hashes(self.piece_hashes.clone()),
        }
    }
}

/// Reads a file sequentially into fixed-size buffers, yielding one piece per
/// read, including a possibly-short final piece. A zero-length file yields
/// zero pieces.
fn split_into_pieces(path: &Path, piece_length: usize) -> Result<Vec<Vec<u8>>> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut pieces = Vec::new();
    let mut buf = vec![0u8; piece_length];
    loop {
        let n = read_fill(&mut file, &mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        pieces.push(buf[..n].to_vec());
        if n < piece_length {
            break;
        }
    }
    Ok(pieces)
}

/// Reads up to `buf.len()` bytes, stopping short only at EOF (unlike
/// `read_exact`, which treats a short read as an error).
fn read_fill(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Builds a descriptor from one or more source files under `files_dir` and
/// writes it to `torrent_files_dir/<hex(sha1(join(paths, ",")))>.torrent`.
///
/// Returns the path of the written descriptor.
pub fn create(
    files_dir: &Path,
    torrent_files_dir: &Path,
    paths: &[String],
    tracker_url: &str,
) -> Result<PathBuf> {
    let mut entries = Vec::with_capacity(paths.len());
    for name in paths {
        let source = files_dir.join(name);
        let pieces = split_into_pieces(&source, PIECE_LENGTH)?;
        let length: usize = pieces.iter().map(Vec::len).sum();
        let piece_hashes: Vec<[u8; 20]> = pieces
            .iter()
            .map(|piece| {
                let mut hasher = Sha1::new();
                hasher.update(piece);
                hasher.finalize().into()
            })
            .collect();
        entries.push(FileEntry {
            name: name.clone(),
            piece_length: PIECE_LENGTH,
            length,
            piece_hashes,
            info_hash: {
                let mut hasher = Sha1::new();
                hasher.update(name.as_bytes());
                hasher.finalize().into()
            },
            announce: tracker_url.to_string(),
        });
    }

    let descriptor = Descriptor {
        announce: tracker_url.to_string(),
        info: entries.iter().map(FileEntry::to_info).collect(),
    };

    let combined = paths.join(",");
    let mut hasher = Sha1::new();
    hasher.update(combined.as_bytes());
    let descriptor_name = format!("{}.torrent", hex::encode(hasher.finalize()));
    let descriptor_path = torrent_files_dir.join(&descriptor_name);

    let bytes = serde_bencode::to_bytes(&descriptor)
        .map_err(|e| Error::MalformedDescriptor(e.to_string()))?;
    let mut out = File::create(&descriptor_path).map_err(|e| Error::io(&descriptor_path, e))?;
    out.write_all(&bytes)
        .map_err(|e| Error::io(&descriptor_path, e))?;

    Ok(descriptor_path)
}

/// Parses a descriptor and reconstructs its file entries, each with its
/// `info_hash` computed.
pub fn open(descriptor_path: &Path) -> Result<Vec<FileEntry>> {
    let bytes = std::fs::read(descriptor_path).map_err(|e| Error::io(descriptor_path, e))?;
    let descriptor: Descriptor = serde_bencode::from_bytes(&bytes)
        .map_err(|e| Error::MalformedDescriptor(e.to_string()))?;
    Ok(descriptor
        .info
        .into_iter()
        .map(|info| FileEntry::from_info(info, descriptor.announce.clone()))
        .collect())
}

/// Lists the basenames (without `.torrent`) of every descriptor available
/// in `torrent_files_dir`.
///
/// Used by the seeder to decide whether it can resolve a handshake's
/// info_hash at all: only descriptors already on disk are eligible.
pub fn list_descriptors(torrent_files_dir: &Path) -> Result<Vec<String>> {
    let entries =
        std::fs::read_dir(torrent_files_dir).map_err(|e| Error::io(torrent_files_dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(torrent_files_dir, e))?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(stem) = file_name.strip_suffix(".torrent") {
            names.push(stem.to_string());
        }
    }
    Ok(names)
}

/// Reads a file sequentially into the piece list without hashing. Used by
/// the seeder, which trusts the descriptor's hashes rather than
/// recomputing them on every handshake.
pub fn stream_pieces(file_path: &Path, piece_length: usize) -> Result<Vec<Vec<u8>>> {
    split_into_pieces(file_path, piece_length)
}

/// Creates `output_path` and appends pieces `0..entry.num_pieces()` in
/// order, verbatim (no cross-piece padding).
pub fn merge(
    output_path: &Path,
    entry: &FileEntry,
    pieces_by_index: &HashMap<usize, Vec<u8>>,
) -> Result<()> {
    let mut out = File::create(output_path).map_err(|e| Error::io(output_path, e))?;
    for i in 0..entry.num_pieces() {
        let data = pieces_by_index.get(&i).ok_or(Error::MissingPiece(i))?;
        out.write_all(data).map_err(|e| Error::io(output_path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_random_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        // Deterministic, not cryptographically random: good enough for a
        // byte-identical round trip check.
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        path
    }

    #[test]
    fn round_trips_single_file_with_short_last_piece() {
        let dir = tempfile::tempdir().unwrap();
        let files_dir = dir.path().join("files");
        let torrent_files_dir = dir.path().join("torrent_files");
        std::fs::create_dir_all(&files_dir).unwrap();
        std::fs::create_dir_all(&torrent_files_dir).unwrap();

        let len = 4 * PIECE_LENGTH + 1;
        write_random_file(&files_dir, "f.bin", len);

        let descriptor_path = create(
            &files_dir,
            &torrent_files_dir,
            &["f.bin".to_string()],
            "tcp://tracker:8081",
        )
        .unwrap();

        let entries = open(&descriptor_path).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.length, len);
        assert_eq!(entry.num_pieces(), 5);
        assert_eq!(entry.piece_size(4), 1);
        assert_eq!(entry.piece_size(0), PIECE_LENGTH);

        let pieces = stream_pieces(&files_dir.join("f.bin"), entry.piece_length).unwrap();
        assert_eq!(pieces.len(), 5);
        for (i, piece) in pieces.iter().enumerate() {
            let mut hasher = Sha1::new();
            hasher.update(piece);
            let hash: [u8; 20] = hasher.finalize().into();
            assert_eq!(hash, entry.piece_hashes[i]);
        }

        let mut pieces_by_index = HashMap::new();
        for (i, piece) in pieces.into_iter().enumerate() {
            pieces_by_index.insert(i, piece);
        }
        let output_path = dir.path().join("out.bin");
        merge(&output_path, entry, &pieces_by_index).unwrap();

        let original = std::fs::read(files_dir.join("f.bin")).unwrap();
        let merged = std::fs::read(&output_path).unwrap();
        assert_eq!(original, merged);
    }

    #[test]
    fn zero_length_file_has_zero_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let files_dir = dir.path().join("files");
        let torrent_files_dir = dir.path().join("torrent_files");
        std::fs::create_dir_all(&files_dir).unwrap();
        std::fs::create_dir_all(&torrent_files_dir).unwrap();
        write_random_file(&files_dir, "empty.bin", 0);

        let descriptor_path = create(
            &files_dir,
            &torrent_files_dir,
            &["empty.bin".to_string()],
            "tcp://tracker:8081",
        )
        .unwrap();
        let entries = open(&descriptor_path).unwrap();
        assert_eq!(entries[0].num_pieces(), 0);
        assert_eq!(entries[0].length, 0);
    }

    #[test]
    fn multi_file_descriptor_has_independent_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let files_dir = dir.path().join("files");
        let torrent_files_dir = dir.path().join("torrent_files");
        std::fs::create_dir_all(&files_dir).unwrap();
        std::fs::create_dir_all(&torrent_files_dir).unwrap();
        write_random_file(&files_dir, "a.bin", 100);
        write_random_file(&files_dir, "b.bin", PIECE_LENGTH + 10);

        let descriptor_path = create(
            &files_dir,
            &torrent_files_dir,
            &["a.bin".to_string(), "b.bin".to_string()],
            "tcp://tracker:8081",
        )
        .unwrap();
        let entries = open(&descriptor_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].info_hash, entries[1].info_hash);
        assert_eq!(entries[0].num_pieces(), 1);
        assert_eq!(entries[1].num_pieces(), 2);
    }

    #[test]
    fn merge_fails_on_missing_piece() {
        let dir = tempfile::tempdir().unwrap();
        let files_dir = dir.path().join("files");
        let torrent_files_dir = dir.path().join("torrent_files");
        std::fs::create_dir_all(&files_dir).unwrap();
        std::fs::create_dir_all(&torrent_files_dir).unwrap();
        write_random_file(&files_dir, "f.bin", PIECE_LENGTH * 2);

        let descriptor_path = create(
            &files_dir,
            &torrent_files_dir,
            &["f.bin".to_string()],
            "tcp://tracker:8081",
        )
        .unwrap();
        let entries = open(&descriptor_path).unwrap();
        let pieces_by_index = HashMap::new();
        let output_path = dir.path().join("out.bin");
        let err = merge(&output_path, &entries[0], &pieces_by_index).unwrap_err();
        assert!(matches!(err, Error::MissingPiece(0)));
    }
}

/// A unit of work handed to a downloader worker: fetch piece `index`,
/// expected to hash to `expected_hash` and be `nominal_size` bytes (or
/// shorter, for the final piece of a file).
#[derive(Debug, Clone)]
pub struct PieceWork {
    pub index: usize,
    pub expected_hash: [u8; 20],
    pub nominal_size: usize,
}

/// The outcome of one worker's attempt at a `PieceWork` unit.
///
/// A failed fetch does not abort the download: the driver logs it and
/// moves on, leaving that index absent from the final merge (which then
/// fails with `MissingPiece`).
#[derive(Debug)]
pub struct PieceResult {
    pub index: usize,
    pub outcome: std::result::Result<Vec<u8>, crate::error::Error>,
}

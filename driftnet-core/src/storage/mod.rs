//! Block storage for downloaded pieces.
//!
//! Defines the storage contract the wire protocol writes through, with a
//! file-per-piece implementation.

pub mod file_storage;
pub mod ranges;

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
pub use file_storage::FileStorage;
pub use ranges::RangeSet;

use crate::torrent::{InfoHash, PieceIndex};

/// Storage operations for piece blocks.
///
/// Blocks may arrive in any order; implementations track which byte ranges
/// of each piece have been written.
#[async_trait]
pub trait PieceStorage: Send + Sync {
    /// Writes `data` at `offset` within the piece, creating it if needed.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If file system operation failed
    async fn write_block(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        offset: u32,
        data: &[u8],
    ) -> Result<(), StorageError>;

    /// Reads `length` bytes at `offset` within the piece.
    ///
    /// # Errors
    ///
    /// - `StorageError::OutOfRange` - If the range was never fully written
    /// - `StorageError::Io` - If file system operation failed
    async fn read_block(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Bytes, StorageError>;

    /// Byte ranges of the piece written so far, merged and ascending.
    fn written_ranges(&self, info_hash: InfoHash, piece: PieceIndex) -> Vec<Range<u64>>;
}

/// Errors that occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Read touched bytes that were never written
    #[error("Piece {piece}: bytes {offset}..{end} not written")]
    OutOfRange {
        piece: PieceIndex,
        offset: u64,
        end: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

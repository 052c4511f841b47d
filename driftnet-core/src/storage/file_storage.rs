//! File-per-piece storage implementation

use std::collections::HashMap;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{PieceStorage, RangeSet, StorageError};
use crate::torrent::{InfoHash, PieceIndex};

/// Stores each piece as its own file at `<dir>/<info hash hex>/<index>`.
///
/// Files are created on first write. Written ranges are tracked in memory
/// only, so a restarted node forgets partially written pieces.
pub struct FileStorage {
    dir: PathBuf,
    written: Mutex<HashMap<(InfoHash, PieceIndex), RangeSet>>,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn piece_path(&self, info_hash: InfoHash, piece: PieceIndex) -> PathBuf {
        self.dir
            .join(info_hash.to_string())
            .join(piece.as_u32().to_string())
    }

    /// Creates the storage directory and checks a file can be written in it.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Directory missing and not creatable, or read-only
    pub async fn ensure_writable(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        let probe = self.dir.join(".driftnet-write-probe");
        fs::write(&probe, b"").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }
}

#[async_trait]
impl PieceStorage for FileStorage {
    async fn write_block(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        offset: u32,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.piece_path(info_hash, piece);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.seek(SeekFrom::Start(u64::from(offset))).await?;
        file.write_all(data).await?;
        file.flush().await?;

        let start = u64::from(offset);
        self.written
            .lock()
            .entry((info_hash, piece))
            .or_default()
            .insert(start..start + data.len() as u64);

        tracing::trace!(
            "Wrote {} bytes at {} of piece {} ({})",
            data.len(),
            offset,
            piece,
            info_hash
        );
        Ok(())
    }

    async fn read_block(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Bytes, StorageError> {
        let start = u64::from(offset);
        let range = start..start + u64::from(length);
        let covered = self
            .written
            .lock()
            .get(&(info_hash, piece))
            .is_some_and(|set| set.covers(&range));

        // Pieces written by an earlier run have no in-memory ranges; trust the file length.
        if !covered {
            let on_disk = match fs::metadata(self.piece_path(info_hash, piece)).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };
            if on_disk < range.end {
                return Err(StorageError::OutOfRange {
                    piece,
                    offset: range.start,
                    end: range.end,
                });
            }
        }

        let mut file = fs::File::open(self.piece_path(info_hash, piece)).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    fn written_ranges(&self, info_hash: InfoHash, piece: PieceIndex) -> Vec<Range<u64>> {
        self.written
            .lock()
            .get(&(info_hash, piece))
            .map(|set| set.ranges().to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn info_hash() -> InfoHash {
        InfoHash::new([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ])
    }

    #[tokio::test]
    async fn test_blocks_written_out_of_order_read_back() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());
        let piece = PieceIndex::new(3);

        storage.write_block(info_hash(), piece, 4, b"efgh").await.unwrap();
        storage.write_block(info_hash(), piece, 0, b"abcd").await.unwrap();

        let data = storage.read_block(info_hash(), piece, 0, 8).await.unwrap();
        assert_eq!(data.as_ref(), b"abcdefgh");
        assert_eq!(storage.written_ranges(info_hash(), piece), vec![0..8]);
        assert!(
            temp.path()
                .join("0123456789abcdef0123456789abcdef01234567")
                .join("3")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_read_of_unwritten_range_fails() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());
        let piece = PieceIndex::new(0);

        assert!(matches!(
            storage.read_block(info_hash(), piece, 0, 4).await,
            Err(StorageError::OutOfRange { .. })
        ));

        storage.write_block(info_hash(), piece, 0, b"ab").await.unwrap();
        assert!(matches!(
            storage.read_block(info_hash(), piece, 0, 4).await,
            Err(StorageError::OutOfRange { offset: 0, end: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_pieces_from_previous_run_are_readable() {
        let temp = TempDir::new().unwrap();
        let piece = PieceIndex::new(1);
        FileStorage::new(temp.path())
            .write_block(info_hash(), piece, 0, b"persisted")
            .await
            .unwrap();

        let reopened = FileStorage::new(temp.path());
        let data = reopened.read_block(info_hash(), piece, 2, 4).await.unwrap();

        assert_eq!(data.as_ref(), b"rsis");
        assert!(reopened.written_ranges(info_hash(), piece).is_empty());
    }

    #[tokio::test]
    async fn test_ensure_writable_creates_directory() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path().join("nested").join("storage"));

        storage.ensure_writable().await.unwrap();

        assert!(storage.dir().is_dir());
        assert_eq!(std::fs::read_dir(storage.dir()).unwrap().count(), 0);
    }
}

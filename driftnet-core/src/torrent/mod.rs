//! Torrent coordination: piece bitfields, peers and the per-torrent state

pub mod bitfield;
pub mod peer;
pub mod peer_manager;
pub mod torrent_state;

use std::fmt;
use std::str::FromStr;

pub use bitfield::Bitfield;
pub use peer::{ClientHandle, Peer, PeerConnector, RequestState};
pub use peer_manager::PeerManager;
pub use torrent_state::{
    PeerSummary, PieceAssignment, Torrent, TorrentInfo, TorrentLayout, TorrentView,
};

use crate::bencode::BencodeError;
use crate::storage::StorageError;

/// SHA-1 hash identifying a unique torrent.
///
/// Registry key for torrents. Parsed from and displayed as 40 hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20 raw bytes.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses 40 hex characters, either case.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidInfoHash` - Wrong length or non-hex characters
    pub fn from_hex(text: &str) -> Result<Self, TorrentError> {
        let mut hash = [0u8; 20];
        hex::decode_to_slice(text, &mut hash).map_err(|_| TorrentError::InvalidInfoHash {
            value: text.to_string(),
        })?;
        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for InfoHash {
    type Err = TorrentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during torrent operations.
///
/// Connection-scoped variants (protocol, identity) close one peer session;
/// tracker variants make the registry retry on its next tick.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Invalid info hash '{value}', expected 40 hex characters")]
    InvalidInfoHash { value: String },

    #[error("Torrent {info_hash} not found")]
    TorrentNotFound { info_hash: InfoHash },

    #[error("Torrent {info_hash} is already registered")]
    DuplicateTorrent { info_hash: InfoHash },

    #[error("Piece {index} out of range for {total} pieces")]
    PieceOutOfRange { index: u32, total: u32 },

    #[error("Invalid piece hashes: {reason}")]
    InvalidPieceHashes { reason: String },

    #[error("Piece {index} hash mismatch")]
    PieceHashMismatch { index: PieceIndex },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Remote peer presented our own peer id")]
    SelfConnection,

    #[error("Peer connection error: {reason}")]
    PeerConnectionError { reason: String },

    #[error("Tracker connection failed: {url}")]
    TrackerConnectionFailed { url: String },

    #[error("Tracker {url} returned HTTP {status}")]
    TrackerStatus { url: String, status: u16 },

    #[error("Tracker rejected announce: {reason}")]
    TrackerRejected { reason: String },

    #[error("Bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParsing(#[from] url::ParseError),

    #[error("Torrent engine has shut down")]
    EngineShutdown,
}

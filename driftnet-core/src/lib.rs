//! Driftnet Core - peer wire protocol and torrent coordination
//!
//! This crate provides the building blocks of a Driftnet node: the bencode
//! codec, bitfield piece tracking, the per-connection wire protocol state
//! machine, the torrent/peer registry driven by tracker polling, and the
//! block storage the protocol writes into.

pub mod bencode;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod storage;
pub mod torrent;
pub mod tracing_setup;
pub mod tracker;

pub use config::DriftnetConfig;
pub use engine::{EngineHandle, spawn_engine};
pub use storage::{FileStorage, PieceStorage, StorageError};
pub use torrent::{InfoHash, PieceIndex, TorrentError};

/// Top-level errors surfaced to the node binary.
#[derive(Debug, thiserror::Error)]
pub enum DriftnetError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriftnetError {
    /// Returns a short message suitable for an operator-facing response.
    pub fn user_message(&self) -> String {
        match self {
            DriftnetError::Torrent(e) => match e {
                TorrentError::InvalidInfoHash { value } => {
                    format!("'{value}' is not a 40 character hex info hash")
                }
                TorrentError::InvalidPieceHashes { reason } => {
                    format!("Invalid piece hashes: {reason}")
                }
                TorrentError::TorrentNotFound { info_hash } => {
                    format!("Torrent {info_hash} not found")
                }
                TorrentError::DuplicateTorrent { info_hash } => {
                    format!("Torrent {info_hash} is already registered")
                }
                TorrentError::PieceOutOfRange { index, total } => {
                    format!("Piece {index} is outside 0..{total}")
                }
                TorrentError::ProtocolError { message } => format!("Invalid request: {message}"),
                TorrentError::EngineShutdown => "Node is shutting down".to_string(),
                _ => "Torrent error occurred".to_string(),
            },
            DriftnetError::Storage(_) => "Storage error occurred".to_string(),
            DriftnetError::Configuration { reason } => format!("Configuration error: {reason}"),
            DriftnetError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error was caused by operator input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DriftnetError::Configuration { .. }
                | DriftnetError::Torrent(
                    TorrentError::InvalidInfoHash { .. }
                        | TorrentError::InvalidPieceHashes { .. }
                        | TorrentError::PieceOutOfRange { .. }
                        | TorrentError::DuplicateTorrent { .. }
                        | TorrentError::ProtocolError { .. }
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, DriftnetError>;

//! Handle for communicating with the engine actor.

use std::net::SocketAddrV4;

use tokio::sync::{mpsc, oneshot};

use super::commands::EngineCommand;
use crate::torrent::{
    Bitfield, InfoHash, PieceAssignment, PieceIndex, TorrentError, TorrentInfo, TorrentLayout,
    TorrentView,
};

/// Cloneable async API over the engine actor's command channel.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(sender: mpsc::Sender<EngineCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, TorrentError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(make(responder))
            .await
            .map_err(|_| TorrentError::EngineShutdown)?;

        rx.await.map_err(|_| TorrentError::EngineShutdown)
    }

    /// Registers a torrent. Tracker polling for it starts on the next tick.
    ///
    /// # Errors
    ///
    /// - `TorrentError::DuplicateTorrent` - Info hash already registered
    /// - `TorrentError::ProtocolError` - Invalid piece layout
    /// - `TorrentError::InvalidPieceHashes` - Hash count differs from the piece count
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn register_torrent(
        &self,
        info_hash: InfoHash,
        layout: TorrentLayout,
    ) -> Result<(), TorrentError> {
        self.request(|responder| EngineCommand::RegisterTorrent {
            info_hash,
            layout,
            responder,
        })
        .await?
    }

    /// Marks a piece wanted and wakes known peers.
    ///
    /// Returns whether the piece was newly wanted.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    /// - `TorrentError::PieceOutOfRange` - Index not below the piece count
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn add_piece(&self, info_hash: InfoHash, piece: PieceIndex) -> Result<bool, TorrentError> {
        self.request(|responder| EngineCommand::AddPiece {
            info_hash,
            piece,
            responder,
        })
        .await?
    }

    /// Adds peers directly, as if the tracker had returned them.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn add_peers(
        &self,
        info_hash: InfoHash,
        peers: Vec<SocketAddrV4>,
    ) -> Result<usize, TorrentError> {
        self.request(|responder| EngineCommand::AddPeers {
            info_hash,
            peers,
            responder,
        })
        .await?
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn torrent_info(&self, info_hash: InfoHash) -> Result<TorrentInfo, TorrentError> {
        self.request(|responder| EngineCommand::TorrentInfo {
            info_hash,
            responder,
        })
        .await?
    }

    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn list_torrents(&self) -> Result<Vec<TorrentInfo>, TorrentError> {
        self.request(|responder| EngineCommand::ListTorrents { responder })
            .await
    }

    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn lookup_torrent(&self, info_hash: InfoHash) -> Result<Option<TorrentView>, TorrentError> {
        self.request(|responder| EngineCommand::LookupTorrent {
            info_hash,
            responder,
        })
        .await
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn assign_piece(
        &self,
        info_hash: InfoHash,
        peer: SocketAddrV4,
        remote_have: Option<Bitfield>,
    ) -> Result<Option<PieceAssignment>, TorrentError> {
        self.request(|responder| EngineCommand::AssignPiece {
            info_hash,
            peer,
            remote_have,
            responder,
        })
        .await?
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn piece_finished(
        &self,
        info_hash: InfoHash,
        peer: Option<SocketAddrV4>,
        piece: PieceIndex,
        verified: bool,
    ) -> Result<(), TorrentError> {
        self.request(|responder| EngineCommand::PieceFinished {
            info_hash,
            peer,
            piece,
            verified,
            responder,
        })
        .await?
    }

    /// Reports that an outbound session ended.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Actor has stopped
    pub async fn session_closed(
        &self,
        info_hash: InfoHash,
        peer: SocketAddrV4,
        failed: bool,
    ) -> Result<(), TorrentError> {
        self.sender
            .send(EngineCommand::SessionClosed {
                info_hash,
                peer,
                failed,
            })
            .await
            .map_err(|_| TorrentError::EngineShutdown)
    }

    /// Stops the actor and waits for it to acknowledge.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Actor had already stopped
    pub async fn shutdown(&self) -> Result<(), TorrentError> {
        self.request(|responder| EngineCommand::Shutdown { responder })
            .await
    }
}

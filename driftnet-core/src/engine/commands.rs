//! Command definitions for the engine actor.

use std::net::SocketAddrV4;

use tokio::sync::oneshot;

use crate::torrent::{
    Bitfield, InfoHash, PieceAssignment, PieceIndex, TorrentError, TorrentInfo, TorrentLayout,
    TorrentView,
};
use crate::tracker::AnnounceResponse;

/// Commands processed sequentially by the engine actor.
///
/// Each request carries a responder for its result; notifications do not.
pub enum EngineCommand {
    /// Register a torrent by info hash and piece layout.
    RegisterTorrent {
        info_hash: InfoHash,
        layout: TorrentLayout,
        responder: oneshot::Sender<Result<(), TorrentError>>,
    },
    /// Mark a piece wanted; answers whether it was newly wanted.
    AddPiece {
        info_hash: InfoHash,
        piece: PieceIndex,
        responder: oneshot::Sender<Result<bool, TorrentError>>,
    },
    /// Add peers by hand, bypassing the tracker.
    AddPeers {
        info_hash: InfoHash,
        peers: Vec<SocketAddrV4>,
        responder: oneshot::Sender<Result<usize, TorrentError>>,
    },
    TorrentInfo {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<TorrentInfo, TorrentError>>,
    },
    ListTorrents {
        responder: oneshot::Sender<Vec<TorrentInfo>>,
    },
    /// Session lookup during handshake.
    LookupTorrent {
        info_hash: InfoHash,
        responder: oneshot::Sender<Option<TorrentView>>,
    },
    AssignPiece {
        info_hash: InfoHash,
        peer: SocketAddrV4,
        remote_have: Option<Bitfield>,
        responder: oneshot::Sender<Result<Option<PieceAssignment>, TorrentError>>,
    },
    PieceFinished {
        info_hash: InfoHash,
        peer: Option<SocketAddrV4>,
        piece: PieceIndex,
        verified: bool,
        responder: oneshot::Sender<Result<(), TorrentError>>,
    },
    /// Notification that an outbound session ended.
    SessionClosed {
        info_hash: InfoHash,
        peer: SocketAddrV4,
        failed: bool,
    },
    /// Internal: an announce task finished.
    TrackerChecked {
        info_hash: InfoHash,
        result: Result<AnnounceResponse, TorrentError>,
    },
    /// Stop the actor; outstanding sessions are aborted.
    Shutdown { responder: oneshot::Sender<()> },
}

//! Announce request/response types and the tracker client trait

use std::net::SocketAddrV4;

use async_trait::async_trait;

use crate::protocol::PeerId;
use crate::torrent::{InfoHash, TorrentError};

/// Tracker announce request.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    /// Local node's peer id
    pub peer_id: PeerId,
    /// TCP port of the local peer listener
    pub port: u16,
    pub event: AnnounceEvent,
    /// Peers requested from the tracker
    pub numwant: u32,
}

/// Announce events reported to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    Completed,
    Stopped,
}

impl AnnounceEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnounceEvent::Started => "started",
            AnnounceEvent::Completed => "completed",
            AnnounceEvent::Stopped => "stopped",
        }
    }
}

/// Tracker announce response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Seconds the tracker asks us to wait, when it says
    pub interval: Option<u32>,
    /// Peers decoded from the compact `peers` string
    pub peers: Vec<SocketAddrV4>,
}

/// Tracker communication used by the registry's polling loop.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Announces a torrent and returns the peers the tracker knows.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TrackerConnectionFailed` - Network error after all retries
    /// - `TorrentError::TrackerStatus` - Non-success HTTP status
    /// - `TorrentError::TrackerRejected` - Response carried a failure reason
    /// - `TorrentError::ProtocolError` - Malformed response
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, TorrentError>;

    /// Returns tracker URL for logging.
    fn tracker_url(&self) -> &str;
}

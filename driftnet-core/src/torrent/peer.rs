//! A remote peer and its outbound connection

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;

use super::{InfoHash, PieceIndex, TorrentError};
use crate::protocol::PeerId;

/// Opens outbound peer sessions.
///
/// `connect` must not block: implementations spawn the session and return a
/// handle immediately. An `Err` means the attempt could not even start.
pub trait PeerConnector: Send + Sync {
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - Session could not be started
    fn connect(&self, info_hash: InfoHash, addr: SocketAddrV4) -> Result<ClientHandle, TorrentError>;
}

/// Owns a running peer session. Dropping it aborts the session task.
#[derive(Debug)]
pub struct ClientHandle {
    abort: Option<AbortHandle>,
}

impl ClientHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// A handle with no task behind it, for connectors that only record dials.
    pub fn detached() -> Self {
        Self { abort: None }
    }

    pub fn is_finished(&self) -> bool {
        self.abort.as_ref().is_none_or(AbortHandle::is_finished)
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

/// Request lifecycle of a peer.
///
/// ```text
/// Idle | Unavailable --dial--> Connecting --assign--> InFlight
///                                   ^                    |
///                                   +----piece done------+
/// any --clean close--> Idle      any --failure--> Unavailable
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Connecting,
    InFlight { piece: PieceIndex },
    Unavailable { since: Instant },
}

/// A peer learned from the tracker, keyed by address in the peer manager.
#[derive(Debug)]
pub struct Peer {
    peer_id: PeerId,
    addr: SocketAddrV4,
    state: RequestState,
    client: Option<ClientHandle>,
}

impl Peer {
    pub fn new(peer_id: PeerId, addr: SocketAddrV4) -> Self {
        Self {
            peer_id,
            addr,
            state: RequestState::Idle,
            client: None,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Whether a retry may be attempted: idle, or unavailable for `retry_after`.
    pub fn can_retry(&self, now: Instant, retry_after: Duration) -> bool {
        match self.state {
            RequestState::Idle => self.client.is_none(),
            RequestState::Unavailable { since } => now.duration_since(since) >= retry_after,
            RequestState::Connecting | RequestState::InFlight { .. } => false,
        }
    }

    /// Asks the peer to start fetching wanted pieces.
    ///
    /// Skips peers with a session already running. Returns whether a
    /// connection attempt was started. A failed start leaves the peer
    /// `Unavailable` until the manager's timer retries it.
    pub fn on_pieces_request(&mut self, info_hash: InfoHash, connector: &dyn PeerConnector) -> bool {
        if self.client.is_some()
            || matches!(
                self.state,
                RequestState::Connecting | RequestState::InFlight { .. }
            )
        {
            tracing::trace!("Peer {} busy, skipping piece request", self.addr);
            return false;
        }

        match connector.connect(info_hash, self.addr) {
            Ok(handle) => {
                tracing::debug!("Dialing peer {} for {}", self.addr, info_hash);
                self.client = Some(handle);
                self.state = RequestState::Connecting;
                true
            }
            Err(e) => {
                tracing::warn!("Could not start session with {}: {}", self.addr, e);
                self.state = RequestState::Unavailable {
                    since: Instant::now(),
                };
                false
            }
        }
    }

    pub(crate) fn mark_assigned(&mut self, piece: PieceIndex) {
        self.state = RequestState::InFlight { piece };
    }

    pub(crate) fn mark_piece_done(&mut self) {
        if matches!(self.state, RequestState::InFlight { .. }) {
            self.state = RequestState::Connecting;
        }
    }

    /// Drops the session handle and records how it ended.
    pub(crate) fn on_session_closed(&mut self, failed: bool, now: Instant) {
        self.client = None;
        self.state = if failed {
            RequestState::Unavailable { since: now }
        } else {
            RequestState::Idle
        };
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use parking_lot::Mutex;

    use super::*;

    struct RecordingConnector {
        fail: bool,
        dials: Mutex<Vec<SocketAddrV4>>,
    }

    impl PeerConnector for RecordingConnector {
        fn connect(
            &self,
            _info_hash: InfoHash,
            addr: SocketAddrV4,
        ) -> Result<ClientHandle, TorrentError> {
            self.dials.lock().push(addr);
            if self.fail {
                return Err(TorrentError::PeerConnectionError {
                    reason: "refused".to_string(),
                });
            }
            Ok(ClientHandle::detached())
        }
    }

    fn peer() -> Peer {
        Peer::new(
            PeerId::new([b'p'; 20]),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6881),
        )
    }

    #[test]
    fn test_request_dials_once_while_busy() {
        let connector = RecordingConnector {
            fail: false,
            dials: Mutex::new(Vec::new()),
        };
        let mut peer = peer();
        let info_hash = InfoHash::new([1; 20]);

        assert!(peer.on_pieces_request(info_hash, &connector));
        assert!(!peer.on_pieces_request(info_hash, &connector));

        assert_eq!(connector.dials.lock().len(), 1);
        assert_eq!(peer.state(), RequestState::Connecting);
    }

    #[test]
    fn test_failed_dial_marks_unavailable() {
        let connector = RecordingConnector {
            fail: true,
            dials: Mutex::new(Vec::new()),
        };
        let mut peer = peer();

        assert!(!peer.on_pieces_request(InfoHash::new([1; 20]), &connector));

        assert!(matches!(peer.state(), RequestState::Unavailable { .. }));
        assert!(!peer.has_client());
    }

    #[test]
    fn test_state_transitions_through_a_session() {
        let mut peer = peer();
        let now = Instant::now();
        peer.client = Some(ClientHandle::detached());
        peer.state = RequestState::Connecting;

        peer.mark_assigned(PieceIndex::new(4));
        assert_eq!(
            peer.state(),
            RequestState::InFlight {
                piece: PieceIndex::new(4)
            }
        );
        peer.mark_piece_done();
        assert_eq!(peer.state(), RequestState::Connecting);

        peer.on_session_closed(true, now);
        assert!(!peer.can_retry(now, Duration::from_secs(5)));
        assert!(peer.can_retry(now + Duration::from_secs(5), Duration::from_secs(5)));

        peer.on_session_closed(false, now);
        assert_eq!(peer.state(), RequestState::Idle);
        assert!(peer.can_retry(now, Duration::from_secs(5)));
    }
}

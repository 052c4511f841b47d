//! Per-torrent peer registry and want-queue

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use super::peer::{Peer, PeerConnector};
use super::{Bitfield, InfoHash, PieceIndex};
use crate::protocol::PeerId;

/// Peers of one torrent, plus the FIFO of pieces waiting to be fetched.
///
/// Peers are keyed by address then port; the peer id plays no part in
/// identity, so a second sighting of the same endpoint is ignored.
#[derive(Debug, Default)]
pub struct PeerManager {
    peers: HashMap<Ipv4Addr, HashMap<u16, Peer>>,
    peer_count: usize,
    want_queue: VecDeque<PieceIndex>,
    in_flight: HashMap<PieceIndex, SocketAddrV4>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer, returning false when the endpoint is already known.
    pub fn peer_add(&mut self, peer_id: PeerId, addr: SocketAddrV4) -> bool {
        let by_port = self.peers.entry(*addr.ip()).or_default();
        if by_port.contains_key(&addr.port()) {
            tracing::trace!("Peer {} already known", addr);
            return false;
        }
        by_port.insert(addr.port(), Peer::new(peer_id, addr));
        self.peer_count += 1;
        tracing::debug!("Added peer {} ({})", addr, peer_id);
        true
    }

    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    pub fn peer(&self, addr: SocketAddrV4) -> Option<&Peer> {
        self.peers.get(addr.ip())?.get(&addr.port())
    }

    fn peer_mut(&mut self, addr: SocketAddrV4) -> Option<&mut Peer> {
        self.peers.get_mut(addr.ip())?.get_mut(&addr.port())
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values().flat_map(|by_port| by_port.values())
    }

    fn peers_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut().flat_map(|by_port| by_port.values_mut())
    }

    /// Queues a piece for download unless it is already queued.
    pub fn torrent_piece_added(&mut self, index: PieceIndex) -> bool {
        if self.want_queue.contains(&index) {
            return false;
        }
        self.want_queue.push_back(index);
        true
    }

    pub fn queued_pieces(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        self.want_queue.iter().copied()
    }

    /// Asks every peer to fetch wanted pieces after the peer set changed.
    ///
    /// Does nothing unless `want` has a set bit and at least one peer exists.
    /// Returns the number of connection attempts started.
    pub fn peers_updated(
        &mut self,
        info_hash: InfoHash,
        want: &Bitfield,
        connector: &dyn PeerConnector,
    ) -> usize {
        if want.set_bits() == 0 || self.peer_count == 0 {
            return 0;
        }
        self.peers_mut()
            .map(|peer| peer.on_pieces_request(info_hash, connector))
            .filter(|&started| started)
            .count()
    }

    /// Picks the oldest queued piece that is still wanted, not already being
    /// fetched, and (when the remote's bitfield is known) available remotely.
    pub fn assign_piece(
        &mut self,
        addr: SocketAddrV4,
        want: &Bitfield,
        remote_have: Option<&Bitfield>,
    ) -> Option<PieceIndex> {
        self.want_queue.retain(|index| want.has_bit(index.as_u32()));

        let piece = self.want_queue.iter().copied().find(|index| {
            !self.in_flight.contains_key(index)
                && remote_have.is_none_or(|have| have.has_bit(index.as_u32()))
        })?;

        self.in_flight.insert(piece, addr);
        if let Some(peer) = self.peer_mut(addr) {
            peer.mark_assigned(piece);
        }
        Some(piece)
    }

    /// Releases an in-flight piece; verified pieces leave the queue.
    pub fn on_piece_finished(&mut self, addr: Option<SocketAddrV4>, index: PieceIndex, verified: bool) {
        self.in_flight.remove(&index);
        if verified {
            self.want_queue.retain(|queued| *queued != index);
        }
        if let Some(peer) = addr.and_then(|addr| self.peer_mut(addr)) {
            peer.mark_piece_done();
        }
    }

    /// Clears a finished session; its in-flight pieces become assignable again.
    pub fn on_session_closed(&mut self, addr: SocketAddrV4, failed: bool, now: Instant) {
        self.in_flight.retain(|_, holder| *holder != addr);
        if let Some(peer) = self.peer_mut(addr) {
            peer.on_session_closed(failed, now);
        }
    }

    /// Health tick: redials idle peers and unavailable peers whose retry
    /// delay has passed, as long as pieces are wanted.
    pub fn on_timer(
        &mut self,
        info_hash: InfoHash,
        now: Instant,
        want: &Bitfield,
        retry_after: Duration,
        connector: &dyn PeerConnector,
    ) -> usize {
        if want.set_bits() == 0 {
            return 0;
        }
        self.peers_mut()
            .filter(|peer| peer.can_retry(now, retry_after))
            .map(|peer| peer.on_pieces_request(info_hash, connector))
            .filter(|&started| started)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::torrent::peer::{ClientHandle, RequestState};
    use crate::torrent::TorrentError;

    #[derive(Default)]
    struct RecordingConnector {
        dials: Mutex<Vec<SocketAddrV4>>,
    }

    impl PeerConnector for RecordingConnector {
        fn connect(
            &self,
            _info_hash: InfoHash,
            addr: SocketAddrV4,
        ) -> Result<ClientHandle, TorrentError> {
            self.dials.lock().push(addr);
            Ok(ClientHandle::detached())
        }
    }

    fn addr(last: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, last), port)
    }

    fn want_with(bits: &[u32]) -> Bitfield {
        let mut want = Bitfield::new(10);
        for &bit in bits {
            want.set_bit(bit).unwrap();
        }
        want
    }

    #[test]
    fn test_peer_add_dedups_by_endpoint() {
        let mut manager = PeerManager::new();

        assert!(manager.peer_add(PeerId::new([1; 20]), addr(1, 6881)));
        assert!(!manager.peer_add(PeerId::new([2; 20]), addr(1, 6881)));

        assert_eq!(manager.peer_count(), 1);
        assert_eq!(manager.peer(addr(1, 6881)).unwrap().peer_id(), PeerId::new([1; 20]));
    }

    #[test]
    fn test_same_ip_different_ports_are_distinct() {
        let mut manager = PeerManager::new();
        manager.peer_add(PeerId::new([1; 20]), addr(1, 6881));
        manager.peer_add(PeerId::new([1; 20]), addr(1, 6882));
        manager.peer_add(PeerId::new([1; 20]), addr(2, 6881));
        assert_eq!(manager.peer_count(), 3);
        assert_eq!(manager.peers().count(), 3);
    }

    #[test]
    fn test_want_queue_dedups() {
        let mut manager = PeerManager::new();
        assert!(manager.torrent_piece_added(PieceIndex::new(3)));
        assert!(!manager.torrent_piece_added(PieceIndex::new(3)));
        assert!(manager.torrent_piece_added(PieceIndex::new(1)));
        assert_eq!(
            manager.queued_pieces().collect::<Vec<_>>(),
            vec![PieceIndex::new(3), PieceIndex::new(1)]
        );
    }

    #[test]
    fn test_peers_updated_requires_wanted_pieces_and_peers() {
        let connector = RecordingConnector::default();
        let info_hash = InfoHash::new([9; 20]);
        let mut manager = PeerManager::new();

        assert_eq!(manager.peers_updated(info_hash, &want_with(&[3]), &connector), 0);

        manager.peer_add(PeerId::new([1; 20]), addr(1, 6881));
        assert_eq!(manager.peers_updated(info_hash, &want_with(&[]), &connector), 0);
        assert!(connector.dials.lock().is_empty());

        assert_eq!(manager.peers_updated(info_hash, &want_with(&[3]), &connector), 1);
        assert_eq!(*connector.dials.lock(), vec![addr(1, 6881)]);

        // Already connecting: no second dial.
        assert_eq!(manager.peers_updated(info_hash, &want_with(&[3]), &connector), 0);
    }

    #[test]
    fn test_assign_piece_is_fifo_and_exclusive() {
        let mut manager = PeerManager::new();
        manager.peer_add(PeerId::new([1; 20]), addr(1, 1));
        manager.peer_add(PeerId::new([2; 20]), addr(2, 2));
        manager.torrent_piece_added(PieceIndex::new(7));
        manager.torrent_piece_added(PieceIndex::new(2));
        let want = want_with(&[2, 7]);

        assert_eq!(manager.assign_piece(addr(1, 1), &want, None), Some(PieceIndex::new(7)));
        assert_eq!(manager.assign_piece(addr(2, 2), &want, None), Some(PieceIndex::new(2)));
        assert_eq!(manager.assign_piece(addr(2, 2), &want, None), None);
        assert_eq!(
            manager.peer(addr(1, 1)).unwrap().state(),
            RequestState::InFlight {
                piece: PieceIndex::new(7)
            }
        );
    }

    #[test]
    fn test_assign_piece_respects_remote_bitfield() {
        let mut manager = PeerManager::new();
        manager.torrent_piece_added(PieceIndex::new(1));
        manager.torrent_piece_added(PieceIndex::new(4));
        let want = want_with(&[1, 4]);
        let remote = want_with(&[4]);

        assert_eq!(
            manager.assign_piece(addr(1, 1), &want, Some(&remote)),
            Some(PieceIndex::new(4))
        );
    }

    #[test]
    fn test_finished_and_closed_sessions_release_pieces() {
        let now = Instant::now();
        let mut manager = PeerManager::new();
        manager.peer_add(PeerId::new([1; 20]), addr(1, 1));
        manager.torrent_piece_added(PieceIndex::new(0));
        manager.torrent_piece_added(PieceIndex::new(1));
        let want = want_with(&[0, 1]);

        let first = manager.assign_piece(addr(1, 1), &want, None).unwrap();
        manager.on_piece_finished(Some(addr(1, 1)), first, false);
        // Unverified piece stays queued and is handed out again.
        assert_eq!(manager.assign_piece(addr(1, 1), &want, None), Some(first));

        manager.on_session_closed(addr(1, 1), true, now);
        assert!(matches!(
            manager.peer(addr(1, 1)).unwrap().state(),
            RequestState::Unavailable { .. }
        ));
        assert_eq!(manager.assign_piece(addr(1, 1), &want, None), Some(first));
    }

    #[test]
    fn test_timer_retries_unavailable_peers_after_delay() {
        let connector = RecordingConnector::default();
        let info_hash = InfoHash::new([9; 20]);
        let now = Instant::now();
        let retry = Duration::from_secs(30);
        let mut manager = PeerManager::new();
        manager.peer_add(PeerId::new([1; 20]), addr(1, 1));
        manager.on_session_closed(addr(1, 1), true, now);
        let want = want_with(&[5]);

        assert_eq!(manager.on_timer(info_hash, now, &want, retry, &connector), 0);
        assert_eq!(manager.on_timer(info_hash, now + retry, &want_with(&[]), retry, &connector), 0);
        assert_eq!(manager.on_timer(info_hash, now + retry, &want, retry, &connector), 1);
        assert_eq!(connector.dials.lock().len(), 1);
    }
}

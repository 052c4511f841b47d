//! Registry of torrents and their tracker polling schedule

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use crate::protocol::PeerId;
use crate::torrent::{InfoHash, PeerConnector, Torrent, TorrentError, TorrentInfo, TorrentLayout};
use crate::tracker::AnnounceResponse;

#[derive(Debug)]
struct TrackedTorrent {
    torrent: Torrent,
    next_check: Instant,
    being_checked: bool,
}

/// All registered torrents, keyed by info hash.
///
/// A torrent has at most one tracker check in flight; a failed check is
/// retried on the next tick, a successful one after the check interval (or
/// the tracker's own interval, if longer).
#[derive(Debug)]
pub struct TorrentRegistry {
    torrents: HashMap<InfoHash, TrackedTorrent>,
    check_interval: Duration,
    default_peer_id: PeerId,
}

impl TorrentRegistry {
    pub fn new(check_interval: Duration, default_peer_id: PeerId) -> Self {
        Self {
            torrents: HashMap::new(),
            check_interval,
            default_peer_id,
        }
    }

    /// Registers a torrent, due for a tracker check immediately.
    ///
    /// # Errors
    ///
    /// - `TorrentError::DuplicateTorrent` - Info hash already registered
    /// - `TorrentError::ProtocolError` - Invalid piece layout
    /// - `TorrentError::InvalidPieceHashes` - Hash count differs from the piece count
    pub fn register(
        &mut self,
        info_hash: InfoHash,
        layout: TorrentLayout,
        now: Instant,
    ) -> Result<&mut Torrent, TorrentError> {
        if self.torrents.contains_key(&info_hash) {
            return Err(TorrentError::DuplicateTorrent { info_hash });
        }
        tracing::info!(
            "Registering torrent {} ({} pieces of {} bytes, verified: {})",
            info_hash,
            layout.total_pieces,
            layout.piece_length,
            layout.piece_hashes.is_some()
        );
        let torrent = Torrent::new(info_hash, layout)?;

        let tracked = self.torrents.entry(info_hash).or_insert(TrackedTorrent {
            torrent,
            next_check: now,
            being_checked: false,
        });
        Ok(&mut tracked.torrent)
    }

    pub fn get(&self, info_hash: InfoHash) -> Option<&Torrent> {
        self.torrents.get(&info_hash).map(|tracked| &tracked.torrent)
    }

    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    pub fn get_mut(&mut self, info_hash: InfoHash) -> Result<&mut Torrent, TorrentError> {
        self.torrents
            .get_mut(&info_hash)
            .map(|tracked| &mut tracked.torrent)
            .ok_or(TorrentError::TorrentNotFound { info_hash })
    }

    pub fn len(&self) -> usize {
        self.torrents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty()
    }

    pub fn infos(&self) -> Vec<TorrentInfo> {
        let mut infos: Vec<TorrentInfo> = self
            .torrents
            .values()
            .map(|tracked| tracked.torrent.info())
            .collect();
        infos.sort_by(|a, b| a.info_hash.cmp(&b.info_hash));
        infos
    }

    /// Returns torrents due a tracker check and marks them in flight.
    pub fn due_for_check(&mut self, now: Instant) -> Vec<InfoHash> {
        self.torrents
            .iter_mut()
            .filter(|(_, tracked)| !tracked.being_checked && tracked.next_check <= now)
            .map(|(info_hash, tracked)| {
                tracked.being_checked = true;
                *info_hash
            })
            .collect()
    }

    /// Applies an announce result: new peers are added and woken.
    ///
    /// Returns the number of connection attempts started.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    pub fn on_tracker_response(
        &mut self,
        info_hash: InfoHash,
        result: Result<AnnounceResponse, TorrentError>,
        now: Instant,
        connector: &dyn PeerConnector,
    ) -> Result<usize, TorrentError> {
        let tracked = self
            .torrents
            .get_mut(&info_hash)
            .ok_or(TorrentError::TorrentNotFound { info_hash })?;
        tracked.being_checked = false;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Tracker check for {} failed: {}", info_hash, e);
                return Ok(0);
            }
        };

        let tracker_interval = response
            .interval
            .map(|secs| Duration::from_secs(u64::from(secs)))
            .unwrap_or_default();
        tracked.next_check = now + self.check_interval.max(tracker_interval);

        let added = response
            .peers
            .iter()
            .filter(|&&addr| tracked.torrent.add_peer_addr(self.default_peer_id, addr))
            .count();
        tracing::debug!(
            "Tracker returned {} peers for {} ({} new)",
            response.peers.len(),
            info_hash,
            added
        );
        Ok(tracked.torrent.peers_updated(connector))
    }

    /// Adds peers supplied out of band; returns how many were new.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Info hash not registered
    pub fn add_peers(
        &mut self,
        info_hash: InfoHash,
        peers: &[SocketAddrV4],
        connector: &dyn PeerConnector,
    ) -> Result<usize, TorrentError> {
        let default_peer_id = self.default_peer_id;
        let torrent = self.get_mut(info_hash)?;
        let added = peers
            .iter()
            .filter(|&&addr| torrent.add_peer_addr(default_peer_id, addr))
            .count();
        torrent.peers_updated(connector);
        Ok(added)
    }

    /// Peer health tick over every torrent; returns dials started.
    pub fn on_timer(&mut self, now: Instant, retry_after: Duration, connector: &dyn PeerConnector) -> usize {
        self.torrents
            .values_mut()
            .map(|tracked| tracked.torrent.on_timer(now, retry_after, connector))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use parking_lot::Mutex;

    use super::*;
    use crate::torrent::{ClientHandle, PieceIndex};

    #[derive(Default)]
    struct RecordingConnector {
        dials: Mutex<Vec<(InfoHash, SocketAddrV4)>>,
    }

    impl PeerConnector for RecordingConnector {
        fn connect(
            &self,
            info_hash: InfoHash,
            addr: SocketAddrV4,
        ) -> Result<ClientHandle, TorrentError> {
            self.dials.lock().push((info_hash, addr));
            Ok(ClientHandle::detached())
        }
    }

    fn registry() -> TorrentRegistry {
        TorrentRegistry::new(Duration::from_secs(10), PeerId::new(*b"xxxxxxxxxxxxxxxxxxxx"))
    }

    fn peers(count: u8) -> AnnounceResponse {
        AnnounceResponse {
            interval: None,
            peers: (1..=count)
                .map(|i| SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, i), 6881))
                .collect(),
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let info_hash = InfoHash::new([b'A'; 20]);
        let now = Instant::now();

        registry.register(info_hash, TorrentLayout::new(10, 16384), now).unwrap();
        let second = registry.register(info_hash, TorrentLayout::new(10, 16384), now);

        assert!(matches!(second, Err(TorrentError::DuplicateTorrent { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_hex_case_does_not_create_second_torrent() {
        let mut registry = registry();
        let now = Instant::now();
        let upper = InfoHash::from_hex(&"AB".repeat(20)).unwrap();
        let lower = InfoHash::from_hex(&"ab".repeat(20)).unwrap();

        registry.register(upper, TorrentLayout::new(4, 16384), now).unwrap();
        let second = registry.register(lower, TorrentLayout::new(4, 16384), now);

        assert!(matches!(second, Err(TorrentError::DuplicateTorrent { .. })));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(lower).is_some());
    }

    #[test]
    fn test_tracker_peers_trigger_one_dial_for_wanted_piece() {
        let connector = RecordingConnector::default();
        let mut registry = registry();
        let info_hash = InfoHash::new([b'A'; 20]);
        let now = Instant::now();

        let torrent = registry.register(info_hash, TorrentLayout::new(10, 16384), now).unwrap();
        torrent.add_piece(PieceIndex::new(3)).unwrap();
        let want = torrent.want().clone();
        assert_eq!(want.set_bits(), 1);
        assert_eq!(want.to_bytes().as_ref(), &[0x10, 0x00]);

        assert_eq!(registry.due_for_check(now), vec![info_hash]);
        let dials = registry
            .on_tracker_response(info_hash, Ok(peers(1)), now, &connector)
            .unwrap();

        assert_eq!(dials, 1);
        assert_eq!(
            *connector.dials.lock(),
            vec![(info_hash, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6881))]
        );
        let peer_id = registry
            .get(info_hash)
            .unwrap()
            .peer_manager()
            .peers()
            .next()
            .unwrap()
            .peer_id();
        assert_eq!(peer_id, PeerId::new(*b"xxxxxxxxxxxxxxxxxxxx"));
    }

    #[test]
    fn test_tracker_peers_without_wanted_pieces_do_not_dial() {
        let connector = RecordingConnector::default();
        let mut registry = registry();
        let info_hash = InfoHash::new([b'B'; 20]);
        let now = Instant::now();
        registry.register(info_hash, TorrentLayout::new(4, 16384), now).unwrap();

        registry.due_for_check(now);
        let dials = registry
            .on_tracker_response(info_hash, Ok(peers(3)), now, &connector)
            .unwrap();

        assert_eq!(dials, 0);
        assert!(connector.dials.lock().is_empty());
        assert_eq!(registry.get(info_hash).unwrap().peer_manager().peer_count(), 3);
    }

    #[test]
    fn test_check_schedule() {
        let connector = RecordingConnector::default();
        let mut registry = registry();
        let info_hash = InfoHash::new([b'C'; 20]);
        let now = Instant::now();
        registry.register(info_hash, TorrentLayout::new(4, 16384), now).unwrap();

        assert_eq!(registry.due_for_check(now), vec![info_hash]);
        // In flight: not handed out twice.
        assert!(registry.due_for_check(now).is_empty());

        let failure = Err(TorrentError::TrackerConnectionFailed {
            url: "http://tracker.test/announce".to_string(),
        });
        registry
            .on_tracker_response(info_hash, failure, now, &connector)
            .unwrap();
        assert_eq!(registry.due_for_check(now), vec![info_hash]);

        registry
            .on_tracker_response(info_hash, Ok(peers(0)), now, &connector)
            .unwrap();
        assert!(registry.due_for_check(now + Duration::from_secs(9)).is_empty());
        assert_eq!(
            registry.due_for_check(now + Duration::from_secs(10)),
            vec![info_hash]
        );
    }

    #[test]
    fn test_tracker_interval_extends_schedule() {
        let connector = RecordingConnector::default();
        let mut registry = registry();
        let info_hash = InfoHash::new([b'D'; 20]);
        let now = Instant::now();
        registry.register(info_hash, TorrentLayout::new(4, 16384), now).unwrap();
        registry.due_for_check(now);

        let response = AnnounceResponse {
            interval: Some(60),
            peers: Vec::new(),
        };
        registry
            .on_tracker_response(info_hash, Ok(response), now, &connector)
            .unwrap();

        assert!(registry.due_for_check(now + Duration::from_secs(30)).is_empty());
        assert_eq!(registry.due_for_check(now + Duration::from_secs(60)).len(), 1);
    }

    #[test]
    fn test_response_for_unknown_torrent() {
        let connector = RecordingConnector::default();
        let mut registry = registry();
        let result = registry.on_tracker_response(
            InfoHash::new([9; 20]),
            Ok(peers(1)),
            Instant::now(),
            &connector,
        );
        assert!(matches!(result, Err(TorrentError::TorrentNotFound { .. })));
    }
}

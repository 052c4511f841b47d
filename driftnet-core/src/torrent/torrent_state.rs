//! State of one registered torrent

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::peer::{PeerConnector, RequestState};
use super::{Bitfield, InfoHash, PeerManager, PieceIndex, TorrentError};
use crate::protocol::PeerId;

/// Snapshot of a torrent handed to peer sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentView {
    pub info_hash: InfoHash,
    pub total_pieces: u32,
    pub piece_length: u32,
    pub have: Bitfield,
}

/// A piece given to one session to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceAssignment {
    pub index: PieceIndex,
    pub length: u32,
    /// Expected SHA-1 of the piece, when the torrent was registered with hashes
    pub hash: Option<[u8; 20]>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PeerSummary {
    pub addr: String,
    pub peer_id: String,
    pub state: String,
}

/// Serializable status report for the control surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TorrentInfo {
    pub info_hash: String,
    pub total_pieces: u32,
    pub piece_length: u32,
    pub total_length: Option<u64>,
    /// Whether downloaded pieces are checked against SHA-1 hashes
    pub verifies_pieces: bool,
    pub have_count: u32,
    pub want_count: u32,
    pub wanted_pieces: Vec<u32>,
    pub peer_count: usize,
    pub peers: Vec<PeerSummary>,
}

/// Piece layout supplied when a torrent is registered.
///
/// Without `total_length` every piece is `piece_length` bytes long. With it,
/// the last piece is whatever remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentLayout {
    pub total_pieces: u32,
    pub piece_length: u32,
    pub total_length: Option<u64>,
    pub piece_hashes: Option<Vec<[u8; 20]>>,
}

impl TorrentLayout {
    pub fn new(total_pieces: u32, piece_length: u32) -> Self {
        Self {
            total_pieces,
            piece_length,
            total_length: None,
            piece_hashes: None,
        }
    }

    pub fn with_total_length(mut self, total_length: u64) -> Self {
        self.total_length = Some(total_length);
        self
    }

    pub fn with_piece_hashes(mut self, piece_hashes: Vec<[u8; 20]>) -> Self {
        self.piece_hashes = Some(piece_hashes);
        self
    }

    /// Parses concatenated SHA-1 digests written as hex, 40 characters each.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidPieceHashes` - Not hex or not a multiple of 40 characters
    pub fn parse_piece_hashes(text: &str) -> Result<Vec<[u8; 20]>, TorrentError> {
        if text.len() % 40 != 0 {
            return Err(TorrentError::InvalidPieceHashes {
                reason: format!("{} hex characters is not a multiple of 40", text.len()),
            });
        }
        let bytes = hex::decode(text).map_err(|e| TorrentError::InvalidPieceHashes {
            reason: e.to_string(),
        })?;
        Ok(bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }

    /// Checks that the hashes and total length agree with the piece count.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - Zero piece length or total length outside the last piece
    /// - `TorrentError::InvalidPieceHashes` - Hash count differs from the piece count
    pub fn validate(&self) -> Result<(), TorrentError> {
        if self.piece_length == 0 {
            return Err(TorrentError::ProtocolError {
                message: "piece length must be positive".to_string(),
            });
        }
        if let Some(hashes) = &self.piece_hashes {
            if hashes.len() != self.total_pieces as usize {
                return Err(TorrentError::InvalidPieceHashes {
                    reason: format!(
                        "{} piece hashes for {} pieces",
                        hashes.len(),
                        self.total_pieces
                    ),
                });
            }
        }
        if let Some(total_length) = self.total_length {
            let piece_length = u64::from(self.piece_length);
            let max = u64::from(self.total_pieces) * piece_length;
            let min = max.saturating_sub(piece_length);
            let fits = if self.total_pieces == 0 {
                total_length == 0
            } else {
                total_length > min && total_length <= max
            };
            if !fits {
                return Err(TorrentError::ProtocolError {
                    message: format!(
                        "total length {} does not fit {} pieces of {} bytes",
                        total_length, self.total_pieces, self.piece_length
                    ),
                });
            }
        }
        Ok(())
    }

    /// Length of one piece; only the last piece may be shorter.
    pub fn piece_size(&self, index: PieceIndex) -> u32 {
        let Some(total_length) = self.total_length else {
            return self.piece_length;
        };
        let start = u64::from(index.as_u32()) * u64::from(self.piece_length);
        let remaining = total_length.saturating_sub(start);
        // Bounded by piece_length, which is a u32.
        remaining.min(u64::from(self.piece_length)) as u32
    }
}

/// A torrent the node participates in: its piece bitfields and peers.
///
/// `have` and `want` always have `total_pieces` bits and never share a set
/// bit: completing a piece moves it from `want` to `have`.
#[derive(Debug)]
pub struct Torrent {
    info_hash: InfoHash,
    layout: TorrentLayout,
    have: Bitfield,
    want: Bitfield,
    peer_manager: PeerManager,
}

impl Torrent {
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - Zero piece length or bad total length
    /// - `TorrentError::InvalidPieceHashes` - Hash count mismatch
    pub fn new(info_hash: InfoHash, layout: TorrentLayout) -> Result<Self, TorrentError> {
        layout.validate()?;
        Ok(Self {
            info_hash,
            have: Bitfield::new(layout.total_pieces),
            want: Bitfield::new(layout.total_pieces),
            layout,
            peer_manager: PeerManager::new(),
        })
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn total_pieces(&self) -> u32 {
        self.layout.total_pieces
    }

    pub fn layout(&self) -> &TorrentLayout {
        &self.layout
    }

    pub fn have(&self) -> &Bitfield {
        &self.have
    }

    pub fn want(&self) -> &Bitfield {
        &self.want
    }

    pub fn peer_manager(&self) -> &PeerManager {
        &self.peer_manager
    }

    /// Marks a piece wanted and queues it for download.
    ///
    /// Returns `Ok(false)` when the piece is already owned or already wanted.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceOutOfRange` - Index not below `total_pieces`
    pub fn add_piece(&mut self, index: PieceIndex) -> Result<bool, TorrentError> {
        if index.as_u32() >= self.layout.total_pieces {
            return Err(TorrentError::PieceOutOfRange {
                index: index.as_u32(),
                total: self.layout.total_pieces,
            });
        }
        if self.have.has_bit(index.as_u32()) {
            tracing::debug!("Piece {} of {} already present", index, self.info_hash);
            return Ok(false);
        }
        let added = self.want.set_bit(index.as_u32())?;
        self.peer_manager.torrent_piece_added(index);
        Ok(added)
    }

    pub fn add_peer_addr(&mut self, peer_id: PeerId, addr: SocketAddrV4) -> bool {
        self.peer_manager.peer_add(peer_id, addr)
    }

    /// Tells the peer manager the peer set changed; returns dials started.
    pub fn peers_updated(&mut self, connector: &dyn PeerConnector) -> usize {
        self.peer_manager
            .peers_updated(self.info_hash, &self.want, connector)
    }

    /// Hands the session at `addr` the next piece it should download.
    pub fn assign_piece(
        &mut self,
        addr: SocketAddrV4,
        remote_have: Option<&Bitfield>,
    ) -> Option<PieceAssignment> {
        let index = self.peer_manager.assign_piece(addr, &self.want, remote_have)?;
        Some(PieceAssignment {
            index,
            length: self.layout.piece_size(index),
            hash: self
                .layout
                .piece_hashes
                .as_ref()
                .map(|hashes| hashes[index.as_usize()]),
        })
    }

    /// Records a finished download. Verified pieces move from `want` to `have`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PieceOutOfRange` - Index not below `total_pieces`
    pub fn piece_completed(
        &mut self,
        addr: Option<SocketAddrV4>,
        index: PieceIndex,
        verified: bool,
    ) -> Result<(), TorrentError> {
        if index.as_u32() >= self.layout.total_pieces {
            return Err(TorrentError::PieceOutOfRange {
                index: index.as_u32(),
                total: self.layout.total_pieces,
            });
        }
        if verified {
            self.have.set_bit(index.as_u32())?;
            self.want.clear_bit(index.as_u32())?;
        }
        self.peer_manager.on_piece_finished(addr, index, verified);
        Ok(())
    }

    pub fn session_closed(&mut self, addr: SocketAddrV4, failed: bool, now: Instant) {
        self.peer_manager.on_session_closed(addr, failed, now);
    }

    /// Periodic peer health check; returns dials started.
    pub fn on_timer(&mut self, now: Instant, retry_after: Duration, connector: &dyn PeerConnector) -> usize {
        self.peer_manager
            .on_timer(self.info_hash, now, &self.want, retry_after, connector)
    }

    pub fn view(&self) -> TorrentView {
        TorrentView {
            info_hash: self.info_hash,
            total_pieces: self.layout.total_pieces,
            piece_length: self.layout.piece_length,
            have: self.have.clone(),
        }
    }

    pub fn info(&self) -> TorrentInfo {
        let mut peers: Vec<PeerSummary> = self
            .peer_manager
            .peers()
            .map(|peer| PeerSummary {
                addr: peer.addr().to_string(),
                peer_id: peer.peer_id().to_string(),
                state: match peer.state() {
                    RequestState::Idle => "idle".to_string(),
                    RequestState::Connecting => "connecting".to_string(),
                    RequestState::InFlight { piece } => format!("downloading {piece}"),
                    RequestState::Unavailable { .. } => "unavailable".to_string(),
                },
            })
            .collect();
        peers.sort_by(|a, b| a.addr.cmp(&b.addr));

        TorrentInfo {
            info_hash: self.info_hash.to_string(),
            total_pieces: self.layout.total_pieces,
            piece_length: self.layout.piece_length,
            total_length: self.layout.total_length,
            verifies_pieces: self.layout.piece_hashes.is_some(),
            have_count: self.have.set_bits(),
            want_count: self.want.set_bits(),
            wanted_pieces: self.want.iter_set().collect(),
            peer_count: self.peer_manager.peer_count(),
            peers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn torrent(total: u32) -> Torrent {
        Torrent::new(InfoHash::new([b'A'; 20]), TorrentLayout::new(total, 16384)).unwrap()
    }

    #[test]
    fn test_new_validates_hash_count() {
        let layout = TorrentLayout::new(3, 16384).with_piece_hashes(vec![[0; 20]; 2]);
        let result = Torrent::new(InfoHash::new([1; 20]), layout);
        assert!(matches!(result, Err(TorrentError::InvalidPieceHashes { .. })));
        assert!(Torrent::new(InfoHash::new([1; 20]), TorrentLayout::new(3, 0)).is_err());
    }

    #[test]
    fn test_new_validates_total_length() {
        let fits = |total_length| TorrentLayout::new(3, 100).with_total_length(total_length).validate();
        assert!(fits(201).is_ok());
        assert!(fits(300).is_ok());
        assert!(fits(200).is_err());
        assert!(fits(301).is_err());
        assert!(TorrentLayout::new(0, 100).with_total_length(0).validate().is_ok());
    }

    #[test]
    fn test_last_piece_is_short() {
        let layout = TorrentLayout::new(3, 100).with_total_length(250);
        assert_eq!(layout.piece_size(PieceIndex::new(0)), 100);
        assert_eq!(layout.piece_size(PieceIndex::new(1)), 100);
        assert_eq!(layout.piece_size(PieceIndex::new(2)), 50);

        let even = TorrentLayout::new(3, 100).with_total_length(300);
        assert_eq!(even.piece_size(PieceIndex::new(2)), 100);
        assert_eq!(TorrentLayout::new(3, 100).piece_size(PieceIndex::new(2)), 100);

        let mut torrent = Torrent::new(InfoHash::new([4; 20]), layout).unwrap();
        let peer = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7001);
        torrent.add_piece(PieceIndex::new(2)).unwrap();
        assert_eq!(torrent.assign_piece(peer, None).unwrap().length, 50);
    }

    #[test]
    fn test_parse_piece_hashes() {
        let text = format!("{}{}", "01".repeat(20), "AB".repeat(20));
        let hashes = TorrentLayout::parse_piece_hashes(&text).unwrap();
        assert_eq!(hashes, vec![[0x01; 20], [0xab; 20]]);
        assert!(TorrentLayout::parse_piece_hashes("").unwrap().is_empty());

        assert!(matches!(
            TorrentLayout::parse_piece_hashes(&"0".repeat(41)),
            Err(TorrentError::InvalidPieceHashes { .. })
        ));
        assert!(matches!(
            TorrentLayout::parse_piece_hashes(&"zz".repeat(20)),
            Err(TorrentError::InvalidPieceHashes { .. })
        ));
    }

    #[test]
    fn test_add_piece_sets_want_bit() {
        let mut torrent = torrent(10);

        assert!(torrent.add_piece(PieceIndex::new(3)).unwrap());
        assert!(!torrent.add_piece(PieceIndex::new(3)).unwrap());

        assert_eq!(torrent.want().set_bits(), 1);
        assert!(torrent.want().has_bit(3));
        assert_eq!(torrent.have().set_bits(), 0);
    }

    #[test]
    fn test_add_piece_out_of_range() {
        let mut torrent = torrent(10);
        assert!(matches!(
            torrent.add_piece(PieceIndex::new(10)),
            Err(TorrentError::PieceOutOfRange {
                index: 10,
                total: 10
            })
        ));
    }

    #[test]
    fn test_completed_piece_moves_from_want_to_have() {
        let mut torrent = torrent(4);
        let peer = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7000);
        torrent.add_peer_addr(PeerId::new([1; 20]), peer);
        torrent.add_piece(PieceIndex::new(2)).unwrap();

        let assignment = torrent.assign_piece(peer, None).unwrap();
        assert_eq!(assignment.index, PieceIndex::new(2));
        assert_eq!(assignment.length, 16384);
        assert_eq!(assignment.hash, None);

        torrent.piece_completed(Some(peer), assignment.index, true).unwrap();

        assert!(torrent.have().has_bit(2));
        assert!(!torrent.want().has_bit(2));
        assert!(torrent.assign_piece(peer, None).is_none());
        assert!(!torrent.add_piece(PieceIndex::new(2)).unwrap());
    }

    #[test]
    fn test_assignment_carries_expected_hash() {
        let hashes = vec![[1; 20], [2; 20]];
        let layout = TorrentLayout::new(2, 8).with_piece_hashes(hashes);
        let mut torrent = Torrent::new(InfoHash::new([3; 20]), layout).unwrap();
        torrent.add_piece(PieceIndex::new(1)).unwrap();

        let assignment = torrent
            .assign_piece(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1), None)
            .unwrap();

        assert_eq!(assignment.hash, Some([2; 20]));
    }

    #[test]
    fn test_info_reports_counts_and_peers() {
        let mut torrent = torrent(8);
        torrent.add_piece(PieceIndex::new(5)).unwrap();
        torrent.add_piece(PieceIndex::new(1)).unwrap();
        torrent.add_peer_addr(
            PeerId::new([b'x'; 20]),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 6881),
        );

        let info = torrent.info();

        assert_eq!(info.info_hash, "41".repeat(20));
        assert_eq!(info.want_count, 2);
        assert_eq!(info.wanted_pieces, vec![1, 5]);
        assert_eq!(info.peer_count, 1);
        assert_eq!(info.peers[0].addr, "10.0.0.2:6881");
        assert_eq!(info.peers[0].peer_id, "xxxxxxxxxxxxxxxxxxxx");
        assert_eq!(info.peers[0].state, "idle");
    }
}

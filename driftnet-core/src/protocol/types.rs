//! Core types for the peer wire protocol

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::torrent::{InfoHash, PieceIndex, TorrentError};

/// Protocol string carried in every handshake.
pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// BitTorrent peer identifier.
///
/// 20 opaque bytes exchanged after the handshake header and sent to the
/// tracker in announces.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generate random peer ID for this client.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(b"-DN0001-");
        for byte in &mut id[8..] {
            *byte = rand::random_range(b'0'..=b'z');
        }
        Self(id)
    }
}

impl FromStr for PeerId {
    type Err = TorrentError;

    /// Accepts exactly 20 bytes of text, as given on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: [u8; 20] = s
            .as_bytes()
            .try_into()
            .map_err(|_| TorrentError::ProtocolError {
                message: format!("peer id must be 20 bytes, got {}", s.len()),
            })?;
        Ok(Self(id))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "{}", hex::encode(self.0))
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

/// Message type byte following the length prefix.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            other => return Err(other),
        })
    }
}

/// Messages exchanged after both handshake halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Zero-length frame
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: PieceIndex,
    },
    /// Packed have-bitfield of the sender
    Bitfield {
        bitfield: Bytes,
    },
    Request {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    Piece {
        piece_index: PieceIndex,
        offset: u32,
        data: Bytes,
    },
    Cancel {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    /// A well-framed message with an id we do not handle
    Unknown {
        id: u8,
        payload: Bytes,
    },
}

/// First part of the handshake: everything up to and including the info hash.
///
/// The peer id is framed separately because the acceptor must look up the
/// torrent, and reply, before the initiator's peer id is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeHeader {
    pub protocol: Bytes,
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
}

impl HandshakeHeader {
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            protocol: Bytes::from_static(PROTOCOL_STRING),
            reserved: [0u8; 8],
            info_hash,
        }
    }
}

/// A unit of the wire stream in whichever phase the connection is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(HandshakeHeader),
    PeerId(PeerId),
    Message(PeerMessage),
}

impl From<PeerMessage> for Frame {
    fn from(message: PeerMessage) -> Self {
        Frame::Message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_peer_id_has_client_prefix() {
        let id = PeerId::generate();
        assert_eq!(&id.as_bytes()[..8], b"-DN0001-");
        assert_ne!(PeerId::generate(), id);
    }

    #[test]
    fn test_peer_id_from_str() {
        let id: PeerId = "-DN0001-000000000000".parse().unwrap();
        assert_eq!(id.to_string(), "-DN0001-000000000000");
        assert!("short".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_message_id_conversion() {
        assert_eq!(MessageId::try_from(7), Ok(MessageId::Piece));
        assert_eq!(MessageId::try_from(20), Err(20));
    }
}

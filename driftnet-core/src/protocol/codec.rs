//! Frame codec for the peer wire protocol
//!
//! The decoder walks the three phases of a connection: handshake header,
//! peer id, then length-prefixed messages. A frame is only consumed once all
//! of its bytes have arrived, so messages split across reads are reassembled.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::types::{Frame, HandshakeHeader, MessageId, PeerId, PeerMessage};
use crate::torrent::{InfoHash, PieceIndex, TorrentError};

/// Largest message body accepted from a peer.
pub const MAX_MESSAGE_LEN: usize = (1 << 20) + 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshake,
    PeerId,
    Messages,
}

/// Stateful codec for one connection.
#[derive(Debug)]
pub struct WireCodec {
    phase: Phase,
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            phase: Phase::Handshake,
        }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn protocol_error(message: impl Into<String>) -> TorrentError {
    TorrentError::ProtocolError {
        message: message.into(),
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = TorrentError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TorrentError> {
        match self.phase {
            Phase::Handshake => {
                let Some(&pstrlen) = src.first() else {
                    return Ok(None);
                };
                let total = 1 + pstrlen as usize + 8 + 20;
                if src.len() < total {
                    src.reserve(total - src.len());
                    return Ok(None);
                }

                src.advance(1);
                let protocol = src.split_to(pstrlen as usize).freeze();
                let mut reserved = [0u8; 8];
                src.copy_to_slice(&mut reserved);
                let mut info_hash = [0u8; 20];
                src.copy_to_slice(&mut info_hash);

                self.phase = Phase::PeerId;
                Ok(Some(Frame::Handshake(HandshakeHeader {
                    protocol,
                    reserved,
                    info_hash: InfoHash::new(info_hash),
                })))
            }
            Phase::PeerId => {
                if src.len() < 20 {
                    return Ok(None);
                }
                let mut id = [0u8; 20];
                src.copy_to_slice(&mut id);
                self.phase = Phase::Messages;
                Ok(Some(Frame::PeerId(PeerId::new(id))))
            }
            Phase::Messages => {
                if src.len() < 4 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
                if len > MAX_MESSAGE_LEN {
                    return Err(protocol_error(format!("message length {len} exceeds limit")));
                }
                if src.len() < 4 + len {
                    src.reserve(4 + len - src.len());
                    return Ok(None);
                }

                src.advance(4);
                let body = src.split_to(len).freeze();
                decode_message(body).map(|message| Some(Frame::Message(message)))
            }
        }
    }
}

fn expect_len(id: MessageId, body: &Bytes, expected: usize) -> Result<(), TorrentError> {
    if body.len() != expected {
        return Err(protocol_error(format!(
            "{id:?} body is {} bytes, expected {expected}",
            body.len()
        )));
    }
    Ok(())
}

fn decode_message(mut body: Bytes) -> Result<PeerMessage, TorrentError> {
    if body.is_empty() {
        return Ok(PeerMessage::KeepAlive);
    }

    let raw_id = body.get_u8();
    let id = match MessageId::try_from(raw_id) {
        Ok(id) => id,
        Err(id) => return Ok(PeerMessage::Unknown { id, payload: body }),
    };

    let message = match id {
        MessageId::Choke => {
            expect_len(id, &body, 0)?;
            PeerMessage::Choke
        }
        MessageId::Unchoke => {
            expect_len(id, &body, 0)?;
            PeerMessage::Unchoke
        }
        MessageId::Interested => {
            expect_len(id, &body, 0)?;
            PeerMessage::Interested
        }
        MessageId::NotInterested => {
            expect_len(id, &body, 0)?;
            PeerMessage::NotInterested
        }
        MessageId::Have => {
            expect_len(id, &body, 4)?;
            PeerMessage::Have {
                piece_index: PieceIndex::new(body.get_u32()),
            }
        }
        MessageId::Bitfield => PeerMessage::Bitfield { bitfield: body },
        MessageId::Request | MessageId::Cancel => {
            expect_len(id, &body, 12)?;
            let piece_index = PieceIndex::new(body.get_u32());
            let offset = body.get_u32();
            let length = body.get_u32();
            if id == MessageId::Request {
                PeerMessage::Request {
                    piece_index,
                    offset,
                    length,
                }
            } else {
                PeerMessage::Cancel {
                    piece_index,
                    offset,
                    length,
                }
            }
        }
        MessageId::Piece => {
            if body.len() < 8 {
                return Err(protocol_error("Piece body shorter than its header"));
            }
            let piece_index = PieceIndex::new(body.get_u32());
            let offset = body.get_u32();
            PeerMessage::Piece {
                piece_index,
                offset,
                data: body,
            }
        }
    };

    Ok(message)
}

impl Encoder<Frame> for WireCodec {
    type Error = TorrentError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), TorrentError> {
        match item {
            Frame::Handshake(header) => {
                let pstrlen = u8::try_from(header.protocol.len())
                    .map_err(|_| protocol_error("protocol string longer than 255 bytes"))?;
                dst.reserve(1 + header.protocol.len() + 28);
                dst.put_u8(pstrlen);
                dst.put_slice(&header.protocol);
                dst.put_slice(&header.reserved);
                dst.put_slice(header.info_hash.as_bytes());
            }
            Frame::PeerId(id) => dst.put_slice(id.as_bytes()),
            Frame::Message(message) => encode_message(message, dst),
        }
        Ok(())
    }
}

fn encode_message(message: PeerMessage, dst: &mut BytesMut) {
    match message {
        PeerMessage::KeepAlive => dst.put_u32(0),
        PeerMessage::Choke => put_bare(dst, MessageId::Choke),
        PeerMessage::Unchoke => put_bare(dst, MessageId::Unchoke),
        PeerMessage::Interested => put_bare(dst, MessageId::Interested),
        PeerMessage::NotInterested => put_bare(dst, MessageId::NotInterested),
        PeerMessage::Have { piece_index } => {
            dst.put_u32(5);
            dst.put_u8(MessageId::Have as u8);
            dst.put_u32(piece_index.as_u32());
        }
        PeerMessage::Bitfield { bitfield } => {
            dst.put_u32(1 + bitfield.len() as u32);
            dst.put_u8(MessageId::Bitfield as u8);
            dst.put_slice(&bitfield);
        }
        PeerMessage::Request {
            piece_index,
            offset,
            length,
        } => put_block_ref(dst, MessageId::Request, piece_index, offset, length),
        PeerMessage::Cancel {
            piece_index,
            offset,
            length,
        } => put_block_ref(dst, MessageId::Cancel, piece_index, offset, length),
        PeerMessage::Piece {
            piece_index,
            offset,
            data,
        } => {
            dst.reserve(13 + data.len());
            dst.put_u32(9 + data.len() as u32);
            dst.put_u8(MessageId::Piece as u8);
            dst.put_u32(piece_index.as_u32());
            dst.put_u32(offset);
            dst.put_slice(&data);
        }
        PeerMessage::Unknown { id, payload } => {
            dst.put_u32(1 + payload.len() as u32);
            dst.put_u8(id);
            dst.put_slice(&payload);
        }
    }
}

fn put_bare(dst: &mut BytesMut, id: MessageId) {
    dst.put_u32(1);
    dst.put_u8(id as u8);
}

// <len=0013><id><index><begin><length>
fn put_block_ref(dst: &mut BytesMut, id: MessageId, piece: PieceIndex, offset: u32, length: u32) {
    dst.put_u32(13);
    dst.put_u8(id as u8);
    dst.put_u32(piece.as_u32());
    dst.put_u32(offset);
    dst.put_u32(length);
}

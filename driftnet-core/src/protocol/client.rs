//! Per-connection wire protocol state machine
//!
//! `PeerClient` holds no socket. It consumes decoded frames and returns the
//! frames to send back, consulting a [`SessionContext`] for torrent lookup,
//! piece assignment and block storage. The session driver feeds it.

use async_trait::async_trait;
use bytes::Bytes;
use sha1::{Digest, Sha1};

use super::assembly::PieceAssembly;
use super::types::{Frame, HandshakeHeader, PROTOCOL_STRING, PeerId, PeerMessage};
use crate::torrent::{
    Bitfield, InfoHash, PieceAssignment, PieceIndex, TorrentError, TorrentView,
};

/// Largest block a remote may request from us.
pub const MAX_REQUEST_LEN: u32 = 128 * 1024;

/// Services a peer session needs from the rest of the node.
#[async_trait]
pub trait SessionContext: Send + Sync {
    /// Returns the torrent's current view, or `None` if it is not registered.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Registry is gone
    async fn lookup_torrent(&self, info_hash: InfoHash)
    -> Result<Option<TorrentView>, TorrentError>;

    /// Picks the next wanted piece this connection should download.
    ///
    /// `remote_have` is the remote's advertised pieces, when known.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Torrent was removed
    /// - `TorrentError::EngineShutdown` - Registry is gone
    async fn assign_piece(
        &self,
        info_hash: InfoHash,
        remote_have: Option<Bitfield>,
    ) -> Result<Option<PieceAssignment>, TorrentError>;

    /// Reports a fully received piece and whether it passed verification.
    ///
    /// # Errors
    ///
    /// - `TorrentError::EngineShutdown` - Registry is gone
    async fn piece_finished(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        verified: bool,
    ) -> Result<(), TorrentError>;

    /// # Errors
    ///
    /// - `TorrentError::Storage` - Block could not be persisted
    async fn write_block(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        offset: u32,
        data: Bytes,
    ) -> Result<(), TorrentError>;

    /// # Errors
    ///
    /// - `TorrentError::Storage` - Block could not be read
    async fn read_block(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Bytes, TorrentError>;
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We dialed out to download `info_hash`
    Initiator { info_hash: InfoHash },
    /// A remote dialed us
    Acceptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    ReadingHandshake,
    ReadingPeerId,
    Ready,
    /// Initiator has block requests outstanding
    Piece,
    Closed,
}

/// Wire protocol state for one connection.
pub struct PeerClient {
    role: Role,
    state: ClientState,
    local_peer_id: PeerId,
    block_size: u32,
    torrent: Option<TorrentView>,
    remote_peer_id: Option<PeerId>,
    remote_have: Option<Bitfield>,
    remote_choking: bool,
    assembly: Option<PieceAssembly>,
}

impl PeerClient {
    pub fn initiator(info_hash: InfoHash, local_peer_id: PeerId, block_size: u32) -> Self {
        Self::new(Role::Initiator { info_hash }, local_peer_id, block_size)
    }

    pub fn acceptor(local_peer_id: PeerId, block_size: u32) -> Self {
        Self::new(Role::Acceptor, local_peer_id, block_size)
    }

    fn new(role: Role, local_peer_id: PeerId, block_size: u32) -> Self {
        Self {
            role,
            state: ClientState::ReadingHandshake,
            local_peer_id,
            block_size,
            torrent: None,
            remote_peer_id: None,
            remote_have: None,
            remote_choking: true,
            assembly: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ClientState::Closed
    }

    pub fn remote_peer_id(&self) -> Option<PeerId> {
        self.remote_peer_id
    }

    /// Frames to write as soon as the stream is open.
    ///
    /// The initiator speaks first with its full handshake; the acceptor waits.
    pub fn opening_frames(&self) -> Vec<Frame> {
        match self.role {
            Role::Initiator { info_hash } => vec![
                Frame::Handshake(HandshakeHeader::new(info_hash)),
                Frame::PeerId(self.local_peer_id),
            ],
            Role::Acceptor => Vec::new(),
        }
    }

    /// Advances the state machine by one decoded frame.
    ///
    /// Any error is terminal: the client moves to `Closed` and the caller
    /// drops the connection without sending anything further.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TorrentNotFound` - Handshake names an unregistered torrent
    /// - `TorrentError::SelfConnection` - Remote peer id equals ours
    /// - `TorrentError::ProtocolError` - Frame out of order or malformed
    /// - `TorrentError::PieceHashMismatch` - Completed piece failed verification
    pub async fn on_frame(
        &mut self,
        frame: Frame,
        ctx: &dyn SessionContext,
    ) -> Result<Vec<Frame>, TorrentError> {
        let result = match (self.state, frame) {
            (ClientState::ReadingHandshake, Frame::Handshake(header)) => {
                self.on_handshake(header, ctx).await
            }
            (ClientState::ReadingPeerId, Frame::PeerId(peer_id)) => self.on_peer_id(peer_id),
            (ClientState::Ready | ClientState::Piece, Frame::Message(message)) => {
                self.on_message(message, ctx).await
            }
            (ClientState::Closed, _) => Ok(Vec::new()),
            (state, frame) => Err(TorrentError::ProtocolError {
                message: format!("unexpected {frame:?} in state {state:?}"),
            }),
        };

        if result.is_err() {
            self.state = ClientState::Closed;
        }
        result
    }

    async fn on_handshake(
        &mut self,
        header: HandshakeHeader,
        ctx: &dyn SessionContext,
    ) -> Result<Vec<Frame>, TorrentError> {
        if header.protocol.as_ref() != PROTOCOL_STRING {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "unsupported protocol '{}'",
                    String::from_utf8_lossy(&header.protocol)
                ),
            });
        }

        if let Role::Initiator { info_hash } = self.role {
            if header.info_hash != info_hash {
                return Err(TorrentError::ProtocolError {
                    message: format!("dialed for {info_hash}, remote answered {}", header.info_hash),
                });
            }
        }

        let info_hash = header.info_hash;
        let view = ctx
            .lookup_torrent(info_hash)
            .await?
            .ok_or(TorrentError::TorrentNotFound { info_hash })?;
        tracing::debug!("Handshake accepted for torrent {}", info_hash);
        self.torrent = Some(view);
        self.state = ClientState::ReadingPeerId;

        Ok(match self.role {
            Role::Acceptor => vec![Frame::Handshake(header), Frame::PeerId(self.local_peer_id)],
            Role::Initiator { .. } => Vec::new(),
        })
    }

    fn on_peer_id(&mut self, peer_id: PeerId) -> Result<Vec<Frame>, TorrentError> {
        if peer_id == self.local_peer_id {
            return Err(TorrentError::SelfConnection);
        }
        self.remote_peer_id = Some(peer_id);
        self.state = ClientState::Ready;

        let reply = match self.role {
            Role::Initiator { .. } => PeerMessage::Interested,
            Role::Acceptor => PeerMessage::Bitfield {
                bitfield: self.view()?.have.to_bytes(),
            },
        };
        Ok(vec![reply.into()])
    }

    fn view(&self) -> Result<&TorrentView, TorrentError> {
        self.torrent.as_ref().ok_or_else(|| TorrentError::ProtocolError {
            message: "message before handshake completed".to_string(),
        })
    }

    async fn on_message(
        &mut self,
        message: PeerMessage,
        ctx: &dyn SessionContext,
    ) -> Result<Vec<Frame>, TorrentError> {
        tracing::trace!("Received {:?} in state {:?}", message, self.state);

        match message {
            PeerMessage::KeepAlive
            | PeerMessage::NotInterested
            | PeerMessage::Cancel { .. } => Ok(Vec::new()),
            PeerMessage::Unknown { id, .. } => {
                tracing::debug!("Skipping unknown message id {}", id);
                Ok(Vec::new())
            }
            PeerMessage::Choke => {
                self.remote_choking = true;
                if let Some(assembly) = self.assembly.as_mut() {
                    assembly.reset_requested();
                }
                if self.state == ClientState::Piece {
                    self.state = ClientState::Ready;
                }
                Ok(Vec::new())
            }
            PeerMessage::Unchoke => {
                self.remote_choking = false;
                match self.role {
                    Role::Initiator { .. } => self.request_pieces(ctx).await,
                    Role::Acceptor => Ok(vec![PeerMessage::Unchoke.into()]),
                }
            }
            PeerMessage::Interested => match self.role {
                Role::Acceptor => Ok(vec![PeerMessage::Unchoke.into()]),
                Role::Initiator { .. } => Ok(Vec::new()),
            },
            PeerMessage::Have { piece_index } => {
                let total = self.view()?.total_pieces;
                self.remote_have
                    .get_or_insert_with(|| Bitfield::new(total))
                    .set_bit(piece_index.as_u32())
                    .map_err(|e| TorrentError::ProtocolError {
                        message: format!("remote Have: {e}"),
                    })?;
                Ok(Vec::new())
            }
            PeerMessage::Bitfield { bitfield } => {
                let total = self.view()?.total_pieces;
                self.remote_have = Some(Bitfield::from_bytes(&bitfield, total)?);
                Ok(Vec::new())
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => match self.role {
                Role::Acceptor => self.serve_request(piece_index, offset, length, ctx).await,
                Role::Initiator { .. } => Ok(Vec::new()),
            },
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => self.on_block(piece_index, offset, data, ctx).await,
        }
    }

    /// Requests the current piece's missing blocks, or a fresh assignment.
    async fn request_pieces(
        &mut self,
        ctx: &dyn SessionContext,
    ) -> Result<Vec<Frame>, TorrentError> {
        if let Some(assembly) = self.assembly.as_mut() {
            self.state = ClientState::Piece;
            return Ok(assembly.request_missing().into_iter().map(Frame::from).collect());
        }

        let info_hash = self.view()?.info_hash;
        match ctx.assign_piece(info_hash, self.remote_have.clone()).await? {
            Some(assignment) => {
                tracing::debug!(
                    "Requesting piece {} ({} bytes) of {}",
                    assignment.index,
                    assignment.length,
                    info_hash
                );
                let mut assembly = PieceAssembly::new(assignment, self.block_size);
                let requests = assembly.request_missing();
                self.assembly = Some(assembly);
                self.state = ClientState::Piece;
                Ok(requests.into_iter().map(Frame::from).collect())
            }
            None => {
                tracing::debug!("Nothing left to request from this peer for {}", info_hash);
                self.state = ClientState::Closed;
                Ok(Vec::new())
            }
        }
    }

    async fn on_block(
        &mut self,
        piece: PieceIndex,
        offset: u32,
        data: Bytes,
        ctx: &dyn SessionContext,
    ) -> Result<Vec<Frame>, TorrentError> {
        let info_hash = self.view()?.info_hash;
        let Some(assembly) = self.assembly.as_mut() else {
            tracing::debug!("Ignoring unsolicited block {}@{}", piece, offset);
            return Ok(Vec::new());
        };
        if !assembly.accept(piece, offset, data.len()) {
            tracing::debug!("Ignoring unexpected block {}@{} ({} bytes)", piece, offset, data.len());
            return Ok(Vec::new());
        }

        ctx.write_block(info_hash, piece, offset, data).await?;
        if !assembly.is_complete() {
            return Ok(Vec::new());
        }

        let assignment = assembly.assignment().clone();
        self.assembly = None;

        let verified = match assignment.hash {
            Some(expected) => {
                let contents = ctx
                    .read_block(info_hash, assignment.index, 0, assignment.length)
                    .await?;
                Sha1::digest(&contents).as_slice() == expected.as_slice()
            }
            None => true,
        };
        ctx.piece_finished(info_hash, assignment.index, verified).await?;

        if !verified {
            tracing::warn!("Piece {} of {} failed hash check", assignment.index, info_hash);
            return Err(TorrentError::PieceHashMismatch {
                index: assignment.index,
            });
        }
        tracing::info!("Piece {} of {} complete", assignment.index, info_hash);

        if self.remote_choking {
            self.state = ClientState::Ready;
            return Ok(Vec::new());
        }
        self.request_pieces(ctx).await
    }

    async fn serve_request(
        &mut self,
        piece: PieceIndex,
        offset: u32,
        length: u32,
        ctx: &dyn SessionContext,
    ) -> Result<Vec<Frame>, TorrentError> {
        if length == 0 || length > MAX_REQUEST_LEN {
            return Err(TorrentError::ProtocolError {
                message: format!("request length {length} outside 1..={MAX_REQUEST_LEN}"),
            });
        }

        let info_hash = self.view()?.info_hash;
        if !self.view()?.have.has_bit(piece.as_u32()) {
            // The snapshot is from handshake time; pieces may have completed since.
            if let Some(view) = ctx.lookup_torrent(info_hash).await? {
                self.torrent = Some(view);
            }
        }
        if !self.view()?.have.has_bit(piece.as_u32()) {
            tracing::debug!("Ignoring request for piece {} we do not have", piece);
            return Ok(Vec::new());
        }

        let data = ctx.read_block(info_hash, piece, offset, length).await?;
        Ok(vec![
            PeerMessage::Piece {
                piece_index: piece,
                offset,
                data,
            }
            .into(),
        ])
    }
}

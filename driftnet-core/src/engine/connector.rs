//! TCP peer sessions wired to the engine and storage

use std::net::SocketAddrV4;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;

use super::handle::EngineHandle;
use crate::config::PeerClientConfig;
use crate::protocol::{PeerClient, PeerId, SessionContext, run_session};
use crate::storage::PieceStorage;
use crate::torrent::{
    Bitfield, ClientHandle, InfoHash, PeerConnector, PieceAssignment, PieceIndex, TorrentError,
    TorrentView,
};

/// [`SessionContext`] backed by the engine actor and piece storage.
#[derive(Clone)]
pub struct EngineSessionContext {
    engine: EngineHandle,
    storage: Arc<dyn PieceStorage>,
    /// Remote address for outbound sessions; pieces are only assigned to these
    peer: Option<SocketAddrV4>,
}

impl EngineSessionContext {
    pub fn new(engine: EngineHandle, storage: Arc<dyn PieceStorage>, peer: Option<SocketAddrV4>) -> Self {
        Self {
            engine,
            storage,
            peer,
        }
    }
}

#[async_trait]
impl SessionContext for EngineSessionContext {
    async fn lookup_torrent(&self, info_hash: InfoHash) -> Result<Option<TorrentView>, TorrentError> {
        self.engine.lookup_torrent(info_hash).await
    }

    async fn assign_piece(
        &self,
        info_hash: InfoHash,
        remote_have: Option<Bitfield>,
    ) -> Result<Option<PieceAssignment>, TorrentError> {
        match self.peer {
            Some(peer) => self.engine.assign_piece(info_hash, peer, remote_have).await,
            None => Ok(None),
        }
    }

    async fn piece_finished(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        verified: bool,
    ) -> Result<(), TorrentError> {
        self.engine
            .piece_finished(info_hash, self.peer, piece, verified)
            .await
    }

    async fn write_block(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        offset: u32,
        data: Bytes,
    ) -> Result<(), TorrentError> {
        Ok(self.storage.write_block(info_hash, piece, offset, &data).await?)
    }

    async fn read_block(
        &self,
        info_hash: InfoHash,
        piece: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Bytes, TorrentError> {
        Ok(self.storage.read_block(info_hash, piece, offset, length).await?)
    }
}

/// Dials peers over TCP and runs an initiator session per connection.
pub struct TcpPeerConnector {
    engine: EngineHandle,
    storage: Arc<dyn PieceStorage>,
    local_peer_id: PeerId,
    config: PeerClientConfig,
}

impl TcpPeerConnector {
    pub fn new(
        engine: EngineHandle,
        storage: Arc<dyn PieceStorage>,
        local_peer_id: PeerId,
        config: PeerClientConfig,
    ) -> Self {
        Self {
            engine,
            storage,
            local_peer_id,
            config,
        }
    }
}

impl PeerConnector for TcpPeerConnector {
    fn connect(&self, info_hash: InfoHash, addr: SocketAddrV4) -> Result<ClientHandle, TorrentError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            TorrentError::PeerConnectionError {
                reason: format!("no runtime to dial {addr}: {e}"),
            }
        })?;

        let ctx = EngineSessionContext::new(self.engine.clone(), Arc::clone(&self.storage), Some(addr));
        let engine = self.engine.clone();
        let local_peer_id = self.local_peer_id;
        let config = self.config.clone();

        let task = runtime.spawn(async move {
            let result = dial_and_run(info_hash, addr, local_peer_id, &config, &ctx).await;
            let failed = match &result {
                Ok(()) => false,
                Err(e) => {
                    tracing::warn!("Session with {} for {} ended: {}", addr, info_hash, e);
                    true
                }
            };
            let _ = engine.session_closed(info_hash, addr, failed).await;
        });

        Ok(ClientHandle::new(task.abort_handle()))
    }
}

async fn dial_and_run(
    info_hash: InfoHash,
    addr: SocketAddrV4,
    local_peer_id: PeerId,
    config: &PeerClientConfig,
    ctx: &EngineSessionContext,
) -> Result<(), TorrentError> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TorrentError::PeerConnectionError {
            reason: format!("connect to {addr} timed out"),
        })??;
    tracing::debug!("Connected to {} for {}", addr, info_hash);

    let mut client = PeerClient::initiator(info_hash, local_peer_id, config.block_size);
    run_session(stream, &mut client, ctx, config.idle_timeout).await
}

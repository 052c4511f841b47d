//! Inbound peer listener

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};

use super::connector::EngineSessionContext;
use super::handle::EngineHandle;
use crate::config::{PeerClientConfig, PeerConfig};
use crate::protocol::{PeerClient, PeerId, run_session};
use crate::storage::PieceStorage;

/// Accepts remote peers and serves each with an acceptor session.
pub struct PeerListener {
    listener: TcpListener,
}

impl PeerListener {
    /// Binds the configured address with the configured backlog.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - Address in use or not bindable
    pub fn bind(config: &PeerConfig) -> std::io::Result<Self> {
        let addr = config.listen_socket();
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog)?;
        tracing::info!("Peer listener bound to {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    /// # Errors
    ///
    /// - `std::io::Error` - Socket has no local address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the task is cancelled.
    pub async fn run(
        self,
        engine: EngineHandle,
        storage: Arc<dyn PieceStorage>,
        local_peer_id: PeerId,
        config: PeerClientConfig,
    ) {
        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept peer connection: {}", e);
                    continue;
                }
            };
            tracing::debug!("Accepted peer connection from {}", remote);

            let peer = match remote {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped().map(|ip| SocketAddrV4::new(ip, v6.port())),
            };
            let ctx = EngineSessionContext::new(engine.clone(), Arc::clone(&storage), peer);

            let (block_size, idle_timeout) = (config.block_size, config.idle_timeout);
            tokio::spawn(async move {
                let mut client = PeerClient::acceptor(local_peer_id, block_size);
                if let Err(e) = run_session(stream, &mut client, &ctx, idle_timeout).await {
                    tracing::debug!("Inbound session from {} closed: {}", remote, e);
                }
            });
        }
    }
}

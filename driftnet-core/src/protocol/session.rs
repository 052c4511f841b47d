//! Drives a [`PeerClient`] over a byte stream

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use super::client::{ClientState, PeerClient, SessionContext};
use super::codec::WireCodec;
use crate::torrent::TorrentError;

/// Runs one connection until the client closes, the remote hangs up, or an
/// error occurs.
///
/// Replies to each frame are flushed before the next frame is read. A remote
/// hangup is a clean end unless an initiator was mid-piece. A remote that
/// sends nothing for `idle_timeout` fails the session, which releases any
/// piece it was assigned.
///
/// # Errors
///
/// - `TorrentError::ProtocolError` - Malformed or out-of-order frame
/// - `TorrentError::TorrentNotFound` - Remote named an unregistered torrent
/// - `TorrentError::PeerConnectionError` - Remote hung up mid-piece or went idle
/// - `TorrentError::Io` - Socket failure
pub async fn run_session<S>(
    stream: S,
    client: &mut PeerClient,
    ctx: &dyn SessionContext,
    idle_timeout: Duration,
) -> Result<(), TorrentError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut framed = Framed::new(stream, WireCodec::new());

    for frame in client.opening_frames() {
        framed.feed(frame).await?;
    }
    framed.flush().await?;

    while !client.is_closed() {
        let next = tokio::time::timeout(idle_timeout, framed.next())
            .await
            .map_err(|_| TorrentError::PeerConnectionError {
                reason: format!(
                    "no frame for {:?} in state {:?}",
                    idle_timeout,
                    client.state()
                ),
            })?;
        let Some(frame) = next else {
            tracing::debug!("Remote closed connection in state {:?}", client.state());
            if client.state() == ClientState::Piece {
                return Err(TorrentError::PeerConnectionError {
                    reason: "connection closed mid-piece".to_string(),
                });
            }
            return Ok(());
        };

        for reply in client.on_frame(frame?, ctx).await? {
            framed.feed(reply).await?;
        }
        framed.flush().await?;
    }

    Ok(())
}

//! Actor implementation for the engine.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use super::commands::EngineCommand;
use super::connector::TcpPeerConnector;
use super::handle::EngineHandle;
use super::registry::TorrentRegistry;
use crate::config::DriftnetConfig;
use crate::storage::PieceStorage;
use crate::torrent::{PeerConnector, TorrentError};
use crate::tracker::{AnnounceEvent, AnnounceRequest, HttpTrackerClient, TrackerClient};

/// Spawns the engine actor and returns its handle.
///
/// `make_connector` receives a handle to the engine so that the sessions it
/// opens can call back into it. Since that handle keeps the command channel
/// open, the actor runs until [`EngineHandle::shutdown`] is called.
///
/// Must be called from within a tokio runtime.
pub fn spawn_engine<F>(
    config: DriftnetConfig,
    tracker: Arc<dyn TrackerClient>,
    make_connector: F,
) -> EngineHandle
where
    F: FnOnce(EngineHandle) -> Arc<dyn PeerConnector>,
{
    let (sender, receiver) = mpsc::channel(100);
    let (internal_sender, internal_receiver) = mpsc::unbounded_channel();
    let handle = EngineHandle::new(sender);
    let connector = make_connector(handle.clone());

    let engine = Engine {
        registry: TorrentRegistry::new(
            config.tracker.torrent_check_interval,
            config.peer.default_peer_id,
        ),
        config,
        tracker,
        connector,
        internal_sender,
    };

    tokio::spawn(async move {
        run_actor_loop(engine, receiver, internal_receiver).await;
    });

    handle
}

/// Spawns an engine wired to the HTTP tracker and real TCP peer sessions.
///
/// # Errors
///
/// - `TorrentError::UrlParsing` - Announce URL is invalid
/// - `TorrentError::TrackerConnectionFailed` - HTTP client could not be built
pub fn spawn_tcp_engine(
    config: DriftnetConfig,
    storage: Arc<dyn PieceStorage>,
) -> Result<EngineHandle, TorrentError> {
    let tracker = Arc::new(HttpTrackerClient::new(&config.tracker)?);
    let local_peer_id = config.peer.peer_id;
    let peer_client = config.peer_client.clone();

    Ok(spawn_engine(config, tracker, move |handle| {
        Arc::new(TcpPeerConnector::new(handle, storage, local_peer_id, peer_client))
    }))
}

struct Engine {
    config: DriftnetConfig,
    registry: TorrentRegistry,
    tracker: Arc<dyn TrackerClient>,
    connector: Arc<dyn PeerConnector>,
    internal_sender: mpsc::UnboundedSender<EngineCommand>,
}

/// Runs the actor loop: commands in arrival order, plus the tracker and
/// peer health ticks.
async fn run_actor_loop(
    mut engine: Engine,
    mut receiver: mpsc::Receiver<EngineCommand>,
    mut internal_receiver: mpsc::UnboundedReceiver<EngineCommand>,
) {
    tracing::debug!("Engine actor started");

    let mut tracker_tick = time::interval(engine.config.tracker.check_interval);
    tracker_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut peer_tick = time::interval(engine.config.peer_client.check_interval);
    peer_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(command) => {
                    if !engine.handle_command(command) {
                        break;
                    }
                }
                None => break,
            },
            Some(command) = internal_receiver.recv() => {
                if !engine.handle_command(command) {
                    break;
                }
            }
            _ = tracker_tick.tick() => engine.check_trackers(),
            _ = peer_tick.tick() => engine.check_peers(),
        }
    }

    tracing::debug!("Engine actor stopped");
}

impl Engine {
    /// Handles a single command. Returns false to stop the actor.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::RegisterTorrent {
                info_hash,
                layout,
                responder,
            } => {
                let result = self
                    .registry
                    .register(info_hash, layout, Instant::now())
                    .map(|_| ());
                let _ = responder.send(result);
            }

            EngineCommand::AddPiece {
                info_hash,
                piece,
                responder,
            } => {
                let connector = Arc::clone(&self.connector);
                let result = self.registry.get_mut(info_hash).and_then(|torrent| {
                    let added = torrent.add_piece(piece)?;
                    torrent.peers_updated(connector.as_ref());
                    Ok(added)
                });
                let _ = responder.send(result);
            }

            EngineCommand::AddPeers {
                info_hash,
                peers,
                responder,
            } => {
                let result = self
                    .registry
                    .add_peers(info_hash, &peers, self.connector.as_ref());
                let _ = responder.send(result);
            }

            EngineCommand::TorrentInfo {
                info_hash,
                responder,
            } => {
                let result = self
                    .registry
                    .get(info_hash)
                    .map(|torrent| torrent.info())
                    .ok_or(TorrentError::TorrentNotFound { info_hash });
                let _ = responder.send(result);
            }

            EngineCommand::ListTorrents { responder } => {
                let _ = responder.send(self.registry.infos());
            }

            EngineCommand::LookupTorrent {
                info_hash,
                responder,
            } => {
                let _ = responder.send(self.registry.get(info_hash).map(|torrent| torrent.view()));
            }

            EngineCommand::AssignPiece {
                info_hash,
                peer,
                remote_have,
                responder,
            } => {
                let result = self
                    .registry
                    .get_mut(info_hash)
                    .map(|torrent| torrent.assign_piece(peer, remote_have.as_ref()));
                let _ = responder.send(result);
            }

            EngineCommand::PieceFinished {
                info_hash,
                peer,
                piece,
                verified,
                responder,
            } => {
                let result = self
                    .registry
                    .get_mut(info_hash)
                    .and_then(|torrent| torrent.piece_completed(peer, piece, verified));
                let _ = responder.send(result);
            }

            EngineCommand::SessionClosed {
                info_hash,
                peer,
                failed,
            } => {
                if let Ok(torrent) = self.registry.get_mut(info_hash) {
                    torrent.session_closed(peer, failed, Instant::now());
                }
            }

            EngineCommand::TrackerChecked { info_hash, result } => {
                if let Err(e) = self.registry.on_tracker_response(
                    info_hash,
                    result,
                    Instant::now(),
                    self.connector.as_ref(),
                ) {
                    tracing::debug!("Dropping tracker result: {}", e);
                }
            }

            EngineCommand::Shutdown { responder } => {
                tracing::info!("Engine shutting down with {} torrents", self.registry.len());
                let _ = responder.send(());
                return false;
            }
        }
        true
    }

    /// Starts an announce task for every torrent due a check.
    fn check_trackers(&mut self) {
        for info_hash in self.registry.due_for_check(Instant::now()) {
            let request = AnnounceRequest {
                info_hash,
                peer_id: self.config.peer.peer_id,
                port: self.config.peer.listen_port,
                event: AnnounceEvent::Started,
                numwant: self.config.tracker.numwant,
            };
            let tracker = Arc::clone(&self.tracker);
            let sender = self.internal_sender.clone();

            tokio::spawn(async move {
                let result = tracker.announce(request).await;
                let _ = sender.send(EngineCommand::TrackerChecked { info_hash, result });
            });
        }
    }

    fn check_peers(&mut self) {
        let dials = self.registry.on_timer(
            Instant::now(),
            self.config.peer_client.retry_after,
            self.connector.as_ref(),
        );
        if dials > 0 {
            tracing::debug!("Peer health check started {} connections", dials);
        }
    }
}

//! Driftnet CLI - peer node binary
//!
//! Starts the engine, the inbound peer listener and the control HTTP server,
//! then runs until interrupted.

mod control;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use driftnet_core::engine::{PeerListener, spawn_tcp_engine};
use driftnet_core::protocol::PeerId;
use driftnet_core::tracing_setup::{CliLogLevel, init_tracing};
use driftnet_core::{DriftnetConfig, DriftnetError, FileStorage, PieceStorage};

#[derive(Parser)]
#[command(name = "driftnet")]
#[command(about = "A BitTorrent peer node driven by a tracker and a control API")]
struct Cli {
    /// 20-byte peer id; generated when absent
    #[arg(long)]
    peer_id: Option<String>,

    /// Port for inbound peer connections
    #[arg(long)]
    peer_port: Option<u16>,

    /// Tracker announce URL
    #[arg(long)]
    tracker_url: Option<String>,

    /// Directory for downloaded pieces
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Address of the control HTTP server
    #[arg(long)]
    control_listen: Option<SocketAddr>,

    /// Console log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the trace log file
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    /// Applies flags on top of environment configuration.
    ///
    /// # Errors
    ///
    /// - `DriftnetError::Configuration` - Peer id is not 20 bytes
    fn into_config(self) -> driftnet_core::Result<DriftnetConfig> {
        let mut config = DriftnetConfig::from_env();
        if let Some(peer_id) = self.peer_id {
            config.peer.peer_id = peer_id.parse::<PeerId>().map_err(|e| {
                DriftnetError::Configuration {
                    reason: format!("invalid --peer-id '{peer_id}': {e}"),
                }
            })?;
        }
        if let Some(port) = self.peer_port {
            config.peer.listen_port = port;
        }
        if let Some(url) = self.tracker_url {
            config.tracker.announce_url = url;
        }
        if let Some(dir) = self.storage_dir {
            config.storage.dir = dir;
        }
        if let Some(listen) = self.control_listen {
            config.control.listen = listen;
        }
        Ok(config)
    }
}

/// Starts the engine, the peer listener and the control server, and runs
/// until interrupted.
///
/// # Errors
///
/// - `DriftnetError::Storage` - Storage directory is not writable
/// - `DriftnetError::Io` - Peer or control port could not be bound
/// - `DriftnetError::Torrent` - Tracker URL is invalid or shutdown failed
async fn run_node(config: DriftnetConfig) -> driftnet_core::Result<()> {
    let storage = Arc::new(FileStorage::new(config.storage.dir.clone()));
    storage.ensure_writable().await.inspect_err(|e| {
        tracing::error!(
            "Storage directory {} is not writable: {}",
            config.storage.dir.display(),
            e
        )
    })?;
    let storage: Arc<dyn PieceStorage> = storage;

    let listener = PeerListener::bind(&config.peer).inspect_err(|e| {
        tracing::error!(
            "Failed to bind peer listener on {}: {}",
            config.peer.listen_socket(),
            e
        )
    })?;
    let control_listener = tokio::net::TcpListener::bind(config.control.listen)
        .await
        .inspect_err(|e| {
            tracing::error!(
                "Failed to bind control server on {}: {}",
                config.control.listen,
                e
            )
        })?;

    let engine = spawn_tcp_engine(config.clone(), Arc::clone(&storage))?;
    tracing::info!(
        "Driftnet node {} announcing to {}",
        config.peer.peer_id,
        config.tracker.announce_url
    );

    let listener_task = tokio::spawn(listener.run(
        engine.clone(),
        storage,
        config.peer.peer_id,
        config.peer_client.clone(),
    ));

    let app = control::router(control::ControlState {
        engine: engine.clone(),
        default_piece_length: config.peer_client.default_piece_length,
    });
    tracing::info!("Control server listening on {}", config.control.listen);

    axum::serve(control_listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down");
    listener_task.abort();
    engine.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.log_dir.as_deref())
        .context("failed to initialize logging")?;
    let config = cli.into_config()?;

    run_node(config).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_peer_id_is_configuration_error() {
        let cli = Cli::parse_from(["driftnet", "--peer-id", "short"]);
        let error = cli.into_config().unwrap_err();

        assert!(matches!(error, DriftnetError::Configuration { .. }));
        assert!(error.is_user_error());
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = Cli::parse_from([
            "driftnet",
            "--peer-id",
            "-DN0001-123456789012",
            "--peer-port",
            "7001",
            "--control-listen",
            "127.0.0.1:9001",
        ]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.peer.peer_id.as_bytes(), b"-DN0001-123456789012");
        assert_eq!(config.peer.listen_port, 7001);
        assert_eq!(config.control.listen.port(), 9001);
    }
}

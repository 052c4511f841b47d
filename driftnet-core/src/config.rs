//! Centralized configuration for Driftnet.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::PeerId;

/// Central configuration for all Driftnet components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct DriftnetConfig {
    pub peer: PeerConfig,
    pub tracker: TrackerConfig,
    pub peer_client: PeerClientConfig,
    pub storage: StorageConfig,
    pub control: ControlConfig,
}

/// Local node identity and the inbound peer listener.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Identifier sent in handshakes and tracker announces
    pub peer_id: PeerId,
    /// Address the peer listener binds to
    pub listen_addr: IpAddr,
    /// Port the peer listener binds to and announces
    pub listen_port: u16,
    /// Pending-connection queue length for the listener
    pub backlog: u32,
    /// Peer id recorded for peers learned from compact tracker responses
    pub default_peer_id: PeerId,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId::generate(),
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 6881,
            backlog: 128,
            default_peer_id: PeerId::new(*b"xxxxxxxxxxxxxxxxxxxx"),
        }
    }
}

impl PeerConfig {
    pub fn listen_socket(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.listen_port)
    }
}

/// Tracker polling configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Full announce URL, e.g. `http://127.0.0.1:6969/announce`
    pub announce_url: String,
    /// HTTP request timeout for a single announce attempt
    pub timeout: Duration,
    /// Extra attempts after the first failed announce
    pub retries: u32,
    /// How often the registry looks for torrents due a tracker check
    pub check_interval: Duration,
    /// Minimum time between two checks of the same torrent
    pub torrent_check_interval: Duration,
    /// Peers requested per announce
    pub numwant: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            announce_url: "http://127.0.0.1:6969/announce".to_string(),
            timeout: Duration::from_secs(30),
            retries: 2,
            check_interval: Duration::from_secs(1),
            torrent_check_interval: Duration::from_secs(10),
            numwant: 80,
        }
    }
}

/// Outbound connection and piece transfer settings.
#[derive(Debug, Clone)]
pub struct PeerClientConfig {
    /// Interval of the peer manager health timer
    pub check_interval: Duration,
    /// How long an unavailable peer waits before being dialed again
    pub retry_after: Duration,
    /// TCP connect timeout for outbound peers
    pub connect_timeout: Duration,
    /// A session with no frame from the remote for this long is dropped
    pub idle_timeout: Duration,
    /// Size of each requested block
    pub block_size: u32,
    /// Piece length used when a torrent is registered without one
    pub default_piece_length: u32,
}

impl Default for PeerClientConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            retry_after: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(120),
            block_size: 16 * 1024,
            default_piece_length: 256 * 1024,
        }
    }
}

/// On-disk piece storage.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory; each torrent gets a subdirectory named by its info hash
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("storage"),
        }
    }
}

/// Control HTTP server.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub listen: SocketAddr,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000),
        }
    }
}

impl DriftnetConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(peer_id) = std::env::var("DRIFTNET_PEER_ID") {
            if let Ok(id) = peer_id.parse::<PeerId>() {
                config.peer.peer_id = id;
            }
        }

        if let Ok(port) = std::env::var("DRIFTNET_PEER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.peer.listen_port = port;
            }
        }

        if let Ok(url) = std::env::var("DRIFTNET_TRACKER_URL") {
            config.tracker.announce_url = url;
        }

        if let Ok(timeout) = std::env::var("DRIFTNET_TRACKER_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.tracker.timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(retries) = std::env::var("DRIFTNET_TRACKER_RETRIES") {
            if let Ok(count) = retries.parse::<u32>() {
                config.tracker.retries = count;
            }
        }

        if let Ok(timeout) = std::env::var("DRIFTNET_PEER_IDLE_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.peer_client.idle_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(dir) = std::env::var("DRIFTNET_STORAGE_DIR") {
            config.storage.dir = PathBuf::from(dir);
        }

        if let Ok(listen) = std::env::var("DRIFTNET_CONTROL_LISTEN") {
            if let Ok(addr) = listen.parse::<SocketAddr>() {
                config.control.listen = addr;
            }
        }

        config
    }

    /// Creates a configuration with short timers for tests.
    pub fn for_testing() -> Self {
        Self {
            tracker: TrackerConfig {
                timeout: Duration::from_secs(1),
                retries: 0,
                check_interval: Duration::from_millis(10),
                torrent_check_interval: Duration::from_millis(50),
                ..Default::default()
            },
            peer_client: PeerClientConfig {
                check_interval: Duration::from_millis(20),
                retry_after: Duration::from_millis(50),
                connect_timeout: Duration::from_millis(500),
                idle_timeout: Duration::from_millis(500),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

//! Engine actor owning the torrent registry
//!
//! All torrent state lives inside one actor task. Peer sessions, the control
//! surface and tracker polling reach it through an [`EngineHandle`].

pub mod actor;
pub mod commands;
pub mod connector;
pub mod handle;
pub mod listener;
pub mod registry;

pub use actor::{spawn_engine, spawn_tcp_engine};
pub use commands::EngineCommand;
pub use connector::{EngineSessionContext, TcpPeerConnector};
pub use handle::EngineHandle;
pub use listener::PeerListener;
pub use registry::TorrentRegistry;

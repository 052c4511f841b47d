//! HTTP tracker communication.
//!
//! Announces registered torrents and decodes compact peer lists.

pub mod client;
pub mod types;

pub use client::HttpTrackerClient;
pub use types::{AnnounceEvent, AnnounceRequest, AnnounceResponse, TrackerClient};

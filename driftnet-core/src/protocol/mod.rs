//! Peer wire protocol: message types, frame codec and the connection state machine

mod assembly;
pub mod client;
pub mod codec;
pub mod session;
pub mod types;

pub use client::{ClientState, PeerClient, Role, SessionContext};
pub use codec::WireCodec;
pub use session::run_session;
pub use types::{Frame, HandshakeHeader, MessageId, PROTOCOL_STRING, PeerId, PeerMessage};

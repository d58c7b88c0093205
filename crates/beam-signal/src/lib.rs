//! Beam Signal Server
//!
//! Lightweight relay that rooms peers together and forwards their
//! connection-negotiation envelopes. Peer-to-peer transfers never touch it;
//! the optional `/upload` endpoint stores a file and tells the room where
//! to fetch it.
//!
//! # Protocol
//!
//! 1. Each client joins a room by an identifier both sides know
//! 2. Members already in the room are told `user-joined`
//! 3. Offers, answers and ICE candidates are forwarded verbatim to the
//!    other member
//! 4. Peers open a direct data channel; the relay only matters again if
//!    the channel has to be renegotiated

pub mod coordinator;
pub mod messages;
pub mod room;
pub mod server;

pub use coordinator::{JoinError, Outbound, RelayCoordinator};
pub use messages::{ClientMessage, Envelope, ErrorCode, ServerMessage, SharedFile};
pub use room::{Room, RoomError};
pub use server::{SignalServer, UploadResponse};

/// Default WebSocket port
pub const DEFAULT_PORT: u16 = beam_core::DEFAULT_SIGNAL_PORT;

/// Maximum members per room unless configured otherwise
pub const DEFAULT_MAX_MEMBERS_PER_ROOM: usize = 2;

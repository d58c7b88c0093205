//! Beam Peer - One client of a direct file transfer
//!
//! This crate provides:
//! - [`session::PeerSession`]: the negotiation state machine (no I/O)
//! - [`connection`]: the peer connection / data channel traits
//! - [`rtc`]: the WebRTC implementation of those traits
//! - [`signal_client`]: WebSocket client for the relay
//! - [`runner::SessionRunner`]: the task that ties the three together
//! - [`transport`]: moving whole files over an open channel or through the
//!   relay's upload endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands / events  ┌──────────────────────────────┐
//! │ SessionHandle│◀───────────────────▶│        SessionRunner         │
//! └──────────────┘                     │  PeerSession ── Vec<Effect>  │
//!                                      └───────┬───────────────┬──────┘
//!                              ClientMessage / │               │ offer, answer,
//!                              ServerMessage   ▼               ▼ candidates, frames
//!                                     ┌──────────────┐  ┌──────────────┐
//!                                     │ SignalClient │  │PeerConnection│
//!                                     └──────────────┘  └──────────────┘
//! ```

pub mod connection;
pub mod rtc;
pub mod runner;
pub mod session;
pub mod signal_client;
pub mod transport;

pub use connection::{
    event_channel, ConnectionError, ConnectionEvent, DataChannel, EventReceiver, EventSender,
    PeerConnection,
};
pub use rtc::RtcPeerConnection;
pub use runner::{RunnerOptions, SessionCommand, SessionError, SessionEvent, SessionHandle, SessionRunner};
pub use session::{Effect, PeerSession, Role, SessionConfig, SessionState, SessionStatus};
pub use signal_client::{connect, SignalClientError, SignalReceiver, SignalSender};
pub use transport::{
    download_shared, FileTransport, PeerToPeerTransport, TransferSummary, UploadTransport,
};

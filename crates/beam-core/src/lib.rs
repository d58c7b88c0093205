//! Beam Core - Shared types, wire framing, and transfer accounting
//!
//! This crate contains the foundational types used across all Beam components.
//! It has no dependencies on networking code: the relay and the peer session
//! both build on the types defined here.

pub mod config;
pub mod error;
pub mod frame;
pub mod transfer;
pub mod types;

pub use config::{Config, ConfigError, PeerConfig, SignalConfig, TransferConfig, TransferStrategy};
pub use error::*;
pub use frame::*;
pub use transfer::*;
pub use types::*;

/// Data frame size in bytes (16 KB)
///
/// Both ends of a channel must agree on this value; it is not negotiated.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Largest chunk size a deployment may configure (256 KB)
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Default limit on a single incoming file (4 GB)
pub const DEFAULT_MAX_INCOMING_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Maximum room identifier length in bytes
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Default relay port
pub const DEFAULT_SIGNAL_PORT: u16 = 5000;

/// Default negotiation timeout in seconds
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECS: u64 = 30;

/// Largest file the relay stores for store-and-forward transfers
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

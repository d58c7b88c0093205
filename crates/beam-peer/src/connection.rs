//! Peer channel abstraction
//!
//! The session runner drives negotiation through [`PeerConnection`] and moves
//! file frames through [`DataChannel`]. Implementations:
//! - [`crate::rtc::RtcPeerConnection`] over the `webrtc` crate (production)
//! - in-memory loopbacks in the tests
//!
//! Asynchronous notifications (local candidates, channel open/close, incoming
//! frames, connection failure) are not returned from calls; the connection
//! pushes them as [`ConnectionEvent`]s onto the queue it was built with.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use beam_core::{Frame, IceCandidate, SessionDescription};

/// Connection errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("connection closed")]
    Closed,
}

/// Notifications from the peer connection, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A local ICE candidate to relay to the other peer
    LocalCandidate(IceCandidate),
    /// The data channel is open and frames can flow
    ChannelOpen,
    /// A frame arrived on the data channel
    Message(Frame),
    /// The data channel closed
    ChannelClosed,
    /// No viable candidate pair, or the transport broke irrecoverably
    Failed(String),
}

/// Sending half of the event queue, held by the connection
pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

/// Receiving half of the event queue, held by the session runner
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Create an event queue
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// One side of a direct peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create the ordered, reliable data channel (initiator only)
    async fn create_data_channel(&self, label: &str) -> Result<(), ConnectionError>;

    /// Create an offer and install it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError>;

    /// Create an answer and install it as the local description
    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError>;

    /// Apply the other peer's offer or answer
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), ConnectionError>;

    /// Add a candidate from the other peer
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), ConnectionError>;

    /// Discard the current connection and start over with a fresh one
    ///
    /// Events belonging to the discarded connection must not be delivered
    /// after this returns.
    async fn reset(&self) -> Result<(), ConnectionError>;

    /// Close for good
    async fn close(&self);

    /// The open data channel, if any
    fn data_channel(&self) -> Option<Arc<dyn DataChannel>>;
}

/// Ordered, reliable, message-based channel to the other peer
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Send one frame; returns once the frame is queued for delivery
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError>;

    /// Check if the channel is open
    fn is_open(&self) -> bool;

    /// Wait until everything sent so far has left the local send buffer
    async fn flush(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

// Blanket implementation so Arc-wrapped channels can be passed where a
// channel is expected
#[async_trait]
impl<T: DataChannel + ?Sized> DataChannel for Arc<T> {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        (**self).send(frame).await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    async fn flush(&self) -> Result<(), ConnectionError> {
        (**self).flush().await
    }
}

//! WebSocket client for the relay
//!
//! [`connect`] splits the socket into a [`SignalSender`] and a
//! [`SignalReceiver`], each backed by its own task, so the session runner can
//! select on incoming messages while still sending from anywhere.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use beam_signal::{ClientMessage, ServerMessage};

/// Timeout for the WebSocket handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Signal client errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalClientError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("timed out connecting to relay")]
    Timeout,
    #[error("relay connection closed")]
    Closed,
}

/// Outbound half: queues messages for the writer task
#[derive(Clone, Debug)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl SignalSender {
    pub fn new(tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), SignalClientError> {
        self.tx.send(message).map_err(|_| SignalClientError::Closed)
    }
}

/// Inbound half: messages parsed by the reader task
#[derive(Debug)]
pub struct SignalReceiver {
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl SignalReceiver {
    pub fn new(rx: mpsc::UnboundedReceiver<ServerMessage>) -> Self {
        Self { rx }
    }

    /// Next message, or `None` once the relay connection is gone
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }
}

/// Connect to the relay at `url` (`ws://` or `wss://`)
pub async fn connect(url: &str) -> Result<(SignalSender, SignalReceiver), SignalClientError> {
    let url = Url::parse(url).map_err(|e| SignalClientError::InvalidUrl(e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(SignalClientError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    debug!("Connecting to signal server: {}", url);
    let ws = match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => return Err(SignalClientError::ConnectionFailed(e.to_string())),
        Err(_) => return Err(SignalClientError::Timeout),
    };
    info!("Connected to signal server {}", url);

    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();

    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode signal message: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(json)).await {
                warn!("Signal send failed: {}", e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Signal socket error: {}", e);
                    break;
                }
            };
            match ServerMessage::from_json(&text) {
                Ok(message) => {
                    if in_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring unreadable relay message: {}", e),
            }
        }
        debug!("Signal connection closed");
    });

    Ok((SignalSender::new(out_tx), SignalReceiver::new(in_rx)))
}

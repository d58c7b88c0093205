//! WebRTC implementation of the peer channel
//!
//! Wraps the `webrtc` crate. Callbacks registered on the underlying
//! connection are tagged with a generation number; [`PeerConnection::reset`]
//! and [`PeerConnection::close`] bump it, so events from a discarded
//! connection never reach the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use beam_core::{Frame, IceCandidate, SessionDescription};

use crate::connection::{ConnectionError, ConnectionEvent, DataChannel, EventSender, PeerConnection};

/// Pause sending above this many buffered bytes
const HIGH_WATER_MARK: usize = 1024 * 1024;

/// Resume sending once the buffer drains below this
const LOW_WATER_MARK: usize = 256 * 1024;

/// Longest wait for the send buffer to drain in [`DataChannel::flush`]
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared with the webrtc callbacks
struct Shared {
    events: EventSender,
    generation: AtomicU64,
    channel: Mutex<Option<Arc<RtcDataChannel>>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn emit(&self, generation: u64, event: ConnectionEvent) {
        if self.is_current(generation) {
            let _ = self.events.send(event);
        }
    }

    fn set_channel(&self, channel: Option<Arc<RtcDataChannel>>) {
        if let Ok(mut slot) = self.channel.lock() {
            *slot = channel;
        }
    }
}

/// Peer connection backed by `webrtc::RTCPeerConnection`
pub struct RtcPeerConnection {
    api: API,
    ice_servers: Vec<String>,
    pc: RwLock<Arc<RTCPeerConnection>>,
    shared: Arc<Shared>,
}

impl RtcPeerConnection {
    /// Create a connection that reports to `events`
    ///
    /// `ice_servers` are STUN/TURN URLs passed through untouched; an empty
    /// list restricts the connection to host candidates.
    pub async fn new(ice_servers: Vec<String>, events: EventSender) -> Result<Self, ConnectionError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let shared = Arc::new(Shared {
            events,
            generation: AtomicU64::new(0),
            channel: Mutex::new(None),
        });

        let pc = new_connection(&api, &ice_servers, &shared, 0).await?;
        Ok(Self {
            api,
            ice_servers,
            pc: RwLock::new(pc),
            shared,
        })
    }

    async fn current(&self) -> Arc<RTCPeerConnection> {
        self.pc.read().await.clone()
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_data_channel(&self, label: &str) -> Result<(), ConnectionError> {
        let pc = self.current().await;
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;

        let generation = self.shared.generation.load(Ordering::SeqCst);
        attach_channel(&self.shared, dc, generation).await;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError> {
        let pc = self.current().await;
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;

        debug!("Offer created, SDP len: {}", offer.sdp.len());
        Ok(SessionDescription::new("offer", offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        let pc = self.current().await;
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;

        debug!("Answer created, SDP len: {}", answer.sdp.len());
        Ok(SessionDescription::new("answer", answer.sdp))
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), ConnectionError> {
        let sdp = desc
            .sdp()
            .ok_or_else(|| ConnectionError::Negotiation("missing sdp".into()))?
            .to_string();

        let remote = match desc.kind() {
            Some("offer") => RTCSessionDescription::offer(sdp),
            Some("answer") => RTCSessionDescription::answer(sdp),
            other => {
                return Err(ConnectionError::Negotiation(format!(
                    "unsupported description type {:?}",
                    other
                )))
            }
        }
        .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;

        self.current()
            .await
            .set_remote_description(remote)
            .await
            .map_err(|e| ConnectionError::Negotiation(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), ConnectionError> {
        let value = &candidate.0;
        let candidate_str = value
            .get("candidate")
            .and_then(|c| c.as_str())
            .unwrap_or("");

        // Empty candidate marks end-of-candidates
        if candidate_str.is_empty() {
            return Ok(());
        }

        let init = RTCIceCandidateInit {
            candidate: candidate_str.to_string(),
            sdp_mid: value
                .get("sdpMid")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string()),
            sdp_mline_index: value
                .get("sdpMLineIndex")
                .and_then(|i| i.as_u64())
                .map(|i| i as u16),
            username_fragment: value
                .get("usernameFragment")
                .and_then(|u| u.as_str())
                .map(|s| s.to_string()),
        };

        self.current()
            .await
            .add_ice_candidate(init)
            .await
            .map_err(|e| ConnectionError::Candidate(e.to_string()))
    }

    async fn reset(&self) -> Result<(), ConnectionError> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_channel(None);

        let fresh = new_connection(&self.api, &self.ice_servers, &self.shared, generation).await?;
        let old = std::mem::replace(&mut *self.pc.write().await, fresh);
        if let Err(e) = old.close().await {
            debug!("Closing discarded connection: {}", e);
        }

        info!("Peer connection reset");
        Ok(())
    }

    async fn close(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.set_channel(None);
        if let Err(e) = self.current().await.close().await {
            debug!("Error closing peer connection: {}", e);
        }
    }

    fn data_channel(&self) -> Option<Arc<dyn DataChannel>> {
        let slot = self.shared.channel.lock().ok()?;
        slot.clone().map(|c| c as Arc<dyn DataChannel>)
    }
}

/// Build a peer connection and register its callbacks under `generation`
async fn new_connection(
    api: &API,
    ice_servers: &[String],
    shared: &Arc<Shared>,
    generation: u64,
) -> Result<Arc<RTCPeerConnection>, ConnectionError> {
    let config = RTCConfiguration {
        ice_servers: if ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        },
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(config)
        .await
        .map(Arc::new)
        .map_err(|e| ConnectionError::Negotiation(e.to_string()))?;

    let ice_shared = shared.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let shared = ice_shared.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => {
                    debug!("Local ICE candidate: {}", init.candidate);
                    let value = json!({
                        "candidate": init.candidate,
                        "sdpMid": init.sdp_mid,
                        "sdpMLineIndex": init.sdp_mline_index,
                        "usernameFragment": init.username_fragment,
                    });
                    shared.emit(generation, ConnectionEvent::LocalCandidate(IceCandidate(value)));
                }
                Err(e) => warn!("Failed to encode local candidate: {}", e),
            }
        })
    }));

    let state_shared = shared.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let shared = state_shared.clone();
        Box::pin(async move {
            debug!("Peer connection state: {:?}", state);
            if state == RTCPeerConnectionState::Failed {
                shared.emit(
                    generation,
                    ConnectionEvent::Failed("no viable candidate pair".into()),
                );
            }
        })
    }));

    // Responder side: the channel arrives from the initiator
    let dc_shared = shared.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let shared = dc_shared.clone();
        Box::pin(async move {
            info!("Received data channel '{}'", dc.label());
            attach_channel(&shared, dc, generation).await;
        })
    }));

    Ok(pc)
}

/// Register channel callbacks and publish the channel
async fn attach_channel(shared: &Arc<Shared>, dc: Arc<RTCDataChannel>, generation: u64) {
    if !shared.is_current(generation) {
        return;
    }

    let low = Arc::new(Notify::new());

    let open_shared = shared.clone();
    let label = dc.label().to_string();
    dc.on_open(Box::new(move || {
        let shared = open_shared.clone();
        let label = label.clone();
        Box::pin(async move {
            info!("Data channel '{}' open", label);
            shared.emit(generation, ConnectionEvent::ChannelOpen);
        })
    }));

    let msg_shared = shared.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let shared = msg_shared.clone();
        Box::pin(async move {
            let frame = if msg.is_string {
                Frame::Text(String::from_utf8_lossy(&msg.data).into_owned())
            } else {
                Frame::Binary(msg.data)
            };
            shared.emit(generation, ConnectionEvent::Message(frame));
        })
    }));

    let close_shared = shared.clone();
    dc.on_close(Box::new(move || {
        let shared = close_shared.clone();
        Box::pin(async move {
            debug!("Data channel closed");
            shared.emit(generation, ConnectionEvent::ChannelClosed);
        })
    }));

    dc.set_buffered_amount_low_threshold(LOW_WATER_MARK).await;
    let low_notify = low.clone();
    dc.on_buffered_amount_low(Box::new(move || {
        let low = low_notify.clone();
        Box::pin(async move {
            low.notify_one();
        })
    }))
    .await;

    shared.set_channel(Some(Arc::new(RtcDataChannel { dc, low })));
}

/// Data channel with send-side flow control
pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
    low: Arc<Notify>,
}

impl RtcDataChannel {
    /// Block while the send buffer is above the high-water mark
    async fn wait_for_room(&self) -> Result<(), ConnectionError> {
        while self.dc.buffered_amount().await > HIGH_WATER_MARK {
            if !self.is_open() {
                return Err(ConnectionError::Closed);
            }
            // A notification can fire before we start waiting; re-check
            let _ = tokio::time::timeout(Duration::from_millis(500), self.low.notified()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.wait_for_room().await?;

        let result = match frame {
            Frame::Text(text) => self.dc.send_text(text).await,
            Frame::Binary(data) => self.dc.send(&data).await,
        };
        result
            .map(|_| ())
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn flush(&self) -> Result<(), ConnectionError> {
        let start = Instant::now();
        while self.dc.buffered_amount().await > 0 {
            if !self.is_open() {
                return Err(ConnectionError::Closed);
            }
            if start.elapsed() > FLUSH_TIMEOUT {
                return Err(ConnectionError::SendFailed("send buffer did not drain".into()));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }
}

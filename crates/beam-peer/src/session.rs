//! Negotiation state machine for one peer
//!
//! [`PeerSession`] performs no I/O. Every input returns the [`Effect`]s the
//! caller must carry out, and the results of asynchronous work (a created
//! offer, an applied remote description) come back in as further inputs.
//!
//! ```text
//! Idle ──join──▶ AwaitingRoom ──user-joined / offer──▶ Negotiating ──open──▶ Connected
//!                    ▲                                   ▲  │                    │
//!                    │                                   └──┼── channel close ───┤
//!                    └──────────────── peer-left ───────────┴────────────────────┘
//!
//! Negotiating / Connected ──unrecoverable error / timeout──▶ Failed
//! any ──close──▶ Closed
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use beam_core::{
    Config, Frame, IceCandidate, MemberId, ReceiveOutcome, ReceivedFile, RoomId,
    SessionDescription, TransferError, TransferReceiver, DEFAULT_MAX_INCOMING_BYTES,
    DEFAULT_NEGOTIATION_TIMEOUT_SECS,
};
use beam_signal::{ClientMessage, ErrorCode, ServerMessage, SharedFile};

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingRoom,
    Negotiating,
    Connected,
    Closed,
    /// Absorbing: nothing further happens until the session is dropped
    Failed,
}

/// Which side of the negotiation this peer plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Was already in the room; creates the channel and the offer
    Initiator,
    /// Joined second; answers the offer
    Responder,
}

/// User-facing status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    WaitingForPeer,
    Negotiating,
    Connected,
    PeerDisconnected,
    PeerUnreachable,
    TimedOut,
    /// The relay refused the join (room full, invalid id)
    JoinRefused,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::WaitingForPeer => "waiting-for-peer",
            SessionStatus::Negotiating => "negotiating",
            SessionStatus::Connected => "connected",
            SessionStatus::PeerDisconnected => "peer-disconnected",
            SessionStatus::PeerUnreachable => "peer-unreachable",
            SessionStatus::TimedOut => "timed-out",
            SessionStatus::JoinRefused => "join-refused",
            SessionStatus::Closed => "closed",
        }
    }

    /// The session cannot make progress after this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::PeerUnreachable
                | SessionStatus::TimedOut
                | SessionStatus::JoinRefused
                | SessionStatus::Closed
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work the session asks its runner to perform
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a message to the relay
    Signal(ClientMessage),
    /// Create the data channel; must precede `CreateOffer`
    CreateDataChannel,
    /// Create an offer and report it via [`PeerSession::on_local_description`]
    CreateOffer,
    /// Create an answer and report it via [`PeerSession::on_local_description`]
    CreateAnswer,
    /// Apply and report via [`PeerSession::on_remote_description_applied`]
    ApplyRemoteDescription(SessionDescription),
    AddIceCandidate(IceCandidate),
    /// Throw away the peer connection and prepare a fresh one
    ResetConnection,
    CloseConnection,
    Status(SessionStatus),
    TransferStarted { name: String, size: u64 },
    TransferProgress { received: u64, total: u64 },
    FileReceived(ReceivedFile),
    TransferFailed(TransferError),
    /// The relay holds a file for this room
    FileShared(SharedFile),
}

/// Session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed from entering Negotiating to the channel opening
    pub negotiation_timeout: Duration,
    /// Largest incoming file accepted
    pub max_incoming_bytes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(DEFAULT_NEGOTIATION_TIMEOUT_SECS),
            max_incoming_bytes: DEFAULT_MAX_INCOMING_BYTES,
        }
    }
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            negotiation_timeout: config.peer.negotiation_timeout(),
            max_incoming_bytes: config.transfer.max_incoming_bytes,
        }
    }
}

/// Per-client negotiation and receive state
pub struct PeerSession {
    state: SessionState,
    role: Option<Role>,
    room: Option<RoomId>,
    member_id: Option<MemberId>,
    /// Remote candidates that arrived before the remote description
    pending_candidates: VecDeque<IceCandidate>,
    remote_description_set: bool,
    deadline: Option<Instant>,
    receiver: TransferReceiver,
    config: SessionConfig,
}

impl PeerSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: SessionState::Idle,
            role: None,
            room: None,
            member_id: None,
            pending_candidates: VecDeque::new(),
            remote_description_set: false,
            deadline: None,
            receiver: TransferReceiver::new(config.max_incoming_bytes),
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// Our id as assigned by the relay, once the join is acknowledged
    pub fn member_id(&self) -> Option<&MemberId> {
        self.member_id.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// When the current negotiation attempt times out
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Enter a room
    pub fn join(&mut self, room: RoomId) -> Vec<Effect> {
        if self.state != SessionState::Idle {
            warn!("Ignoring join of {} in state {:?}", room, self.state);
            return Vec::new();
        }

        info!("Joining room {}", room);
        self.state = SessionState::AwaitingRoom;
        self.room = Some(room.clone());
        vec![
            Effect::Signal(ClientMessage::JoinRoom { room_id: room }),
            Effect::Status(SessionStatus::WaitingForPeer),
        ]
    }

    /// Handle a message from the relay
    pub fn on_signal(&mut self, message: ServerMessage) -> Vec<Effect> {
        if self.is_finished() {
            debug!("Ignoring relay message in state {:?}", self.state);
            return Vec::new();
        }

        match message {
            ServerMessage::Joined {
                member_id, members, ..
            } => {
                info!("Joined as {} ({} peer(s) present)", member_id, members.len());
                self.member_id = Some(member_id);
                Vec::new()
            }

            ServerMessage::UserJoined { member_id } => {
                if self.state != SessionState::AwaitingRoom {
                    warn!("Ignoring user-joined from {} in state {:?}", member_id, self.state);
                    return Vec::new();
                }
                info!("Peer {} joined, sending offer", member_id);
                self.enter_negotiating(Role::Initiator);
                vec![
                    Effect::Status(SessionStatus::Negotiating),
                    Effect::CreateDataChannel,
                    Effect::CreateOffer,
                ]
            }

            ServerMessage::Offer { offer } => {
                let mut effects = match (self.state, self.role) {
                    (SessionState::AwaitingRoom, _) => Vec::new(),
                    (SessionState::Negotiating, Some(Role::Responder))
                        if !self.remote_description_set =>
                    {
                        debug!("Received offer for the new connection");
                        return vec![Effect::ApplyRemoteDescription(offer)];
                    }
                    (SessionState::Connected, Some(Role::Responder)) => {
                        info!("Peer restarted the connection");
                        let mut effects = self.discard_negotiation();
                        effects.push(Effect::ResetConnection);
                        effects
                    }
                    _ => {
                        warn!("Ignoring offer in state {:?} as {:?}", self.state, self.role);
                        return Vec::new();
                    }
                };
                info!("Received offer, answering");
                self.enter_negotiating(Role::Responder);
                effects.push(Effect::Status(SessionStatus::Negotiating));
                effects.push(Effect::ApplyRemoteDescription(offer));
                effects
            }

            ServerMessage::Answer { answer } => {
                if self.state != SessionState::Negotiating
                    || self.role != Some(Role::Initiator)
                    || self.remote_description_set
                {
                    warn!("Ignoring answer in state {:?} as {:?}", self.state, self.role);
                    return Vec::new();
                }
                debug!("Received answer");
                vec![Effect::ApplyRemoteDescription(answer)]
            }

            ServerMessage::IceCandidate { candidate } => {
                if self.remote_description_set {
                    vec![Effect::AddIceCandidate(candidate)]
                } else {
                    debug!("Queueing candidate until the remote description is set");
                    self.pending_candidates.push_back(candidate);
                    Vec::new()
                }
            }

            ServerMessage::PeerLeft { member_id } => match self.state {
                SessionState::Negotiating | SessionState::Connected => {
                    info!("Peer {} left", member_id);
                    self.reset()
                }
                _ => Vec::new(),
            },

            ServerMessage::Error { code, message } => {
                warn!("Relay error {:?}: {}", code, message);
                let refused = matches!(
                    code,
                    ErrorCode::RoomFull | ErrorCode::AlreadyInRoom | ErrorCode::InvalidRoom
                );
                if refused && self.state == SessionState::AwaitingRoom {
                    self.room = None;
                    return self.fail(SessionStatus::JoinRefused);
                }
                Vec::new()
            }

            ServerMessage::FileShared(file) => {
                if self.room.is_none() {
                    return Vec::new();
                }
                info!("Relay holds '{}' at {}", file.originalname, file.path);
                vec![Effect::FileShared(file)]
            }

            ServerMessage::Pong { .. } => Vec::new(),
        }
    }

    /// The runner created an offer or answer
    pub fn on_local_description(&mut self, desc: SessionDescription) -> Vec<Effect> {
        let room_id = match (&self.state, &self.room) {
            (SessionState::Negotiating, Some(room)) => room.clone(),
            _ => {
                debug!("Dropping local description in state {:?}", self.state);
                return Vec::new();
            }
        };

        let message = match self.role {
            Some(Role::Initiator) => ClientMessage::Offer { room_id, offer: desc },
            Some(Role::Responder) => ClientMessage::Answer { room_id, answer: desc },
            None => return Vec::new(),
        };
        vec![Effect::Signal(message)]
    }

    /// The remote offer/answer is in place; queued candidates can now be added
    pub fn on_remote_description_applied(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Negotiating {
            return Vec::new();
        }

        self.remote_description_set = true;
        let mut effects: Vec<Effect> = self
            .pending_candidates
            .drain(..)
            .map(Effect::AddIceCandidate)
            .collect();
        if !effects.is_empty() {
            debug!("Replaying {} queued candidate(s)", effects.len());
        }

        if self.role == Some(Role::Responder) {
            effects.push(Effect::CreateAnswer);
        }
        effects
    }

    /// Creating or applying a description failed
    pub fn on_negotiation_failed(&mut self, reason: &str) -> Vec<Effect> {
        match self.state {
            SessionState::Negotiating | SessionState::Connected => {
                warn!("Negotiation failed: {}", reason);
                self.fail(SessionStatus::PeerUnreachable)
            }
            _ => Vec::new(),
        }
    }

    /// The connection refused a remote candidate
    pub fn on_candidate_rejected(&mut self, reason: &str) -> Vec<Effect> {
        warn!("Remote candidate rejected: {}", reason);
        Vec::new()
    }

    /// The connection produced a local candidate
    pub fn on_local_candidate(&mut self, candidate: IceCandidate) -> Vec<Effect> {
        match (&self.state, &self.room) {
            (SessionState::AwaitingRoom | SessionState::Negotiating | SessionState::Connected, Some(room)) => {
                vec![Effect::Signal(ClientMessage::IceCandidate {
                    room_id: room.clone(),
                    candidate,
                })]
            }
            _ => Vec::new(),
        }
    }

    /// The data channel opened
    pub fn on_channel_open(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Negotiating {
            debug!("Ignoring channel open in state {:?}", self.state);
            return Vec::new();
        }
        info!("Data channel open");
        self.state = SessionState::Connected;
        self.deadline = None;
        vec![Effect::Status(SessionStatus::Connected)]
    }

    /// A frame arrived on the data channel
    ///
    /// A frame can overtake the open notification; it proves the channel is
    /// open, so the session connects first.
    pub fn on_channel_message(&mut self, frame: Frame) -> Vec<Effect> {
        let mut effects = match self.state {
            SessionState::Connected => Vec::new(),
            SessionState::Negotiating => self.on_channel_open(),
            _ => {
                debug!("Dropping {} byte frame in state {:?}", frame.len(), self.state);
                return Vec::new();
            }
        };

        match self.receiver.on_frame(frame) {
            ReceiveOutcome::Started { name, size } => effects.push(Effect::TransferStarted { name, size }),
            ReceiveOutcome::Progress { received, total } => {
                effects.push(Effect::TransferProgress { received, total })
            }
            ReceiveOutcome::Completed(file) => effects.push(Effect::FileReceived(file)),
            ReceiveOutcome::Failed(error) => effects.push(Effect::TransferFailed(error)),
            ReceiveOutcome::Ignored => {}
        }
        effects
    }

    /// The data channel closed
    ///
    /// Both peers are still in the room, so negotiation restarts in the same
    /// roles: the initiator offers again and the responder waits for that
    /// offer. Either way the deadline is armed.
    pub fn on_channel_close(&mut self) -> Vec<Effect> {
        if !matches!(self.state, SessionState::Negotiating | SessionState::Connected) {
            return Vec::new();
        }
        info!("Data channel closed");

        let role = self.role;
        let mut effects = self.reset();
        match role {
            Some(Role::Initiator) => {
                self.enter_negotiating(Role::Initiator);
                effects.extend([
                    Effect::Status(SessionStatus::Negotiating),
                    Effect::CreateDataChannel,
                    Effect::CreateOffer,
                ]);
            }
            Some(Role::Responder) => {
                self.enter_negotiating(Role::Responder);
                effects.push(Effect::Status(SessionStatus::Negotiating));
            }
            None => {}
        }
        effects
    }

    /// The connection reported an unrecoverable failure
    pub fn on_connection_failed(&mut self, reason: &str) -> Vec<Effect> {
        match self.state {
            SessionState::Negotiating | SessionState::Connected => {
                warn!("Connection failed: {}", reason);
                self.fail(SessionStatus::PeerUnreachable)
            }
            _ => Vec::new(),
        }
    }

    /// Check the negotiation deadline
    pub fn poll_timeout(&mut self, now: Instant) -> Vec<Effect> {
        match (self.state, self.deadline) {
            (SessionState::Negotiating, Some(deadline)) if now >= deadline => {
                warn!(
                    "Negotiation timed out after {:?}",
                    self.config.negotiation_timeout
                );
                self.fail(SessionStatus::TimedOut)
            }
            _ => Vec::new(),
        }
    }

    /// Shut the session down
    ///
    /// A failed session already released its connection and room.
    pub fn close(&mut self) -> Vec<Effect> {
        if self.is_finished() {
            return Vec::new();
        }

        info!("Closing session");
        let mut effects = self.discard_negotiation();
        effects.push(Effect::CloseConnection);
        if self.room.take().is_some() {
            effects.push(Effect::Signal(ClientMessage::LeaveRoom));
        }
        self.state = SessionState::Closed;
        effects.push(Effect::Status(SessionStatus::Closed));
        effects
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Closed | SessionState::Failed)
    }

    fn enter_negotiating(&mut self, role: Role) {
        self.state = SessionState::Negotiating;
        self.role = Some(role);
        self.remote_description_set = false;
        self.deadline = Some(Instant::now() + self.config.negotiation_timeout);
    }

    /// Drop everything tied to the current connection attempt
    fn discard_negotiation(&mut self) -> Vec<Effect> {
        self.pending_candidates.clear();
        self.remote_description_set = false;
        self.role = None;
        self.deadline = None;
        self.receiver
            .abandon()
            .map(Effect::TransferFailed)
            .into_iter()
            .collect()
    }

    /// Back to AwaitingRoom until a peer offers or joins
    fn reset(&mut self) -> Vec<Effect> {
        let mut effects = self.discard_negotiation();
        self.state = SessionState::AwaitingRoom;
        effects.push(Effect::ResetConnection);
        effects.push(Effect::Status(SessionStatus::PeerDisconnected));
        effects
    }

    fn fail(&mut self, status: SessionStatus) -> Vec<Effect> {
        let mut effects = self.discard_negotiation();
        effects.push(Effect::CloseConnection);
        if self.room.take().is_some() {
            effects.push(Effect::Signal(ClientMessage::LeaveRoom));
        }
        self.state = SessionState::Failed;
        effects.push(Effect::Status(status));
        effects
    }
}

impl Default for PeerSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

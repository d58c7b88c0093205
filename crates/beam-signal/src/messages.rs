//! Signal protocol messages
//!
//! Every WebSocket text message is one JSON object tagged by `type`:
//!
//! ```text
//! client → relay   {"type":"offer","roomId":"abc","offer":{"type":"offer","sdp":"..."}}
//! relay  → peer    {"type":"offer","offer":{"type":"offer","sdp":"..."}}
//! ```

use serde::{Deserialize, Serialize};

use beam_core::{IceCandidate, MemberId, RoomId, SessionDescription};

/// Messages a client sends to the relay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a room (created on demand)
    JoinRoom { room_id: RoomId },

    /// Session offer for the other member
    Offer {
        room_id: RoomId,
        offer: SessionDescription,
    },

    /// Session answer for the other member
    Answer {
        room_id: RoomId,
        answer: SessionDescription,
    },

    /// ICE candidate for the other member
    IceCandidate {
        room_id: RoomId,
        candidate: IceCandidate,
    },

    /// Leave the current room without disconnecting
    LeaveRoom,

    /// Keepalive
    Ping { timestamp: u64 },
}

/// Messages the relay sends to a client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Join acknowledged; `members` lists who was already in the room
    Joined {
        room_id: RoomId,
        member_id: MemberId,
        members: Vec<MemberId>,
    },

    /// Another member entered the room
    UserJoined { member_id: MemberId },

    /// Relayed session offer
    Offer { offer: SessionDescription },

    /// Relayed session answer
    Answer { answer: SessionDescription },

    /// Relayed ICE candidate
    IceCandidate { candidate: IceCandidate },

    /// A member left the room or disconnected
    PeerLeft { member_id: MemberId },

    /// A file was uploaded to the relay for this room
    FileShared(SharedFile),

    /// Keepalive response
    Pong { timestamp: u64 },

    /// Error response
    Error { code: ErrorCode, message: String },
}

/// A file stored on the relay, downloadable from `path`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFile {
    /// Name the file is stored under
    pub filename: String,
    /// Name the uploader gave it
    pub originalname: String,
    /// Server-relative download path, `/uploads/<filename>`
    pub path: String,
}

/// Error codes
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Room already has the maximum number of members
    RoomFull,

    /// Member is already in another room
    AlreadyInRoom,

    /// Room id failed validation
    InvalidRoom,

    /// Message could not be parsed
    InvalidMessage,
}

/// The payload of a relayed envelope, stripped of its room id
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl Envelope {
    /// Wire name of the envelope kind
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Offer(_) => "offer",
            Envelope::Answer(_) => "answer",
            Envelope::IceCandidate(_) => "ice-candidate",
        }
    }

    /// The message delivered to the recipient
    pub fn into_server_message(self) -> ServerMessage {
        match self {
            Envelope::Offer(offer) => ServerMessage::Offer { offer },
            Envelope::Answer(answer) => ServerMessage::Answer { answer },
            Envelope::IceCandidate(candidate) => ServerMessage::IceCandidate { candidate },
        }
    }
}

impl ClientMessage {
    /// Split a relayable message into its room and envelope
    pub fn into_envelope(self) -> Result<(RoomId, Envelope), Self> {
        match self {
            ClientMessage::Offer { room_id, offer } => Ok((room_id, Envelope::Offer(offer))),
            ClientMessage::Answer { room_id, answer } => Ok((room_id, Envelope::Answer(answer))),
            ClientMessage::IceCandidate { room_id, candidate } => {
                Ok((room_id, Envelope::IceCandidate(candidate)))
            }
            other => Err(other),
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Create an error message
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

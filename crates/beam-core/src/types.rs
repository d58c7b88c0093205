//! Identifiers and opaque negotiation payloads

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProtocolError;
use crate::MAX_ROOM_ID_LEN;

/// Query parameter that carries the room in a share link
pub const ROOM_QUERY_PARAM: &str = "room";

/// Room identifier chosen by the clients
///
/// Rooms are matched by exact string equality; the relay never interprets
/// the contents beyond [`RoomId::validate`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room id, rejecting empty or oversized values
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let room = Self(id.into());
        room.validate()?;
        Ok(room)
    }

    /// Check the id is non-empty and within [`MAX_ROOM_ID_LEN`]
    ///
    /// Deserialized ids skip this check, so the relay calls it on every join.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.0.is_empty() {
            return Err(ProtocolError::InvalidRoomId("room id is empty".into()));
        }
        if self.0.len() > MAX_ROOM_ID_LEN {
            return Err(ProtocolError::InvalidRoomId(format!(
                "room id is {} bytes (max {})",
                self.0.len(),
                MAX_ROOM_ID_LEN
            )));
        }
        Ok(())
    }

    /// Accept either a bare room id or a share link carrying `?room=<id>`
    pub fn from_link(input: &str) -> Result<Self, ProtocolError> {
        let input = input.trim();
        match Url::parse(input) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let room = url
                    .query_pairs()
                    .find(|(key, _)| key == ROOM_QUERY_PARAM)
                    .map(|(_, value)| value.into_owned())
                    .ok_or_else(|| {
                        ProtocolError::InvalidRoomId(format!(
                            "link has no '{}' parameter",
                            ROOM_QUERY_PARAM
                        ))
                    })?;
                Self::new(room)
            }
            _ => Self::new(input),
        }
    }

    /// Build a share link for this room on top of `base`
    pub fn share_link(&self, base: &str) -> Result<Url, ProtocolError> {
        let mut url = Url::parse(base)
            .map_err(|e| ProtocolError::InvalidRoomId(format!("invalid base url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair(ROOM_QUERY_PARAM, &self.0);
        Ok(url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-connection identity assigned by the relay
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Generate a random 16 hex character id
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        getrandom::fill(&mut bytes).expect("RNG failed");
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque session description (offer or answer) exchanged through the relay
///
/// Browsers send `{"type": "offer", "sdp": "..."}`; the relay and the session
/// state machine never look inside.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub serde_json::Value);

impl SessionDescription {
    /// Build the browser-compatible `{type, sdp}` form
    pub fn new(kind: &str, sdp: impl Into<String>) -> Self {
        Self(serde_json::json!({ "type": kind, "sdp": sdp.into() }))
    }

    /// The `sdp` field, if the payload has one
    pub fn sdp(&self) -> Option<&str> {
        self.0.get("sdp").and_then(|s| s.as_str())
    }

    /// The `type` field (`offer` / `answer`), if present
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(|s| s.as_str())
    }
}

/// Opaque ICE candidate descriptor exchanged through the relay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceCandidate(pub serde_json::Value);

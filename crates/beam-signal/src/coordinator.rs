//! Room membership and envelope fan-out
//!
//! The coordinator owns two tables:
//!
//! - `rooms`: room id → [`Room`] (who is in it)
//! - `members`: member id → outbound queue plus current room
//!
//! Each connection task calls into the coordinator; per-room mutations are
//! serialized by the room's map entry lock, so independent rooms never contend.
//! Messages are pushed onto each member's unbounded queue and written to the
//! socket by that connection's writer task.

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use beam_core::{MemberId, RoomId};

use crate::messages::{ClientMessage, Envelope, ErrorCode, ServerMessage};
use crate::room::{Room, RoomError};

/// Outbound queue of one connected member
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

struct MemberEntry {
    outbound: Outbound,
    room: Option<RoomId>,
}

/// Why a join was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("Room {0} is full")]
    RoomFull(RoomId),

    #[error("Already in room {0}")]
    AlreadyInRoom(RoomId),

    #[error("Invalid room id: {0}")]
    InvalidRoom(String),

    #[error("Unknown member {0}")]
    UnknownMember(MemberId),
}

impl JoinError {
    /// Wire error code sent back to the client
    pub fn code(&self) -> ErrorCode {
        match self {
            JoinError::RoomFull(_) => ErrorCode::RoomFull,
            JoinError::AlreadyInRoom(_) => ErrorCode::AlreadyInRoom,
            JoinError::InvalidRoom(_) => ErrorCode::InvalidRoom,
            JoinError::UnknownMember(_) => ErrorCode::InvalidMessage,
        }
    }
}

/// Shared relay state
pub struct RelayCoordinator {
    rooms: DashMap<RoomId, Room>,
    members: DashMap<MemberId, MemberEntry>,
    max_members_per_room: usize,
}

impl RelayCoordinator {
    pub fn new(max_members_per_room: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            members: DashMap::new(),
            max_members_per_room: max_members_per_room.max(1),
        }
    }

    /// Register a freshly accepted connection
    pub fn connect(&self, member_id: MemberId, outbound: Outbound) {
        debug!("Member {} connected", member_id);
        self.members.insert(member_id, MemberEntry { outbound, room: None });
    }

    /// Add a member to a room, creating the room on demand
    ///
    /// Returns the members that were already present. Every one of them is
    /// sent `user-joined`; the joiner is not.
    pub fn join(&self, member_id: &MemberId, room_id: RoomId) -> Result<Vec<MemberId>, JoinError> {
        room_id
            .validate()
            .map_err(|e| JoinError::InvalidRoom(e.to_string()))?;

        let current = self
            .members
            .get(member_id)
            .map(|entry| entry.room.clone())
            .ok_or_else(|| JoinError::UnknownMember(member_id.clone()))?;

        match current {
            Some(current) if current == room_id => {
                let existing = self
                    .rooms
                    .get(&room_id)
                    .map(|room| room.others(member_id))
                    .unwrap_or_default();
                return Ok(existing);
            }
            Some(current) => return Err(JoinError::AlreadyInRoom(current)),
            None => {}
        }

        let existing = {
            let mut room = self
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| Room::new(room_id.clone(), self.max_members_per_room));
            room.add_member(member_id.clone()).map_err(|e| match e {
                RoomError::RoomFull => JoinError::RoomFull(room_id.clone()),
            })?
        };

        if let Some(mut entry) = self.members.get_mut(member_id) {
            entry.room = Some(room_id.clone());
        }

        for other in &existing {
            self.send_to(
                other,
                ServerMessage::UserJoined {
                    member_id: member_id.clone(),
                },
            );
        }

        info!(
            "Member {} joined room {} ({} already present)",
            member_id,
            room_id,
            existing.len()
        );
        Ok(existing)
    }

    /// Forward an envelope to every other member of `room_id`
    ///
    /// The payload is not inspected. Returns the number of members it was
    /// delivered to; a missing room delivers to nobody.
    pub fn relay(&self, sender: &MemberId, room_id: &RoomId, envelope: Envelope) -> usize {
        let recipients = match self.rooms.get(room_id) {
            Some(room) => room.others(sender),
            None => {
                debug!("Dropping {} for missing room {}", envelope.kind(), room_id);
                return 0;
            }
        };

        debug!(
            "Relaying {} from {} in room {} to {} member(s)",
            envelope.kind(),
            sender,
            room_id,
            recipients.len()
        );

        let message = envelope.into_server_message();
        recipients
            .iter()
            .filter(|recipient| self.send_to(recipient, message.clone()))
            .count()
    }

    /// Send a message to every member of `room_id`
    ///
    /// Returns the number of members it was delivered to.
    pub fn broadcast(&self, room_id: &RoomId, message: ServerMessage) -> usize {
        let members = self.room_members(room_id);
        debug!("Broadcasting to {} member(s) of room {}", members.len(), room_id);
        members
            .iter()
            .filter(|member| self.send_to(member, message.clone()))
            .count()
    }

    /// Remove a member from its room, notifying the rest
    ///
    /// Returns the room that was left, if any. The room is deleted once empty.
    pub fn leave(&self, member_id: &MemberId) -> Option<RoomId> {
        let room_id = self
            .members
            .get_mut(member_id)
            .and_then(|mut entry| entry.room.take())?;

        let remaining = match self.rooms.get_mut(&room_id) {
            Some(mut room) => {
                room.remove_member(member_id);
                room.member_ids()
            }
            None => Vec::new(),
        };

        if self.rooms.remove_if(&room_id, |_, room| room.is_empty()).is_some() {
            debug!("Room {} removed (empty)", room_id);
        }

        for other in &remaining {
            self.send_to(
                other,
                ServerMessage::PeerLeft {
                    member_id: member_id.clone(),
                },
            );
        }

        info!("Member {} left room {}", member_id, room_id);
        Some(room_id)
    }

    /// Drop a member entirely
    ///
    /// Dropping the outbound queue ends the connection's writer task.
    pub fn disconnect(&self, member_id: &MemberId) {
        self.leave(member_id);
        self.members.remove(member_id);
        debug!("Member {} disconnected", member_id);
    }

    /// Dispatch one parsed client message
    pub fn handle(&self, member_id: &MemberId, message: ClientMessage) {
        match message {
            ClientMessage::JoinRoom { room_id } => match self.join(member_id, room_id.clone()) {
                Ok(members) => {
                    self.send_to(
                        member_id,
                        ServerMessage::Joined {
                            room_id,
                            member_id: member_id.clone(),
                            members,
                        },
                    );
                }
                Err(e) => {
                    warn!("Join by {} refused: {}", member_id, e);
                    self.send_to(member_id, ServerMessage::error(e.code(), e.to_string()));
                }
            },
            ClientMessage::LeaveRoom => {
                self.leave(member_id);
            }
            ClientMessage::Ping { timestamp } => {
                self.send_to(member_id, ServerMessage::Pong { timestamp });
            }
            relayable => {
                if let Ok((room_id, envelope)) = relayable.into_envelope() {
                    self.relay(member_id, &room_id, envelope);
                }
            }
        }
    }

    /// Queue a message for one member
    ///
    /// Returns false if the member is gone or its connection is closing.
    pub fn send_to(&self, member_id: &MemberId, message: ServerMessage) -> bool {
        self.members
            .get(member_id)
            .map(|entry| entry.outbound.send(message).is_ok())
            .unwrap_or(false)
    }

    /// Members currently in a room
    pub fn room_members(&self, room_id: &RoomId) -> Vec<MemberId> {
        self.rooms
            .get(room_id)
            .map(|room| room.member_ids())
            .unwrap_or_default()
    }

    /// Get room count (for monitoring)
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get connected member count (for monitoring)
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

impl Default for RelayCoordinator {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_MEMBERS_PER_ROOM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_core::{IceCandidate, SessionDescription};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn member(coordinator: &RelayCoordinator, id: &str) -> (MemberId, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = MemberId::from(id);
        coordinator.connect(id.clone(), tx);
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn offer() -> Envelope {
        Envelope::Offer(SessionDescription::new("offer", "v=0\r\n"))
    }

    #[test]
    fn test_join_fans_out_to_existing_members_only() {
        let coordinator = RelayCoordinator::new(4);
        let (a, mut rx_a) = member(&coordinator, "a");
        let (b, mut rx_b) = member(&coordinator, "b");
        let (c, mut rx_c) = member(&coordinator, "c");

        assert!(coordinator.join(&a, room("abc")).unwrap().is_empty());
        assert_eq!(coordinator.join(&b, room("abc")).unwrap(), vec![a.clone()]);
        let existing = coordinator.join(&c, room("abc")).unwrap();
        assert_eq!(existing.len(), 2);

        let to_a = drain(&mut rx_a);
        assert_eq!(
            to_a,
            vec![
                ServerMessage::UserJoined { member_id: b.clone() },
                ServerMessage::UserJoined { member_id: c.clone() },
            ]
        );
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::UserJoined { member_id: c }]);
        // The joiner is never told about itself
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_relay_excludes_sender_and_preserves_payload() {
        let coordinator = RelayCoordinator::new(2);
        let (x, mut rx_x) = member(&coordinator, "x");
        let (y, mut rx_y) = member(&coordinator, "y");
        coordinator.join(&x, room("abc")).unwrap();
        coordinator.join(&y, room("abc")).unwrap();
        drain(&mut rx_x);

        let candidate = IceCandidate(json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host", "weird": true}));
        let delivered = coordinator.relay(&x, &room("abc"), Envelope::IceCandidate(candidate.clone()));

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_y), vec![ServerMessage::IceCandidate { candidate }]);
        assert!(drain(&mut rx_x).is_empty());
    }

    #[test]
    fn test_room_isolation() {
        let coordinator = RelayCoordinator::new(2);
        let (x, _rx_x) = member(&coordinator, "x");
        let (y, mut rx_y) = member(&coordinator, "y");
        let (z, mut rx_z) = member(&coordinator, "z");
        coordinator.join(&x, room("abc")).unwrap();
        coordinator.join(&y, room("abc")).unwrap();
        coordinator.join(&z, room("xyz")).unwrap();

        coordinator.relay(&x, &room("abc"), offer());
        coordinator.relay(&y, &room("abc"), Envelope::Answer(SessionDescription::new("answer", "v=0\r\n")));

        assert!(drain(&mut rx_z).is_empty());
        assert_eq!(drain(&mut rx_y).len(), 1);
    }

    #[test]
    fn test_broadcast_reaches_whole_room_only() {
        let coordinator = RelayCoordinator::new(2);
        let (x, mut rx_x) = member(&coordinator, "x");
        let (y, mut rx_y) = member(&coordinator, "y");
        let (z, mut rx_z) = member(&coordinator, "z");
        coordinator.join(&x, room("abc")).unwrap();
        coordinator.join(&y, room("abc")).unwrap();
        coordinator.join(&z, room("xyz")).unwrap();
        drain(&mut rx_x);

        let message = ServerMessage::Pong { timestamp: 7 };
        assert_eq!(coordinator.broadcast(&room("abc"), message.clone()), 2);
        assert_eq!(drain(&mut rx_x), vec![message.clone()]);
        assert_eq!(drain(&mut rx_y), vec![message.clone()]);
        assert!(drain(&mut rx_z).is_empty());

        assert_eq!(coordinator.broadcast(&room("nowhere"), message), 0);
    }

    #[test]
    fn test_relay_to_missing_room_is_noop() {
        let coordinator = RelayCoordinator::new(2);
        let (x, mut rx_x) = member(&coordinator, "x");

        assert_eq!(coordinator.relay(&x, &room("nowhere"), offer()), 0);
        assert!(drain(&mut rx_x).is_empty());
        assert_eq!(coordinator.room_count(), 0);
    }

    #[test]
    fn test_room_full() {
        let coordinator = RelayCoordinator::new(2);
        let (x, _rx_x) = member(&coordinator, "x");
        let (y, _rx_y) = member(&coordinator, "y");
        let (z, mut rx_z) = member(&coordinator, "z");
        coordinator.join(&x, room("abc")).unwrap();
        coordinator.join(&y, room("abc")).unwrap();

        assert_eq!(coordinator.join(&z, room("abc")), Err(JoinError::RoomFull(room("abc"))));

        coordinator.handle(&z, ClientMessage::JoinRoom { room_id: room("abc") });
        match drain(&mut rx_z).as_slice() {
            [ServerMessage::Error { code, .. }] => assert_eq!(*code, ErrorCode::RoomFull),
            other => panic!("unexpected messages: {:?}", other),
        }
        assert_eq!(coordinator.room_members(&room("abc")).len(), 2);
    }

    #[test]
    fn test_already_in_room() {
        let coordinator = RelayCoordinator::new(2);
        let (x, _rx_x) = member(&coordinator, "x");
        coordinator.join(&x, room("abc")).unwrap();

        assert_eq!(
            coordinator.join(&x, room("xyz")),
            Err(JoinError::AlreadyInRoom(room("abc")))
        );
        // Rejoining the same room is acknowledged without side effects
        assert!(coordinator.join(&x, room("abc")).unwrap().is_empty());
        assert_eq!(coordinator.room_count(), 1);
    }

    #[test]
    fn test_leave_notifies_and_removes_empty_room() {
        let coordinator = RelayCoordinator::new(2);
        let (x, mut rx_x) = member(&coordinator, "x");
        let (y, _rx_y) = member(&coordinator, "y");
        coordinator.join(&x, room("abc")).unwrap();
        coordinator.join(&y, room("abc")).unwrap();
        drain(&mut rx_x);

        assert_eq!(coordinator.leave(&y), Some(room("abc")));
        assert_eq!(drain(&mut rx_x), vec![ServerMessage::PeerLeft { member_id: y.clone() }]);
        assert_eq!(coordinator.leave(&y), None);

        coordinator.disconnect(&x);
        assert_eq!(coordinator.room_count(), 0);
        assert_eq!(coordinator.member_count(), 1);
    }

    #[test]
    fn test_disconnect_sends_peer_left() {
        let coordinator = RelayCoordinator::new(2);
        let (x, mut rx_x) = member(&coordinator, "x");
        let (y, _rx_y) = member(&coordinator, "y");
        coordinator.join(&x, room("abc")).unwrap();
        coordinator.join(&y, room("abc")).unwrap();
        drain(&mut rx_x);

        coordinator.disconnect(&y);

        assert_eq!(drain(&mut rx_x), vec![ServerMessage::PeerLeft { member_id: y }]);
        assert_eq!(coordinator.room_members(&room("abc")), vec![x]);
    }

    #[test]
    fn test_handle_join_ping_and_invalid_room() {
        let coordinator = RelayCoordinator::new(2);
        let (x, mut rx_x) = member(&coordinator, "x");

        coordinator.handle(&x, ClientMessage::Ping { timestamp: 7 });
        coordinator.handle(&x, ClientMessage::JoinRoom { room_id: room("abc") });

        assert_eq!(
            drain(&mut rx_x),
            vec![
                ServerMessage::Pong { timestamp: 7 },
                ServerMessage::Joined {
                    room_id: room("abc"),
                    member_id: x.clone(),
                    members: vec![],
                },
            ]
        );

        // Deserialization bypasses RoomId::new, so the coordinator re-checks
        let bogus: RoomId = serde_json::from_str(r#""""#).unwrap();
        assert!(matches!(coordinator.join(&x, bogus), Err(JoinError::InvalidRoom(_))));
    }
}

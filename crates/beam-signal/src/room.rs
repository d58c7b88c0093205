//! Room membership for the relay

use std::collections::HashSet;

use thiserror::Error;

use beam_core::{MemberId, RoomId};

/// A rendezvous point where peers find each other
pub struct Room {
    /// Identifier the clients agreed on
    pub room_id: RoomId,

    /// Current members
    members: HashSet<MemberId>,

    /// Maximum number of members
    capacity: usize,
}

impl Room {
    /// Create an empty room
    pub fn new(room_id: RoomId, capacity: usize) -> Self {
        Self {
            room_id,
            members: HashSet::new(),
            capacity,
        }
    }

    /// Add a member, returning the members that were already present
    ///
    /// Adding a member that is already present changes nothing.
    pub fn add_member(&mut self, member_id: MemberId) -> Result<Vec<MemberId>, RoomError> {
        if self.members.contains(&member_id) {
            return Ok(self.others(&member_id));
        }
        if self.members.len() >= self.capacity {
            return Err(RoomError::RoomFull);
        }

        let existing = self.member_ids();
        self.members.insert(member_id);
        Ok(existing)
    }

    /// Remove a member
    pub fn remove_member(&mut self, member_id: &MemberId) -> bool {
        self.members.remove(member_id)
    }

    /// Every member except `member_id`
    pub fn others(&self, member_id: &MemberId) -> Vec<MemberId> {
        self.members
            .iter()
            .filter(|id| *id != member_id)
            .cloned()
            .collect()
    }

    /// Get all member IDs
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.iter().cloned().collect()
    }

    pub fn contains(&self, member_id: &MemberId) -> bool {
        self.members.contains(member_id)
    }

    /// Number of members in the room
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if the room is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Room errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("room is full")]
    RoomFull,
}

//! Room membership and fan-out.

use dashmap::DashMap;
use inklayer_core::{Participant, StrokeColor};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// A frame fanned out to a room: sender's user id and the JSON text.
pub type RoomFrame = (String, String);

/// A participant and the connection that admitted it.
struct Member {
    participant: Participant,
    conn_id: Uuid,
}

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<RoomFrame>,
    /// Members in join order
    members: Vec<Member>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            members: Vec::new(),
        }
    }

    fn participants(&self) -> Vec<Participant> {
        self.members.iter().map(|m| m.participant.clone()).collect()
    }
}

/// Result of a successful join.
pub struct Joined {
    pub rx: broadcast::Receiver<RoomFrame>,
    /// The member as admitted, with any de-duplicated username.
    pub member: Participant,
    /// True if the requested username was taken.
    pub renamed: bool,
    /// Every member, the joiner included.
    pub users: Vec<Participant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub rooms: usize,
    pub members: usize,
}

/// Active rooms
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member to a room, creating it on first use.
    ///
    /// A username already held by someone else in the room gets a numeric
    /// suffix. Rejoining with the same user id replaces the old entry, and
    /// the entry then belongs to `conn_id`.
    pub fn join(&self, room_id: &str, conn_id: Uuid, user_id: &str, username: &str, color: StrokeColor) -> Joined {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.members.retain(|m| m.participant.user_id != user_id);

        let requested = match username.trim() {
            "" => "Guest",
            name => name,
        };
        let assigned = unique_username(room.members.iter().map(|m| m.participant.username.as_str()), requested);
        let participant = Participant::new(user_id, assigned.clone(), color);
        room.members.push(Member {
            participant: participant.clone(),
            conn_id,
        });

        Joined {
            rx: room.tx.subscribe(),
            renamed: assigned != username,
            member: participant,
            users: room.participants(),
        }
    }

    /// Remove the member admitted by `conn_id`. Empty rooms are dropped.
    ///
    /// Returns `None` if the user has since rejoined from another connection.
    pub fn leave(&self, room_id: &str, conn_id: Uuid, user_id: &str) -> Option<Participant> {
        let mut room = self.rooms.get_mut(room_id)?;
        let pos = room
            .members
            .iter()
            .position(|m| m.participant.user_id == user_id && m.conn_id == conn_id)?;
        let member = room.members.remove(pos);
        if room.members.is_empty() {
            drop(room);
            self.rooms.remove(room_id);
        }
        Some(member.participant)
    }

    /// Fan a frame out to every subscriber of the room.
    pub fn broadcast(&self, room_id: &str, from: &str, json: String) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), json));
        }
    }

    pub fn members(&self, room_id: &str) -> Vec<Participant> {
        self.rooms
            .get(room_id)
            .map(|room| room.participants())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.rooms.len(),
            members: self.rooms.iter().map(|room| room.members.len()).sum(),
        }
    }
}

/// `requested`, or `requested (n)` with the smallest free `n >= 2`.
pub fn unique_username<'a>(taken: impl Iterator<Item = &'a str> + Clone, requested: &str) -> String {
    if !taken.clone().any(|name| name == requested) {
        return requested.to_string();
    }
    (2..)
        .map(|n| format!("{} ({})", requested, n))
        .find(|candidate| !taken.clone().any(|name| name == candidate.as_str()))
        .unwrap_or_else(|| requested.to_string())
}

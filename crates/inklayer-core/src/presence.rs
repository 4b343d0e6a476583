//! Room roster and remote cursor tracking.

use crate::style::StrokeColor;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default minimum interval between cursor broadcasts.
pub const DEFAULT_CURSOR_INTERVAL_MS: u64 = 50;

/// A participant in the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub username: String,
    pub color: StrokeColor,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, color: StrokeColor) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            color,
        }
    }
}

/// Other participants in the room, in the order they became known.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, or update the existing entry with the same id.
    /// Returns true if the participant was new.
    pub fn upsert(&mut self, participant: Participant) -> bool {
        match self.participants.iter_mut().find(|p| p.user_id == participant.user_id) {
            Some(existing) => {
                *existing = participant;
                false
            }
            None => {
                self.participants.push(participant);
                true
            }
        }
    }

    /// Remove a participant by id.
    pub fn remove(&mut self, user_id: &str) -> Option<Participant> {
        let pos = self.participants.iter().position(|p| p.user_id == user_id)?;
        Some(self.participants.remove(pos))
    }

    /// Replace the whole roster, dropping `self_id`.
    pub fn replace(&mut self, users: Vec<Participant>, self_id: &str) {
        self.participants = users.into_iter().filter(|p| p.user_id != self_id).collect();
    }

    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.get(user_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}

/// Last known normalized cursor position of each remote participant.
#[derive(Debug, Clone, Default)]
pub struct RemoteCursors {
    cursors: HashMap<String, Point>,
}

impl RemoteCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or hide a participant's cursor.
    pub fn set(&mut self, user_id: &str, position: Option<Point>) {
        match position {
            Some(p) => {
                self.cursors.insert(user_id.to_string(), p);
            }
            None => {
                self.cursors.remove(user_id);
            }
        }
    }

    pub fn remove(&mut self, user_id: &str) -> bool {
        self.cursors.remove(user_id).is_some()
    }

    /// Keep only cursors whose owner passes `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.cursors.retain(|id, _| keep(id));
    }

    pub fn get(&self, user_id: &str) -> Option<Point> {
        self.cursors.get(user_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Point)> {
        self.cursors.iter().map(|(id, p)| (id.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }
}

/// Rate limiter for outgoing cursor updates.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Returns true and records the send if `now` is past the interval.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let ready = match self.last_sent {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if ready {
            self.last_sent = Some(now);
        }
        ready
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CURSOR_INTERVAL_MS))
    }
}

//! Per-session participant identity.
//!
//! Generated once per process run and reused across reconnects.

use crate::presence::Participant;
use crate::style::StrokeColor;
use uuid::Uuid;

/// Cursor/roster colors handed out to new identities.
pub const PALETTE: [StrokeColor; 8] = [
    StrokeColor::new(0xe6, 0x39, 0x46, 255),
    StrokeColor::new(0xf4, 0xa2, 0x61, 255),
    StrokeColor::new(0x2a, 0x9d, 0x8f, 255),
    StrokeColor::new(0x26, 0x46, 0x53, 255),
    StrokeColor::new(0x8e, 0x44, 0xad, 255),
    StrokeColor::new(0x34, 0x98, 0xdb, 255),
    StrokeColor::new(0x27, 0xae, 0x60, 255),
    StrokeColor::new(0xd3, 0x54, 0x00, 255),
];

/// Who this session is to other participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub color: StrokeColor,
}

impl Identity {
    /// Fresh identity with a random id, a `Guest-xxxx` name and a palette color.
    pub fn generate() -> Self {
        let id = Uuid::new_v4();
        let bytes = id.as_bytes();
        let color = PALETTE[bytes[0] as usize % PALETTE.len()];
        let simple = id.simple().to_string();
        Self {
            user_id: id.to_string(),
            username: format!("Guest-{}", &simple[..4]),
            color,
        }
    }

    /// Fresh identity with a chosen username.
    pub fn with_username(username: impl Into<String>) -> Self {
        let username = username.into();
        let mut identity = Self::generate();
        if !username.trim().is_empty() {
            identity.username = username.trim().to_string();
        }
        identity
    }

    pub fn participant(&self) -> Participant {
        Participant::new(self.user_id.clone(), self.username.clone(), self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_differ() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.user_id, b.user_id);
        assert!(a.username.starts_with("Guest-"));
        assert!(PALETTE.contains(&a.color));
    }

    #[test]
    fn test_with_username() {
        assert_eq!(Identity::with_username("  Ann ").username, "Ann");
        assert!(Identity::with_username("   ").username.starts_with("Guest-"));
    }
}

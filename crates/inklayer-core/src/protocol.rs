//! Wire protocol shared by peers and the relay.
//!
//! Every frame is a JSON object: the routing envelope (`roomId`, `authorId`)
//! flattened together with one event tagged by `event`.
//!
//! ```json
//! { "event": "drawing", "roomId": "r1", "authorId": "u1", "type": "move",
//!   "pos": { "x": 50, "y": 10 }, "mode": "brush", "color": "#000000",
//!   "width": 5, "strokeId": "s1" }
//! { "event": "undo", "roomId": "r1", "authorId": "u1", "canvasData": "data:image/png;base64,..." }
//! ```

use crate::presence::Participant;
use crate::style::{StrokeColor, StrokeMode};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Author id used by the relay for events it originates itself.
pub const RELAY_AUTHOR_ID: &str = "relay";

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Missing author id")]
    MissingAuthor,
    #[error("Invalid point: ({0}, {1})")]
    InvalidPoint(f64, f64),
    #[error("Invalid stroke width: {0}")]
    InvalidWidth(f64),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A point on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    pub x: f64,
    pub y: f64,
}

impl WirePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<Point> for WirePoint {
    fn from(p: Point) -> Self {
        Self::new(p.x, p.y)
    }
}

impl From<WirePoint> for Point {
    fn from(p: WirePoint) -> Self {
        Point::new(p.x, p.y)
    }
}

/// Phase of a stroke within a `drawing` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokePhase {
    Start,
    Move,
    End,
}

/// Room-scoped events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WireEvent {
    /// A peer announces itself to the room.
    JoinRoom {
        user_id: String,
        username: String,
        color: StrokeColor,
    },
    /// One sampled point of a stroke.
    Drawing {
        #[serde(rename = "type")]
        phase: StrokePhase,
        pos: WirePoint,
        mode: StrokeMode,
        color: StrokeColor,
        width: f64,
        stroke_id: String,
    },
    /// Cursor position normalized to `[0, 1]`, `None` when off-canvas.
    CursorMove { pos: Option<WirePoint> },
    /// The author wiped their own layer.
    ClearCanvas {},
    /// The author's full layer after an undo.
    Undo { canvas_data: String },
    /// The author's full layer after a redo.
    Redo { canvas_data: String },
    /// Ask every peer for its current layer.
    RequestCanvasState {},
    /// The author's current layer, in answer to a request.
    CanvasState { canvas_data: String },
    /// Full roster of the room.
    UsersUpdate { users: Vec<Participant> },
    /// A participant entered the room.
    UserJoined {
        user_id: String,
        username: String,
        color: StrokeColor,
    },
    /// A participant left the room.
    UserLeft {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    /// The relay settled on a different username for this peer.
    UsernameAssigned { username: String },
    /// Relay-side error.
    Error { message: String },
}

impl WireEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            WireEvent::JoinRoom { .. } => "join-room",
            WireEvent::Drawing { .. } => "drawing",
            WireEvent::CursorMove { .. } => "cursor-move",
            WireEvent::ClearCanvas {} => "clear-canvas",
            WireEvent::Undo { .. } => "undo",
            WireEvent::Redo { .. } => "redo",
            WireEvent::RequestCanvasState {} => "request-canvas-state",
            WireEvent::CanvasState { .. } => "canvas-state",
            WireEvent::UsersUpdate { .. } => "users-update",
            WireEvent::UserJoined { .. } => "user-joined",
            WireEvent::UserLeft { .. } => "user-left",
            WireEvent::UsernameAssigned { .. } => "username-assigned",
            WireEvent::Error { .. } => "error",
        }
    }
}

/// Routing envelope around a [`WireEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub room_id: String,
    pub author_id: String,
    #[serde(flatten)]
    pub event: WireEvent,
}

impl Envelope {
    pub fn new(room_id: impl Into<String>, author_id: impl Into<String>, event: WireEvent) -> Self {
        Self {
            room_id: room_id.into(),
            author_id: author_id.into(),
            event,
        }
    }

    /// Parse and validate an inbound frame.
    pub fn parse(json: &str) -> ProtocolResult<Self> {
        let envelope: Envelope = serde_json::from_str(json)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.author_id.trim().is_empty() {
            return Err(ProtocolError::MissingAuthor);
        }
        match &self.event {
            WireEvent::Drawing { pos, width, .. } => {
                if !pos.is_finite() {
                    return Err(ProtocolError::InvalidPoint(pos.x, pos.y));
                }
                if !width.is_finite() || *width <= 0.0 {
                    return Err(ProtocolError::InvalidWidth(*width));
                }
            }
            WireEvent::CursorMove { pos: Some(pos) } if !pos.is_finite() => {
                return Err(ProtocolError::InvalidPoint(pos.x, pos.y));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drawing_wire_shape() {
        let env = Envelope::new(
            "room",
            "alice",
            WireEvent::Drawing {
                phase: StrokePhase::Move,
                pos: WirePoint::new(50.0, 10.0),
                mode: StrokeMode::Brush,
                color: StrokeColor::black(),
                width: 5.0,
                stroke_id: "s1".to_string(),
            },
        );
        let json = env.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "drawing");
        assert_eq!(value["type"], "move");
        assert_eq!(value["roomId"], "room");
        assert_eq!(value["authorId"], "alice");
        assert_eq!(value["strokeId"], "s1");
        assert_eq!(value["color"], "#000000");
        assert_eq!(value["pos"]["x"], 50.0);

        assert_eq!(Envelope::parse(&json).unwrap(), env);
    }

    #[test]
    fn test_empty_events_parse() {
        let json = r#"{"event":"clear-canvas","roomId":"r","authorId":"bob"}"#;
        let env = Envelope::parse(json).unwrap();
        assert_eq!(env.event, WireEvent::ClearCanvas {});
        assert_eq!(env.event.name(), "clear-canvas");

        let json = r#"{"event":"request-canvas-state","roomId":"r","authorId":"bob"}"#;
        assert_eq!(Envelope::parse(json).unwrap().event, WireEvent::RequestCanvasState {});
    }

    #[test]
    fn test_snapshot_event_field_names() {
        let env = Envelope::new("r", "a", WireEvent::Undo { canvas_data: "data:x".into() });
        let json = env.to_json().unwrap();
        assert!(json.contains("\"canvasData\":\"data:x\""));
        assert!(json.contains("\"event\":\"undo\""));
    }

    #[test]
    fn test_cursor_null() {
        let json = r#"{"event":"cursor-move","roomId":"r","authorId":"bob","pos":null}"#;
        let env = Envelope::parse(json).unwrap();
        assert_eq!(env.event, WireEvent::CursorMove { pos: None });
    }

    #[test]
    fn test_missing_author_rejected() {
        let json = r#"{"event":"clear-canvas","roomId":"r"}"#;
        assert!(matches!(Envelope::parse(json), Err(ProtocolError::Malformed(_))));

        let json = r#"{"event":"clear-canvas","roomId":"r","authorId":"  "}"#;
        assert!(matches!(Envelope::parse(json), Err(ProtocolError::MissingAuthor)));
    }

    #[test]
    fn test_malformed_point_rejected() {
        let json = r##"{"event":"drawing","roomId":"r","authorId":"bob","type":"move","pos":{"x":"a","y":1},"mode":"brush","color":"#000","width":2,"strokeId":"s"}"##;
        assert!(Envelope::parse(json).is_err());

        let json = r##"{"event":"drawing","roomId":"r","authorId":"bob","type":"move","pos":{"x":1,"y":1},"mode":"brush","color":"#000","width":0,"strokeId":"s"}"##;
        assert!(matches!(Envelope::parse(json), Err(ProtocolError::InvalidWidth(_))));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let json = r#"{"event":"teleport","roomId":"r","authorId":"bob"}"#;
        assert!(Envelope::parse(json).is_err());
    }

    #[test]
    fn test_users_update() {
        let json = r##"{"event":"users-update","roomId":"r","authorId":"relay","users":[{"userId":"u1","username":"Ann","color":"#ff0000"}]}"##;
        let env = Envelope::parse(json).unwrap();
        match env.event {
            WireEvent::UsersUpdate { users } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].user_id, "u1");
                assert_eq!(users[0].color, StrokeColor::new(255, 0, 0, 255));
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }
}

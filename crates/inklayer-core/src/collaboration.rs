//! Bridge between the local canvas and the room relay.
//!
//! Outbound events are queued as JSON text frames and drained with
//! [`CollaborationManager::take_outgoing`]. Inbound frames are applied to
//! the [`Canvas`] by [`CollaborationManager::handle_message`], which reports
//! what changed as [`SessionEvent`]s.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use kurbo::Point;

use crate::canvas::Canvas;
use crate::identity::Identity;
use crate::presence::{CursorThrottle, Participant, RemoteCursors, Roster};
use crate::protocol::{Envelope, StrokePhase, WireEvent};
use crate::snapshot::Snapshot;
use crate::stroke::StrokeStyle;
use crate::sync::ConnectionState;

/// Something the UI may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The composed output changed.
    Repainted,
    ParticipantJoined(Participant),
    ParticipantLeft { user_id: String, username: Option<String> },
    /// The roster was replaced wholesale.
    RosterChanged,
    /// A remote cursor moved, or left the canvas (`None`).
    CursorMoved { user_id: String, pos: Option<Point> },
    /// The relay gave this peer a different username.
    UsernameAssigned(String),
    /// A remote author's layer was replaced from a snapshot.
    LayerRestored { user_id: String },
    /// Non-fatal relay error.
    RelayError(String),
    Connection(ConnectionState),
}

/// Manages room membership and translates between canvas operations and
/// wire events.
#[derive(Debug, Clone)]
pub struct CollaborationManager {
    identity: Identity,
    /// Current room ID (if joined).
    room: Option<String>,
    roster: Roster,
    cursors: RemoteCursors,
    cursor_throttle: CursorThrottle,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
    /// Inbound events held back while the surface restores.
    pending: VecDeque<Envelope>,
    /// Count of events queued or applied.
    logical_clock: u64,
}

impl CollaborationManager {
    pub fn new(identity: Identity) -> Self {
        Self::with_cursor_interval(identity, Duration::from_millis(crate::presence::DEFAULT_CURSOR_INTERVAL_MS))
    }

    pub fn with_cursor_interval(identity: Identity, interval: Duration) -> Self {
        Self {
            identity,
            room: None,
            roster: Roster::new(),
            cursors: RemoteCursors::new(),
            cursor_throttle: CursorThrottle::new(interval),
            outgoing: Vec::new(),
            pending: VecDeque::new(),
            logical_clock: 0,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Get the current room ID.
    pub fn current_room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn is_in_room(&self) -> bool {
        self.room.is_some()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn remote_cursors(&self) -> &RemoteCursors {
        &self.cursors
    }

    pub fn logical_clock(&self) -> u64 {
        self.logical_clock
    }

    /// Inbound events waiting for a restore to finish.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // --- Room Management ---

    /// Join a room: announce ourselves and ask every peer for its layer.
    pub fn join_room(&mut self, room: &str) {
        self.room = Some(room.to_string());
        self.queue_join();
    }

    /// Leave the current room and drop every remote trace from the canvas.
    pub fn leave_room(&mut self, canvas: &mut Canvas) {
        if self.room.take().is_none() {
            return;
        }
        let remotes: Vec<String> = canvas.layers().remote_ids().map(str::to_string).collect();
        for user_id in remotes {
            canvas.remove_author(&user_id);
        }
        self.roster.clear();
        self.cursors.clear();
        self.pending.clear();
        self.outgoing.clear();
    }

    /// Called when the relay connection (re)opens.
    ///
    /// Frames queued while offline are discarded; the fresh join and state
    /// request bring every peer back in sync.
    pub fn on_connected(&mut self) {
        if !self.outgoing.is_empty() {
            log::debug!("Discarding {} frames queued while offline", self.outgoing.len());
            self.outgoing.clear();
        }
        self.cursor_throttle.reset();
        if self.room.is_some() {
            log::info!("Connected; joining room as {}", self.identity.username);
            self.queue_join();
        }
    }

    fn queue_join(&mut self) {
        let join = WireEvent::JoinRoom {
            user_id: self.identity.user_id.clone(),
            username: self.identity.username.clone(),
            color: self.identity.color,
        };
        self.queue(join);
        self.queue(WireEvent::RequestCanvasState {});
    }

    // --- Outbound ---

    /// Queue one phase of a local stroke.
    pub fn broadcast_stroke(&mut self, phase: StrokePhase, pos: Point, style: &StrokeStyle, stroke_id: &str) {
        self.queue(WireEvent::Drawing {
            phase,
            pos: pos.into(),
            mode: style.mode,
            color: style.color,
            width: style.width,
            stroke_id: stroke_id.to_string(),
        });
    }

    pub fn broadcast_clear(&mut self) {
        self.queue(WireEvent::ClearCanvas {});
    }

    /// Queue the local layer as it stands after an undo.
    pub fn broadcast_undo(&mut self, snapshot: &Snapshot) {
        self.queue(WireEvent::Undo {
            canvas_data: snapshot.to_data_url(),
        });
    }

    /// Queue the local layer as it stands after a redo.
    pub fn broadcast_redo(&mut self, snapshot: &Snapshot) {
        self.queue(WireEvent::Redo {
            canvas_data: snapshot.to_data_url(),
        });
    }

    /// Queue a normalized cursor position, subject to throttling.
    /// Returns true if an event was queued. `None` is never throttled.
    pub fn set_cursor(&mut self, pos: Option<Point>, now: Instant) -> bool {
        match pos {
            Some(_) if !self.cursor_throttle.try_acquire(now) => false,
            Some(p) => self.queue(WireEvent::CursorMove { pos: Some(p.into()) }),
            None => {
                self.cursor_throttle.reset();
                self.queue(WireEvent::CursorMove { pos: None })
            }
        }
    }

    fn queue(&mut self, event: WireEvent) -> bool {
        let Some(room) = &self.room else {
            log::debug!("Not in a room; dropping outbound {}", event.name());
            return false;
        };
        let envelope = Envelope::new(room.clone(), self.identity.user_id.clone(), event);
        match envelope.to_json() {
            Ok(json) => {
                self.outgoing.push(json);
                self.logical_clock += 1;
                true
            }
            Err(e) => {
                log::error!("Failed to serialize {}: {}", envelope.event.name(), e);
                false
            }
        }
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Inbound ---

    /// Handle an incoming relay frame.
    ///
    /// Malformed frames and our own looped-back events are dropped. While the
    /// canvas is restoring, events are queued for [`flush_pending`](Self::flush_pending).
    pub fn handle_message(&mut self, canvas: &mut Canvas, json: &str) -> Vec<SessionEvent> {
        let envelope = match Envelope::parse(json) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Dropping inbound frame: {}", e);
                return Vec::new();
            }
        };
        if envelope.author_id == self.identity.user_id {
            log::debug!("Ignoring own {} event", envelope.event.name());
            return Vec::new();
        }
        if canvas.is_restoring() {
            self.pending.push_back(envelope);
            return Vec::new();
        }
        self.apply(canvas, envelope)
    }

    /// Replay events held back during a restore, in arrival order.
    pub fn flush_pending(&mut self, canvas: &mut Canvas) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while !canvas.is_restoring() {
            let Some(envelope) = self.pending.pop_front() else {
                break;
            };
            events.extend(self.apply(canvas, envelope));
        }
        events
    }

    fn apply(&mut self, canvas: &mut Canvas, envelope: Envelope) -> Vec<SessionEvent> {
        self.logical_clock += 1;
        let author = envelope.author_id;

        match envelope.event {
            WireEvent::Drawing {
                phase,
                pos,
                mode,
                color,
                width,
                stroke_id,
            } => {
                let point = Point::from(pos);
                let applied = match phase {
                    StrokePhase::Start => {
                        canvas.begin_remote_stroke(&author, &stroke_id, StrokeStyle::new(mode, color, width), point);
                        true
                    }
                    StrokePhase::Move => canvas.extend_remote_stroke(&author, point),
                    StrokePhase::End => {
                        canvas.extend_remote_stroke(&author, point);
                        canvas.end_remote_stroke(&author)
                    }
                };
                repainted(applied)
            }
            WireEvent::CursorMove { pos } => {
                let pos = pos.map(Point::from);
                self.cursors.set(&author, pos);
                vec![SessionEvent::CursorMoved { user_id: author, pos }]
            }
            WireEvent::ClearCanvas {} => repainted(canvas.clear_remote(&author)),
            WireEvent::Undo { canvas_data }
            | WireEvent::Redo { canvas_data }
            | WireEvent::CanvasState { canvas_data } => self.restore(canvas, author, &canvas_data),
            WireEvent::RequestCanvasState {} => {
                self.answer_state_request(canvas, &author);
                Vec::new()
            }
            WireEvent::JoinRoom {
                user_id,
                username,
                color,
            }
            | WireEvent::UserJoined {
                user_id,
                username,
                color,
            } => self.participant_joined(Participant::new(user_id, username, color)),
            WireEvent::UserLeft { user_id, username } => {
                self.roster.remove(&user_id);
                self.cursors.remove(&user_id);
                canvas.remove_author(&user_id);
                log::info!("{} left the room", username.as_deref().unwrap_or(&user_id));
                vec![
                    SessionEvent::ParticipantLeft { user_id, username },
                    SessionEvent::Repainted,
                ]
            }
            WireEvent::UsersUpdate { users } => self.roster_replaced(canvas, users),
            WireEvent::UsernameAssigned { username } => {
                log::info!("Relay assigned username {}", username);
                self.identity.username = username.clone();
                vec![SessionEvent::UsernameAssigned(username)]
            }
            WireEvent::Error { message } => {
                log::warn!("Relay error: {}", message);
                vec![SessionEvent::RelayError(message)]
            }
        }
    }

    fn participant_joined(&mut self, participant: Participant) -> Vec<SessionEvent> {
        if participant.user_id == self.identity.user_id {
            return Vec::new();
        }
        if self.roster.upsert(participant.clone()) {
            log::info!("{} joined the room", participant.username);
            vec![SessionEvent::ParticipantJoined(participant)]
        } else {
            vec![SessionEvent::RosterChanged]
        }
    }

    /// Adopt the relay's member list and drop everything left behind by
    /// users who are no longer in it.
    fn roster_replaced(&mut self, canvas: &mut Canvas, users: Vec<Participant>) -> Vec<SessionEvent> {
        self.roster.replace(users, &self.identity.user_id);
        let roster = &self.roster;
        self.cursors.retain(|id| roster.contains(id));

        let departed: Vec<String> = canvas
            .layers()
            .remote_ids()
            .filter(|id| !roster.contains(id))
            .map(str::to_string)
            .collect();
        let mut events = vec![SessionEvent::RosterChanged];
        let mut removed = false;
        for user_id in departed {
            log::info!("Dropping layer of {}, who is no longer in the room", user_id);
            removed |= canvas.remove_author(&user_id);
        }
        if removed {
            events.push(SessionEvent::Repainted);
        }
        events
    }

    fn restore(&mut self, canvas: &mut Canvas, author: String, canvas_data: &str) -> Vec<SessionEvent> {
        let result = Snapshot::from_data_url(canvas_data).and_then(|snapshot| canvas.restore_remote(&author, &snapshot));
        match result {
            Ok(()) => vec![SessionEvent::LayerRestored { user_id: author }, SessionEvent::Repainted],
            Err(e) => {
                log::warn!("Dropping snapshot from {}: {}", author, e);
                Vec::new()
            }
        }
    }

    /// Send our layer, even when blank.
    fn answer_state_request(&mut self, canvas: &Canvas, requester: &str) {
        log::debug!("Answering state request from {}", requester);
        match canvas.local_snapshot() {
            Ok(snapshot) => {
                self.queue(WireEvent::CanvasState {
                    canvas_data: snapshot.to_data_url(),
                });
            }
            Err(e) => log::error!("Failed to snapshot local layer: {}", e),
        }
    }
}

fn repainted(applied: bool) -> Vec<SessionEvent> {
    if applied { vec![SessionEvent::Repainted] } else { Vec::new() }
}

//! One participant's drawing session: canvas, room sync and tool state
//! behind the handlers a UI host calls.

use std::time::Instant;

use kurbo::Point;

use crate::canvas::Canvas;
use crate::collaboration::{CollaborationManager, SessionEvent};
use crate::config::SessionConfig;
use crate::identity::Identity;
use crate::layer::SurfaceGeometry;
use crate::metrics::{ConflictMetrics, MetricsSampler};
use crate::presence::{RemoteCursors, Roster};
use crate::protocol::StrokePhase;
use crate::snapshot::SnapshotResult;
use crate::stroke::{StrokeStyle, clamp_width};
use crate::style::{StrokeColor, StrokeMode};
use crate::sync::{ClientEvent, ConnectionState};

/// Canvas plus collaboration plus the current tool.
#[derive(Debug, Clone)]
pub struct DrawingSession {
    canvas: Canvas,
    collab: CollaborationManager,
    style: StrokeStyle,
    sampler: MetricsSampler,
    events: Vec<SessionEvent>,
}

impl DrawingSession {
    pub fn new(identity: Identity, geometry: SurfaceGeometry, history_depth: usize) -> Self {
        Self {
            canvas: Canvas::new(geometry, history_depth),
            collab: CollaborationManager::new(identity),
            style: StrokeStyle::default(),
            sampler: MetricsSampler::default(),
            events: Vec::new(),
        }
    }

    /// Build a session from configuration with a fresh identity.
    pub fn from_config(config: &SessionConfig) -> Self {
        let identity = match &config.username {
            Some(name) => Identity::with_username(name.as_str()),
            None => Identity::generate(),
        };
        Self {
            canvas: Canvas::new(config.geometry(), config.history_depth),
            collab: CollaborationManager::with_cursor_interval(identity, config.cursor_interval()),
            style: StrokeStyle::default(),
            sampler: MetricsSampler::new(config.metrics_interval()),
            events: Vec::new(),
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn collaboration(&self) -> &CollaborationManager {
        &self.collab
    }

    pub fn identity(&self) -> &Identity {
        self.collab.identity()
    }

    pub fn roster(&self) -> &Roster {
        self.collab.roster()
    }

    pub fn remote_cursors(&self) -> &RemoteCursors {
        self.collab.remote_cursors()
    }

    pub fn join_room(&mut self, room: &str) {
        self.collab.join_room(room);
    }

    pub fn leave_room(&mut self) {
        self.collab.leave_room(&mut self.canvas);
        self.events.push(SessionEvent::Repainted);
    }

    // --- Tool ---

    pub fn style(&self) -> StrokeStyle {
        self.style
    }

    pub fn set_mode(&mut self, mode: StrokeMode) {
        self.style.mode = mode;
    }

    pub fn toggle_mode(&mut self) {
        self.style.mode = self.style.mode.toggle();
    }

    pub fn set_color(&mut self, color: StrokeColor) {
        self.style.color = color;
    }

    /// Set the stroke width, clamped to the supported range.
    pub fn set_width(&mut self, width: f64) {
        self.style.width = clamp_width(width);
    }

    // --- Pointer ---

    /// Start a local stroke at `point` (logical coordinates). Ignored while
    /// the surface is being resized.
    pub fn pointer_down(&mut self, point: Point) {
        if self.is_resizing("pointer down") {
            return;
        }
        if self.canvas.local_stroke().is_some() {
            // A down without a matching up; close the old gesture first.
            self.pointer_up();
        }
        let stroke_id = self.canvas.begin_local_stroke(self.style, point);
        self.collab
            .broadcast_stroke(StrokePhase::Start, point, &self.style, &stroke_id);
        self.events.push(SessionEvent::Repainted);
    }

    /// Pointer motion: extends the open stroke and broadcasts the cursor.
    pub fn pointer_move(&mut self, point: Point) {
        self.pointer_move_at(point, Instant::now());
    }

    pub fn pointer_move_at(&mut self, point: Point, now: Instant) {
        if let Some(session) = self.canvas.local_stroke() {
            let (stroke_id, style) = (session.stroke_id.clone(), session.style);
            if self.canvas.extend_local_stroke(point) {
                self.collab
                    .broadcast_stroke(StrokePhase::Move, point, &style, &stroke_id);
                self.events.push(SessionEvent::Repainted);
            }
        }
        let normalized = self.normalize(point);
        self.collab.set_cursor(Some(normalized), now);
    }

    /// Finish the open stroke at its last point.
    pub fn pointer_up(&mut self) {
        if let Some(session) = self.canvas.end_local_stroke() {
            self.collab.broadcast_stroke(
                StrokePhase::End,
                session.last_point,
                &session.style,
                &session.stroke_id,
            );
            self.events.push(SessionEvent::Repainted);
        }
    }

    /// Pointer cancel or capture loss; same as lifting the pointer.
    pub fn pointer_cancel(&mut self) {
        self.pointer_up();
    }

    /// The pointer left the canvas. Hides our cursor for everyone.
    pub fn pointer_leave(&mut self) {
        self.collab.set_cursor(None, Instant::now());
    }

    /// Canvas position as a fraction of the canvas, clamped to `[0, 1]`.
    fn normalize(&self, point: Point) -> Point {
        let size = self.canvas.geometry().logical_size;
        let nx = if size.width > 0.0 { point.x / size.width } else { 0.0 };
        let ny = if size.height > 0.0 { point.y / size.height } else { 0.0 };
        Point::new(nx.clamp(0.0, 1.0), ny.clamp(0.0, 1.0))
    }

    fn is_resizing(&self, action: &str) -> bool {
        let resizing = self.canvas.is_restoring();
        if resizing {
            log::debug!("Ignoring {} during resize", action);
        }
        resizing
    }

    // --- Actions ---

    /// Undo the last local action and share the resulting layer.
    /// Returns false if there was nothing to undo or the restore failed.
    pub fn undo(&mut self) -> bool {
        self.history_step(true)
    }

    /// Redo and share the resulting layer.
    pub fn redo(&mut self) -> bool {
        self.history_step(false)
    }

    fn history_step(&mut self, undo: bool) -> bool {
        if self.is_resizing(if undo { "undo" } else { "redo" }) {
            return false;
        }
        let result = if undo { self.canvas.undo() } else { self.canvas.redo() };
        match result {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                log::warn!("{} failed: {}", if undo { "Undo" } else { "Redo" }, e);
                return false;
            }
        }
        match self.canvas.local_snapshot() {
            Ok(snapshot) if undo => self.collab.broadcast_undo(&snapshot),
            Ok(snapshot) => self.collab.broadcast_redo(&snapshot),
            Err(e) => log::error!("Failed to snapshot local layer: {}", e),
        }
        self.events.push(SessionEvent::Repainted);
        true
    }

    /// Wipe the local layer for everyone.
    pub fn clear(&mut self) {
        if self.is_resizing("clear") {
            return;
        }
        self.canvas.clear_local();
        self.collab.broadcast_clear();
        self.events.push(SessionEvent::Repainted);
    }

    /// The composed canvas as PNG bytes.
    pub fn download(&self) -> SnapshotResult<Vec<u8>> {
        self.canvas.export_png()
    }

    // --- Surface ---

    /// Resize the surface in one step and replay events queued meanwhile.
    /// Returns the number of layers restored.
    pub fn resize(&mut self, geometry: SurfaceGeometry) -> SnapshotResult<usize> {
        if !self.begin_resize(geometry)? {
            return Ok(0);
        }
        Ok(self.finish_resize())
    }

    /// Snapshot every layer; inbound events queue until `finish_resize`.
    ///
    /// An open local stroke is finished first. Until `finish_resize`, local
    /// drawing, undo, redo and clear are ignored.
    pub fn begin_resize(&mut self, geometry: SurfaceGeometry) -> SnapshotResult<bool> {
        if !self.canvas.is_restoring() {
            self.pointer_up();
        }
        self.canvas.begin_resize(geometry)
    }

    pub fn finish_resize(&mut self) -> usize {
        if !self.canvas.is_restoring() {
            return 0;
        }
        let restored = self.canvas.finish_resize();
        self.events.push(SessionEvent::Repainted);
        let replayed = self.collab.flush_pending(&mut self.canvas);
        self.events.extend(replayed);
        restored
    }

    // --- Network ---

    /// Apply one inbound relay frame.
    pub fn handle_message(&mut self, json: &str) {
        let events = self.collab.handle_message(&mut self.canvas, json);
        self.events.extend(events);
    }

    /// Apply an event from the relay client.
    pub fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Message(json) => self.handle_message(&json),
            ClientEvent::Connected => {
                self.collab.on_connected();
                self.events.push(SessionEvent::Connection(ConnectionState::Connected));
            }
            ClientEvent::Disconnected => {
                self.events.push(SessionEvent::Connection(ConnectionState::Disconnected));
            }
            ClientEvent::Reconnecting { attempt, delay } => {
                log::info!("Reconnecting (attempt {}) in {:?}", attempt, delay);
                self.events.push(SessionEvent::Connection(ConnectionState::Reconnecting));
            }
            ClientEvent::Error { message } => {
                log::warn!("Relay connection error: {}", message);
                self.events.push(SessionEvent::Connection(ConnectionState::Error));
            }
        }
    }

    /// Take pending outgoing frames.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        self.collab.take_outgoing()
    }

    /// Take events raised since the last poll.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // --- Metrics ---

    pub fn metrics(&self) -> ConflictMetrics {
        ConflictMetrics {
            pending_events: self.collab.pending_len(),
            buffered_strokes: self.canvas.strokes().active_count(),
            logical_clock: self.collab.logical_clock(),
        }
    }

    /// A metrics sample if the sampling interval has elapsed.
    pub fn poll_metrics(&mut self, now: Instant) -> Option<ConflictMetrics> {
        let current = self.metrics();
        self.sampler.poll(now, current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::AuthorId;
    use crate::protocol::{Envelope, WireEvent};
    use kurbo::Size;

    fn peer(name: &str) -> DrawingSession {
        let geometry = SurfaceGeometry::new(Size::new(100.0, 100.0), 1.0);
        let mut session = DrawingSession::new(Identity::with_username(name), geometry, 50);
        session.join_room("room");
        session
    }

    /// Deliver everything `from` has queued to each peer in `to`.
    fn relay(from: &mut DrawingSession, to: &mut [&mut DrawingSession]) {
        for frame in from.take_outgoing() {
            for peer in to.iter_mut() {
                peer.handle_message(&frame);
            }
        }
    }

    fn pair() -> (DrawingSession, DrawingSession) {
        let mut a = peer("Alice");
        let mut b = peer("Bob");
        relay(&mut a, &mut [&mut b]);
        relay(&mut b, &mut [&mut a]);
        // Alice's answer to Bob's state request.
        relay(&mut a, &mut [&mut b]);
        a.poll_events();
        b.poll_events();
        (a, b)
    }

    fn draw_line(session: &mut DrawingSession, from: Point, to: Point) {
        session.pointer_down(from);
        session.pointer_move(to);
        session.pointer_up();
    }

    #[test]
    fn test_join_exchanges_roster() {
        let (a, b) = pair();
        assert!(a.roster().contains(&b.identity().user_id));
        assert!(b.roster().contains(&a.identity().user_id));
    }

    #[test]
    fn test_remote_stroke_lands_on_author_layer() {
        let (mut a, mut b) = pair();
        a.set_width(5.0);
        a.set_color(StrokeColor::black());
        draw_line(&mut a, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        relay(&mut a, &mut [&mut b]);

        let composed = b.canvas().compositor();
        for x in 10..=50 {
            assert_eq!(composed.pixel(x, 10), image::Rgba([0, 0, 0, 255]), "x = {}", x);
        }
        assert_eq!(composed.pixel(30, 30)[3], 0);
        assert!(b.canvas().layers().local().is_blank());
        let alice = AuthorId::remote(a.identity().user_id.clone());
        assert_eq!(b.canvas().layers().get(&alice).unwrap().pixel(30, 10)[3], 255);
        assert!(b.poll_events().contains(&SessionEvent::Repainted));
    }

    #[test]
    fn test_clear_only_affects_author() {
        let (mut a, mut b) = pair();
        draw_line(&mut a, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        draw_line(&mut b, Point::new(10.0, 60.0), Point::new(50.0, 60.0));
        relay(&mut a, &mut [&mut b]);
        relay(&mut b, &mut [&mut a]);

        a.clear();
        relay(&mut a, &mut [&mut b]);

        assert_eq!(b.canvas().compositor().pixel(30, 10)[3], 0);
        assert_eq!(b.canvas().compositor().pixel(30, 60)[3], 255);
        assert_eq!(a.canvas().compositor().pixel(30, 60)[3], 255);
        assert_eq!(a.canvas().compositor().pixel(30, 10)[3], 0);
    }

    #[test]
    fn test_eraser_cannot_touch_other_authors() {
        let (mut a, mut b) = pair();
        draw_line(&mut b, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        relay(&mut b, &mut [&mut a]);

        a.set_mode(StrokeMode::Eraser);
        a.set_width(20.0);
        draw_line(&mut a, Point::new(0.0, 10.0), Point::new(60.0, 10.0));
        relay(&mut a, &mut [&mut b]);

        assert_eq!(a.canvas().compositor().pixel(30, 10)[3], 255);
        assert_eq!(b.canvas().compositor().pixel(30, 10)[3], 255);
    }

    #[test]
    fn test_own_events_are_not_applied_twice() {
        let (mut a, _b) = pair();
        let layers = a.canvas().layers().len();
        draw_line(&mut a, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        let frames = a.take_outgoing();
        assert!(!frames.is_empty());
        for frame in &frames {
            a.handle_message(frame);
        }
        assert_eq!(a.canvas().layers().len(), layers);
        assert_eq!(a.canvas().strokes().active_count(), 0);
    }

    #[test]
    fn test_undo_and_redo_share_snapshots() {
        let (mut a, mut b) = pair();
        draw_line(&mut a, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        relay(&mut a, &mut [&mut b]);

        assert!(a.undo());
        let frames = a.take_outgoing();
        assert_eq!(frames.len(), 1);
        assert!(matches!(Envelope::parse(&frames[0]).unwrap().event, WireEvent::Undo { .. }));
        for frame in &frames {
            b.handle_message(frame);
        }
        assert_eq!(b.canvas().compositor().pixel(30, 10)[3], 0);

        assert!(a.redo());
        relay(&mut a, &mut [&mut b]);
        assert_eq!(b.canvas().compositor().pixel(30, 10)[3], 255);

        assert!(!a.redo());
        assert!(a.take_outgoing().is_empty());
    }

    #[test]
    fn test_undo_with_nothing_to_undo() {
        let (mut a, _b) = pair();
        assert!(!a.undo());
        assert!(!a.redo());
    }

    #[test]
    fn test_late_joiner_receives_existing_layers() {
        let (mut a, mut b) = pair();
        draw_line(&mut a, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        relay(&mut a, &mut [&mut b]);

        let mut c = peer("Carol");
        relay(&mut c, &mut [&mut a, &mut b]);
        relay(&mut a, &mut [&mut c]);
        relay(&mut b, &mut [&mut c]);

        assert_eq!(c.canvas().compositor().pixel(30, 10)[3], 255);
        let restored = c
            .poll_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::LayerRestored { .. }))
            .count();
        assert_eq!(restored, 2);
    }

    #[test]
    fn test_reconnect_heals_missed_clear() {
        let (mut a, mut b) = pair();
        draw_line(&mut a, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        relay(&mut a, &mut [&mut b]);
        assert_eq!(b.canvas().compositor().pixel(30, 10)[3], 255);

        // Bob is offline when Alice clears.
        b.handle_client_event(ClientEvent::Disconnected);
        a.clear();
        a.take_outgoing();

        b.handle_client_event(ClientEvent::Connected);
        relay(&mut b, &mut [&mut a]);
        relay(&mut a, &mut [&mut b]);
        assert_eq!(b.canvas().compositor().pixel(30, 10)[3], 0);
    }

    #[test]
    fn test_resize_queues_inbound_events() {
        let (mut a, mut b) = pair();
        draw_line(&mut b, Point::new(10.0, 10.0), Point::new(50.0, 10.0));

        assert!(b.begin_resize(SurfaceGeometry::new(Size::new(200.0, 200.0), 1.0)).unwrap());
        draw_line(&mut a, Point::new(150.0, 150.0), Point::new(180.0, 150.0));
        relay(&mut a, &mut [&mut b]);
        // Three stroke phases and one cursor update.
        assert_eq!(b.metrics().pending_events, 4);
        let alice = AuthorId::remote(a.identity().user_id.clone());
        assert!(b.canvas().layers().get(&alice).is_some_and(|layer| layer.is_blank()));

        // Bob's layer and Alice's layer from the join handshake.
        assert_eq!(b.finish_resize(), 2);
        assert_eq!(b.metrics().pending_events, 0);
        let composed = b.canvas().compositor();
        assert_eq!(composed.output().dimensions(), (200, 200));
        // Own content is stretched to the new size.
        assert!(composed.pixel(60, 20)[3] > 200);
        assert_eq!(composed.pixel(165, 150)[3], 255);
    }

    #[test]
    fn test_local_actions_are_ignored_during_resize() {
        let (mut a, mut b) = pair();
        draw_line(&mut b, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        relay(&mut b, &mut [&mut a]);
        let depth = b.canvas().history().undo_depth();

        assert!(b.begin_resize(SurfaceGeometry::new(Size::new(200.0, 200.0), 1.0)).unwrap());
        draw_line(&mut b, Point::new(20.0, 60.0), Point::new(80.0, 60.0));
        assert!(!b.undo());
        assert!(!b.redo());
        b.clear();
        let sent = b.take_outgoing();
        assert!(
            sent.iter()
                .map(|f| Envelope::parse(f).unwrap().event)
                .all(|e| matches!(e, WireEvent::CursorMove { .. })),
            "only cursor updates may leave during a resize"
        );
        assert_eq!(b.canvas().strokes().active_count(), 0);

        b.finish_resize();
        assert_eq!(b.canvas().history().undo_depth(), depth);
        let local = b.canvas().layers().local();
        assert_eq!(local.pixel(60, 120)[3], 0);
        assert!(local.pixel(60, 20)[3] > 200);
        // Nothing reached the peer either.
        assert_eq!(a.canvas().compositor().pixel(50, 60)[3], 0);
    }

    #[test]
    fn test_open_stroke_is_finished_before_resize() {
        let (mut a, mut b) = pair();
        b.pointer_down(Point::new(10.0, 10.0));
        b.pointer_move(Point::new(50.0, 10.0));
        assert!(b.begin_resize(SurfaceGeometry::new(Size::new(200.0, 200.0), 1.0)).unwrap());
        assert!(b.canvas().local_stroke().is_none());

        let frames = b.take_outgoing();
        let last = Envelope::parse(frames.last().unwrap()).unwrap();
        assert!(matches!(last.event, WireEvent::Drawing { phase: StrokePhase::End, .. }));
        for frame in &frames {
            a.handle_message(frame);
        }
        assert_eq!(a.canvas().strokes().active_count(), 0);

        b.finish_resize();
        assert!(b.canvas().layers().local().pixel(60, 20)[3] > 200);
    }

    #[test]
    fn test_undecodable_history_is_not_broadcast() {
        let (mut a, _b) = pair();
        draw_line(&mut a, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        a.take_outgoing();
        let (w, h) = a.canvas().geometry().device_size();
        a.canvas
            .history_mut()
            .push_undo(crate::snapshot::Snapshot::from_raw_parts(w, h, b"garbage".to_vec()));
        let depth = a.canvas().history().undo_depth();
        let before = a.canvas().layers().local().pixels().clone();

        assert!(!a.undo());
        assert!(a.take_outgoing().is_empty());
        assert_eq!(a.canvas().history().undo_depth(), depth);
        assert_eq!(a.canvas().layers().local().pixels(), &before);
    }

    #[test]
    fn test_resize_to_same_geometry_is_noop() {
        let (_a, mut b) = pair();
        assert_eq!(b.resize(SurfaceGeometry::new(Size::new(100.0, 100.0), 1.0)).unwrap(), 0);
        assert!(!b.canvas().is_restoring());
    }

    #[test]
    fn test_cursor_is_normalized() {
        let (mut a, mut b) = pair();
        a.pointer_move(Point::new(25.0, 75.0));
        relay(&mut a, &mut [&mut b]);
        let id = a.identity().user_id.clone();
        assert_eq!(b.remote_cursors().get(&id), Some(Point::new(0.25, 0.75)));

        a.pointer_leave();
        relay(&mut a, &mut [&mut b]);
        assert!(b.remote_cursors().get(&id).is_none());
    }

    #[test]
    fn test_cursor_outside_canvas_is_clamped() {
        let (mut a, mut b) = pair();
        a.pointer_move(Point::new(-40.0, 250.0));
        relay(&mut a, &mut [&mut b]);
        let id = a.identity().user_id.clone();
        assert_eq!(b.remote_cursors().get(&id), Some(Point::new(0.0, 1.0)));
    }

    #[test]
    fn test_width_is_clamped() {
        let mut a = peer("Alice");
        a.set_width(500.0);
        assert_eq!(a.style().width, 100.0);
        a.set_width(0.0);
        assert_eq!(a.style().width, 1.0);
    }

    #[test]
    fn test_metrics_track_activity() {
        let (mut a, _b) = pair();
        let before = a.metrics().logical_clock;
        a.pointer_down(Point::new(10.0, 10.0));
        let metrics = a.metrics();
        assert_eq!(metrics.buffered_strokes, 1);
        assert!(metrics.logical_clock > before);
        a.pointer_cancel();
        assert_eq!(a.metrics().buffered_strokes, 0);

        let now = Instant::now();
        assert!(a.poll_metrics(now).is_some());
        assert!(a.poll_metrics(now).is_none());
    }

    #[test]
    fn test_download_is_png() {
        let (mut a, _b) = pair();
        draw_line(&mut a, Point::new(10.0, 10.0), Point::new(50.0, 10.0));
        let png = a.download().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_reconnect_rejoins_room() {
        let (mut a, _b) = pair();
        a.handle_client_event(ClientEvent::Connected);
        let frames = a.take_outgoing();
        assert_eq!(frames.len(), 2);
        assert!(a.poll_events().contains(&SessionEvent::Connection(ConnectionState::Connected)));
    }

    #[test]
    fn test_from_config() {
        let config = SessionConfig {
            username: Some("Dana".to_string()),
            canvas_width: 320.0,
            canvas_height: 240.0,
            ..SessionConfig::default()
        };
        let session = DrawingSession::from_config(&config);
        assert_eq!(session.identity().username, "Dana");
        assert_eq!(session.canvas().geometry().device_size(), (320, 240));
    }
}

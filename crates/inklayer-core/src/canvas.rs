//! Drawing state of one participant's view: every layer, open strokes,
//! local history and the composed output.

use crate::compositor::Compositor;
use crate::history::HistoryManager;
use crate::layer::{AuthorId, LayerStore, SurfaceGeometry};
use crate::snapshot::{Snapshot, SnapshotResult};
use crate::stroke::{StrokeRenderer, StrokeSession, StrokeStyle};
use crate::surface::SurfaceLifecycle;
use kurbo::Point;
use uuid::Uuid;

/// Layer store, renderer, history, compositor and surface lifecycle,
/// mutated only through the operations below.
#[derive(Debug, Clone)]
pub struct Canvas {
    layers: LayerStore,
    strokes: StrokeRenderer,
    history: HistoryManager,
    compositor: Compositor,
    surface: SurfaceLifecycle,
}

impl Canvas {
    pub fn new(geometry: SurfaceGeometry, history_depth: usize) -> Self {
        let (w, h) = geometry.device_size();
        Self {
            layers: LayerStore::new(geometry),
            strokes: StrokeRenderer::new(),
            history: HistoryManager::new(history_depth),
            compositor: Compositor::new(w, h),
            surface: SurfaceLifecycle::new(),
        }
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn strokes(&self) -> &StrokeRenderer {
        &self.strokes
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.layers.geometry()
    }

    pub fn recompose(&mut self) {
        self.compositor.recompose(&self.layers);
    }

    // --- Local operations ---

    /// Start a local stroke. Captures an undo point first and returns the
    /// new stroke id.
    pub fn begin_local_stroke(&mut self, style: StrokeStyle, point: Point) -> String {
        if let Err(e) = self.history.capture_before_action(&self.layers) {
            log::error!("Failed to capture undo point: {}", e);
        }
        let stroke_id = Uuid::new_v4().to_string();
        self.strokes
            .begin(&mut self.layers, &AuthorId::Local, stroke_id.clone(), style, point);
        self.recompose();
        stroke_id
    }

    /// Extend the local stroke. Returns false if no stroke is open.
    pub fn extend_local_stroke(&mut self, point: Point) -> bool {
        let extended = self.strokes.extend(&mut self.layers, &AuthorId::Local, point);
        if extended {
            self.recompose();
        }
        extended
    }

    /// Finish (or cancel) the local stroke.
    pub fn end_local_stroke(&mut self) -> Option<StrokeSession> {
        let session = self.strokes.end(&AuthorId::Local);
        if session.is_some() {
            self.recompose();
        }
        session
    }

    pub fn local_stroke(&self) -> Option<&StrokeSession> {
        self.strokes.session(&AuthorId::Local)
    }

    /// Wipe the local layer as an undoable action.
    pub fn clear_local(&mut self) {
        if let Err(e) = self.history.capture_before_action(&self.layers) {
            log::error!("Failed to capture undo point: {}", e);
        }
        self.strokes.end(&AuthorId::Local);
        self.layers.clear(&AuthorId::Local);
        self.recompose();
    }

    /// Undo the last local action. See [`HistoryManager::undo`].
    pub fn undo(&mut self) -> SnapshotResult<bool> {
        self.strokes.end(&AuthorId::Local);
        let undone = self.history.undo(&mut self.layers)?;
        if undone {
            self.recompose();
        }
        Ok(undone)
    }

    /// Redo the last undone local action.
    pub fn redo(&mut self) -> SnapshotResult<bool> {
        self.strokes.end(&AuthorId::Local);
        let redone = self.history.redo(&mut self.layers)?;
        if redone {
            self.recompose();
        }
        Ok(redone)
    }

    pub fn local_snapshot(&self) -> SnapshotResult<Snapshot> {
        self.layers.snapshot(&AuthorId::Local)
    }

    // --- Remote operations ---

    pub fn begin_remote_stroke(&mut self, user_id: &str, stroke_id: &str, style: StrokeStyle, point: Point) {
        let author = AuthorId::remote(user_id);
        self.strokes.begin(&mut self.layers, &author, stroke_id, style, point);
        self.recompose();
    }

    pub fn extend_remote_stroke(&mut self, user_id: &str, point: Point) -> bool {
        let extended = self.strokes.extend(&mut self.layers, &AuthorId::remote(user_id), point);
        if extended {
            self.recompose();
        }
        extended
    }

    pub fn end_remote_stroke(&mut self, user_id: &str) -> bool {
        let ended = self.strokes.end(&AuthorId::remote(user_id)).is_some();
        if ended {
            self.recompose();
        }
        ended
    }

    /// Wipe only the given remote author's layer. Returns false if the
    /// author has no layer.
    pub fn clear_remote(&mut self, user_id: &str) -> bool {
        let author = AuthorId::remote(user_id);
        self.strokes.end(&author);
        let cleared = self.layers.clear(&author);
        if cleared {
            self.recompose();
        }
        cleared
    }

    /// Replace a remote author's layer with their snapshot.
    pub fn restore_remote(&mut self, user_id: &str, snapshot: &Snapshot) -> SnapshotResult<()> {
        let author = AuthorId::remote(user_id);
        self.layers.restore(&author, snapshot)?;
        self.strokes.end(&author);
        self.recompose();
        Ok(())
    }

    /// Drop everything belonging to a departed author.
    pub fn remove_author(&mut self, user_id: &str) -> bool {
        let author = AuthorId::remote(user_id);
        self.strokes.forget(&author);
        let removed = self.layers.remove(&author);
        if removed {
            self.recompose();
        }
        removed
    }

    // --- Surface lifecycle ---

    /// Resize every layer in one step.
    pub fn resize(&mut self, geometry: SurfaceGeometry) -> SnapshotResult<usize> {
        self.surface.on_resize(&mut self.layers, &mut self.compositor, geometry)
    }

    pub fn begin_resize(&mut self, geometry: SurfaceGeometry) -> SnapshotResult<bool> {
        self.surface.begin_resize(&self.layers, geometry)
    }

    pub fn finish_resize(&mut self) -> usize {
        self.surface.finish_resize(&mut self.layers, &mut self.compositor)
    }

    pub fn is_restoring(&self) -> bool {
        self.surface.is_restoring()
    }

    /// Encode the composed image as PNG.
    pub fn export_png(&self) -> SnapshotResult<Vec<u8>> {
        self.compositor.export_png()
    }

    #[cfg(test)]
    pub(crate) fn history_mut(&mut self) -> &mut HistoryManager {
        &mut self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::StrokeColor;
    use kurbo::Size;

    fn canvas() -> Canvas {
        Canvas::new(SurfaceGeometry::new(Size::new(100.0, 100.0), 1.0), 50)
    }

    #[test]
    fn test_local_stroke_repaints() {
        let mut canvas = canvas();
        let style = StrokeStyle::brush(StrokeColor::black(), 4.0);
        canvas.begin_local_stroke(style, Point::new(10.0, 10.0));
        canvas.extend_local_stroke(Point::new(60.0, 10.0));
        assert!(canvas.end_local_stroke().is_some());

        assert_eq!(canvas.compositor().pixel(30, 10)[3], 255);
        assert!(canvas.history().can_undo());
    }

    #[test]
    fn test_undo_restores_blank() {
        let mut canvas = canvas();
        canvas.begin_local_stroke(StrokeStyle::default(), Point::new(10.0, 10.0));
        canvas.end_local_stroke();
        assert!(canvas.undo().unwrap());
        assert!(canvas.layers().local().is_blank());
        assert_eq!(canvas.compositor().pixel(10, 10)[3], 0);
        assert!(canvas.redo().unwrap());
        assert_eq!(canvas.compositor().pixel(10, 10)[3], 255);
    }

    #[test]
    fn test_clear_local_is_undoable() {
        let mut canvas = canvas();
        canvas.begin_local_stroke(StrokeStyle::default(), Point::new(50.0, 50.0));
        canvas.end_local_stroke();
        canvas.clear_local();
        assert!(canvas.layers().local().is_blank());
        assert!(canvas.undo().unwrap());
        assert_eq!(canvas.layers().local().pixel(50, 50)[3], 255);
    }

    #[test]
    fn test_remote_clear_is_scoped() {
        let mut canvas = canvas();
        canvas.begin_local_stroke(StrokeStyle::default(), Point::new(20.0, 20.0));
        canvas.end_local_stroke();
        canvas.begin_remote_stroke("bob", "b1", StrokeStyle::default(), Point::new(70.0, 70.0));
        canvas.end_remote_stroke("bob");

        assert!(canvas.clear_remote("bob"));
        assert!(!canvas.clear_remote("carol"));
        assert_eq!(canvas.compositor().pixel(20, 20)[3], 255);
        assert_eq!(canvas.compositor().pixel(70, 70)[3], 0);
        // Remote activity never touches local history.
        assert_eq!(canvas.history().undo_depth(), 1);
    }

    #[test]
    fn test_remove_author() {
        let mut canvas = canvas();
        canvas.begin_remote_stroke("bob", "b1", StrokeStyle::default(), Point::new(70.0, 70.0));
        assert!(canvas.remove_author("bob"));
        assert!(!canvas.strokes().is_active(&AuthorId::remote("bob")));
        assert_eq!(canvas.compositor().pixel(70, 70)[3], 0);
        assert!(!canvas.remove_author("bob"));
    }
}

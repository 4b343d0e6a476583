//! Immediate-mode stroke rasterization onto an author's own layer.
//!
//! Each `extend` draws one round-capped segment from the session's last point
//! to the new point. Round joins fall out of overlapping caps.

use crate::layer::{AuthorId, Layer, LayerStore};
use crate::style::{StrokeColor, StrokeMode};
use image::Rgba;
use kurbo::{Line, ParamCurveNearest, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Smallest accepted stroke width in logical pixels.
pub const MIN_STROKE_WIDTH: f64 = 1.0;
/// Largest accepted stroke width in logical pixels.
pub const MAX_STROKE_WIDTH: f64 = 100.0;

/// Brush settings for a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub mode: StrokeMode,
    pub color: StrokeColor,
    pub width: f64,
}

impl StrokeStyle {
    pub fn new(mode: StrokeMode, color: StrokeColor, width: f64) -> Self {
        Self {
            mode,
            color,
            width: clamp_width(width),
        }
    }

    pub fn brush(color: StrokeColor, width: f64) -> Self {
        Self::new(StrokeMode::Brush, color, width)
    }

    pub fn eraser(width: f64) -> Self {
        Self::new(StrokeMode::Eraser, StrokeColor::black(), width)
    }
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self::brush(StrokeColor::black(), 5.0)
    }
}

/// Clamp a width into the supported range.
pub fn clamp_width(width: f64) -> f64 {
    if width.is_finite() {
        width.clamp(MIN_STROKE_WIDTH, MAX_STROKE_WIDTH)
    } else {
        MIN_STROKE_WIDTH
    }
}

/// The live state of one in-progress gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeSession {
    pub stroke_id: String,
    pub style: StrokeStyle,
    pub last_point: Point,
    pub segments: usize,
}

/// Tracks at most one active stroke per author and rasterizes segments.
#[derive(Debug, Clone, Default)]
pub struct StrokeRenderer {
    sessions: HashMap<AuthorId, StrokeSession>,
}

impl StrokeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a stroke and stamp its first point.
    ///
    /// Returns false if an earlier session for the author was still open;
    /// that session is discarded and the new one starts anyway.
    pub fn begin(
        &mut self,
        layers: &mut LayerStore,
        author: &AuthorId,
        stroke_id: impl Into<String>,
        style: StrokeStyle,
        point: Point,
    ) -> bool {
        let stroke_id = stroke_id.into();
        let replaced = self.sessions.remove(author);
        if let Some(stale) = &replaced {
            log::warn!(
                "Stroke {} from {} began while {} was still open; discarding the old stroke",
                stroke_id,
                author,
                stale.stroke_id
            );
        }

        paint_segment(layers.get_or_create(author), point, point, &style);
        self.sessions.insert(
            author.clone(),
            StrokeSession {
                stroke_id,
                style,
                last_point: point,
                segments: 0,
            },
        );
        replaced.is_none()
    }

    /// Draw a segment from the last point to `point`.
    /// Returns false if the author has no open stroke.
    pub fn extend(&mut self, layers: &mut LayerStore, author: &AuthorId, point: Point) -> bool {
        let Some(session) = self.sessions.get_mut(author) else {
            log::debug!("Dropping stroke segment from {} with no open stroke", author);
            return false;
        };
        paint_segment(layers.get_or_create(author), session.last_point, point, &session.style);
        session.last_point = point;
        session.segments += 1;
        true
    }

    /// Finish the author's stroke. Returns the finished session, if any.
    pub fn end(&mut self, author: &AuthorId) -> Option<StrokeSession> {
        self.sessions.remove(author)
    }

    /// Abort the author's stroke. Identical to [`end`](Self::end); segments
    /// already drawn stay on the layer.
    pub fn cancel(&mut self, author: &AuthorId) -> Option<StrokeSession> {
        self.end(author)
    }

    /// Drop any open stroke for an author who left.
    pub fn forget(&mut self, author: &AuthorId) {
        self.sessions.remove(author);
    }

    pub fn session(&self, author: &AuthorId) -> Option<&StrokeSession> {
        self.sessions.get(author)
    }

    pub fn is_active(&self, author: &AuthorId) -> bool {
        self.sessions.contains_key(author)
    }

    /// Number of strokes currently open across all authors.
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Rasterize one round-capped segment in logical coordinates.
fn paint_segment(layer: &mut Layer, from: Point, to: Point, style: &StrokeStyle) {
    let scale = layer.scale_factor();
    let a = Point::new(from.x * scale, from.y * scale);
    let b = Point::new(to.x * scale, to.y * scale);
    let radius = (style.width * scale / 2.0).max(0.5);
    let segment = Line::new(a, b);
    let degenerate = (b - a).hypot2() < f64::EPSILON;

    let pixels = layer.pixels_mut();
    let (w, h) = pixels.dimensions();
    let Some((x0, x1)) = pixel_span(a.x.min(b.x) - radius - 1.0, a.x.max(b.x) + radius + 1.0, w) else {
        return;
    };
    let Some((y0, y1)) = pixel_span(a.y.min(b.y) - radius - 1.0, a.y.max(b.y) + radius + 1.0, h) else {
        return;
    };

    let src = style.color.to_rgba();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let center = Point::new(x as f64 + 0.5, y as f64 + 0.5);
            let distance = if degenerate {
                center.distance(a)
            } else {
                segment.nearest(center, 1e-6).distance_sq.sqrt()
            };
            let coverage = (radius + 0.5 - distance).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            let dst = pixels.get_pixel_mut(x, y);
            match style.mode {
                StrokeMode::Brush => source_over(dst, src, coverage),
                StrokeMode::Eraser => destination_out(dst, coverage),
            }
        }
    }
}

/// Clamp a floating pixel range to `[0, extent)`.
fn pixel_span(min: f64, max: f64, extent: u32) -> Option<(u32, u32)> {
    if extent == 0 || !min.is_finite() || !max.is_finite() {
        return None;
    }
    let last = extent as f64 - 1.0;
    let lo = min.floor().max(0.0);
    let hi = max.ceil().min(last);
    if lo > hi {
        return None;
    }
    Some((lo as u32, hi as u32))
}

/// Paint `src` over `dst` with the given coverage (straight alpha).
fn source_over(dst: &mut Rgba<u8>, src: Rgba<u8>, coverage: f64) {
    let sa = src[3] as f64 / 255.0 * coverage;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let mut out = [0u8; 4];
    for c in 0..3 {
        let value = (src[c] as f64 * sa + dst[c] as f64 * da * (1.0 - sa)) / out_a;
        out[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    *dst = Rgba(out);
}

/// Remove destination alpha in proportion to an opaque source's coverage.
fn destination_out(dst: &mut Rgba<u8>, coverage: f64) {
    let remaining = (dst[3] as f64 * (1.0 - coverage)).round() as u8;
    *dst = if remaining == 0 {
        Rgba([0, 0, 0, 0])
    } else {
        Rgba([dst[0], dst[1], dst[2], remaining])
    };
}

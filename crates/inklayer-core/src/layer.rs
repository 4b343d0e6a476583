//! Per-author raster layers.
//!
//! Every author (the local user and each remote participant) owns exactly one
//! layer holding only their marks. All layers share one surface geometry.

use crate::snapshot::{Snapshot, SnapshotError, SnapshotResult};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use kurbo::Size;
use std::collections::HashMap;
use std::fmt;

/// Identity of a layer's owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthorId {
    /// The user of this session.
    Local,
    /// A remote participant, by user id.
    Remote(String),
}

impl AuthorId {
    pub fn remote(user_id: impl Into<String>) -> Self {
        AuthorId::Remote(user_id.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AuthorId::Local)
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorId::Local => f.write_str("local"),
            AuthorId::Remote(id) => f.write_str(id),
        }
    }
}

/// Logical canvas size plus device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    /// Size in device-independent pixels.
    pub logical_size: Size,
    /// Device pixels per logical pixel.
    pub scale_factor: f64,
}

impl SurfaceGeometry {
    pub fn new(logical_size: Size, scale_factor: f64) -> Self {
        let scale_factor = if scale_factor.is_finite() && scale_factor > 0.0 {
            scale_factor
        } else {
            1.0
        };
        Self {
            logical_size,
            scale_factor,
        }
    }

    /// Backing buffer size in device pixels (at least 1x1).
    pub fn device_size(&self) -> (u32, u32) {
        let w = (self.logical_size.width * self.scale_factor).ceil();
        let h = (self.logical_size.height * self.scale_factor).ceil();
        (to_extent(w), to_extent(h))
    }
}

impl Default for SurfaceGeometry {
    fn default() -> Self {
        Self::new(Size::new(800.0, 600.0), 1.0)
    }
}

fn to_extent(v: f64) -> u32 {
    if v.is_finite() && v >= 1.0 {
        v.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

/// One author's raster surface.
#[derive(Debug, Clone)]
pub struct Layer {
    pixels: RgbaImage,
    geometry: SurfaceGeometry,
}

impl Layer {
    /// Create a fully transparent layer.
    pub fn blank(geometry: SurfaceGeometry) -> Self {
        let (w, h) = geometry.device_size();
        Self {
            pixels: RgbaImage::new(w, h),
            geometry,
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    pub fn logical_size(&self) -> Size {
        self.geometry.logical_size
    }

    pub fn scale_factor(&self) -> f64 {
        self.geometry.scale_factor
    }

    pub fn device_size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Pixel at device coordinates, transparent when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        self.pixels.get_pixel_checked(x, y).copied().unwrap_or(Rgba([0, 0, 0, 0]))
    }

    /// True if no pixel has any coverage.
    pub fn is_blank(&self) -> bool {
        self.pixels.pixels().all(|p| p[3] == 0)
    }

    /// Wipe all content.
    pub fn clear(&mut self) {
        self.pixels.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    /// Replace the buffer with `source`, stretched to this layer's size.
    fn replace_scaled(&mut self, source: RgbaImage) {
        let (w, h) = self.pixels.dimensions();
        self.pixels = if source.dimensions() == (w, h) {
            source
        } else {
            imageops::resize(&source, w, h, FilterType::Triangle)
        };
    }

    /// Rescale the current content into a buffer for `geometry`.
    fn rescale(&mut self, geometry: SurfaceGeometry) {
        let (w, h) = geometry.device_size();
        if self.pixels.dimensions() != (w, h) {
            self.pixels = imageops::resize(&self.pixels, w, h, FilterType::Triangle);
        }
        self.geometry = geometry;
    }
}

/// Owns every layer and keeps them in geometric lockstep.
#[derive(Debug, Clone)]
pub struct LayerStore {
    geometry: SurfaceGeometry,
    local: Layer,
    remotes: HashMap<String, Layer>,
    /// Remote layer ids in creation order (compositing order).
    order: Vec<String>,
}

impl LayerStore {
    pub fn new(geometry: SurfaceGeometry) -> Self {
        Self {
            geometry,
            local: Layer::blank(geometry),
            remotes: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    pub fn local(&self) -> &Layer {
        &self.local
    }

    pub fn get(&self, author: &AuthorId) -> Option<&Layer> {
        match author {
            AuthorId::Local => Some(&self.local),
            AuthorId::Remote(id) => self.remotes.get(id),
        }
    }

    pub fn contains(&self, author: &AuthorId) -> bool {
        self.get(author).is_some()
    }

    /// Get an author's layer, creating a blank one on first use.
    pub fn get_or_create(&mut self, author: &AuthorId) -> &mut Layer {
        match author {
            AuthorId::Local => &mut self.local,
            AuthorId::Remote(id) => {
                if !self.remotes.contains_key(id) {
                    log::debug!("Creating layer for {}", id);
                    self.order.push(id.clone());
                }
                let geometry = self.geometry;
                self.remotes
                    .entry(id.clone())
                    .or_insert_with(|| Layer::blank(geometry))
            }
        }
    }

    /// Remove a remote author's layer. The local layer cannot be removed.
    pub fn remove(&mut self, author: &AuthorId) -> bool {
        match author {
            AuthorId::Local => {
                log::debug!("Ignoring request to remove the local layer");
                false
            }
            AuthorId::Remote(id) => {
                self.order.retain(|other| other != id);
                self.remotes.remove(id).is_some()
            }
        }
    }

    /// Wipe an author's layer. Returns false if the author has no layer.
    pub fn clear(&mut self, author: &AuthorId) -> bool {
        match author {
            AuthorId::Local => {
                self.local.clear();
                true
            }
            AuthorId::Remote(id) => match self.remotes.get_mut(id) {
                Some(layer) => {
                    layer.clear();
                    true
                }
                None => false,
            },
        }
    }

    /// Encode an author's current layer.
    pub fn snapshot(&self, author: &AuthorId) -> SnapshotResult<Snapshot> {
        let layer = self
            .get(author)
            .ok_or_else(|| SnapshotError::MissingLayer(author.to_string()))?;
        Snapshot::capture(layer.pixels())
    }

    /// Replace an author's whole layer with a snapshot.
    ///
    /// The snapshot is fully decoded before the layer is touched, so a
    /// decode failure leaves the layer exactly as it was.
    pub fn restore(&mut self, author: &AuthorId, snapshot: &Snapshot) -> SnapshotResult<()> {
        let decoded = snapshot.decode()?;
        self.get_or_create(author).replace_scaled(decoded);
        Ok(())
    }

    /// Move every layer to a new geometry, stretching existing content.
    pub fn resize_all(&mut self, geometry: SurfaceGeometry) {
        self.geometry = geometry;
        self.local.rescale(geometry);
        for layer in self.remotes.values_mut() {
            layer.rescale(geometry);
        }
    }

    /// Remote user ids in compositing order.
    pub fn remote_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Every author with a layer, local first.
    pub fn authors(&self) -> Vec<AuthorId> {
        std::iter::once(AuthorId::Local)
            .chain(self.order.iter().cloned().map(AuthorId::Remote))
            .collect()
    }

    /// Layers in compositing order: local, then remotes by creation.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &Layer> {
        std::iter::once(&self.local).chain(self.order.iter().filter_map(|id| self.remotes.get(id)))
    }

    /// Number of layers including the local one.
    pub fn len(&self) -> usize {
        1 + self.remotes.len()
    }

    /// Always false; the local layer always exists.
    pub fn is_empty(&self) -> bool {
        false
    }
}

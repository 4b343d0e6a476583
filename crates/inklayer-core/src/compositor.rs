//! Merges every author's layer into the visible output surface.

use crate::layer::LayerStore;
use crate::snapshot::{SnapshotResult, encode_png};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::borrow::Cow;

/// Rebuilds the composed output wholesale on every call.
#[derive(Debug, Clone)]
pub struct Compositor {
    output: RgbaImage,
    recompose_count: u64,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            output: RgbaImage::new(width, height),
            recompose_count: 0,
        }
    }

    /// Clear the output and draw the local layer, then every remote layer in
    /// creation order, each alpha-over the result so far.
    pub fn recompose(&mut self, layers: &LayerStore) {
        let (w, h) = layers.geometry().device_size();
        if self.output.dimensions() == (w, h) {
            self.output.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
        } else {
            self.output = RgbaImage::new(w, h);
        }

        for layer in layers.iter_ordered() {
            let pixels = if layer.device_size() == (w, h) {
                Cow::Borrowed(layer.pixels())
            } else {
                Cow::Owned(imageops::resize(layer.pixels(), w, h, FilterType::Triangle))
            };
            imageops::overlay(&mut self.output, pixels.as_ref(), 0, 0);
        }
        self.recompose_count += 1;
    }

    /// The composed image.
    pub fn output(&self) -> &RgbaImage {
        &self.output
    }

    /// Pixel of the composed image, transparent when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        self.output.get_pixel_checked(x, y).copied().unwrap_or(Rgba([0, 0, 0, 0]))
    }

    /// Number of recompositions so far.
    pub fn recompose_count(&self) -> u64 {
        self.recompose_count
    }

    /// Encode the composed image as PNG.
    pub fn export_png(&self) -> SnapshotResult<Vec<u8>> {
        encode_png(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{AuthorId, SurfaceGeometry};
    use kurbo::Size;

    fn store() -> LayerStore {
        LayerStore::new(SurfaceGeometry::new(Size::new(10.0, 10.0), 1.0))
    }

    fn paint(layers: &mut LayerStore, author: &AuthorId, x: u32, y: u32, color: Rgba<u8>) {
        layers.get_or_create(author).pixels_mut().put_pixel(x, y, color);
    }

    #[test]
    fn test_later_layers_draw_over_earlier() {
        let mut layers = store();
        let red = Rgba([255, 0, 0, 255]);
        let blue = Rgba([0, 0, 255, 255]);
        paint(&mut layers, &AuthorId::Local, 1, 1, red);
        paint(&mut layers, &AuthorId::remote("a"), 1, 1, blue);
        paint(&mut layers, &AuthorId::remote("a"), 2, 2, blue);
        paint(&mut layers, &AuthorId::Local, 3, 3, red);

        let mut compositor = Compositor::new(10, 10);
        compositor.recompose(&layers);
        assert_eq!(compositor.pixel(1, 1), blue);
        assert_eq!(compositor.pixel(2, 2), blue);
        assert_eq!(compositor.pixel(3, 3), red);
        assert_eq!(compositor.pixel(5, 5)[3], 0);
    }

    #[test]
    fn test_recompose_is_idempotent() {
        let mut layers = store();
        paint(&mut layers, &AuthorId::remote("a"), 4, 4, Rgba([0, 128, 0, 128]));
        let mut compositor = Compositor::new(10, 10);
        compositor.recompose(&layers);
        let first = compositor.output().clone();
        compositor.recompose(&layers);
        assert_eq!(compositor.output(), &first);
        assert_eq!(compositor.recompose_count(), 2);
    }

    #[test]
    fn test_removed_layer_disappears() {
        let mut layers = store();
        let bob = AuthorId::remote("bob");
        paint(&mut layers, &bob, 0, 0, Rgba([9, 9, 9, 255]));
        let mut compositor = Compositor::new(10, 10);
        compositor.recompose(&layers);
        assert_eq!(compositor.pixel(0, 0)[3], 255);

        layers.remove(&bob);
        compositor.recompose(&layers);
        assert_eq!(compositor.pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_output_follows_geometry() {
        let mut layers = store();
        let mut compositor = Compositor::new(1, 1);
        layers.resize_all(SurfaceGeometry::new(Size::new(20.0, 5.0), 2.0));
        compositor.recompose(&layers);
        assert_eq!(compositor.output().dimensions(), (40, 10));
    }

    #[test]
    fn test_export_png_decodes() {
        let mut layers = store();
        paint(&mut layers, &AuthorId::Local, 2, 3, Rgba([10, 20, 30, 255]));
        let mut compositor = Compositor::new(10, 10);
        compositor.recompose(&layers);
        let png = compositor.export_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().into_rgba8();
        assert_eq!(decoded.get_pixel(2, 3), &Rgba([10, 20, 30, 255]));
    }
}

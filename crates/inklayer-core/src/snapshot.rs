//! Immutable PNG-encoded copies of a layer's pixels.
//!
//! Snapshots are the unit of undo/redo and of state transfer between peers.
//! On the wire they travel as `data:image/png;base64,...` URLs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// Prefix of a PNG data URL.
pub const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Snapshot errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("PNG encoding failed: {0}")]
    Encode(String),
    #[error("PNG decoding failed: {0}")]
    Decode(String),
    #[error("Not a PNG data URL")]
    DataUrl,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("No layer for author: {0}")]
    MissingLayer(String),
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// A full encoded copy of one layer at an instant.
///
/// Cloning is cheap; the encoded bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    width: u32,
    height: u32,
    png: Arc<[u8]>,
}

impl Snapshot {
    /// Encode the given pixels.
    pub fn capture(pixels: &RgbaImage) -> SnapshotResult<Self> {
        let png = encode_png(pixels)?;
        Ok(Self {
            width: pixels.width(),
            height: pixels.height(),
            png: png.into(),
        })
    }

    /// Wrap already-encoded PNG bytes. Only the header is checked here;
    /// the pixel data is validated when the snapshot is decoded.
    pub fn from_png(bytes: Vec<u8>) -> SnapshotResult<Self> {
        let (width, height) = ImageReader::with_format(Cursor::new(&bytes), ImageFormat::Png)
            .into_dimensions()
            .map_err(|e| SnapshotError::Decode(e.to_string()))?;
        Ok(Self {
            width,
            height,
            png: bytes.into(),
        })
    }

    /// Wrap bytes without looking at them.
    #[cfg(test)]
    pub(crate) fn from_raw_parts(width: u32, height: u32, bytes: Vec<u8>) -> Self {
        Self {
            width,
            height,
            png: bytes.into(),
        }
    }

    /// Parse a `data:image/png;base64,` URL.
    pub fn from_data_url(url: &str) -> SnapshotResult<Self> {
        let payload = url.trim().strip_prefix(DATA_URL_PREFIX).ok_or(SnapshotError::DataUrl)?;
        let bytes = STANDARD.decode(payload)?;
        Self::from_png(bytes)
    }

    /// Encode as a PNG data URL.
    pub fn to_data_url(&self) -> String {
        let mut url = String::with_capacity(DATA_URL_PREFIX.len() + self.png.len() * 4 / 3 + 4);
        url.push_str(DATA_URL_PREFIX);
        STANDARD.encode_string(&self.png, &mut url);
        url
    }

    /// Decode into a pixel buffer.
    pub fn decode(&self) -> SnapshotResult<RgbaImage> {
        let image = image::load_from_memory_with_format(&self.png, ImageFormat::Png)
            .map_err(|e| SnapshotError::Decode(e.to_string()))?;
        Ok(image.into_rgba8())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Encoded PNG bytes.
    pub fn as_png(&self) -> &[u8] {
        &self.png
    }

    /// Size of the encoded payload in bytes.
    pub fn encoded_len(&self) -> usize {
        self.png.len()
    }
}

/// Encode RGBA pixel data to PNG bytes.
pub fn encode_png(pixels: &RgbaImage) -> SnapshotResult<Vec<u8>> {
    let mut png_data = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_data, pixels.width(), pixels.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder
            .write_header()
            .map_err(|e| SnapshotError::Encode(e.to_string()))?;
        writer
            .write_image_data(pixels.as_raw())
            .map_err(|e| SnapshotError::Encode(e.to_string()))?;
        writer.finish().map_err(|e| SnapshotError::Encode(e.to_string()))?;
    }
    Ok(png_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn sample_image() -> RgbaImage {
        let mut img = RgbaImage::new(8, 4);
        img.put_pixel(1, 1, Rgba([255, 0, 0, 255]));
        img.put_pixel(6, 2, Rgba([0, 0, 255, 128]));
        img
    }

    #[test]
    fn test_capture_is_lossless() {
        let img = sample_image();
        let snap = Snapshot::capture(&img).unwrap();
        assert_eq!(snap.dimensions(), (8, 4));
        assert_eq!(snap.decode().unwrap(), img);
    }

    #[test]
    fn test_data_url_transfer() {
        let snap = Snapshot::capture(&sample_image()).unwrap();
        let url = snap.to_data_url();
        assert!(url.starts_with(DATA_URL_PREFIX));

        let back = Snapshot::from_data_url(&url).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.decode().unwrap(), sample_image());
    }

    #[test]
    fn test_rejects_other_urls() {
        assert!(matches!(
            Snapshot::from_data_url("data:image/jpeg;base64,AAAA"),
            Err(SnapshotError::DataUrl)
        ));
        assert!(matches!(
            Snapshot::from_data_url("data:image/png;base64,@@@"),
            Err(SnapshotError::Base64(_))
        ));
    }

    #[test]
    fn test_rejects_non_png_payload() {
        let url = format!("{}{}", DATA_URL_PREFIX, STANDARD.encode(b"definitely not a png"));
        assert!(matches!(Snapshot::from_data_url(&url), Err(SnapshotError::Decode(_))));
    }

    #[test]
    fn test_truncated_png_fails_on_decode() {
        let snap = Snapshot::capture(&sample_image()).unwrap();
        let bytes = snap.as_png();
        // Keep the header so dimensions parse, drop the image data.
        let truncated = bytes[..40.min(bytes.len())].to_vec();
        match Snapshot::from_png(truncated) {
            Ok(s) => assert!(s.decode().is_err()),
            Err(SnapshotError::Decode(_)) => {}
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }
}

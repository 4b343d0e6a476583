//! Brush modes and stroke colors.

use peniko::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a stroke affects its author's layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeMode {
    /// Paint the stroke color over existing pixels (source-over).
    #[default]
    Brush,
    /// Remove existing pixels along the path (destination-out).
    Eraser,
}

impl StrokeMode {
    /// Toggle between brush and eraser.
    pub fn toggle(self) -> Self {
        match self {
            StrokeMode::Brush => StrokeMode::Eraser,
            StrokeMode::Eraser => StrokeMode::Brush,
        }
    }
}

/// RGBA8 stroke color, serialized as a CSS hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StrokeColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl StrokeColor {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub const fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    /// Parse any CSS color (`#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(...)`, named colors).
    pub fn parse(css: &str) -> Option<Self> {
        let parsed = peniko::color::parse_color(css.trim()).ok()?;
        Some(Self::from(parsed.to_alpha_color::<peniko::color::Srgb>()))
    }

    /// Hex form, `#rrggbb` when opaque and `#rrggbbaa` otherwise.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    /// Pixel value for raster operations.
    pub fn to_rgba(&self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, self.a])
    }
}

impl Default for StrokeColor {
    fn default() -> Self {
        Self::black()
    }
}

impl From<Color> for StrokeColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self::new(rgba.r, rgba.g, rgba.b, rgba.a)
    }
}

impl From<StrokeColor> for Color {
    fn from(color: StrokeColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

impl fmt::Display for StrokeColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for StrokeColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid color: {}", s))
    }
}

impl TryFrom<String> for StrokeColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrokeColor> for String {
    fn from(color: StrokeColor) -> Self {
        color.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(StrokeColor::parse("#000000"), Some(StrokeColor::black()));
        assert_eq!(StrokeColor::parse("#fff"), Some(StrokeColor::white()));
        assert_eq!(
            StrokeColor::parse("#ff000080"),
            Some(StrokeColor::new(255, 0, 0, 128))
        );
    }

    #[test]
    fn test_parse_named_color() {
        assert_eq!(StrokeColor::parse("black"), Some(StrokeColor::black()));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(StrokeColor::parse("not-a-color").is_none());
        assert!("#12".parse::<StrokeColor>().is_err());
    }

    #[test]
    fn test_hex_output() {
        assert_eq!(StrokeColor::new(255, 0, 16, 255).to_hex(), "#ff0010");
        assert_eq!(StrokeColor::new(0, 0, 0, 0).to_hex(), "#00000000");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&StrokeColor::new(0, 128, 255, 255)).unwrap();
        assert_eq!(json, "\"#0080ff\"");
        let back: StrokeColor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StrokeColor::new(0, 128, 255, 255));
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&StrokeMode::Eraser).unwrap(), "\"eraser\"");
        assert_eq!(StrokeMode::Brush.toggle(), StrokeMode::Eraser);
    }
}

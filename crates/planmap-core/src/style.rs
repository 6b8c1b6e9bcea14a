//! Presentation attributes for planning polygons and their mirrors.

use peniko::Color;
use serde::{Deserialize, Serialize};

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Format as `#rrggbb`, appending alpha only when not opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Fill and stroke for a rendered polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonStyle {
    /// Outline color.
    pub stroke_color: SerializableColor,
    /// Outline width in screen pixels.
    pub stroke_width: f64,
    /// Fill color (None = outline only).
    pub fill_color: Option<SerializableColor>,
    /// Fill opacity (0.0 = transparent, 1.0 = opaque).
    #[serde(default = "default_fill_opacity")]
    pub fill_opacity: f64,
}

fn default_fill_opacity() -> f64 {
    0.2
}

impl Default for PolygonStyle {
    fn default() -> Self {
        Self {
            stroke_color: SerializableColor::new(0x3d, 0x7e, 0xa6, 255),
            stroke_width: 2.0,
            fill_color: Some(SerializableColor::new(0x3d, 0x7e, 0xa6, 255)),
            fill_opacity: default_fill_opacity(),
        }
    }
}

impl PolygonStyle {
    /// Style used for the copies shown on secondary viewports.
    pub fn mirror() -> Self {
        Self {
            stroke_color: SerializableColor::new(0xf1, 0x8f, 0x01, 255),
            stroke_width: 2.0,
            fill_color: None,
            fill_opacity: 0.0,
        }
    }

    /// Hover variant: thicker outline, denser fill.
    pub fn highlighted(&self) -> Self {
        Self {
            stroke_width: self.stroke_width * 2.0,
            fill_opacity: (self.fill_opacity + 0.3).min(1.0),
            ..self.clone()
        }
    }

    /// Fill as a renderer color with opacity applied.
    pub fn fill(&self) -> Option<Color> {
        self.fill_color.map(|c| {
            let alpha = (c.a as f64 * self.fill_opacity.clamp(0.0, 1.0)).round() as u8;
            Color::from_rgba8(c.r, c.g, c.b, alpha)
        })
    }
}

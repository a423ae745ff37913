//! Shared primitive IDs, colors, and tool tags.

use serde::{Deserialize, Serialize};

/// Monotonic history action identifier. `0` is reserved for the empty canvas.
pub type ActionId = u64;

/// Sentinel `current_index` meaning "nothing applied".
pub const EMPTY_CANVAS: ActionId = 0;

/// Opaque 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Opaque black, used when stored color data is unusable.
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    /// Builds a color from its channels.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channels normalized to `0.0..=1.0`, as shaders consume them.
    pub fn to_unit(self) -> [f32; 3] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
        ]
    }
}

/// Tool tag carried by every persisted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolTag {
    /// Full canvas reset.
    Clear,
    /// Image imported as the base layer.
    Import,
    /// Hard round brush.
    Brush,
    /// Hard round eraser.
    Eraser,
    /// Soft brush with per-sample radius, hardness and flow.
    SoftBrush,
    /// Soft eraser with per-sample radius, hardness and flow.
    SoftEraser,
    /// Color picker preview. Never committed to history.
    Eyedropper,
}

impl ToolTag {
    /// Minimum number of samples a stroke needs before it may be committed.
    pub fn min_samples(self) -> usize {
        match self {
            Self::Brush | Self::Eraser => 2,
            Self::SoftBrush | Self::SoftEraser => 1,
            Self::Clear | Self::Import | Self::Eyedropper => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_channels() {
        assert_eq!(Color::rgb(255, 0, 51).to_unit(), [1.0, 0.0, 0.2]);
    }

    #[test]
    fn tool_tags_use_camel_case() {
        assert_eq!(
            serde_json::to_value(ToolTag::SoftBrush).unwrap(),
            serde_json::json!("softBrush")
        );
        assert_eq!(ToolTag::Brush.min_samples(), 2);
        assert_eq!(ToolTag::SoftEraser.min_samples(), 1);
    }
}

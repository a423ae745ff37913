//! Drawing action records held by the history log.

use crate::types::{ActionId, Color, ToolTag, EMPTY_CANVAS};

/// Hard-edged tools whose samples are line vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineTool {
    /// Paints with the stroke color.
    Brush,
    /// Clears pixels along the stroke.
    Eraser,
}

/// Soft tools whose samples carry their own radius, hardness and flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftTool {
    /// Soft airbrush-style paint.
    Brush,
    /// Soft erase.
    Eraser,
}

/// One pointer sample of a line stroke.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePoint {
    /// Canvas x in pixels.
    pub x: f32,
    /// Canvas y in pixels.
    pub y: f32,
    /// Pen pressure in `0.0..=1.0`, when the device reports one.
    pub pressure: Option<f32>,
}

impl LinePoint {
    /// Sample without pressure.
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            pressure: None,
        }
    }

    /// Sample with pen pressure.
    pub fn with_pressure(x: f32, y: f32, pressure: f32) -> Self {
        Self {
            x,
            y,
            pressure: Some(pressure),
        }
    }
}

/// One dab of a soft stroke.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftPoint {
    /// Canvas x in pixels.
    pub x: f32,
    /// Canvas y in pixels.
    pub y: f32,
    /// Dab radius in pixels.
    pub radius: f32,
    /// Edge hardness in `0.0..=1.0`.
    pub hardness: f32,
    /// Paint flow in `0.0..=1.0`.
    pub flow: f32,
}

/// Draw options for line strokes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineOptions {
    /// Stroke color.
    pub color: Color,
    /// Layer opacity in `0.0..=1.0`.
    pub opacity: f32,
    /// Line width in pixels.
    pub diameter: f32,
}

/// Draw options for soft strokes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftOptions {
    /// Stroke color.
    pub color: Color,
    /// Layer opacity in `0.0..=1.0`.
    pub opacity: f32,
    /// Nominal dab diameter in pixels.
    pub diameter: f32,
    /// Default edge hardness.
    pub hardness: f32,
    /// Default paint flow.
    pub flow: f32,
}

/// A committed stroke with its samples and options.
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeAction {
    /// Brush or eraser polyline.
    Line {
        /// Tool that drew the stroke.
        tool: LineTool,
        /// Ordered samples.
        points: Vec<LinePoint>,
        /// Draw options.
        options: LineOptions,
    },
    /// Soft brush or soft eraser dabs.
    Soft {
        /// Tool that drew the stroke.
        tool: SoftTool,
        /// Ordered dabs.
        points: Vec<SoftPoint>,
        /// Draw options.
        options: SoftOptions,
    },
}

impl StrokeAction {
    /// Tool tag used on the wire.
    pub fn tool_tag(&self) -> ToolTag {
        match self {
            Self::Line {
                tool: LineTool::Brush,
                ..
            } => ToolTag::Brush,
            Self::Line {
                tool: LineTool::Eraser,
                ..
            } => ToolTag::Eraser,
            Self::Soft {
                tool: SoftTool::Brush,
                ..
            } => ToolTag::SoftBrush,
            Self::Soft {
                tool: SoftTool::Eraser,
                ..
            } => ToolTag::SoftEraser,
        }
    }

    /// Number of input samples.
    pub fn sample_count(&self) -> usize {
        match self {
            Self::Line { points, .. } => points.len(),
            Self::Soft { points, .. } => points.len(),
        }
    }

    /// Stroke color.
    pub fn color(&self) -> Color {
        match self {
            Self::Line { options, .. } => options.color,
            Self::Soft { options, .. } => options.color,
        }
    }

    /// True when the stroke has enough samples to be committed.
    pub fn is_committable(&self) -> bool {
        let count = self.sample_count();
        count > 0 && count >= self.tool_tag().min_samples()
    }
}

/// Image import payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportAction {
    /// Original file name.
    pub name: Option<String>,
    /// Embedded image, base64 or data URL.
    pub image: Option<String>,
}

/// Transient color-picker preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewAction {
    /// Color under the cursor.
    pub color: Color,
    /// Canvas x in pixels.
    pub x: f32,
    /// Canvas y in pixels.
    pub y: f32,
}

/// One drawing operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Reset every layer to transparent.
    Clear,
    /// Load an image as the base layer.
    Import(ImportAction),
    /// Committed stroke.
    Stroke(StrokeAction),
    /// Eyedropper preview; rejected by the serializer.
    Preview(PreviewAction),
}

impl Action {
    /// Tool tag used on the wire.
    pub fn tool_tag(&self) -> ToolTag {
        match self {
            Self::Clear => ToolTag::Clear,
            Self::Import(_) => ToolTag::Import,
            Self::Stroke(stroke) => stroke.tool_tag(),
            Self::Preview(_) => ToolTag::Eyedropper,
        }
    }

    /// True for actions that may enter the persisted timeline.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, Self::Preview(_))
    }
}

/// An action together with its timeline id.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryAction {
    /// Unique, monotonic id within the timeline.
    pub id: ActionId,
    /// Recorded action.
    pub action: Action,
}

/// Full copy of the log: ordered actions and the id currently applied.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryState {
    /// Actions in ascending id order.
    pub actions: Vec<HistoryAction>,
    /// Applied action id, or [`EMPTY_CANVAS`].
    pub current_index: ActionId,
}

impl HistoryState {
    /// State with no actions.
    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            current_index: EMPTY_CANVAS,
        }
    }

    /// True when there is nothing recorded.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

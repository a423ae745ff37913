//! Stroke capture for the active tool.
//!
//! One [`Toolbox`] holds the selected tool and the stroke being captured.
//! Each input event is routed to the selected tool only; switching tools
//! abandons any stroke in progress.

use crate::{
    action::{
        Action, LineOptions, LinePoint, LineTool, PreviewAction, SoftOptions, SoftPoint, SoftTool,
        StrokeAction,
    },
    types::Color,
};

use super::render::RenderTarget;

/// Selectable tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActiveTool {
    /// Hard brush.
    #[default]
    Brush,
    /// Hard eraser.
    Eraser,
    /// Soft brush.
    SoftBrush,
    /// Soft eraser.
    SoftEraser,
    /// Color picker.
    Eyedropper,
}

/// Pointer input, already mapped to canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Pointer pressed.
    Down {
        /// Canvas x.
        x: f32,
        /// Canvas y.
        y: f32,
        /// Pen pressure, when reported.
        pressure: Option<f32>,
    },
    /// Pointer moved.
    Move {
        /// Canvas x.
        x: f32,
        /// Canvas y.
        y: f32,
        /// Pen pressure, when reported.
        pressure: Option<f32>,
    },
    /// Pointer released.
    Up,
}

/// Current drawing settings shared by all tools.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolSettings {
    /// Paint color.
    pub color: Color,
    /// Stroke layer opacity.
    pub opacity: f32,
    /// Brush diameter in pixels.
    pub diameter: f32,
    /// Soft tool edge hardness.
    pub hardness: f32,
    /// Soft tool paint flow.
    pub flow: f32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            opacity: 1.0,
            diameter: 8.0,
            hardness: 0.5,
            flow: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StrokeBuffer {
    Line(Vec<LinePoint>),
    Soft(Vec<SoftPoint>),
}

/// Per-stroke lifecycle. `Committed` is reported through [`ToolOutput`] and
/// the machine returns to `Idle` immediately.
#[derive(Debug, Clone, PartialEq, Default)]
enum StrokePhase {
    #[default]
    Idle,
    Stroking(StrokeBuffer),
    Picking,
}

/// Result of feeding one input event.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Nothing to report.
    None,
    /// Stroke finished with enough samples; hand it to the history engine.
    Committed(Action),
    /// Stroke finished below its minimum sample count.
    Discarded,
    /// Eyedropper hover; never recorded.
    Preview(PreviewAction),
    /// Eyedropper released; the color is now the active color.
    Picked(Color),
}

/// Active tool selector and stroke state machine.
#[derive(Debug, Clone, Default)]
pub struct Toolbox {
    active: ActiveTool,
    settings: ToolSettings,
    phase: StrokePhase,
}

impl Toolbox {
    /// Brush selected, default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selected tool.
    pub fn active(&self) -> ActiveTool {
        self.active
    }

    /// Current settings.
    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    /// Mutable settings; applied to the next committed stroke.
    pub fn settings_mut(&mut self) -> &mut ToolSettings {
        &mut self.settings
    }

    /// True between press and release of a drawing tool.
    pub fn is_stroking(&self) -> bool {
        matches!(self.phase, StrokePhase::Stroking(_))
    }

    /// Selects `tool`. A stroke in progress is dropped.
    pub fn select(&mut self, tool: ActiveTool) -> ToolOutput {
        let abandoned = self.is_stroking();
        self.active = tool;
        self.phase = StrokePhase::Idle;
        if abandoned {
            ToolOutput::Discarded
        } else {
            ToolOutput::None
        }
    }

    /// Feeds one event to the active tool. `canvas` is only read, by the
    /// eyedropper.
    pub fn handle(&mut self, event: InputEvent, canvas: &impl RenderTarget) -> ToolOutput {
        if self.active == ActiveTool::Eyedropper {
            return self.handle_eyedropper(event, canvas);
        }

        match event {
            InputEvent::Down { x, y, pressure } => {
                let abandoned = self.is_stroking();
                let mut buffer = match self.active {
                    ActiveTool::SoftBrush | ActiveTool::SoftEraser => StrokeBuffer::Soft(Vec::new()),
                    _ => StrokeBuffer::Line(Vec::new()),
                };
                self.push_sample(&mut buffer, x, y, pressure);
                self.phase = StrokePhase::Stroking(buffer);
                if abandoned {
                    ToolOutput::Discarded
                } else {
                    ToolOutput::None
                }
            }
            InputEvent::Move { x, y, pressure } => {
                let mut phase = std::mem::take(&mut self.phase);
                if let StrokePhase::Stroking(buffer) = &mut phase {
                    self.push_sample(buffer, x, y, pressure);
                }
                self.phase = phase;
                ToolOutput::None
            }
            InputEvent::Up => match std::mem::take(&mut self.phase) {
                StrokePhase::Stroking(buffer) => self.finish(buffer),
                _ => ToolOutput::None,
            },
        }
    }

    fn push_sample(&self, buffer: &mut StrokeBuffer, x: f32, y: f32, pressure: Option<f32>) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        let pressure = pressure.filter(|p| p.is_finite());
        match buffer {
            StrokeBuffer::Line(points) => points.push(LinePoint { x, y, pressure }),
            StrokeBuffer::Soft(points) => {
                let p = pressure.unwrap_or(1.0).clamp(0.0, 1.0);
                points.push(SoftPoint {
                    x,
                    y,
                    radius: self.settings.diameter * 0.5 * p,
                    hardness: self.settings.hardness,
                    flow: self.settings.flow * p,
                });
            }
        }
    }

    fn finish(&self, buffer: StrokeBuffer) -> ToolOutput {
        let s = self.settings;
        let stroke = match buffer {
            StrokeBuffer::Line(points) => StrokeAction::Line {
                tool: if self.active == ActiveTool::Eraser {
                    LineTool::Eraser
                } else {
                    LineTool::Brush
                },
                points,
                options: LineOptions {
                    color: s.color,
                    opacity: s.opacity,
                    diameter: s.diameter,
                },
            },
            StrokeBuffer::Soft(points) => StrokeAction::Soft {
                tool: if self.active == ActiveTool::SoftEraser {
                    SoftTool::Eraser
                } else {
                    SoftTool::Brush
                },
                points,
                options: SoftOptions {
                    color: s.color,
                    opacity: s.opacity,
                    diameter: s.diameter,
                    hardness: s.hardness,
                    flow: s.flow,
                },
            },
        };

        if stroke.is_committable() {
            ToolOutput::Committed(Action::Stroke(stroke))
        } else {
            ToolOutput::Discarded
        }
    }

    fn handle_eyedropper(&mut self, event: InputEvent, canvas: &impl RenderTarget) -> ToolOutput {
        match event {
            InputEvent::Down { x, y, .. } | InputEvent::Move { x, y, .. } => {
                if matches!(event, InputEvent::Down { .. }) {
                    self.phase = StrokePhase::Picking;
                }
                let color = canvas.sample_color(x, y).unwrap_or(self.settings.color);
                if self.phase == StrokePhase::Picking {
                    self.settings.color = color;
                }
                ToolOutput::Preview(PreviewAction { color, x, y })
            }
            InputEvent::Up => {
                if std::mem::take(&mut self.phase) == StrokePhase::Picking {
                    ToolOutput::Picked(self.settings.color)
                } else {
                    ToolOutput::None
                }
            }
        }
    }
}

//! Conversion between in-memory actions and the storage-safe plain form.
//!
//! Plain records hold numbers and strings only, so they can cross the
//! persistence worker boundary as JSON. Stored colors come in two legacy
//! shapes, `{r,g,b}` objects and bare channel vectors; [`migrate_color`] is
//! the single place that reconciles them.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::warn;

use crate::{
    action::{
        Action, HistoryAction, HistoryState, ImportAction, LineOptions, LinePoint, LineTool,
        SoftOptions, SoftPoint, SoftTool, StrokeAction,
    },
    core::log::current_after_removal,
    types::{ActionId, Color},
};

/// Version written into [`StateEnvelope`].
pub const STATE_FORMAT_VERSION: u16 = 2;

/// Serializer failures.
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    /// JSON encode or decode failure.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Envelope written by an unknown format.
    #[error("unsupported state format version {0}")]
    UnsupportedFormat(u16),
    /// Transient UI actions are never stored.
    #[error("{0:?} actions are not persisted")]
    NotPersistable(crate::types::ToolTag),
    /// Stroke without a single usable sample.
    #[error("stroke has no usable samples")]
    EmptyStroke,
}

/// Stored color in any shape seen on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyColor {
    /// Current `{r,g,b}` object.
    Rgb {
        /// Red channel.
        r: Number,
        /// Green channel.
        g: Number,
        /// Blue channel.
        b: Number,
    },
    /// Older channel vector, `[r, g, b]` or `[r, g, b, a]`.
    Vector(Vec<f64>),
    /// Anything else; migrates to black.
    Unknown(Value),
}

impl From<Color> for LegacyColor {
    fn from(c: Color) -> Self {
        Self::Rgb {
            r: Number::from(c.r),
            g: Number::from(c.g),
            b: Number::from(c.b),
        }
    }
}

/// Resolves any stored color shape to a live color. Unusable data becomes
/// opaque black.
pub fn migrate_color(color: Option<&LegacyColor>) -> Color {
    match color {
        Some(LegacyColor::Rgb { r, g, b }) => {
            match (channel(r.as_f64()), channel(g.as_f64()), channel(b.as_f64())) {
                (Some(r), Some(g), Some(b)) => Color::rgb(r, g, b),
                _ => {
                    warn!(?color, "unreadable rgb channels, using black");
                    Color::BLACK
                }
            }
        }
        Some(LegacyColor::Vector(v)) if v.len() >= 3 => {
            match (channel(Some(v[0])), channel(Some(v[1])), channel(Some(v[2]))) {
                (Some(r), Some(g), Some(b)) => Color::rgb(r, g, b),
                _ => Color::BLACK,
            }
        }
        Some(other) => {
            warn!(color = ?other, "unrecognized stored color, using black");
            Color::BLACK
        }
        None => Color::BLACK,
    }
}

fn channel(v: Option<f64>) -> Option<u8> {
    let v = v?;
    if !v.is_finite() {
        return None;
    }
    Some(v.round().clamp(0.0, 255.0) as u8)
}

fn default_unit() -> f32 {
    1.0
}

/// JSON has no NaN or infinity; such values would come back as `null` and
/// fail the whole record.
fn finite_or(v: f32, fallback: f32) -> f32 {
    if v.is_finite() { v } else { fallback }
}

/// Stored brush or eraser stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainLineStroke {
    /// `[x, y]` or `[x, y, pressure]` tuples.
    pub points: Vec<Vec<f32>>,
    /// Stroke color.
    #[serde(default)]
    pub color: Option<LegacyColor>,
    /// Layer opacity.
    #[serde(default = "default_unit")]
    pub opacity: f32,
    /// Line width.
    #[serde(default = "default_unit")]
    pub diameter: f32,
}

/// Stored soft brush or soft eraser stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainSoftStroke {
    /// `[x, y, radius, hardness, flow]` tuples.
    pub stroke_points: Vec<[f32; 5]>,
    /// Stroke color.
    #[serde(default)]
    pub color: Option<LegacyColor>,
    /// Layer opacity.
    #[serde(default = "default_unit")]
    pub opacity: f32,
    /// Nominal dab diameter.
    #[serde(default = "default_unit")]
    pub diameter: f32,
    /// Default edge hardness.
    #[serde(default = "default_unit")]
    pub hardness: f32,
    /// Default paint flow.
    #[serde(default = "default_unit")]
    pub flow: f32,
}

/// Storage-safe action, tagged by `tool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "camelCase")]
pub enum PlainAction {
    /// `{"tool":"clear"}`.
    Clear,
    /// Imported image.
    Import {
        /// File name.
        #[serde(default)]
        name: Option<String>,
        /// Embedded image payload.
        #[serde(default)]
        image: Option<String>,
    },
    /// Hard brush stroke.
    Brush(PlainLineStroke),
    /// Hard eraser stroke.
    Eraser(PlainLineStroke),
    /// Soft brush stroke.
    SoftBrush(PlainSoftStroke),
    /// Soft eraser stroke.
    SoftEraser(PlainSoftStroke),
}

/// Converts a live action to its plain form.
pub fn serialize(action: &Action) -> Result<PlainAction, SerialError> {
    let plain = match action {
        Action::Clear => PlainAction::Clear,
        Action::Import(import) => PlainAction::Import {
            name: import.name.clone(),
            image: import.image.clone(),
        },
        Action::Stroke(StrokeAction::Line {
            tool,
            points,
            options,
        }) => {
            let points: Vec<Vec<f32>> = points
                .iter()
                .filter(|p| p.x.is_finite() && p.y.is_finite())
                .map(|p| match p.pressure.filter(|v| v.is_finite()) {
                    Some(pressure) => vec![p.x, p.y, pressure],
                    None => vec![p.x, p.y],
                })
                .collect();
            if points.is_empty() {
                return Err(SerialError::EmptyStroke);
            }
            let stroke = PlainLineStroke {
                points,
                color: Some(options.color.into()),
                opacity: finite_or(options.opacity, 1.0),
                diameter: finite_or(options.diameter, 1.0),
            };
            match tool {
                LineTool::Brush => PlainAction::Brush(stroke),
                LineTool::Eraser => PlainAction::Eraser(stroke),
            }
        }
        Action::Stroke(StrokeAction::Soft {
            tool,
            points,
            options,
        }) => {
            let diameter = finite_or(options.diameter, 1.0);
            let hardness = finite_or(options.hardness, 1.0);
            let flow = finite_or(options.flow, 1.0);
            let stroke_points: Vec<[f32; 5]> = points
                .iter()
                .filter(|p| p.x.is_finite() && p.y.is_finite())
                .map(|p| {
                    [
                        p.x,
                        p.y,
                        finite_or(p.radius, diameter * 0.5),
                        finite_or(p.hardness, hardness),
                        finite_or(p.flow, flow),
                    ]
                })
                .collect();
            if stroke_points.is_empty() {
                return Err(SerialError::EmptyStroke);
            }
            let stroke = PlainSoftStroke {
                stroke_points,
                color: Some(options.color.into()),
                opacity: finite_or(options.opacity, 1.0),
                diameter,
                hardness,
                flow,
            };
            match tool {
                SoftTool::Brush => PlainAction::SoftBrush(stroke),
                SoftTool::Eraser => PlainAction::SoftEraser(stroke),
            }
        }
        Action::Preview(_) => return Err(SerialError::NotPersistable(action.tool_tag())),
    };
    Ok(plain)
}

/// Rebuilds a live action from its plain form.
pub fn deserialize(plain: PlainAction) -> Result<Action, SerialError> {
    let action = match plain {
        PlainAction::Clear => Action::Clear,
        PlainAction::Import { name, image } => Action::Import(ImportAction { name, image }),
        PlainAction::Brush(stroke) => line_stroke(LineTool::Brush, stroke)?,
        PlainAction::Eraser(stroke) => line_stroke(LineTool::Eraser, stroke)?,
        PlainAction::SoftBrush(stroke) => soft_stroke(SoftTool::Brush, stroke)?,
        PlainAction::SoftEraser(stroke) => soft_stroke(SoftTool::Eraser, stroke)?,
    };
    Ok(action)
}

fn line_stroke(tool: LineTool, stroke: PlainLineStroke) -> Result<Action, SerialError> {
    let points: Vec<LinePoint> = stroke
        .points
        .iter()
        .filter_map(|p| match p.as_slice() {
            [x, y] => Some(LinePoint::new(*x, *y)),
            [x, y, pressure, ..] => Some(LinePoint::with_pressure(*x, *y, *pressure)),
            _ => None,
        })
        .collect();
    if points.is_empty() {
        return Err(SerialError::EmptyStroke);
    }
    Ok(Action::Stroke(StrokeAction::Line {
        tool,
        points,
        options: LineOptions {
            color: migrate_color(stroke.color.as_ref()),
            opacity: stroke.opacity,
            diameter: stroke.diameter,
        },
    }))
}

fn soft_stroke(tool: SoftTool, stroke: PlainSoftStroke) -> Result<Action, SerialError> {
    if stroke.stroke_points.is_empty() {
        return Err(SerialError::EmptyStroke);
    }
    let points = stroke
        .stroke_points
        .iter()
        .map(|[x, y, radius, hardness, flow]| SoftPoint {
            x: *x,
            y: *y,
            radius: *radius,
            hardness: *hardness,
            flow: *flow,
        })
        .collect();
    Ok(Action::Stroke(StrokeAction::Soft {
        tool,
        points,
        options: SoftOptions {
            color: migrate_color(stroke.color.as_ref()),
            opacity: stroke.opacity,
            diameter: stroke.diameter,
            hardness: stroke.hardness,
            flow: stroke.flow,
        },
    }))
}

/// Stored history entry. The action stays an untyped JSON value until
/// hydration so one bad record cannot fail the whole state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainHistoryAction {
    /// Timeline id.
    pub id: ActionId,
    /// Encoded [`PlainAction`].
    pub action: Value,
}

/// Storage-safe [`HistoryState`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainHistoryState {
    /// Stored entries in id order.
    #[serde(default)]
    pub actions: Vec<PlainHistoryAction>,
    /// Applied id or 0.
    #[serde(default)]
    pub current_index: ActionId,
}

impl PlainHistoryState {
    /// Removes entry `id`, moving the pointer like the in-memory log does.
    pub fn remove_action(&mut self, id: ActionId) -> bool {
        let Some(pos) = self.actions.iter().position(|a| a.id == id) else {
            return false;
        };
        self.actions.remove(pos);
        if self.current_index == id {
            let prev = pos.checked_sub(1).map(|p| self.actions[p].id);
            let next = self.actions.get(pos).map(|a| a.id);
            self.current_index = current_after_removal(prev, next);
        }
        true
    }
}

/// Encodes every persistable action of `state`.
pub fn encode_state(state: &HistoryState) -> PlainHistoryState {
    let actions = state
        .actions
        .iter()
        .filter_map(|entry| {
            let encoded = serialize(&entry.action)
                .and_then(|plain| serde_json::to_value(plain).map_err(SerialError::from));
            match encoded {
                Ok(action) => Some(PlainHistoryAction {
                    id: entry.id,
                    action,
                }),
                Err(err) => {
                    warn!(id = entry.id, %err, "dropping action from persisted state");
                    None
                }
            }
        })
        .collect();

    PlainHistoryState {
        actions,
        current_index: state.current_index,
    }
}

/// Result of hydrating a stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedState {
    /// Every record that decoded cleanly.
    pub state: HistoryState,
    /// Ids of records that were skipped.
    pub skipped: Vec<ActionId>,
}

/// Decodes a stored state record by record, skipping malformed entries.
pub fn decode_state(plain: PlainHistoryState) -> DecodedState {
    let mut actions = Vec::with_capacity(plain.actions.len());
    let mut skipped = Vec::new();

    for entry in plain.actions {
        let decoded = serde_json::from_value::<PlainAction>(entry.action)
            .map_err(SerialError::from)
            .and_then(deserialize);
        match decoded {
            Ok(action) => actions.push(HistoryAction {
                id: entry.id,
                action,
            }),
            Err(err) => {
                warn!(id = entry.id, %err, "skipping unreadable history action");
                skipped.push(entry.id);
            }
        }
    }

    DecodedState {
        state: HistoryState {
            actions,
            current_index: plain.current_index,
        },
        skipped,
    }
}

/// Versioned wrapper for the sentinel state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped state.
    pub state: PlainHistoryState,
}

/// Encodes `state` for the durable store.
pub fn encode_record(state: &PlainHistoryState) -> Result<Vec<u8>, SerialError> {
    let env = StateEnvelope {
        format_version: STATE_FORMAT_VERSION,
        state: state.clone(),
    };
    Ok(serde_json::to_vec(&env)?)
}

/// Decodes a stored state record.
pub fn decode_record(payload: &[u8]) -> Result<PlainHistoryState, SerialError> {
    if let Ok(env) = serde_json::from_slice::<StateEnvelope>(payload) {
        if env.format_version > STATE_FORMAT_VERSION {
            return Err(SerialError::UnsupportedFormat(env.format_version));
        }
        return Ok(env.state);
    }

    // Version 1 records stored the bare state without an envelope.
    Ok(serde_json::from_slice::<PlainHistoryState>(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clear_serializes_to_bare_tag() {
        let value = serde_json::to_value(serialize(&Action::Clear).unwrap()).unwrap();
        assert_eq!(value, json!({ "tool": "clear" }));
    }

    #[test]
    fn vector_color_migrates() {
        let color = LegacyColor::Vector(vec![12.0, 200.4, 255.0, 1.0]);
        assert_eq!(migrate_color(Some(&color)), Color::rgb(12, 200, 255));
    }

    #[test]
    fn short_vector_color_is_black() {
        let color = LegacyColor::Vector(vec![255.0]);
        assert_eq!(migrate_color(Some(&color)), Color::BLACK);
    }

    #[test]
    fn remove_action_moves_pointer_back() {
        let mut state = PlainHistoryState {
            actions: (1..=3)
                .map(|id| PlainHistoryAction {
                    id,
                    action: json!({ "tool": "clear" }),
                })
                .collect(),
            current_index: 3,
        };
        assert!(state.remove_action(3));
        assert_eq!(state.current_index, 2);
        assert!(!state.remove_action(3));
    }
}

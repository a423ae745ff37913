//! Interface to the layered canvas renderer.

use crate::{
    action::{ImportAction, StrokeAction},
    types::Color,
};

/// Canvas failures while replaying an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Import without image data.
    #[error("import has no image payload")]
    MissingImage,
    /// Stroke could not be redrawn.
    #[error("replay failed: {0}")]
    Replay(String),
    /// GPU or canvas resource allocation failed.
    #[error("could not create render resource: {0}")]
    ResourceCreation(String),
}

/// Pixel side of the canvas. The history engine drives it but never touches
/// pixels itself.
pub trait RenderTarget {
    /// Resets every layer to fully transparent.
    fn clear_all_layers(&mut self);

    /// Re-executes a stroke's pixel effect without recording history.
    fn replay_stroke(&mut self, stroke: &StrokeAction) -> Result<(), RenderError>;

    /// Replaces the base layer with an imported image.
    fn load_image_as_base_layer(&mut self, image: &ImportAction) -> Result<(), RenderError>;

    /// Recomposites all layers to the visible surface.
    fn force_redraw_composite(&mut self);

    /// Moves the live stroke layer onto the saved layer.
    fn commit_active_stroke_to_saved_layer(&mut self) {}

    /// Composited color at a canvas position, for the eyedropper.
    fn sample_color(&self, _x: f32, _y: f32) -> Option<Color> {
        None
    }
}

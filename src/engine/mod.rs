//! History engine and its rendering and input collaborators.

/// Event payloads.
pub mod events;
/// Undo/redo state machine and replay.
pub mod history;
/// Renderer interface.
pub mod render;
/// Stroke capture per tool.
pub mod tools;

//! Undo/redo history for a layered raster canvas, with replay-based redraw
//! and background persistence.
//!
//! # Examples
//!
//! Memory-only usage with [`engine::history::HistoryEngine`]:
//! ```
//! use sketchlog::{
//!     action::{Action, ImportAction, StrokeAction},
//!     engine::{
//!         history::HistoryEngine,
//!         render::{RenderError, RenderTarget},
//!     },
//! };
//!
//! #[derive(Default)]
//! struct Canvas {
//!     drawn: usize,
//! }
//!
//! impl RenderTarget for Canvas {
//!     fn clear_all_layers(&mut self) {
//!         self.drawn = 0;
//!     }
//!     fn replay_stroke(&mut self, _stroke: &StrokeAction) -> Result<(), RenderError> {
//!         self.drawn += 1;
//!         Ok(())
//!     }
//!     fn load_image_as_base_layer(&mut self, _image: &ImportAction) -> Result<(), RenderError> {
//!         Ok(())
//!     }
//!     fn force_redraw_composite(&mut self) {}
//! }
//!
//! let mut history = HistoryEngine::new(Canvas::default());
//! history.add(Action::Import(ImportAction::default()));
//! assert!(history.can_undo());
//! assert!(history.undo());
//! assert!(!history.can_undo());
//! assert!(history.redo());
//! ```
//!
//! Persistent usage with a SQLite-backed worker:
//! ```no_run
//! # use sketchlog::{action::*, engine::render::*};
//! # struct Canvas;
//! # impl RenderTarget for Canvas {
//! #     fn clear_all_layers(&mut self) {}
//! #     fn replay_stroke(&mut self, _: &StrokeAction) -> Result<(), RenderError> { Ok(()) }
//! #     fn load_image_as_base_layer(&mut self, _: &ImportAction) -> Result<(), RenderError> { Ok(()) }
//! #     fn force_redraw_composite(&mut self) {}
//! # }
//! use sketchlog::{
//!     engine::history::HistoryEngine,
//!     persist::{sqlite::SqliteStore, KvStore},
//!     runtime::{client::PersistenceClient, config::PersistConfig},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let client = PersistenceClient::spawn(
//!     || Ok(Box::new(SqliteStore::open("history.db")?) as Box<dyn KvStore>),
//!     PersistConfig::default(),
//! );
//! let mut history = HistoryEngine::new(Canvas);
//! let mut events = history.subscribe();
//! history.attach(client).await;
//! history.add(Action::Clear);
//! history.flush_on_unload();
//! history.close().await;
//! # let _ = events.try_recv();
//! # }
//! ```
#![deny(missing_docs)]

/// Drawing actions and history records.
pub mod action;
/// In-memory action log.
pub mod core;
/// History engine, renderer interface, and tool input.
pub mod engine;
/// Durable key-value storage.
pub mod persist;
/// Persistence worker, protocol, and client.
pub mod runtime;
/// Plain storage representation of actions.
pub mod serial;
/// Shared primitive types.
pub mod types;

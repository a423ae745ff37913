use serde::{Deserialize, Serialize};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc},
};
use tracing::{debug, error, info, warn};

use crate::{
    action::{Action, HistoryAction, HistoryState},
    core::log::ActionLog,
    runtime::{
        client::{ClientError, PersistenceClient},
        protocol::{RequestKind, ResponseKind, WorkerResponse},
    },
    serial::{self, PlainHistoryState},
    types::ActionId,
};

use super::{events::HistoryEvent, render::RenderTarget};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Consecutive persistence failures before `PersistenceDegraded` fires.
    pub degraded_after_failures: u32,
    /// Buffered events per subscriber.
    pub event_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            degraded_after_failures: 3,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersistPlan {
    /// Overwrite the stored state with the current log.
    Save,
    /// Clear the store, then save. Used after branching.
    Rebuild,
    /// Targeted removal of one action.
    Delete(ActionId),
    /// Clear the store and save an explicit empty state.
    Empty,
}

impl PersistPlan {
    fn name(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Rebuild => "rebuild",
            Self::Delete(_) => "delete",
            Self::Empty => "clear",
        }
    }
}

#[derive(Debug)]
enum PersistOutcome {
    Done,
    Failed {
        op: &'static str,
        error: ClientError,
    },
    DeleteFailed {
        id: ActionId,
        error: ClientError,
    },
}

struct Persistence {
    client: PersistenceClient,
    runtime: Handle,
    outcome_tx: mpsc::UnboundedSender<PersistOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<PersistOutcome>,
    broadcasts: broadcast::Receiver<WorkerResponse>,
    in_flight: usize,
}

/// Undo/redo state machine over an [`ActionLog`].
///
/// Every mutation updates the log and the canvas synchronously. Persistence
/// is fire-and-forget: requests are queued to the worker in call order and
/// their answers are reconciled on later calls, so storage faults never
/// reach callers of `add`, `undo`, `redo` or `delete_action`.
pub struct HistoryEngine<R: RenderTarget> {
    log: ActionLog,
    renderer: R,
    events: broadcast::Sender<HistoryEvent>,
    persistence: Option<Persistence>,
    consecutive_failures: u32,
    degraded_reported: bool,
    config: HistoryConfig,
}

impl<R: RenderTarget> HistoryEngine<R> {
    /// Memory-only engine with an empty log.
    pub fn new(renderer: R) -> Self {
        Self::with_config(renderer, HistoryConfig::default())
    }

    /// Memory-only engine with explicit tuning.
    pub fn with_config(renderer: R, config: HistoryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            log: ActionLog::new(),
            renderer,
            events,
            persistence: None,
            consecutive_failures: 0,
            degraded_reported: false,
            config,
        }
    }

    /// Connects durable storage and hydrates the log from it.
    ///
    /// Waits for the worker's readiness (bounded by its ready timeout), loads
    /// the stored state and replays it. On any failure the engine stays
    /// memory-only. Emits `HistoryReady` either way and returns whether
    /// persistence is active.
    pub async fn attach(&mut self, client: PersistenceClient) -> bool {
        let timeout = client.config().ready_timeout();
        let loaded = match client.wait_ready(timeout).await {
            Ok(()) => client.load_state().await,
            Err(err) => Err(err),
        };

        match loaded {
            Ok(stored) => {
                if let Some(plain) = stored {
                    let decoded = serial::decode_state(plain);
                    if !decoded.skipped.is_empty() {
                        warn!(skipped = ?decoded.skipped, "stored history had unreadable actions");
                    }
                    self.log.restore(decoded.state);
                }
                let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
                let broadcasts = client.subscribe();
                self.persistence = Some(Persistence {
                    client,
                    runtime: Handle::current(),
                    outcome_tx,
                    outcome_rx,
                    broadcasts,
                    in_flight: 0,
                });
                info!(actions = self.log.len(), "history hydrated");
            }
            Err(err) => {
                warn!(%err, "history storage unavailable; continuing in memory only");
            }
        }

        self.replay_from_log();
        self.announce_ready();
        self.persistence.is_some()
    }

    /// Emits `HistoryReady` for the current log.
    pub fn announce_ready(&self) {
        let _ = self.events.send(HistoryEvent::HistoryReady {
            has_history: !self.log.is_empty(),
            can_undo: self.log.can_undo(),
            can_redo: self.log.can_redo(),
        });
    }

    /// Receiver for [`HistoryEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    /// Records a committed action and redraws.
    ///
    /// Previews and strokes below their minimum sample count are ignored and
    /// return `None`. Adding while a redo stack exists discards it and
    /// rebuilds the stored state.
    pub fn add(&mut self, action: Action) -> Option<ActionId> {
        self.pump_persistence();

        if !action.is_persistable() {
            debug!(tool = ?action.tool_tag(), "ignoring transient action");
            return None;
        }
        if let Action::Stroke(stroke) = &action {
            if !stroke.is_committable() {
                debug!(samples = stroke.sample_count(), "ignoring stroke below minimum samples");
                return None;
            }
        }

        let branching = self.log.can_redo();
        let entry = self.log.append(action);
        let id = entry.id;
        let action = entry.action.clone();

        self.replay_from_log();
        let _ = self.events.send(HistoryEvent::Draw { id, action });
        self.persist(if branching {
            PersistPlan::Rebuild
        } else {
            PersistPlan::Save
        });
        Some(id)
    }

    /// Moves the live stroke onto the saved layer, then records it.
    pub fn commit_stroke(&mut self, action: Action) -> Option<ActionId> {
        self.renderer.commit_active_stroke_to_saved_layer();
        self.add(action)
    }

    /// Steps back one action. Returns false at the empty canvas.
    pub fn undo(&mut self) -> bool {
        self.pump_persistence();

        let tool = self.log.current_action().map(|a| a.action.tool_tag());
        if self.log.move_back().is_err() {
            let _ = self.events.send(HistoryEvent::UndoUnavailable);
            return false;
        }

        self.replay_from_log();
        let _ = self.events.send(HistoryEvent::Undo {
            tool,
            can_undo: self.log.can_undo(),
        });
        self.persist(PersistPlan::Save);
        true
    }

    /// Reapplies the next action. Returns false with no redo stack.
    pub fn redo(&mut self) -> bool {
        self.pump_persistence();

        let tool = match self.log.move_forward() {
            Ok(entry) => entry.action.tool_tag(),
            Err(_) => {
                let _ = self.events.send(HistoryEvent::RedoUnavailable);
                return false;
            }
        };

        self.replay_from_log();
        let _ = self.events.send(HistoryEvent::Redo {
            tool,
            can_redo: self.log.can_redo(),
        });
        self.persist(PersistPlan::Save);
        true
    }

    /// Removes any entry by id and redraws.
    pub fn delete_action(&mut self, id: ActionId) -> bool {
        self.pump_persistence();

        if !self.log.remove_by_id(id) {
            return false;
        }

        self.replay_from_log();
        let _ = self.events.send(HistoryEvent::HistoryDeleted {
            action_id: id,
            remaining_actions: self.log.len(),
        });
        self.persist(PersistPlan::Delete(id));
        true
    }

    /// Empties the log and the canvas, and stores an explicit empty state.
    pub fn clear_history(&mut self) {
        self.pump_persistence();

        self.log.clear();
        self.renderer.clear_all_layers();
        self.renderer.force_redraw_composite();
        let _ = self.events.send(HistoryEvent::Clear);
        self.persist(PersistPlan::Empty);
    }

    /// Rebuilds the canvas from the log.
    ///
    /// Clears every layer, then replays in id order from the last `Clear` up
    /// to the current action. An action that fails to replay is logged and
    /// skipped. The engine stays mutably borrowed for the whole replay, so
    /// nothing can re-enter it.
    pub fn replay_from_log(&mut self) {
        if !self.log.is_consistent() {
            error!(
                current = self.log.current_index(),
                "current index missing from log; drawing empty canvas"
            );
            debug_assert!(false, "current index missing from action log");
        }

        self.renderer.clear_all_layers();
        let mut skipped = 0usize;
        for entry in self.log.replay_range() {
            let result = match &entry.action {
                Action::Clear => {
                    self.renderer.clear_all_layers();
                    Ok(())
                }
                Action::Import(import) => self.renderer.load_image_as_base_layer(import),
                Action::Stroke(stroke) => self.renderer.replay_stroke(stroke),
                Action::Preview(_) => Ok(()),
            };
            if let Err(err) = result {
                skipped += 1;
                warn!(id = entry.id, %err, "skipping action that failed to replay");
            }
        }
        self.renderer.force_redraw_composite();

        if skipped > 0 {
            debug!(skipped, "replay finished with skipped actions");
        }
    }

    /// True unless at the empty canvas.
    pub fn can_undo(&self) -> bool {
        self.log.can_undo()
    }

    /// True when actions follow the current one.
    pub fn can_redo(&self) -> bool {
        self.log.can_redo()
    }

    /// Every recorded action in id order.
    pub fn all_actions(&self) -> &[HistoryAction] {
        self.log.actions()
    }

    /// Number of recorded actions.
    pub fn history_len(&self) -> usize {
        self.log.len()
    }

    /// Applied action id, or 0.
    pub fn current_index(&self) -> ActionId {
        self.log.current_index()
    }

    /// Copy of the log.
    pub fn state(&self) -> HistoryState {
        self.log.snapshot()
    }

    /// Underlying log.
    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Borrow the canvas.
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Mutably borrow the canvas.
    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// True while a storage worker is attached.
    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// Requests still waiting for the worker.
    pub fn persist_in_flight(&self) -> usize {
        self.persistence.as_ref().map_or(0, |p| p.in_flight)
    }

    /// Best-effort flush for session teardown. Does not wait.
    pub fn flush_on_unload(&mut self) {
        let Some(p) = self.persistence.as_ref() else {
            return;
        };
        if let Err(err) = p.client.dispatch(RequestKind::FlushBatch) {
            debug!(%err, "unload flush not sent");
        }
    }

    /// Handles persistence answers that have already arrived.
    ///
    /// A failed targeted delete triggers a full rebuild of the stored state.
    pub fn pump_persistence(&mut self) {
        loop {
            let Some(p) = self.persistence.as_mut() else {
                return;
            };

            loop {
                match p.broadcasts.try_recv() {
                    Ok(msg) => {
                        if msg.kind == ResponseKind::BatchFlushed {
                            let count = msg.data.and_then(|d| d.flushed).unwrap_or(0);
                            let _ = self.events.send(HistoryEvent::BatchFlushed { count });
                        }
                    }
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }

            let Ok(outcome) = p.outcome_rx.try_recv() else {
                return;
            };
            p.in_flight = p.in_flight.saturating_sub(1);
            self.handle_outcome(outcome);
        }
    }

    /// Waits until every outstanding persistence request has been answered
    /// or timed out, reconciling failures along the way.
    pub async fn settle(&mut self) {
        loop {
            self.pump_persistence();
            let Some(p) = self.persistence.as_mut() else {
                return;
            };
            if p.in_flight == 0 {
                return;
            }
            let Some(outcome) = p.outcome_rx.recv().await else {
                return;
            };
            p.in_flight = p.in_flight.saturating_sub(1);
            self.handle_outcome(outcome);
        }
    }

    /// Settles outstanding requests, stops the worker, and hands back the
    /// renderer.
    pub async fn close(mut self) -> R {
        self.settle().await;
        if let Some(p) = self.persistence.take() {
            p.client.close().await;
        }
        self.renderer
    }

    fn persist(&mut self, plan: PersistPlan) {
        let Some(p) = self.persistence.as_mut() else {
            return;
        };

        let requests = match plan {
            PersistPlan::Save => vec![RequestKind::SaveState {
                state: serial::encode_state(&self.log.snapshot()),
            }],
            PersistPlan::Rebuild => vec![
                RequestKind::ClearHistory,
                RequestKind::SaveState {
                    state: serial::encode_state(&self.log.snapshot()),
                },
            ],
            PersistPlan::Delete(id) => vec![RequestKind::DeleteAction { id }],
            PersistPlan::Empty => vec![
                RequestKind::ClearHistory,
                RequestKind::SaveState {
                    state: PlainHistoryState::default(),
                },
            ],
        };

        match p.client.dispatch_all(requests) {
            Ok(replies) => {
                p.in_flight += 1;
                let tx = p.outcome_tx.clone();
                p.runtime.spawn(async move {
                    let mut outcome = PersistOutcome::Done;
                    for reply in replies {
                        if let Err(error) = reply.wait().await {
                            outcome = match plan {
                                PersistPlan::Delete(id) => PersistOutcome::DeleteFailed { id, error },
                                _ => PersistOutcome::Failed {
                                    op: plan.name(),
                                    error,
                                },
                            };
                            break;
                        }
                    }
                    let _ = tx.send(outcome);
                });
            }
            Err(error) => {
                let outcome = match plan {
                    PersistPlan::Delete(id) => PersistOutcome::DeleteFailed { id, error },
                    _ => PersistOutcome::Failed {
                        op: plan.name(),
                        error,
                    },
                };
                self.handle_outcome(outcome);
            }
        }
    }

    fn handle_outcome(&mut self, outcome: PersistOutcome) {
        match outcome {
            PersistOutcome::Done => {
                self.consecutive_failures = 0;
                self.degraded_reported = false;
            }
            PersistOutcome::Failed { op, error } => {
                warn!(op, %error, "history not persisted; in-memory state is unaffected");
                self.note_failure();
            }
            PersistOutcome::DeleteFailed { id, error } => {
                warn!(id, %error, "targeted delete failed; rebuilding stored history");
                self.note_failure();
                // A dispatch failure here is reported through handle_outcome
                // as a plain failure, so this cannot loop.
                self.persist(PersistPlan::Rebuild);
            }
        }
    }

    fn note_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.degraded_after_failures
            && !self.degraded_reported
        {
            self.degraded_reported = true;
            let _ = self.events.send(HistoryEvent::PersistenceDegraded {
                failures: self.consecutive_failures,
            });
        }
    }
}

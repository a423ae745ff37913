use std::sync::Arc;

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    persist::{self, KvStore, PersistError, PersistResult},
    serial::PlainHistoryState,
};

use super::{
    config::PersistConfig,
    protocol::{RequestKind, ResponseData, ResponseKind, WorkerRequest, WorkerResponse},
};

/// Ends of a running worker.
pub struct WorkerChannels {
    /// Bounded request queue.
    pub requests: mpsc::Sender<WorkerRequest>,
    /// Answers and broadcasts.
    pub responses: mpsc::UnboundedReceiver<WorkerResponse>,
    /// Worker task.
    pub join: JoinHandle<()>,
}

/// Spawns the persistence worker.
///
/// `open` runs on the blocking pool and performs any storage open or
/// migration. The worker broadcasts `ready` once it succeeds, or
/// `init-failed` and then rejects every request. The worker exits after the
/// request sender is dropped, writing any batched state first.
pub fn spawn_worker<F>(open: F, config: PersistConfig) -> WorkerChannels
where
    F: FnOnce() -> PersistResult<Box<dyn KvStore>> + Send + 'static,
{
    let (req_tx, req_rx) = mpsc::channel::<WorkerRequest>(config.request_queue_bound.max(1));
    let (resp_tx, resp_rx) = mpsc::unbounded_channel::<WorkerResponse>();

    let join = tokio::spawn(async move {
        let opened = match tokio::task::spawn_blocking(open).await {
            Ok(inner) => inner,
            Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
        };

        match opened {
            Ok(store) => {
                info!("history store ready");
                let _ = resp_tx.send(WorkerResponse::broadcast(ResponseKind::Ready, None, None));
                Worker::new(store, resp_tx, config).run(req_rx).await;
            }
            Err(err) => {
                warn!(%err, "history store failed to open");
                let message = err.to_string();
                let _ = resp_tx.send(WorkerResponse::broadcast(
                    ResponseKind::InitFailed,
                    None,
                    Some(message.clone()),
                ));
                reject_all(req_rx, &resp_tx, &message).await;
            }
        }
    });

    WorkerChannels {
        requests: req_tx,
        responses: resp_rx,
        join,
    }
}

async fn reject_all(
    mut rx: mpsc::Receiver<WorkerRequest>,
    tx: &mpsc::UnboundedSender<WorkerResponse>,
    reason: &str,
) {
    while let Some(req) = rx.recv().await {
        let _ = tx.send(WorkerResponse::err(
            req.id,
            req.kind.response_kind(),
            format!("storage unavailable: {reason}"),
        ));
    }
}

/// Coalesced `SAVE_STATE` requests. Only the newest state is written; every
/// waiting request is answered with the outcome of that write.
#[derive(Default)]
struct SaveBatch {
    latest: Option<PlainHistoryState>,
    waiting: Vec<String>,
}

impl SaveBatch {
    fn push(&mut self, id: String, state: PlainHistoryState) {
        self.latest = Some(state);
        self.waiting.push(id);
    }

    fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

struct Worker {
    store: Arc<Mutex<Box<dyn KvStore>>>,
    tx: mpsc::UnboundedSender<WorkerResponse>,
    batch: SaveBatch,
    config: PersistConfig,
}

impl Worker {
    fn new(
        store: Box<dyn KvStore>,
        tx: mpsc::UnboundedSender<WorkerResponse>,
        config: PersistConfig,
    ) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            tx,
            batch: SaveBatch::default(),
            config,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<WorkerRequest>) {
        let mut deadline = Instant::now() + self.config.batch_latency();

        loop {
            tokio::select! {
                req = rx.recv() => {
                    let Some(req) = req else {
                        let _ = self.flush_batch().await;
                        break;
                    };
                    let restart_timer = self.batch.is_empty();
                    self.handle(req).await;
                    if restart_timer {
                        deadline = Instant::now() + self.config.batch_latency();
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !self.batch.is_empty() => {
                    let _ = self.flush_batch().await;
                    deadline = Instant::now() + self.config.batch_latency();
                }
            }
        }
        debug!("history worker stopped");
    }

    async fn handle(&mut self, req: WorkerRequest) {
        let WorkerRequest { id, kind } = req;
        let response_kind = kind.response_kind();

        // Everything except a save is ordered after the pending batch.
        let result: PersistResult<Option<ResponseData>> = match kind {
            RequestKind::SaveState { state } => {
                self.batch.push(id, state);
                if self.batch.waiting.len() >= self.config.batch_max_states.max(1) {
                    let _ = self.flush_batch().await;
                }
                return;
            }
            RequestKind::FlushBatch => self.flush_batch().await.map(|_| None),
            RequestKind::LoadState => match self.flush_batch().await {
                Ok(_) => self
                    .with_store(|store| persist::load_state(store))
                    .await
                    .map(|state| {
                        Some(ResponseData {
                            state,
                            flushed: None,
                        })
                    }),
                Err(err) => Err(err),
            },
            RequestKind::ClearHistory => match self.flush_batch().await {
                Ok(_) => self.with_store(|store| store.clear()).await.map(|_| None),
                Err(err) => Err(err),
            },
            RequestKind::DeleteAction { id: action_id } => match self.flush_batch().await {
                Ok(_) => self
                    .with_store(move |store| persist::delete_action(store, action_id))
                    .await
                    .map(|_| None),
                Err(err) => Err(err),
            },
        };

        let response = match result {
            Ok(data) => WorkerResponse::ok(id, response_kind, data),
            Err(err) => {
                warn!(request = %id, %err, "history request failed");
                WorkerResponse::err(id, response_kind, err.to_string())
            }
        };
        let _ = self.tx.send(response);
    }

    /// Writes the batched state, answers every waiting save, and broadcasts
    /// `batch-flushed`. Returns how many saves were coalesced.
    async fn flush_batch(&mut self) -> PersistResult<usize> {
        let batch = std::mem::take(&mut self.batch);
        let Some(state) = batch.latest else {
            return self.with_store(|store| store.flush()).await.map(|_| 0);
        };

        let count = batch.waiting.len();
        let result = self
            .with_store(move |store| {
                persist::save_state(store, &state)?;
                store.flush()
            })
            .await;

        match &result {
            Ok(()) => {
                for id in batch.waiting {
                    let _ = self
                        .tx
                        .send(WorkerResponse::ok(id, ResponseKind::SaveState, None));
                }
                debug!(count, "flushed history batch");
                let _ = self.tx.send(WorkerResponse::broadcast(
                    ResponseKind::BatchFlushed,
                    Some(ResponseData {
                        state: None,
                        flushed: Some(count),
                    }),
                    None,
                ));
            }
            Err(err) => {
                warn!(count, %err, "history batch write failed");
                for id in batch.waiting {
                    let _ = self
                        .tx
                        .send(WorkerResponse::err(id, ResponseKind::SaveState, err.to_string()));
                }
            }
        }
        result.map(|_| count)
    }

    async fn with_store<T, F>(&self, f: F) -> PersistResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn KvStore) -> PersistResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let mut guard = store.blocking_lock();
            f(&mut **guard)
        })
        .await
        .map_err(|e| PersistError::Message(format!("join error: {e}")))?
    }
}

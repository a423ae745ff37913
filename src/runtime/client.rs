use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use hashbrown::HashMap;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{
    persist::{KvStore, PersistResult},
    serial::PlainHistoryState,
    types::ActionId,
};

use super::{
    config::PersistConfig,
    protocol::{RequestKind, ResponseData, ResponseKind, WorkerRequest, WorkerResponse},
    worker::{spawn_worker, WorkerChannels},
};

/// Failures seen by callers of [`PersistenceClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Worker has not broadcast `ready`.
    #[error("persistence worker is not ready")]
    NotReady,
    /// Worker could not open its store.
    #[error("persistence worker failed to start: {0}")]
    InitFailed(String),
    /// No answer within the configured timeout.
    #[error("{request} timed out after {after_ms} ms")]
    Timeout {
        /// Request wire name.
        request: &'static str,
        /// Timeout that elapsed.
        after_ms: u64,
    },
    /// Worker answered with an error.
    #[error("worker error: {0}")]
    Worker(String),
    /// Request queue is at capacity.
    #[error("persistence request queue is full")]
    QueueFull,
    /// Worker or dispatcher is gone.
    #[error("persistence channel closed")]
    ChannelClosed,
}

/// Worker lifecycle as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Store is still opening.
    Starting,
    /// Requests are accepted.
    Ready,
    /// Store failed to open, with the reason.
    Failed(String),
}

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<WorkerResponse>>>>;

/// Client side of the persistence worker.
///
/// Owns the request channel, the table of requests waiting for an answer,
/// and the readiness state. Requests are sent synchronously in call order;
/// only the wait for the answer is asynchronous.
pub struct PersistenceClient {
    requests: Option<mpsc::Sender<WorkerRequest>>,
    pending: PendingTable,
    ready: watch::Receiver<Readiness>,
    broadcasts: broadcast::Sender<WorkerResponse>,
    next_id: AtomicU64,
    config: PersistConfig,
    worker: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PersistenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceClient")
            .field("readiness", &*self.ready.borrow())
            .field("pending", &lock(&self.pending).len())
            .finish()
    }
}

impl PersistenceClient {
    /// Spawns a worker over the store returned by `open` and connects to it.
    pub fn spawn<F>(open: F, config: PersistConfig) -> Self
    where
        F: FnOnce() -> PersistResult<Box<dyn KvStore>> + Send + 'static,
    {
        let channels = spawn_worker(open, config.clone());
        Self::connect(channels, config)
    }

    /// Connects to an already running worker.
    pub fn connect(channels: WorkerChannels, config: PersistConfig) -> Self {
        let WorkerChannels {
            requests,
            responses,
            join,
        } = channels;

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = watch::channel(Readiness::Starting);
        let (broadcasts, _) = broadcast::channel(64);

        let dispatcher = tokio::spawn(dispatch_responses(
            responses,
            Arc::clone(&pending),
            ready_tx,
            broadcasts.clone(),
        ));

        Self {
            requests: Some(requests),
            pending,
            ready: ready_rx,
            broadcasts,
            next_id: AtomicU64::new(1),
            config,
            worker: Some(join),
            dispatcher: Some(dispatcher),
        }
    }

    /// Tuning in effect.
    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Current worker lifecycle state.
    pub fn readiness(&self) -> Readiness {
        self.ready.borrow().clone()
    }

    /// True once `ready` has been seen.
    pub fn is_ready(&self) -> bool {
        matches!(*self.ready.borrow(), Readiness::Ready)
    }

    /// Subscribes to worker broadcasts (`ready`, `batch-flushed`, ...).
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerResponse> {
        self.broadcasts.subscribe()
    }

    /// Waits for the worker's readiness broadcast, bounded by `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut rx = self.ready.clone();
        let state = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| !matches!(s, Readiness::Starting)),
        )
        .await
        .map_err(|_| ClientError::Timeout {
            request: "ready",
            after_ms: timeout.as_millis() as u64,
        })?
        .map_err(|_| ClientError::ChannelClosed)?
        .clone();

        match state {
            Readiness::Ready => Ok(()),
            Readiness::Failed(reason) => Err(ClientError::InitFailed(reason)),
            Readiness::Starting => Err(ClientError::NotReady),
        }
    }

    /// Sends a request without waiting for its answer.
    ///
    /// Fails fast when the worker is not ready or its queue is full.
    pub fn dispatch(&self, kind: RequestKind) -> Result<PendingReply, ClientError> {
        let requests = self.sender()?;
        let (request, reply) = self.prepare(kind);
        // On failure `reply` is dropped, which removes its pending entry.
        requests.try_send(request).map_err(queue_error)?;
        Ok(reply)
    }

    /// Sends several requests, all or none.
    ///
    /// Queue slots for every request are reserved before any is sent, so a
    /// full queue never leaves a prefix of the sequence on the wire.
    pub fn dispatch_all(&self, kinds: Vec<RequestKind>) -> Result<Vec<PendingReply>, ClientError> {
        let requests = self.sender()?;
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let permits = requests
            .try_reserve_many(kinds.len())
            .map_err(queue_error)?;

        Ok(permits
            .zip(kinds)
            .map(|(permit, kind)| {
                let (request, reply) = self.prepare(kind);
                permit.send(request);
                reply
            })
            .collect())
    }

    fn sender(&self) -> Result<&mpsc::Sender<WorkerRequest>, ClientError> {
        if !self.is_ready() {
            return Err(ClientError::NotReady);
        }
        self.requests.as_ref().ok_or(ClientError::ChannelClosed)
    }

    fn prepare(&self, kind: RequestKind) -> (WorkerRequest, PendingReply) {
        let id = format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = kind.name();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);

        let reply = PendingReply {
            id: id.clone(),
            request,
            rx: Some(rx),
            pending: Arc::clone(&self.pending),
            timeout: self.config.request_timeout(),
        };
        (WorkerRequest { id, kind }, reply)
    }

    /// Sends `kind` and waits for its answer.
    pub async fn request(&self, kind: RequestKind) -> Result<ResponseData, ClientError> {
        self.dispatch(kind)?.wait().await
    }

    /// `SAVE_STATE`.
    pub async fn save_state(&self, state: PlainHistoryState) -> Result<(), ClientError> {
        self.request(RequestKind::SaveState { state }).await.map(|_| ())
    }

    /// `LOAD_STATE`. `None` when nothing is stored.
    pub async fn load_state(&self) -> Result<Option<PlainHistoryState>, ClientError> {
        self.request(RequestKind::LoadState).await.map(|data| data.state)
    }

    /// `CLEAR_HISTORY`.
    pub async fn clear_history(&self) -> Result<(), ClientError> {
        self.request(RequestKind::ClearHistory).await.map(|_| ())
    }

    /// `DELETE_ACTION`.
    pub async fn delete_action(&self, id: ActionId) -> Result<(), ClientError> {
        self.request(RequestKind::DeleteAction { id })
            .await
            .map(|_| ())
    }

    /// `FLUSH_BATCH`.
    pub async fn flush_batch(&self) -> Result<(), ClientError> {
        self.request(RequestKind::FlushBatch).await.map(|_| ())
    }

    /// Number of requests still waiting for an answer.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Stops the worker after it writes any batched state.
    pub async fn close(mut self) {
        drop(self.requests.take());
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "history worker panicked");
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.await;
        }
        info!("persistence client closed");
    }
}

impl Drop for PersistenceClient {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

/// A request on the wire whose answer has not been awaited yet.
///
/// Dropping it forgets the request; a late answer is discarded.
#[derive(Debug)]
pub struct PendingReply {
    id: String,
    request: &'static str,
    rx: Option<oneshot::Receiver<WorkerResponse>>,
    pending: PendingTable,
    timeout: Duration,
}

impl PendingReply {
    /// Correlation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the answer. A timeout removes the request from the pending
    /// table and is reported like an explicit error.
    pub async fn wait(mut self) -> Result<ResponseData, ClientError> {
        let Some(rx) = self.rx.take() else {
            return Err(ClientError::ChannelClosed);
        };

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::ChannelClosed),
            Err(_) => {
                lock(&self.pending).remove(&self.id);
                return Err(ClientError::Timeout {
                    request: self.request,
                    after_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        match response.error {
            Some(error) => Err(ClientError::Worker(error)),
            None => Ok(response.data.unwrap_or_default()),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

fn queue_error<T>(err: mpsc::error::TrySendError<T>) -> ClientError {
    match err {
        mpsc::error::TrySendError::Full(_) => ClientError::QueueFull,
        mpsc::error::TrySendError::Closed(_) => ClientError::ChannelClosed,
    }
}

async fn dispatch_responses(
    mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
    pending: PendingTable,
    ready_tx: watch::Sender<Readiness>,
    broadcasts: broadcast::Sender<WorkerResponse>,
) {
    while let Some(response) = responses.recv().await {
        match response.id.clone() {
            Some(id) => {
                let waiter = lock(&pending).remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(request = %id, "dropping answer to forgotten request"),
                }
            }
            None => {
                match response.kind {
                    ResponseKind::Ready => {
                        let _ = ready_tx.send(Readiness::Ready);
                    }
                    ResponseKind::InitFailed => {
                        let reason = response
                            .error
                            .clone()
                            .unwrap_or_else(|| "unknown".to_string());
                        let _ = ready_tx.send(Readiness::Failed(reason));
                    }
                    _ => {}
                }
                let _ = broadcasts.send(response);
            }
        }
    }

    // Worker gone: fail whatever is still waiting.
    lock(&pending).clear();
    let _ = ready_tx.send_if_modified(|state| {
        if matches!(state, Readiness::Starting) {
            *state = Readiness::Failed("worker exited".to_string());
            true
        } else {
            false
        }
    });
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

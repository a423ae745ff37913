mod common;

use std::time::Duration;

use tempfile::tempdir;

use sketchlog::{
    action::{HistoryAction, HistoryState},
    persist::{memory::MemoryStore, sqlite::SqliteStore, KvStore, PersistError},
    runtime::{
        client::{ClientError, PersistenceClient, Readiness},
        config::PersistConfig,
        protocol::{RequestKind, ResponseKind},
    },
    serial::{decode_state, encode_state, PlainHistoryState},
};

use common::{brush, SlowStore, StalledWorker, BLUE, GREEN, RED};

fn state_with(ids: &[u64]) -> PlainHistoryState {
    let colors = [RED, GREEN, BLUE];
    encode_state(&HistoryState {
        actions: ids
            .iter()
            .enumerate()
            .map(|(i, id)| HistoryAction {
                id: *id,
                action: brush(colors[i % colors.len()], 2),
            })
            .collect(),
        current_index: ids.last().copied().unwrap_or(0),
    })
}

fn memory_client(store: MemoryStore, config: PersistConfig) -> PersistenceClient {
    PersistenceClient::spawn(move || Ok(Box::new(store) as Box<dyn KvStore>), config)
}

#[tokio::test]
async fn ready_then_save_and_load() {
    let client = memory_client(MemoryStore::new(), PersistConfig::default());
    client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready");
    assert_eq!(client.readiness(), Readiness::Ready);

    assert!(client.load_state().await.expect("load").is_none());

    client.save_state(state_with(&[1, 2])).await.expect("save");
    let loaded = client.load_state().await.expect("load").expect("stored");
    assert_eq!(loaded, state_with(&[1, 2]));

    client.clear_history().await.expect("clear");
    assert!(client.load_state().await.expect("load").is_none());

    client.close().await;
}

#[tokio::test]
async fn saves_are_coalesced_into_one_batch() {
    let store = MemoryStore::new();
    let client = memory_client(
        store.clone(),
        PersistConfig {
            batch_max_latency_ms: 5_000,
            ..PersistConfig::default()
        },
    );
    client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready");
    let mut broadcasts = client.subscribe();

    let first = client
        .dispatch(RequestKind::SaveState {
            state: state_with(&[1]),
        })
        .expect("dispatch");
    let second = client
        .dispatch(RequestKind::SaveState {
            state: state_with(&[1, 2]),
        })
        .expect("dispatch");
    let third = client
        .dispatch(RequestKind::SaveState {
            state: state_with(&[1, 2, 3]),
        })
        .expect("dispatch");
    assert_eq!(client.pending_len(), 3);

    client.flush_batch().await.expect("flush");
    first.wait().await.expect("first save");
    second.wait().await.expect("second save");
    third.wait().await.expect("third save");

    let msg = tokio::time::timeout(Duration::from_secs(1), broadcasts.recv())
        .await
        .expect("broadcast")
        .expect("recv");
    assert_eq!(msg.kind, ResponseKind::BatchFlushed);
    assert_eq!(msg.data.and_then(|d| d.flushed), Some(3));

    let loaded = client.load_state().await.expect("load").expect("stored");
    assert_eq!(loaded, state_with(&[1, 2, 3]));
    assert_eq!(client.pending_len(), 0);

    client.close().await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn batch_is_written_after_latency_without_explicit_flush() {
    let store = MemoryStore::new();
    let client = memory_client(
        store.clone(),
        PersistConfig {
            batch_max_latency_ms: 20,
            ..PersistConfig::default()
        },
    );
    client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready");

    client.save_state(state_with(&[7])).await.expect("save");
    let stored = sketchlog::persist::load_state(&store)
        .expect("read")
        .expect("written");
    assert_eq!(stored, state_with(&[7]));

    client.close().await;
}

#[tokio::test]
async fn requests_fail_fast_before_ready() {
    let client = PersistenceClient::spawn(
        || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Box::new(MemoryStore::new()) as Box<dyn KvStore>)
        },
        PersistConfig::default(),
    );

    assert_eq!(client.readiness(), Readiness::Starting);
    assert!(matches!(
        client.dispatch(RequestKind::LoadState),
        Err(ClientError::NotReady)
    ));
    assert_eq!(client.pending_len(), 0);

    client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready eventually");
    assert!(client.load_state().await.expect("load").is_none());

    client.close().await;
}

#[tokio::test]
async fn ready_wait_is_bounded() {
    let client = PersistenceClient::spawn(
        || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Box::new(MemoryStore::new()) as Box<dyn KvStore>)
        },
        PersistConfig::default(),
    );

    let err = client
        .wait_ready(Duration::from_millis(30))
        .await
        .expect_err("not ready in time");
    assert!(matches!(err, ClientError::Timeout { request: "ready", .. }));

    client.close().await;
}

#[tokio::test]
async fn open_failure_is_broadcast_and_requests_are_refused() {
    let client = PersistenceClient::spawn(
        || Err(PersistError::Message("disk unavailable".to_string())),
        PersistConfig::default(),
    );

    let err = client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect_err("init fails");
    match err {
        ClientError::InitFailed(reason) => assert!(reason.contains("disk unavailable")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(matches!(client.readiness(), Readiness::Failed(_)));
    assert!(matches!(
        client.save_state(PlainHistoryState::default()).await,
        Err(ClientError::NotReady)
    ));

    client.close().await;
}

#[tokio::test]
async fn timed_out_request_is_forgotten() {
    let client = PersistenceClient::spawn(
        || {
            Ok(Box::new(SlowStore::reads(
                MemoryStore::new(),
                Duration::from_millis(300),
            )) as Box<dyn KvStore>)
        },
        PersistConfig {
            request_timeout_ms: 40,
            ..PersistConfig::default()
        },
    );
    client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready");

    let err = client.load_state().await.expect_err("times out");
    assert!(matches!(
        err,
        ClientError::Timeout {
            request: "LOAD_STATE",
            after_ms: 40
        }
    ));
    assert_eq!(client.pending_len(), 0);

    // The late answer must not disturb later requests.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(client.pending_len(), 0);

    client.close().await;
}

#[tokio::test]
async fn request_sequence_is_queued_whole_or_not_at_all() {
    let (client, mut worker) = StalledWorker::connect(PersistConfig {
        request_queue_bound: 2,
        ..PersistConfig::default()
    });
    client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready");

    let _held = client
        .dispatch(RequestKind::SaveState {
            state: state_with(&[1]),
        })
        .expect("first save fits");

    // One slot left: a clear followed by a save must not half-send.
    let err = client
        .dispatch_all(vec![
            RequestKind::ClearHistory,
            RequestKind::SaveState {
                state: state_with(&[1, 2]),
            },
        ])
        .expect_err("no room for both");
    assert_eq!(err, ClientError::QueueFull);
    assert_eq!(client.pending_len(), 1);

    let queued = worker.drain();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind.name(), "SAVE_STATE");

    // With room again the pair goes out in order.
    let replies = client
        .dispatch_all(vec![
            RequestKind::ClearHistory,
            RequestKind::SaveState {
                state: state_with(&[1, 2]),
            },
        ])
        .expect("both fit");
    assert_eq!(replies.len(), 2);
    let names: Vec<_> = worker.drain().iter().map(|r| r.kind.name()).collect();
    assert_eq!(names, vec!["CLEAR_HISTORY", "SAVE_STATE"]);
}

#[tokio::test]
async fn worker_reports_divergent_delete() {
    let client = memory_client(MemoryStore::new(), PersistConfig::default());
    client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready");

    client.save_state(state_with(&[1, 2])).await.expect("save");
    client.delete_action(2).await.expect("delete stored id");

    let err = client.delete_action(2).await.expect_err("already gone");
    match err {
        ClientError::Worker(message) => assert!(message.contains("action 2")),
        other => panic!("unexpected error: {other:?}"),
    }

    let loaded = client.load_state().await.expect("load").expect("stored");
    assert_eq!(loaded.current_index, 1);

    client.close().await;
}

#[tokio::test]
async fn close_writes_pending_batch_to_sqlite() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("history.db");
    let slow_batches = PersistConfig {
        batch_max_latency_ms: 60_000,
        ..PersistConfig::default()
    };

    let open_path = path.clone();
    let client = PersistenceClient::spawn(
        move || Ok(Box::new(SqliteStore::open(open_path)?) as Box<dyn KvStore>),
        slow_batches.clone(),
    );
    client
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready");
    let pending = client
        .dispatch(RequestKind::SaveState {
            state: state_with(&[1, 2, 3]),
        })
        .expect("dispatch");
    drop(pending);
    client.close().await;

    let open_path = path.clone();
    let reopened = PersistenceClient::spawn(
        move || Ok(Box::new(SqliteStore::open(open_path)?) as Box<dyn KvStore>),
        slow_batches,
    );
    reopened
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("ready");
    let loaded = reopened.load_state().await.expect("load").expect("stored");
    let decoded = decode_state(loaded);
    assert_eq!(decoded.state.actions.len(), 3);
    assert_eq!(decoded.state.current_index, 3);

    reopened.close().await;
}

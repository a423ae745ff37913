//! Persistence worker wire messages.
//!
//! Every payload is plain JSON-serializable data. Requests carry a
//! correlation id; responses echo it, or carry none when they are
//! unsolicited broadcasts.

use serde::{Deserialize, Serialize};

use crate::{serial::PlainHistoryState, types::ActionId};

/// Request body, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    /// Overwrite the stored state. Batched by the worker.
    SaveState {
        /// Full state to store.
        state: PlainHistoryState,
    },
    /// Read the stored state.
    LoadState,
    /// Remove every stored record.
    ClearHistory,
    /// Remove one action from the stored state.
    DeleteAction {
        /// Action to remove.
        id: ActionId,
    },
    /// Write any batched state now.
    FlushBatch,
}

impl RequestKind {
    /// Wire name of the request.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SaveState { .. } => "SAVE_STATE",
            Self::LoadState => "LOAD_STATE",
            Self::ClearHistory => "CLEAR_HISTORY",
            Self::DeleteAction { .. } => "DELETE_ACTION",
            Self::FlushBatch => "FLUSH_BATCH",
        }
    }

    /// Response type answering this request.
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Self::SaveState { .. } => ResponseKind::SaveState,
            Self::LoadState => ResponseKind::LoadState,
            Self::ClearHistory => ResponseKind::ClearHistory,
            Self::DeleteAction { .. } => ResponseKind::DeleteAction,
            Self::FlushBatch => ResponseKind::FlushBatch,
        }
    }
}

/// Correlated request sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Correlation id, unique per client.
    pub id: String,
    /// Request body.
    #[serde(flatten)]
    pub kind: RequestKind,
}

/// Response and broadcast types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    /// Answer to `SAVE_STATE`.
    #[serde(rename = "SAVE_STATE")]
    SaveState,
    /// Answer to `LOAD_STATE`.
    #[serde(rename = "LOAD_STATE")]
    LoadState,
    /// Answer to `CLEAR_HISTORY`.
    #[serde(rename = "CLEAR_HISTORY")]
    ClearHistory,
    /// Answer to `DELETE_ACTION`.
    #[serde(rename = "DELETE_ACTION")]
    DeleteAction,
    /// Answer to `FLUSH_BATCH`.
    #[serde(rename = "FLUSH_BATCH")]
    FlushBatch,
    /// Broadcast: storage opened, requests accepted.
    #[serde(rename = "ready")]
    Ready,
    /// Broadcast: storage could not be opened.
    #[serde(rename = "init-failed")]
    InitFailed,
    /// Broadcast: a batch of saves reached storage.
    #[serde(rename = "batch-flushed")]
    BatchFlushed,
}

/// Optional response payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseData {
    /// Stored state, for `LOAD_STATE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PlainHistoryState>,
    /// Number of coalesced saves written, for `batch-flushed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flushed: Option<usize>,
}

/// Message from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// Echoed correlation id; `None` for broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Response type.
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on correlated responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl WorkerResponse {
    /// Successful answer to request `id`.
    pub fn ok(id: impl Into<String>, kind: ResponseKind, data: Option<ResponseData>) -> Self {
        Self {
            id: Some(id.into()),
            kind,
            data,
            error: None,
            success: Some(true),
        }
    }

    /// Failed answer to request `id`.
    pub fn err(id: impl Into<String>, kind: ResponseKind, error: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind,
            data: None,
            error: Some(error.into()),
            success: Some(false),
        }
    }

    /// Unsolicited broadcast.
    pub fn broadcast(kind: ResponseKind, data: Option<ResponseData>, error: Option<String>) -> Self {
        Self {
            id: None,
            kind,
            data,
            error,
            success: None,
        }
    }

    /// True for messages without a correlation id.
    pub fn is_broadcast(&self) -> bool {
        self.id.is_none()
    }
}

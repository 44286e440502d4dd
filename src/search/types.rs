use crate::error::RemoteError;
use crate::workers::types::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Instant, SystemTime};
use tokio::sync::Mutex;

/// Unique identifier for a face search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchTaskId(pub String);

impl SearchTaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SearchTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SearchTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SearchTaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Why a shard of a search could not be checked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DispatchErrorKind {
    /// The shard is not in the assignment table.
    ShardOwnerUnknown,
    /// The owner named by the table is not registered.
    WorkerNotFound,
    /// The probe photo never reached the owning worker.
    ProbeNotUploaded,
    WorkerUnreachable,
    /// Sub-task creation exceeded its deadline.
    Timeout,
    /// The owner does not have the shard.
    DirectoryMissing,
    /// The sub-task was started but its result never arrived.
    ResultTimeout,
    Remote(String),
}

impl From<&RemoteError> for DispatchErrorKind {
    fn from(error: &RemoteError) -> Self {
        match error {
            RemoteError::Unreachable(_) => Self::WorkerUnreachable,
            RemoteError::Timeout => Self::Timeout,
            RemoteError::NotFound => Self::DirectoryMissing,
            other => Self::Remote(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchFailure {
    pub directory: String,
    pub kind: DispatchErrorKind,
}

/// A shard whose sub-task is running on its owner.
#[derive(Debug, Clone, Serialize)]
pub struct InFlightShard {
    pub remote_task_id: String,
    pub directory: String,
    pub worker_id: WorkerId,
    #[serde(skip)]
    pub dispatched_at: Instant,
}

/// A shard where the face was found. `hint` is whatever detail the worker sent along.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardMatch {
    pub directory: String,
    pub hint: Option<String>,
}

/// The per-shard bookkeeping of one search.
///
/// Every shard the task was created with sits in exactly one of the five collections.
/// `pending -> in_flight -> {cleared_no_match | matched}`, with the side exits
/// `pending -> dispatch_errors`, `pending -> cleared_no_match` (empty shard) and
/// `in_flight -> dispatch_errors` (result never arrived).
#[derive(Debug, Default)]
pub struct SearchTaskState {
    pub pending: VecDeque<String>,
    pub in_flight: Vec<InFlightShard>,
    pub cleared_no_match: Vec<String>,
    pub matched: Vec<ShardMatch>,
    pub dispatch_errors: Vec<DispatchFailure>,
    pub completed_at: Option<SystemTime>,
}

impl SearchTaskState {
    pub fn new(directories: Vec<String>) -> Self {
        Self {
            pending: directories.into(),
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    pub fn fail(&mut self, directory: String, kind: DispatchErrorKind) {
        self.dispatch_errors.push(DispatchFailure { directory, kind });
    }

    pub fn shard_count(&self) -> usize {
        self.pending.len()
            + self.in_flight.len()
            + self.cleared_no_match.len()
            + self.matched.len()
            + self.dispatch_errors.len()
    }
}

/// One face search over the whole shard set.
///
/// Identity fields are fixed at creation; everything that changes lives behind `state`,
/// which the scheduler tick and completion callbacks take in turn.
#[derive(Debug)]
pub struct SearchTask {
    pub id: SearchTaskId,
    pub source_photo_path: String,
    /// Worker -> remote id of the probe photo stored on it. Workers whose upload
    /// failed are absent.
    pub uploaded_probe_ids: HashMap<WorkerId, String>,
    /// Lower values are dispatched first.
    pub priority: i64,
    pub created_at: SystemTime,
    pub(crate) seq: u64,
    pub state: Mutex<SearchTaskState>,
}

impl SearchTask {
    pub async fn snapshot(&self) -> SearchTaskSnapshot {
        let state = self.state.lock().await;

        SearchTaskSnapshot {
            id: self.id.clone(),
            source_photo_path: self.source_photo_path.clone(),
            priority: self.priority,
            created_at: self.created_at,
            completed_at: state.completed_at,
            probe_uploaded_to: self.uploaded_probe_ids.keys().cloned().collect(),
            pending: state.pending.iter().cloned().collect(),
            in_flight: state.in_flight.clone(),
            cleared_no_match: state.cleared_no_match.clone(),
            matched: state.matched.clone(),
            dispatch_errors: state.dispatch_errors.clone(),
            shard_count: state.shard_count(),
        }
    }
}

/// Read-only view of a search, as returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct SearchTaskSnapshot {
    pub id: SearchTaskId,
    pub source_photo_path: String,
    pub priority: i64,
    pub created_at: SystemTime,
    pub completed_at: Option<SystemTime>,
    pub probe_uploaded_to: Vec<WorkerId>,
    pub pending: Vec<String>,
    pub in_flight: Vec<InFlightShard>,
    pub cleared_no_match: Vec<String>,
    pub matched: Vec<ShardMatch>,
    pub dispatch_errors: Vec<DispatchFailure>,
    /// Shards across all five sets; constant over the task's life.
    pub shard_count: usize,
}

impl SearchTaskSnapshot {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

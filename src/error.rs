//! Error Taxonomy
//!
//! Two layers of failure flow through the coordinator:
//! - **`RemoteError`**: one call to one worker went wrong. These are caught at the call
//!   site and folded into structural reports (`BadDirsReport`, a task's dispatch errors).
//! - **`CoordinatorError`**: a failure the immediate caller has to handle, such as
//!   selecting from an empty registry or registering a worker twice.

use crate::workers::types::WorkerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single request to a remote worker.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RemoteError {
    #[error("worker unreachable: {0}")]
    Unreachable(String),

    #[error("remote call exceeded its deadline")]
    Timeout,

    #[error("not found on worker")]
    NotFound,

    /// Not a failure: the worker has nothing to search in this shard.
    #[error("directory is empty")]
    DirectoryEmpty,

    #[error("worker rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed worker response: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("worker registry is empty")]
    RegistryEmpty,

    #[error("no workers registered")]
    NoWorkersRegistered,

    #[error("worker {0} not found")]
    WorkerNotFound(WorkerId),

    #[error("worker {0} is already registered")]
    DuplicateWorker(WorkerId),

    #[error("no owner known for shard {0}")]
    ShardOwnerUnknown(String),

    #[error("shard {directory} is already owned by {owner}")]
    ShardAlreadyOwned { directory: String, owner: WorkerId },

    #[error("search task {0} not found")]
    TaskNotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;

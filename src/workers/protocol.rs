//! Worker Wire Protocol
//!
//! Endpoints exposed by a worker and by the coordinator for workers to call back into.
//! Workers answer mostly with plain text bodies and a small JSON envelope
//! (`{code, data}` or `{code, message}`), where `code == 0` means success.

use serde::{Deserialize, Serialize};

// --- Worker endpoints (coordinator -> worker) ---

pub const ENDPOINT_PING: &str = "/";
pub const ENDPOINT_TASKS_COUNT: &str = "/getTasksCount";
pub const ENDPOINT_UPLOAD_CHECK_FILE: &str = "/uploadCheckFile";
pub const ENDPOINT_CREATE_TASK: &str = "/createTask";
pub const ENDPOINT_CHECK_DIR: &str = "/checkDir";
pub const ENDPOINT_CHECK_PHOTO: &str = "/checkPhoto";
pub const ENDPOINT_ADD_DIR: &str = "/addDir";
pub const ENDPOINT_REMOVE_DIR: &str = "/removeDir";
pub const ENDPOINT_ADD_FILE: &str = "/addFile";
pub const ENDPOINT_DIR_LIST: &str = "/getDirList";

/// Multipart field name every worker upload endpoint reads.
pub const UPLOAD_FIELD: &str = "filedata";

/// Message a worker answers `/createTask` with when the shard holds no photos.
pub const EMPTY_DIRECTORY_MESSAGE: &str = "Not files in directory";
/// Body of the HTTP 400 a worker answers `/createTask` with for an unknown shard.
pub const DIRECTORY_NOT_FOUND_MESSAGE: &str = "directory not found";

// --- Coordinator endpoints (worker -> coordinator) ---

pub const ENDPOINT_ADD_SERVER: &str = "/addServer";
pub const ENDPOINT_TASK_RESULT: &str = "/taskResult";
pub const ENDPOINT_WORKERS: &str = "/workers";

/// JSON envelope used by `/uploadCheckFile` and `/getDirList`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DataReply {
    pub code: i64,
    #[serde(default)]
    pub data: Option<String>,
}

/// JSON envelope used by `/createTask`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageReply {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Query parameters of the worker self-registration call.
#[derive(Debug, Deserialize)]
pub struct AddServerParams {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub dirs: Option<u32>,
    #[serde(rename = "cpuCount")]
    pub cpu_count: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddServerResponse {
    pub worker_id: Option<String>,
    pub status: String,
}

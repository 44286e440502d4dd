//! Search Protocol
//!
//! Client-facing search endpoints and the worker completion callback.

use super::types::SearchTaskSnapshot;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_SEARCH: &str = "/search";
pub const ENDPOINT_SEARCH_STATUS: &str = "/search/:id";

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitSearchRequest {
    #[serde(rename = "photoPath")]
    pub photo_path: String,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitSearchResponse {
    pub task_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchStatusResponse {
    pub task: Option<SearchTaskSnapshot>,
}

/// Query of the `/taskResult` callback. Workers send `found` as `0`/`1`.
#[derive(Debug, Deserialize)]
pub struct TaskResultParams {
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
    pub found: Option<String>,
    #[serde(rename = "faceId")]
    pub face_id: Option<String>,
}

impl TaskResultParams {
    pub fn matched(&self) -> bool {
        matches!(self.found.as_deref(), Some("1") | Some("true"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResultResponse {
    pub accepted: bool,
}

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
};
use std::sync::Arc;

use super::orchestrator::SearchOrchestrator;
use super::protocol::{
    SearchStatusResponse, SubmitSearchRequest, SubmitSearchResponse, TaskResultParams,
    TaskResultResponse,
};
use super::types::{SearchTaskId, SearchTaskSnapshot};
use crate::error::CoordinatorError;

pub async fn handle_submit(
    Extension(orchestrator): Extension<Arc<SearchOrchestrator>>,
    Json(req): Json<SubmitSearchRequest>,
) -> (StatusCode, Json<SubmitSearchResponse>) {
    match orchestrator.submit(&req.photo_path, req.priority).await {
        Ok(id) => (
            StatusCode::OK,
            Json(SubmitSearchResponse {
                task_id: Some(id.to_string()),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to submit search for {}: {}", req.photo_path, e);
            let status = match e {
                CoordinatorError::NoWorkersRegistered => StatusCode::CONFLICT,
                CoordinatorError::Io(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(SubmitSearchResponse {
                    task_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_status(
    Extension(orchestrator): Extension<Arc<SearchOrchestrator>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<SearchStatusResponse>) {
    match orchestrator.status(&SearchTaskId(id)).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(SearchStatusResponse {
                task: Some(snapshot),
            }),
        ),
        Err(_) => (StatusCode::NOT_FOUND, Json(SearchStatusResponse { task: None })),
    }
}

pub async fn handle_list(
    Extension(orchestrator): Extension<Arc<SearchOrchestrator>>,
) -> (StatusCode, Json<Vec<SearchTaskSnapshot>>) {
    (StatusCode::OK, Json(orchestrator.list_tasks().await))
}

pub async fn handle_task_result(
    Extension(orchestrator): Extension<Arc<SearchOrchestrator>>,
    Query(params): Query<TaskResultParams>,
) -> (StatusCode, Json<TaskResultResponse>) {
    let Some(task_id) = params.task_id.as_deref().filter(|id| !id.is_empty()) else {
        tracing::warn!("Task result without taskId");
        return (
            StatusCode::BAD_REQUEST,
            Json(TaskResultResponse { accepted: false }),
        );
    };

    let hint = params.face_id.clone().filter(|face| !face.is_empty());
    if orchestrator
        .report_result(task_id, params.matched(), hint)
        .await
    {
        (StatusCode::OK, Json(TaskResultResponse { accepted: true }))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(TaskResultResponse { accepted: false }),
        )
    }
}

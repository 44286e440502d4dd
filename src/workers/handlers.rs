use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
};
use std::sync::Arc;

use super::protocol::{AddServerParams, AddServerResponse};
use super::registry::WorkerRegistry;
use super::types::{RegisterOutcome, WorkerSummary};

pub async fn handle_add_server(
    Extension(registry): Extension<Arc<WorkerRegistry>>,
    Query(params): Query<AddServerParams>,
) -> (StatusCode, Json<AddServerResponse>) {
    let (Some(ip), Some(port), Some(dirs), Some(cpu_count)) = (
        params.ip.filter(|ip| !ip.is_empty()),
        params.port,
        params.dirs,
        params.cpu_count,
    ) else {
        tracing::warn!("Rejected worker registration without ip, port, dirs or cpuCount");
        return (
            StatusCode::BAD_REQUEST,
            Json(AddServerResponse {
                worker_id: None,
                status: "missing ip, port, dirs or cpuCount".to_string(),
            }),
        );
    };

    match registry.register_endpoint(&ip, port, cpu_count, dirs).await {
        Ok(RegisterOutcome::Added(id)) => (
            StatusCode::OK,
            Json(AddServerResponse {
                worker_id: Some(id.to_string()),
                status: "added".to_string(),
            }),
        ),
        Ok(RegisterOutcome::AlreadyExists(id)) => (
            StatusCode::CREATED,
            Json(AddServerResponse {
                worker_id: Some(id.to_string()),
                status: "already registered".to_string(),
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to register worker {}:{}: {}", ip, port, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AddServerResponse {
                    worker_id: None,
                    status: e.to_string(),
                }),
            )
        }
    }
}

pub async fn handle_list_workers(
    Extension(registry): Extension<Arc<WorkerRegistry>>,
) -> (StatusCode, Json<Vec<WorkerSummary>>) {
    let workers: Vec<WorkerSummary> = registry.list().iter().map(|node| node.summary()).collect();
    (StatusCode::OK, Json(workers))
}

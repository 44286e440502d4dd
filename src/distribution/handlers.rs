use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
};
use std::sync::Arc;

use super::distributor::ShardDistributor;
use super::protocol::{OperationResponse, VerifyParams};
use super::types::{DistributionReport, DistributionStats, IntegrityReport, RedistributionReport};
use crate::error::CoordinatorError;

fn error_status(error: &CoordinatorError) -> StatusCode {
    match error {
        CoordinatorError::RegistryEmpty | CoordinatorError::NoWorkersRegistered => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_stats(
    Extension(distributor): Extension<Arc<ShardDistributor>>,
) -> (StatusCode, Json<DistributionStats>) {
    (StatusCode::OK, Json(distributor.stats().await))
}

pub async fn handle_run(
    Extension(distributor): Extension<Arc<ShardDistributor>>,
) -> (StatusCode, Json<OperationResponse<DistributionReport>>) {
    if let Err(e) = distributor.load_local_directories().await {
        tracing::error!("Failed to load local directories: {}", e);
        return (error_status(&e), Json(OperationResponse::failed(e)));
    }
    distributor.verify_assignment_consistency().await;

    match distributor.auto_distribute().await {
        Ok(report) => (StatusCode::OK, Json(OperationResponse::ok(report))),
        Err(e) => {
            tracing::error!("Distribution failed: {}", e);
            (error_status(&e), Json(OperationResponse::failed(e)))
        }
    }
}

pub async fn handle_verify(
    Extension(distributor): Extension<Arc<ShardDistributor>>,
    Query(params): Query<VerifyParams>,
) -> (StatusCode, Json<OperationResponse<IntegrityReport>>) {
    let repair = params.repair.unwrap_or(false);
    let full = params.full.unwrap_or(false);

    match distributor.verify_network_integrity(repair, full).await {
        Ok(report) => (StatusCode::OK, Json(OperationResponse::ok(report))),
        Err(e) => {
            tracing::error!("Integrity check failed: {}", e);
            (error_status(&e), Json(OperationResponse::failed(e)))
        }
    }
}

pub async fn handle_redistribute(
    Extension(distributor): Extension<Arc<ShardDistributor>>,
) -> (StatusCode, Json<OperationResponse<RedistributionReport>>) {
    match distributor.run_full_redistribution().await {
        Ok(report) => (StatusCode::OK, Json(OperationResponse::ok(report))),
        Err(e) => {
            tracing::error!("Redistribution failed: {}", e);
            (error_status(&e), Json(OperationResponse::failed(e)))
        }
    }
}

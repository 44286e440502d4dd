//! Distribution Admin Protocol
//!
//! Operator endpoints for inspecting and driving shard placement.

use serde::{Deserialize, Serialize};

pub const ENDPOINT_DISTRIBUTION_STATS: &str = "/distribution/stats";
pub const ENDPOINT_DISTRIBUTION_RUN: &str = "/distribution/run";
pub const ENDPOINT_DISTRIBUTION_VERIFY: &str = "/distribution/verify";
pub const ENDPOINT_DISTRIBUTION_REDISTRIBUTE: &str = "/distribution/redistribute";

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    pub repair: Option<bool>,
    pub full: Option<bool>,
}

/// Envelope for every long-running admin operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResponse<T> {
    pub success: bool,
    pub report: Option<T>,
    pub error: Option<String>,
}

impl<T> OperationResponse<T> {
    pub fn ok(report: T) -> Self {
        Self {
            success: true,
            report: Some(report),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            report: None,
            error: Some(error.to_string()),
        }
    }
}

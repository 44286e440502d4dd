use super::client::WorkerApi;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of a registered worker.
///
/// Minted as a UUID v4 when a worker registers through `/addServer`; persisted ids are
/// reused verbatim on reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Connectivity as observed by the most recent probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Reachability {
    /// Never probed since registration or reload.
    Unknown,
    Reachable { latency_ms: u64 },
    Unreachable,
}

/// A registered worker: immutable identity plus runtime state refreshed by the
/// health sweep.
#[derive(Clone)]
pub struct WorkerNode {
    pub id: WorkerId,
    pub address: String,
    pub port: u16,
    pub cpu_count: u32,
    pub declared_dir_count: u32,

    pub reachability: Reachability,
    pub queue_depth: u64,
    pub remote_dirs: Vec<String>,

    /// Registration order; gives the registry a stable iteration order.
    pub(crate) seq: u64,
    pub(crate) client: Arc<dyn WorkerApi>,
}

impl WorkerNode {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn client(&self) -> Arc<dyn WorkerApi> {
        self.client.clone()
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self.reachability, Reachability::Reachable { .. })
    }

    pub fn last_latency_ms(&self) -> Option<u64> {
        match self.reachability {
            Reachability::Reachable { latency_ms } => Some(latency_ms),
            _ => None,
        }
    }

    pub fn matches_endpoint(&self, address: &str, port: u16, cpu_count: u32) -> bool {
        self.address == address && self.port == port && self.cpu_count == cpu_count
    }

    pub fn to_record(&self) -> WorkerRecord {
        WorkerRecord {
            id: self.id.clone(),
            address: self.address.clone(),
            port: self.port,
            cpu_count: self.cpu_count,
            dir_count: self.declared_dir_count,
        }
    }

    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            id: self.id.clone(),
            endpoint: self.endpoint(),
            cpu_count: self.cpu_count,
            declared_dir_count: self.declared_dir_count,
            reachability: self.reachability,
            queue_depth: self.queue_depth,
            remote_dir_count: self.remote_dirs.len(),
        }
    }
}

impl fmt::Debug for WorkerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerNode")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint())
            .field("cpu_count", &self.cpu_count)
            .field("reachability", &self.reachability)
            .field("queue_depth", &self.queue_depth)
            .finish_non_exhaustive()
    }
}

/// Persisted form of a worker, keyed the way the servers file has always been written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    #[serde(rename = "url")]
    pub address: String,
    pub port: u16,
    pub cpu_count: u32,
    #[serde(rename = "dirs", alias = "dirsCount")]
    pub dir_count: u32,
}

/// Read-only view of a worker returned by the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub endpoint: String,
    pub cpu_count: u32,
    pub declared_dir_count: u32,
    pub reachability: Reachability,
    pub queue_depth: u64,
    pub remote_dir_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added(WorkerId),
    AlreadyExists(WorkerId),
}

/// Result of one health sweep over the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub reachable: usize,
    pub unreachable: usize,
    pub queue_query_failures: usize,
}

//! Worker Registry
//!
//! The coordinator's set of known workers. Workers are never removed automatically:
//! an unreachable worker stays registered and is skipped by distribution until it
//! answers probes again.
//!
//! ## Responsibilities
//! - **Membership**: registration (deduplicated by id, and by endpoint for self-registration).
//! - **Health**: a background sweep that records probe latency and queue depth per worker.
//! - **Selection**: least-loaded and highest-capacity picks over the cached state.
//! - **Persistence**: round-trips membership through the injected `CoordinatorStore`.

use super::client::{WorkerApi, WorkerConnector};
use super::types::*;
use crate::error::{CoordinatorError, RemoteError, Result};
use crate::persistence::CoordinatorStore;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub struct WorkerRegistry {
    /// Health updates land here while selection reads run concurrently;
    /// readers see each worker's latest state, not a consistent snapshot.
    members: DashMap<WorkerId, WorkerNode>,
    next_seq: AtomicU64,
    /// Serialises self-registration so the endpoint lookup and insert are one step.
    registration: Mutex<()>,
    /// Held from snapshot to save, so the newest membership is always written last.
    persist_write: Mutex<()>,
    connector: Arc<dyn WorkerConnector>,
    store: Arc<dyn CoordinatorStore>,
}

impl WorkerRegistry {
    pub fn new(connector: Arc<dyn WorkerConnector>, store: Arc<dyn CoordinatorStore>) -> Arc<Self> {
        Arc::new(Self {
            members: DashMap::new(),
            next_seq: AtomicU64::new(0),
            registration: Mutex::new(()),
            persist_write: Mutex::new(()),
            connector,
            store,
        })
    }

    /// Adds a worker under a caller-chosen id.
    ///
    /// Rejects an id that is already registered. Callers accepting self-registrations
    /// should go through [`register_endpoint`](Self::register_endpoint), which also
    /// rejects a known `{address, port, cpu_count}` under a new id.
    pub fn register(
        &self,
        id: WorkerId,
        address: &str,
        port: u16,
        cpu_count: u32,
        declared_dir_count: u32,
    ) -> Result<()> {
        match self.members.entry(id.clone()) {
            Entry::Occupied(_) => Err(CoordinatorError::DuplicateWorker(id)),
            Entry::Vacant(slot) => {
                let node = WorkerNode {
                    id: id.clone(),
                    address: address.to_string(),
                    port,
                    cpu_count,
                    declared_dir_count,
                    reachability: Reachability::Unknown,
                    queue_depth: 0,
                    remote_dirs: Vec::new(),
                    seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                    client: self.connector.connect(address, port),
                };
                slot.insert(node);

                tracing::info!(
                    "Registered worker {} at {}:{} (cpus={}, dirs={})",
                    id,
                    address,
                    port,
                    cpu_count,
                    declared_dir_count
                );
                Ok(())
            }
        }
    }

    /// The self-registration flow: reuse the id of a known endpoint, otherwise mint a
    /// new id, register it, and persist the membership.
    pub async fn register_endpoint(
        &self,
        address: &str,
        port: u16,
        cpu_count: u32,
        declared_dir_count: u32,
    ) -> Result<RegisterOutcome> {
        let _guard = self.registration.lock().await;

        if let Some(existing) = self.find_by_endpoint(address, port, cpu_count) {
            tracing::warn!(
                "Worker {}:{} (cpus={}) already registered as {}",
                address,
                port,
                cpu_count,
                existing
            );
            return Ok(RegisterOutcome::AlreadyExists(existing));
        }

        let id = WorkerId::new();
        self.register(id.clone(), address, port, cpu_count, declared_dir_count)?;
        self.persist().await?;

        Ok(RegisterOutcome::Added(id))
    }

    pub fn find_by_endpoint(&self, address: &str, port: u16, cpu_count: u32) -> Option<WorkerId> {
        self.members
            .iter()
            .find(|entry| entry.value().matches_endpoint(address, port, cpu_count))
            .map(|entry| entry.key().clone())
    }

    pub fn get(&self, id: &WorkerId) -> Result<WorkerNode> {
        self.members
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinatorError::WorkerNotFound(id.clone()))
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.members.contains_key(id)
    }

    /// All workers in registration order.
    pub fn list(&self) -> Vec<WorkerNode> {
        let mut nodes: Vec<WorkerNode> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by_key(|node| node.seq);
        nodes
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Workers whose last probe succeeded.
    pub fn reachable_count(&self) -> usize {
        self.members
            .iter()
            .filter(|entry| entry.value().is_reachable())
            .count()
    }

    /// Probes one worker now and records the outcome on it.
    pub async fn probe(&self, id: &WorkerId) -> Result<u64> {
        let client = self.get(id)?.client();
        let result = client.probe().await;
        self.record_probe(id, &result);
        result.map_err(CoordinatorError::from)
    }

    pub async fn is_reachable(&self, id: &WorkerId) -> bool {
        self.probe(id).await.is_ok()
    }

    fn record_probe(&self, id: &WorkerId, result: &std::result::Result<u64, RemoteError>) {
        if let Some(mut node) = self.members.get_mut(id) {
            node.reachability = match result {
                Ok(latency_ms) => Reachability::Reachable {
                    latency_ms: *latency_ms,
                },
                Err(e) => {
                    tracing::debug!("Worker {} failed probe: {}", id, e);
                    Reachability::Unreachable
                }
            };
        }
    }

    /// Fetches the worker's own shard listing into `remote_dirs`.
    pub async fn refresh_listing(&self, id: &WorkerId) -> Result<Vec<String>> {
        let client = self.get(id)?.client();
        let dirs = client.list_directories().await?;

        if let Some(mut node) = self.members.get_mut(id) {
            node.remote_dirs = dirs.clone();
        }

        Ok(dirs)
    }

    /// Probes every worker and refreshes its queue depth.
    ///
    /// A failing worker is marked on its own entry; the sweep always covers the whole set.
    pub async fn refresh_all(&self) -> HealthSummary {
        let mut summary = HealthSummary::default();

        for node in self.list() {
            let client = node.client();

            let probe = client.probe().await;
            self.record_probe(&node.id, &probe);
            if probe.is_err() {
                summary.unreachable += 1;
                continue;
            }
            summary.reachable += 1;

            match client.queue_depth().await {
                Ok(depth) => {
                    if let Some(mut entry) = self.members.get_mut(&node.id) {
                        entry.queue_depth = depth;
                    }
                }
                Err(e) => {
                    summary.queue_query_failures += 1;
                    tracing::warn!("Failed to query queue depth of worker {}: {}", node.id, e);
                }
            }
        }

        tracing::debug!(
            "Health sweep: {} reachable, {} unreachable",
            summary.reachable,
            summary.unreachable
        );
        summary
    }

    /// Spawns the periodic health sweep.
    pub fn start_health_loop(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tracing::info!("Starting worker health sweep every {:?}", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let summary = self.refresh_all().await;
                if summary.unreachable > 0 {
                    tracing::warn!(
                        "{} of {} workers unreachable",
                        summary.unreachable,
                        summary.reachable + summary.unreachable
                    );
                }
            }
        })
    }

    /// Worker with the smallest last known queue depth. Ties go to the earliest registered.
    ///
    /// Uses cached state only; callers that need a live worker must probe it.
    pub fn pick_least_loaded(&self) -> Result<WorkerNode> {
        let mut best: Option<WorkerNode> = None;

        for node in self.list() {
            let better = match &best {
                Some(current) => node.queue_depth < current.queue_depth,
                None => true,
            };
            if better {
                best = Some(node);
            }
        }

        best.ok_or(CoordinatorError::RegistryEmpty)
    }

    /// Worker with the most declared CPUs. Ties go to the earliest registered.
    pub fn pick_highest_capacity(&self) -> Result<WorkerNode> {
        let mut best: Option<WorkerNode> = None;

        for node in self.list() {
            let better = match &best {
                Some(current) => node.cpu_count > current.cpu_count,
                None => true,
            };
            if better {
                best = Some(node);
            }
        }

        best.ok_or(CoordinatorError::RegistryEmpty)
    }

    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_write.lock().await;
        let records: Vec<WorkerRecord> = self.list().iter().map(WorkerNode::to_record).collect();
        self.store.save_workers(&records).await?;

        tracing::debug!("Persisted {} worker record(s)", records.len());
        Ok(())
    }

    /// Registers every stored worker that is not already known. Returns how many were added.
    pub async fn reload(&self) -> Result<usize> {
        let records = self.store.load_workers().await?;
        let mut added = 0;

        for record in records {
            if self.contains(&record.id) {
                tracing::debug!("Worker {} already loaded, skipping stored record", record.id);
                continue;
            }
            self.register(
                record.id.clone(),
                &record.address,
                record.port,
                record.cpu_count,
                record.dir_count,
            )?;
            added += 1;
        }

        tracing::info!("Loaded {} worker(s) from storage", added);
        Ok(added)
    }
}

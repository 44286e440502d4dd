//! Search Orchestrator
//!
//! Fans one "find this face" request out over every shard and tracks it until each shard
//! has a terminal outcome.
//!
//! ## Responsibilities
//! - **Submission**: uploads the probe photo to every registered worker and creates the
//!   task with every assigned shard pending.
//! - **Scheduling**: a periodic tick drains each active task's pending shards into
//!   sub-tasks on the owning workers, in priority order.
//! - **Completion**: worker callbacks move in-flight shards to matched or cleared;
//!   finished tasks move to the completed pool and are never touched again.
//!
//! ## Locking
//! The tick and the completion callback both take a task's `state` lock, so they never
//! interleave on the same task. The tick waits for a busy task instead of skipping it.

use super::types::*;
use crate::distribution::distributor::ShardDistributor;
use crate::error::{CoordinatorError, RemoteError, Result};
use crate::workers::client::WorkerApi;
use crate::workers::registry::WorkerRegistry;

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

/// File name used for the probe photo when the path has none.
const DEFAULT_PROBE_NAME: &str = "probe.jpg";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tick_interval: Duration,
    /// Deadline for sub-task creation, retries included.
    pub call_deadline: Duration,
    /// Deadline for each probe photo upload, retries included.
    pub upload_deadline: Duration,
    /// How long an in-flight shard may wait for its result. `None` waits forever.
    pub result_deadline: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            call_deadline: Duration::from_secs(10),
            upload_deadline: Duration::from_secs(60),
            result_deadline: Some(Duration::from_secs(3600)),
        }
    }
}

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub dispatched: usize,
    pub dispatch_errors: usize,
    pub completed: usize,
}

pub struct SearchOrchestrator {
    registry: Arc<WorkerRegistry>,
    distributor: Arc<ShardDistributor>,
    active: DashMap<SearchTaskId, Arc<SearchTask>>,
    completed: DashMap<SearchTaskId, Arc<SearchTask>>,
    next_seq: AtomicU64,
    settings: OrchestratorSettings,
}

impl SearchOrchestrator {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        distributor: Arc<ShardDistributor>,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            distributor,
            active: DashMap::new(),
            completed: DashMap::new(),
            next_seq: AtomicU64::new(0),
            settings,
        })
    }

    /// Starts a search for the face in the photo at `photo_path`.
    ///
    /// Probe uploads are best-effort: a worker that does not take the photo is left out
    /// of `uploaded_probe_ids` and its shards end up as `ProbeNotUploaded`.
    pub async fn submit(&self, photo_path: &str, priority: i64) -> Result<SearchTaskId> {
        if self.registry.is_empty() {
            return Err(CoordinatorError::NoWorkersRegistered);
        }

        let bytes = tokio::fs::read(photo_path).await?;
        let file_name = Path::new(photo_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_PROBE_NAME.to_string());

        let mut uploaded_probe_ids = HashMap::new();
        for worker in self.registry.list() {
            let upload = tokio::time::timeout(
                self.settings.upload_deadline,
                worker.client().upload_probe_photo(&file_name, bytes.clone()),
            )
            .await
            .unwrap_or(Err(RemoteError::Timeout));

            match upload {
                Ok(probe_id) => {
                    uploaded_probe_ids.insert(worker.id.clone(), probe_id);
                }
                Err(e) => {
                    tracing::warn!(
                        "Probe photo upload to worker {} ({}) failed: {}",
                        worker.id,
                        worker.endpoint(),
                        e
                    );
                }
            }
        }

        let directories = self.distributor.all_assigned_directories().await;
        let shard_count = directories.len();

        let task = Arc::new(SearchTask {
            id: SearchTaskId::new(),
            source_photo_path: photo_path.to_string(),
            uploaded_probe_ids,
            priority,
            created_at: SystemTime::now(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            state: Mutex::new(SearchTaskState::new(directories)),
        });
        let id = task.id.clone();

        tracing::info!(
            "Search {} submitted (priority {}): {} shard(s), probe on {} of {} worker(s)",
            id,
            priority,
            shard_count,
            task.uploaded_probe_ids.len(),
            self.registry.len()
        );
        self.active.insert(id.clone(), task);

        Ok(id)
    }

    /// One scheduler pass over every active task.
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let mut tasks: Vec<Arc<SearchTask>> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| (task.priority, task.seq));

        for task in tasks {
            let mut state = task.state.lock().await;
            if state.completed_at.is_some() {
                continue;
            }

            if !state.is_complete() {
                self.expire_stale(&task, &mut state);

                while let Some(directory) = state.pending.pop_front() {
                    if self.dispatch(&task, &mut state, directory).await {
                        summary.dispatched += 1;
                    } else {
                        summary.dispatch_errors += 1;
                    }
                }
            }

            if state.is_complete() {
                self.complete(&task, &mut state);
                summary.completed += 1;
            }
        }

        summary
    }

    /// Sends one shard to its owner. Returns false when it landed in `dispatch_errors`.
    async fn dispatch(
        &self,
        task: &SearchTask,
        state: &mut SearchTaskState,
        directory: String,
    ) -> bool {
        let Ok(owner) = self.distributor.resolve_owner(&directory).await else {
            tracing::warn!("Search {}: no owner for shard {}", task.id, directory);
            state.fail(directory, DispatchErrorKind::ShardOwnerUnknown);
            return false;
        };

        let Ok(worker) = self.registry.get(&owner) else {
            tracing::warn!("Search {}: owner {} of {} is not registered", task.id, owner, directory);
            state.fail(directory, DispatchErrorKind::WorkerNotFound);
            return false;
        };

        let Some(probe_id) = task.uploaded_probe_ids.get(&owner) else {
            tracing::warn!("Search {}: probe photo missing on worker {}", task.id, owner);
            state.fail(directory, DispatchErrorKind::ProbeNotUploaded);
            return false;
        };

        let created = tokio::time::timeout(
            self.settings.call_deadline,
            worker.client().create_sub_task(probe_id, &directory),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout));

        match created {
            Ok(remote_task_id) => {
                tracing::debug!(
                    "Search {}: shard {} running on {} as {}",
                    task.id,
                    directory,
                    owner,
                    remote_task_id
                );
                state.in_flight.push(InFlightShard {
                    remote_task_id,
                    directory,
                    worker_id: owner,
                    dispatched_at: std::time::Instant::now(),
                });
                true
            }
            Err(RemoteError::DirectoryEmpty) => {
                state.cleared_no_match.push(directory);
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Search {}: sub-task for {} on {} failed: {}",
                    task.id,
                    directory,
                    owner,
                    e
                );
                state.fail(directory, DispatchErrorKind::from(&e));
                false
            }
        }
    }

    fn expire_stale(&self, task: &SearchTask, state: &mut SearchTaskState) {
        let Some(deadline) = self.settings.result_deadline else {
            return;
        };

        let (expired, waiting): (Vec<InFlightShard>, Vec<InFlightShard>) = state
            .in_flight
            .drain(..)
            .partition(|shard| shard.dispatched_at.elapsed() >= deadline);
        state.in_flight = waiting;

        for shard in expired {
            tracing::warn!(
                "Search {}: no result for shard {} from {} within {:?}",
                task.id,
                shard.directory,
                shard.worker_id,
                deadline
            );
            state.fail(shard.directory, DispatchErrorKind::ResultTimeout);
        }
    }

    fn complete(&self, task: &SearchTask, state: &mut SearchTaskState) {
        state.completed_at = Some(SystemTime::now());

        if let Some((id, task_ref)) = self.active.remove(&task.id) {
            self.completed.insert(id, task_ref);
        }

        tracing::info!(
            "Search {} complete: {} matched, {} cleared, {} dispatch error(s)",
            task.id,
            state.matched.len(),
            state.cleared_no_match.len(),
            state.dispatch_errors.len()
        );
    }

    /// Folds a worker's completion notice into the task that dispatched it.
    ///
    /// Returns false when no active task knows `remote_task_id` (stale or duplicate notice).
    pub async fn report_result(
        &self,
        remote_task_id: &str,
        matched: bool,
        hint: Option<String>,
    ) -> bool {
        let tasks: Vec<Arc<SearchTask>> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for task in tasks {
            let mut state = task.state.lock().await;
            if state.completed_at.is_some() {
                continue;
            }

            let Some(position) = state
                .in_flight
                .iter()
                .position(|shard| shard.remote_task_id == remote_task_id)
            else {
                continue;
            };

            let shard = state.in_flight.remove(position);
            if matched {
                tracing::info!(
                    "Search {}: face found in shard {} on {}",
                    task.id,
                    shard.directory,
                    shard.worker_id
                );
                state.matched.push(ShardMatch {
                    directory: shard.directory,
                    hint,
                });
            } else {
                tracing::debug!("Search {}: shard {} cleared", task.id, shard.directory);
                state.cleared_no_match.push(shard.directory);
            }
            return true;
        }

        tracing::warn!("Ignoring result for unknown sub-task {}", remote_task_id);
        false
    }

    pub async fn status(&self, id: &SearchTaskId) -> Result<SearchTaskSnapshot> {
        let task = self
            .active
            .get(id)
            .or_else(|| self.completed.get(id))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoordinatorError::TaskNotFound(id.to_string()))?;

        Ok(task.snapshot().await)
    }

    /// Every known search, oldest first.
    pub async fn list_tasks(&self) -> Vec<SearchTaskSnapshot> {
        let mut tasks: Vec<Arc<SearchTask>> = self
            .active
            .iter()
            .chain(self.completed.iter())
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.seq);

        let mut snapshots = Vec::with_capacity(tasks.len());
        for task in tasks {
            snapshots.push(task.snapshot().await);
        }
        snapshots
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn is_active(&self, id: &SearchTaskId) -> bool {
        self.active.contains_key(id)
    }

    /// Spawns the scheduler loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tracing::info!(
            "Starting search scheduler every {:?}",
            self.settings.tick_interval
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let summary = self.tick().await;
                if summary.dispatched > 0 || summary.dispatch_errors > 0 {
                    tracing::debug!(
                        "Scheduler tick: {} dispatched, {} dispatch error(s), {} completed",
                        summary.dispatched,
                        summary.dispatch_errors,
                        summary.completed
                    );
                }
            }
        })
    }
}

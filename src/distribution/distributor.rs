//! Shard Distributor
//!
//! Owns the assignment table and the pool of unassigned local shards, and implements
//! every operation that moves shards between the local archive and the workers.
//!
//! ## Concurrency
//! Mutating operations are serialised by `operation`, so at most one distribution,
//! verification, or redistribution runs at a time, even across suspension points.
//! The table itself sits behind a separate `RwLock` that is held only for short,
//! non-suspending critical sections. Owner lookups from the search scheduler
//! therefore never wait for a long upload pass.
//!
//! ## Placement
//! A shard is either fully present on its owner or not assigned at all. When any file
//! of a shard fails to upload, the partial copy is removed from the worker and the
//! shard goes back to the unassigned pool for the next pass.

use super::table::AssignmentTable;
use super::types::*;
use crate::archive::LocalArchive;
use crate::error::{CoordinatorError, RemoteError, Result};
use crate::persistence::CoordinatorStore;
use crate::workers::client::WorkerApi;
use crate::workers::registry::WorkerRegistry;
use crate::workers::types::{WorkerId, WorkerNode};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Directories registered per write-lock acquisition while loading the archive.
const LOAD_BATCH: usize = 1000;

#[derive(Default)]
struct DistributorState {
    table: AssignmentTable,
    unassigned: UnassignedPool,
}

impl DistributorState {
    /// Records a shard placed on `worker_id`. When the table refuses it, the shard
    /// goes back to the pool unless another worker already owns it.
    fn record_placement(&mut self, worker_id: &WorkerId, directory: &str) -> Result<()> {
        if let Err(e) = self.table.assign(worker_id, directory) {
            if self.table.owner_of(directory).is_none() {
                self.unassigned.requeue(directory.to_string());
            }
            return Err(e);
        }
        debug_assert!(self.table.is_consistent());
        Ok(())
    }
}

/// Why a shard could not be placed on a worker.
struct PlacementFailure {
    uploaded: usize,
    failed_files: usize,
    reason: String,
}

pub struct ShardDistributor {
    operation: Mutex<()>,
    state: RwLock<DistributorState>,
    registry: Arc<WorkerRegistry>,
    archive: Arc<dyn LocalArchive>,
    store: Arc<dyn CoordinatorStore>,
    /// Pause after each destructive redistribution step.
    settle_delay: Duration,
}

impl ShardDistributor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        archive: Arc<dyn LocalArchive>,
        store: Arc<dyn CoordinatorStore>,
        settle_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            operation: Mutex::new(()),
            state: RwLock::new(DistributorState::default()),
            registry,
            archive,
            store,
            settle_delay,
        })
    }

    // --- Queries ---

    pub async fn assigned_count(&self) -> usize {
        self.state.read().await.table.assigned_count()
    }

    pub async fn unassigned_count(&self) -> usize {
        self.state.read().await.unassigned.len()
    }

    pub async fn stats(&self) -> DistributionStats {
        let state = self.state.read().await;
        DistributionStats {
            assigned: state.table.assigned_count(),
            unassigned: state.unassigned.len(),
            workers_with_assignments: state.table.workers_with_assignments(),
        }
    }

    pub async fn resolve_owner(&self, directory: &str) -> Result<WorkerId> {
        self.state
            .read()
            .await
            .table
            .owner_of(directory)
            .cloned()
            .ok_or_else(|| CoordinatorError::ShardOwnerUnknown(directory.to_string()))
    }

    /// The full known shard set.
    pub async fn all_assigned_directories(&self) -> Vec<String> {
        self.state.read().await.table.all_directories()
    }

    pub async fn directories_of(&self, worker_id: &WorkerId) -> Vec<String> {
        self.state.read().await.table.directories_of(worker_id)
    }

    pub async fn unassigned_directories(&self) -> Vec<String> {
        self.state.read().await.unassigned.to_vec()
    }

    pub async fn records(&self) -> Vec<AssignmentRecord> {
        self.state.read().await.table.to_records()
    }

    // --- Persistence ---

    /// Replaces the table with the stored one. Pooled shards that the stored table
    /// assigns leave the pool.
    pub async fn load_assignments(&self) -> Result<usize> {
        let _guard = self.operation.lock().await;

        let table = AssignmentTable::from_records(self.store.load_assignments().await?);
        let assigned = table.assigned_count();

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.unassigned.retain(|dir| table.owner_of(dir).is_none());
        tracing::info!(
            "Loaded assignments for {} worker(s), {} shard(s) placed remotely",
            table.worker_count(),
            assigned
        );
        state.table = table;

        Ok(assigned)
    }

    pub async fn save_assignments(&self) -> Result<()> {
        let records = self.state.read().await.table.to_records();
        self.store.save_assignments(&records).await?;
        Ok(())
    }

    /// Forgets every assignment and persists the empty table.
    pub async fn clear_assignments(&self) -> Result<()> {
        let _guard = self.operation.lock().await;
        self.state.write().await.table.clear();
        tracing::warn!("Assignment table cleared");
        self.save_assignments().await
    }

    // --- Local bookkeeping ---

    /// Adds every local shard that is neither pooled nor assigned to the pool.
    /// Idempotent. Returns the number of shards added.
    pub async fn load_local_directories(&self) -> Result<usize> {
        let _guard = self.operation.lock().await;
        self.load_local_directories_locked().await
    }

    async fn load_local_directories_locked(&self) -> Result<usize> {
        let directories = self.archive.list_directories().await?;
        let mut added = 0;

        for batch in directories.chunks(LOAD_BATCH) {
            {
                let mut guard = self.state.write().await;
                let state = &mut *guard;
                for directory in batch {
                    if state.table.owner_of(directory).is_none()
                        && state.unassigned.push(directory.clone())
                    {
                        added += 1;
                    }
                }
            }
            // Large archives: let the scheduler and callbacks in between batches.
            tokio::task::yield_now().await;
        }

        let assigned = self.assigned_count().await;
        tracing::info!(
            "Loaded {} new local director{} ({} known locally){}",
            added,
            if added == 1 { "y" } else { "ies" },
            directories.len(),
            if assigned > 0 {
                ", verify against the assignment table is recommended"
            } else {
                ""
            }
        );

        Ok(added)
    }

    /// Drops pooled shards that the cached table already assigns. Never contacts workers.
    /// Returns the number of shards still unassigned.
    pub async fn verify_assignment_consistency(&self) -> usize {
        let _guard = self.operation.lock().await;
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if state.table.worker_count() == 0 {
            tracing::warn!("Assignment table is empty, skipping consistency check");
            return state.unassigned.len();
        }

        let before = state.unassigned.len();
        let table = &state.table;
        state.unassigned.retain(|dir| table.owner_of(dir).is_none());

        tracing::info!(
            "Consistency check done: {} already assigned, {} still unassigned",
            before - state.unassigned.len(),
            state.unassigned.len()
        );
        state.unassigned.len()
    }

    /// Gives every registered worker (or only the reachable ones) an entry in the table.
    /// Returns the number of workers the table knows.
    pub async fn sync_workers(&self, only_reachable: bool) -> usize {
        let _guard = self.operation.lock().await;

        let mut candidates = Vec::new();
        for node in self.registry.list() {
            if only_reachable && !self.registry.is_reachable(&node.id).await {
                continue;
            }
            candidates.push(node.id);
        }

        let mut state = self.state.write().await;
        for id in &candidates {
            state.table.ensure_worker(id);
        }
        state.table.worker_count()
    }

    // --- Distribution ---

    /// Spreads the unassigned pool over the registered workers.
    ///
    /// Each worker takes at most `ceil(unassigned / registered)` shards; unreachable
    /// workers are skipped and their share stays in the pool.
    pub async fn auto_distribute(&self) -> Result<DistributionReport> {
        let _guard = self.operation.lock().await;
        self.distribute_locked(&HashSet::new()).await
    }

    async fn distribute_locked(&self, excluded: &HashSet<WorkerId>) -> Result<DistributionReport> {
        let mut report = DistributionReport::default();

        let pending = self.unassigned_count().await;
        if pending == 0 {
            tracing::warn!("Distribution stopped, no directories to distribute");
            report.nothing_to_distribute = true;
            return Ok(report);
        }

        let workers: Vec<WorkerNode> = self
            .registry
            .list()
            .into_iter()
            .filter(|node| !excluded.contains(&node.id))
            .collect();
        if workers.is_empty() {
            return Err(CoordinatorError::RegistryEmpty);
        }

        let share = pending.div_ceil(workers.len());
        tracing::info!(
            "Distributing {} directories over {} worker(s), {} per worker",
            pending,
            workers.len(),
            share
        );

        for worker in &workers {
            if let Err(e) = self.registry.probe(&worker.id).await {
                tracing::warn!(
                    "Worker {} ({}) unavailable for distribution: {}",
                    worker.id,
                    worker.endpoint(),
                    e
                );
                report.skipped_workers.push(worker.id.clone());
                continue;
            }

            let mut placed = 0;
            let mut failed = 0;

            for _ in 0..share {
                let Some(directory) = self.state.write().await.unassigned.pop() else {
                    break;
                };

                match self.place_directory(worker, &directory).await {
                    Ok(uploaded) => {
                        report.files_uploaded += uploaded;
                        let recorded = self
                            .state
                            .write()
                            .await
                            .record_placement(&worker.id, &directory);
                        match recorded {
                            Ok(()) => {
                                placed += 1;
                                report.directories_distributed += 1;
                            }
                            Err(e) => {
                                tracing::error!("Placed {} but could not record it: {}", directory, e);
                                self.roll_back(worker, &directory).await;
                                failed += 1;
                                report.failed_directories.push(directory);
                            }
                        }
                    }
                    Err(failure) => {
                        report.files_uploaded += failure.uploaded;
                        report.upload_failures += failure.failed_files;
                        failed += 1;

                        tracing::warn!(
                            "Failed to place {} on worker {}: {}",
                            directory,
                            worker.id,
                            failure.reason
                        );
                        self.roll_back(worker, &directory).await;
                        self.state.write().await.unassigned.requeue(directory.clone());
                        report.failed_directories.push(directory);
                    }
                }
            }

            tracing::info!(
                "Worker {} ({}): {} director{} placed, {} failed",
                worker.id,
                worker.endpoint(),
                placed,
                if placed == 1 { "y" } else { "ies" },
                failed
            );
        }

        report.remaining_unassigned = self.unassigned_count().await;
        self.save_assignments().await?;

        tracing::info!(
            "Distribution finished: {} directories, {} files uploaded, {} upload failures, {} still unassigned",
            report.directories_distributed,
            report.files_uploaded,
            report.upload_failures,
            report.remaining_unassigned
        );

        Ok(report)
    }

    /// Uploads every file of a shard, or creates it empty. Returns the number of files sent.
    async fn place_directory(
        &self,
        worker: &WorkerNode,
        directory: &str,
    ) -> std::result::Result<usize, PlacementFailure> {
        let client = worker.client();

        let files = self
            .archive
            .list_files(directory)
            .await
            .map_err(|e| PlacementFailure {
                uploaded: 0,
                failed_files: 0,
                reason: format!("local listing failed: {}", e),
            })?;

        if files.is_empty() {
            client
                .create_directory(directory)
                .await
                .map_err(|e| PlacementFailure {
                    uploaded: 0,
                    failed_files: 0,
                    reason: format!("create directory failed: {}", e),
                })?;
            return Ok(0);
        }

        let mut uploaded = 0;
        for file_name in &files {
            let sent = match self.archive.read_file(directory, file_name).await {
                Ok(bytes) => client
                    .upload_archive_file(directory, file_name, bytes)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(format!("local read failed: {}", e)),
            };

            if let Err(reason) = sent {
                return Err(PlacementFailure {
                    uploaded,
                    failed_files: 1,
                    reason: format!("{}: {}", file_name, reason),
                });
            }
            uploaded += 1;
        }

        Ok(uploaded)
    }

    async fn roll_back(&self, worker: &WorkerNode, directory: &str) {
        if let Err(e) = worker.client().remove_directory(Some(directory)).await {
            tracing::warn!(
                "Could not remove partial copy of {} from worker {}: {}",
                directory,
                worker.id,
                e
            );
        }
    }

    // --- Integrity ---

    /// Checks every assigned shard against its owner.
    ///
    /// Without `full_check` only the presence of each directory is verified; with it,
    /// every local file's CRC-32 is compared with the worker's copy. With `repair`,
    /// missing shards are re-uploaded in full and bad files are re-uploaded individually.
    pub async fn verify_network_integrity(
        &self,
        repair: bool,
        full_check: bool,
    ) -> Result<IntegrityReport> {
        let _guard = self.operation.lock().await;
        let mut report = IntegrityReport::default();

        let snapshot: Vec<(WorkerId, Vec<String>)> = {
            let state = self.state.read().await;
            state
                .table
                .worker_ids()
                .into_iter()
                .map(|id| {
                    let dirs = state.table.directories_of(&id);
                    (id, dirs)
                })
                .filter(|(_, dirs)| !dirs.is_empty())
                .collect()
        };

        if snapshot.is_empty() {
            tracing::warn!("Integrity check skipped, no worker owns any shard");
            return Ok(report);
        }

        tracing::info!(
            "Checking network integrity of {} worker(s){}{}",
            snapshot.len(),
            if full_check { ", comparing checksums" } else { "" },
            if repair { ", repairing errors" } else { "" }
        );

        for (worker_id, directories) in snapshot {
            let worker = match self.registry.get(&worker_id) {
                Ok(worker) => worker,
                Err(e) => {
                    tracing::warn!("Integrity check of {} skipped: {}", worker_id, e);
                    report.skipped_workers.push(worker_id);
                    continue;
                }
            };

            if let Err(e) = self.registry.probe(&worker_id).await {
                tracing::warn!(
                    "Integrity of worker {} ({}) not checked: {}",
                    worker_id,
                    worker.endpoint(),
                    e
                );
                report.skipped_workers.push(worker_id);
                continue;
            }

            report.checked_workers.push(worker_id.clone());
            let bad = self
                .check_worker(&worker, &directories, full_check, &mut report.unchecked)
                .await;
            if !bad.is_empty() {
                tracing::warn!("Worker {}: {} integrity error(s)", worker_id, bad.len());
                report.bad_dirs.insert(worker_id, bad);
            }
        }

        if report.is_clean() {
            tracing::info!("Integrity check found no errors");
            return Ok(report);
        }

        if !report.unchecked.is_empty() {
            tracing::warn!(
                "{} shard(s) could not be checked, run the integrity check again",
                report.unchecked.len()
            );
        }
        if !report.bad_dirs.is_empty() {
            if repair {
                report.repair = Some(self.repair(&report.bad_dirs).await);
            } else {
                tracing::warn!(
                    "Integrity check found {} bad director{}, repair disabled",
                    report.bad_dir_count(),
                    if report.bad_dir_count() == 1 { "y" } else { "ies" }
                );
            }
        }

        Ok(report)
    }

    async fn check_worker(
        &self,
        worker: &WorkerNode,
        directories: &[String],
        full_check: bool,
        unchecked: &mut Vec<UncheckedShard>,
    ) -> Vec<BadDirsReport> {
        let client = worker.client();
        let mut bad = Vec::new();

        for directory in directories {
            match client.directory_exists(directory).await {
                Err(RemoteError::NotFound) => bad.push(BadDirsReport::missing(directory)),
                Err(e) => {
                    tracing::warn!(
                        "Could not check {} on worker {}: {}",
                        directory,
                        worker.id,
                        e
                    );
                    unchecked.push(UncheckedShard {
                        worker_id: worker.id.clone(),
                        directory: directory.clone(),
                        reason: e.to_string(),
                    });
                }
                Ok(_) if full_check => {
                    let mut problems = Vec::new();
                    let bad_files = self.check_files(&client, directory, &mut problems).await;
                    if !bad_files.is_empty() {
                        bad.push(BadDirsReport::with_bad_files(directory, bad_files));
                    }
                    if !problems.is_empty() {
                        unchecked.push(UncheckedShard {
                            worker_id: worker.id.clone(),
                            directory: directory.clone(),
                            reason: problems.join("; "),
                        });
                    }
                }
                Ok(_) => {}
            }
        }

        bad
    }

    /// Returns the files that are absent remotely or differ from the local copy.
    /// Files that could not be compared land in `problems`.
    async fn check_files(
        &self,
        client: &Arc<dyn WorkerApi>,
        directory: &str,
        problems: &mut Vec<String>,
    ) -> Vec<String> {
        let files = match self.archive.list_files(directory).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Cannot list local shard {}: {}", directory, e);
                problems.push(format!("local listing failed: {}", e));
                return Vec::new();
            }
        };

        let mut bad_files = Vec::new();
        for file_name in files {
            match client.file_checksum(directory, &file_name).await {
                Ok(remote) => match self.archive.checksum(directory, &file_name).await {
                    Ok(local) if local == remote => {}
                    Ok(local) => {
                        tracing::warn!(
                            "Checksum mismatch for {}/{}: local {:08x}, remote {:08x}",
                            directory,
                            file_name,
                            local,
                            remote
                        );
                        bad_files.push(file_name);
                    }
                    Err(e) => {
                        tracing::warn!("Cannot checksum local {}/{}: {}", directory, file_name, e);
                        problems.push(format!("{}: local checksum failed: {}", file_name, e));
                    }
                },
                Err(RemoteError::NotFound) => bad_files.push(file_name),
                Err(e) => {
                    tracing::error!(
                        "Unexpected error checking {}/{} remotely: {}",
                        directory,
                        file_name,
                        e
                    );
                    problems.push(format!("{}: {}", file_name, e));
                }
            }
        }

        bad_files
    }

    async fn repair(&self, bad_dirs: &BTreeMap<WorkerId, Vec<BadDirsReport>>) -> RepairSummary {
        let mut summary = RepairSummary::default();

        for (worker_id, reports) in bad_dirs {
            let Ok(worker) = self.registry.get(worker_id) else {
                continue;
            };
            if self.registry.probe(worker_id).await.is_err() {
                tracing::warn!("Worker {} went away before repair", worker_id);
                continue;
            }

            let client = worker.client();
            for report in reports {
                if !self.archive.directory_exists(&report.directory).await {
                    summary.missing_locally.push(report.directory.clone());
                    continue;
                }

                let files = if report.missing {
                    match self.archive.list_files(&report.directory).await {
                        Ok(files) => files,
                        Err(e) => {
                            tracing::warn!("Cannot list local shard {}: {}", report.directory, e);
                            summary.upload_errors += 1;
                            continue;
                        }
                    }
                } else {
                    report.bad_files.clone()
                };

                if files.is_empty() {
                    match client.create_directory(&report.directory).await {
                        Ok(()) => summary.directories_created += 1,
                        Err(e) => {
                            tracing::warn!("Cannot recreate {} on {}: {}", report.directory, worker_id, e);
                            summary.upload_errors += 1;
                        }
                    }
                    continue;
                }

                for file_name in files {
                    let sent = match self.archive.read_file(&report.directory, &file_name).await {
                        Ok(bytes) => client
                            .upload_archive_file(&report.directory, &file_name, bytes)
                            .await
                            .map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };

                    match sent {
                        Ok(()) => summary.files_uploaded += 1,
                        Err(reason) => {
                            tracing::warn!(
                                "Repair upload of {}/{} to {} failed: {}",
                                report.directory,
                                file_name,
                                worker_id,
                                reason
                            );
                            summary.upload_errors += 1;
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Repair finished: {} files uploaded, {} upload errors, {} directories created, {} missing locally",
            summary.files_uploaded,
            summary.upload_errors,
            summary.directories_created,
            summary.missing_locally.len()
        );
        if !summary.is_clean() {
            tracing::warn!("Re-run directory loading and an integrity check");
        }
        if !summary.missing_locally.is_empty() {
            tracing::warn!("Some reported shards are gone from the local archive, check its storage");
        }

        summary
    }

    // --- Redistribution ---

    /// Wipes every reachable worker and places the whole archive again.
    ///
    /// Each wipe is awaited until the worker acknowledges it. Workers that do not
    /// acknowledge are left out of the new placement so that stale copies on them can
    /// never duplicate a shard.
    pub async fn run_full_redistribution(&self) -> Result<RedistributionReport> {
        let _guard = self.operation.lock().await;
        let mut report = RedistributionReport::default();

        for worker in self.registry.list() {
            if self.registry.probe(&worker.id).await.is_err() {
                tracing::warn!("Worker {} unreachable, not wiped", worker.id);
                report.unreachable_workers.push(worker.id);
                continue;
            }

            tracing::warn!("Wiping worker {} ({})", worker.id, worker.endpoint());
            match worker.client().remove_directory(None).await {
                Ok(()) => report.cleared_workers.push(worker.id.clone()),
                Err(e) => {
                    tracing::error!("Worker {} did not acknowledge wipe: {}", worker.id, e);
                    report.failed_clears.push(worker.id.clone());
                }
            }
            self.settle().await;
        }

        {
            let mut state = self.state.write().await;
            state.table.clear();
            state.unassigned.clear();
            for id in &report.cleared_workers {
                state.table.ensure_worker(id);
            }
        }
        self.save_assignments().await?;
        tracing::info!(
            "Assignment table reset, {} worker(s) available for redistribution",
            report.cleared_workers.len()
        );
        self.settle().await;

        self.load_local_directories_locked().await?;

        if report.cleared_workers.is_empty() {
            tracing::warn!("No worker available, everything stays unassigned");
            report.distribution.remaining_unassigned = self.unassigned_count().await;
            return Ok(report);
        }

        let excluded: HashSet<WorkerId> = report
            .unreachable_workers
            .iter()
            .chain(report.failed_clears.iter())
            .cloned()
            .collect();
        report.distribution = self.distribute_locked(&excluded).await?;

        Ok(report)
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

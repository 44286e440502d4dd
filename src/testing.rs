//! In-memory workers and archive for unit tests.

use crate::archive::LocalArchive;
use crate::error::RemoteError;
use crate::persistence::{CoordinatorStore, InMemoryStore};
use crate::workers::client::{WorkerApi, WorkerConnector};
use crate::workers::registry::WorkerRegistry;
use crate::workers::types::WorkerId;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Files = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct FakeState {
    unreachable: bool,
    queue_depth: u64,
    dirs: BTreeMap<String, Files>,
    failing_files: HashSet<String>,
    checksum_overrides: HashMap<(String, String), u32>,
    checksum_errors: HashMap<(String, String), RemoteError>,
    existence_errors: HashMap<String, RemoteError>,
    sub_task_errors: HashMap<String, RemoteError>,
    probe_photo_error: Option<RemoteError>,
    probe_photo_delay: Option<Duration>,
    wipe_error: Option<RemoteError>,
    sub_task_delay: Option<Duration>,
    next_task: u64,
    created_tasks: Vec<(String, String, String)>,
    uploads: usize,
    removals: Vec<Option<String>>,
}

/// A worker that keeps its shards in memory and records what it was asked to do.
#[derive(Default)]
pub struct FakeWorker {
    state: Mutex<FakeState>,
}

impl FakeWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn check_up(&self) -> Result<(), RemoteError> {
        if self.state().unreachable {
            return Err(RemoteError::Unreachable("fake worker down".to_string()));
        }
        Ok(())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().unreachable = !reachable;
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.state().queue_depth = depth;
    }

    pub fn put_file(&self, directory: &str, file_name: &str, bytes: &[u8]) {
        self.state()
            .dirs
            .entry(directory.to_string())
            .or_default()
            .insert(file_name.to_string(), bytes.to_vec());
    }

    pub fn put_empty_dir(&self, directory: &str) {
        self.state().dirs.entry(directory.to_string()).or_default();
    }

    pub fn drop_dir(&self, directory: &str) {
        self.state().dirs.remove(directory);
    }

    /// Every upload of a file with this name fails.
    pub fn fail_uploads_of(&self, file_name: &str) {
        self.state().failing_files.insert(file_name.to_string());
    }

    pub fn override_checksum(&self, directory: &str, file_name: &str, checksum: u32) {
        self.state()
            .checksum_overrides
            .insert((directory.to_string(), file_name.to_string()), checksum);
    }

    /// Checksum queries for this file fail with `error`.
    pub fn fail_checksum_of(&self, directory: &str, file_name: &str, error: RemoteError) {
        self.state()
            .checksum_errors
            .insert((directory.to_string(), file_name.to_string()), error);
    }

    /// Existence checks for this directory fail with `error`.
    pub fn fail_existence_check(&self, directory: &str, error: RemoteError) {
        self.state()
            .existence_errors
            .insert(directory.to_string(), error);
    }

    pub fn fail_sub_task(&self, directory: &str, error: RemoteError) {
        self.state()
            .sub_task_errors
            .insert(directory.to_string(), error);
    }

    pub fn fail_probe_upload(&self, error: RemoteError) {
        self.state().probe_photo_error = Some(error);
    }

    pub fn delay_probe_upload(&self, delay: Duration) {
        self.state().probe_photo_delay = Some(delay);
    }

    pub fn fail_wipe(&self, error: RemoteError) {
        self.state().wipe_error = Some(error);
    }

    pub fn delay_sub_tasks(&self, delay: Duration) {
        self.state().sub_task_delay = Some(delay);
    }

    pub fn dir_names(&self) -> Vec<String> {
        self.state().dirs.keys().cloned().collect()
    }

    pub fn has_dir(&self, directory: &str) -> bool {
        self.state().dirs.contains_key(directory)
    }

    pub fn files_of(&self, directory: &str) -> Vec<String> {
        self.state()
            .dirs
            .get(directory)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// `(probe_id, directory, task_id)` for every sub-task started.
    pub fn created_tasks(&self) -> Vec<(String, String, String)> {
        self.state().created_tasks.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.state().uploads
    }

    pub fn removals(&self) -> Vec<Option<String>> {
        self.state().removals.clone()
    }
}

#[async_trait]
impl WorkerApi for FakeWorker {
    async fn probe(&self) -> Result<u64, RemoteError> {
        self.check_up()?;
        Ok(1)
    }

    async fn queue_depth(&self) -> Result<u64, RemoteError> {
        self.check_up()?;
        Ok(self.state().queue_depth)
    }

    async fn upload_probe_photo(
        &self,
        file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<String, RemoteError> {
        self.check_up()?;
        let delay = self.state().probe_photo_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.state().probe_photo_error.clone() {
            return Err(error);
        }
        Ok(format!("probe-{}", file_name))
    }

    async fn create_sub_task(
        &self,
        probe_id: &str,
        directory: &str,
    ) -> Result<String, RemoteError> {
        self.check_up()?;
        let delay = self.state().sub_task_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(error) = state.sub_task_errors.get(directory) {
            return Err(error.clone());
        }
        match state.dirs.get(directory) {
            None => return Err(RemoteError::NotFound),
            Some(files) if files.is_empty() => return Err(RemoteError::DirectoryEmpty),
            Some(_) => {}
        }

        state.next_task += 1;
        let task_id = format!("task-{}", state.next_task);
        state.created_tasks.push((
            probe_id.to_string(),
            directory.to_string(),
            task_id.clone(),
        ));
        Ok(task_id)
    }

    async fn directory_exists(&self, directory: &str) -> Result<u64, RemoteError> {
        self.check_up()?;
        let state = self.state();
        if let Some(error) = state.existence_errors.get(directory) {
            return Err(error.clone());
        }
        state
            .dirs
            .get(directory)
            .map(|files| files.len() as u64)
            .ok_or(RemoteError::NotFound)
    }

    async fn file_checksum(&self, directory: &str, file_name: &str) -> Result<u32, RemoteError> {
        self.check_up()?;
        let state = self.state();
        let key = (directory.to_string(), file_name.to_string());
        if let Some(error) = state.checksum_errors.get(&key) {
            return Err(error.clone());
        }
        if let Some(checksum) = state.checksum_overrides.get(&key) {
            return Ok(*checksum);
        }
        state
            .dirs
            .get(directory)
            .and_then(|files| files.get(file_name))
            .map(|bytes| crc32fast::hash(bytes))
            .ok_or(RemoteError::NotFound)
    }

    async fn create_directory(&self, directory: &str) -> Result<(), RemoteError> {
        self.check_up()?;
        self.put_empty_dir(directory);
        Ok(())
    }

    async fn remove_directory(&self, directory: Option<&str>) -> Result<(), RemoteError> {
        self.check_up()?;
        let mut state = self.state();
        state.removals.push(directory.map(str::to_string));
        match directory {
            Some(directory) => {
                state.dirs.remove(directory);
            }
            None => {
                if let Some(error) = state.wipe_error.clone() {
                    return Err(error);
                }
                state.dirs.clear();
            }
        }
        Ok(())
    }

    async fn upload_archive_file(
        &self,
        directory: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError> {
        self.check_up()?;
        let mut state = self.state();
        if state.failing_files.contains(file_name) {
            return Err(RemoteError::Rejected {
                status: 500,
                message: "disk full".to_string(),
            });
        }
        state.uploads += 1;
        state
            .dirs
            .entry(directory.to_string())
            .or_default()
            .insert(file_name.to_string(), bytes);
        Ok(())
    }

    async fn list_directories(&self) -> Result<Vec<String>, RemoteError> {
        self.check_up()?;
        Ok(self.dir_names())
    }
}

/// Hands out one `FakeWorker` per endpoint, creating it on first use.
#[derive(Default)]
pub struct FakeConnector {
    workers: Mutex<HashMap<String, Arc<FakeWorker>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn worker(&self, address: &str, port: u16) -> Arc<FakeWorker> {
        self.workers
            .lock()
            .unwrap()
            .entry(format!("{}:{}", address, port))
            .or_insert_with(FakeWorker::new)
            .clone()
    }
}

impl WorkerConnector for FakeConnector {
    fn connect(&self, address: &str, port: u16) -> Arc<dyn WorkerApi> {
        self.worker(address, port)
    }
}

/// Local archive kept in memory.
#[derive(Default)]
pub struct MemArchive {
    dirs: Mutex<BTreeMap<String, Files>>,
}

impl MemArchive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_file(&self, directory: &str, file_name: &str, bytes: &[u8]) {
        self.dirs
            .lock()
            .unwrap()
            .entry(directory.to_string())
            .or_default()
            .insert(file_name.to_string(), bytes.to_vec());
    }

    pub fn put_empty_dir(&self, directory: &str) {
        self.dirs
            .lock()
            .unwrap()
            .entry(directory.to_string())
            .or_default();
    }

    pub fn remove_dir(&self, directory: &str) {
        self.dirs.lock().unwrap().remove(directory);
    }
}

#[async_trait]
impl LocalArchive for MemArchive {
    async fn list_directories(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.dirs.lock().unwrap().keys().cloned().collect())
    }

    async fn list_files(&self, directory: &str) -> anyhow::Result<Vec<String>> {
        self.dirs
            .lock()
            .unwrap()
            .get(directory)
            .map(|files| files.keys().cloned().collect())
            .ok_or_else(|| anyhow::anyhow!("no local directory {}", directory))
    }

    async fn directory_exists(&self, directory: &str) -> bool {
        self.dirs.lock().unwrap().contains_key(directory)
    }

    async fn read_file(&self, directory: &str, file_name: &str) -> anyhow::Result<Vec<u8>> {
        self.dirs
            .lock()
            .unwrap()
            .get(directory)
            .and_then(|files| files.get(file_name))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no local file {}/{}", directory, file_name))
    }
}

/// A registry over fake workers with an in-memory store.
pub struct TestCluster {
    pub connector: Arc<FakeConnector>,
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<WorkerRegistry>,
    pub archive: Arc<MemArchive>,
}

impl TestCluster {
    pub fn new() -> Self {
        let connector = FakeConnector::new();
        let store = Arc::new(InMemoryStore::new());
        let registry = WorkerRegistry::new(
            connector.clone() as Arc<dyn WorkerConnector>,
            store.clone() as Arc<dyn CoordinatorStore>,
        );

        Self {
            connector,
            store,
            registry,
            archive: MemArchive::new(),
        }
    }

    /// Registers a worker under `id` and returns its fake.
    pub fn add_worker(&self, id: &str, cpu_count: u32) -> Arc<FakeWorker> {
        let port = 9000 + self.registry.len() as u16;
        let fake = self.connector.worker("10.0.0.1", port);
        self.registry
            .register(WorkerId::from(id), "10.0.0.1", port, cpu_count, 0)
            .unwrap();
        fake
    }
}

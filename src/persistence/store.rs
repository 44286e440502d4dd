use crate::distribution::types::AssignmentRecord;
use crate::workers::types::WorkerRecord;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait CoordinatorStore: Send + Sync {
    async fn load_assignments(&self) -> Result<Vec<AssignmentRecord>>;
    async fn save_assignments(&self, records: &[AssignmentRecord]) -> Result<()>;
    async fn load_workers(&self) -> Result<Vec<WorkerRecord>>;
    async fn save_workers(&self, records: &[WorkerRecord]) -> Result<()>;
}

/// Stores each table as a JSON array in its own file.
///
/// A missing or empty file loads as an empty table. Array elements that do not match
/// the record shape are skipped with a warning instead of failing the whole load.
pub struct JsonFileStore {
    assignments_path: PathBuf,
    workers_path: PathBuf,
    /// One writer per file; concurrent saves land one after another.
    assignments_write: Mutex<()>,
    workers_write: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(assignments_path: impl Into<PathBuf>, workers_path: impl Into<PathBuf>) -> Self {
        Self {
            assignments_path: assignments_path.into(),
            workers_path: workers_path.into(),
            assignments_write: Mutex::new(()),
            workers_write: Mutex::new(()),
        }
    }

    async fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Store file {} does not exist yet", path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON array", path.display()))?;

        let total = values.len();
        let records: Vec<T> = values
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();

        if records.len() != total {
            tracing::warn!(
                "Skipped {} malformed record(s) in {}",
                total - records.len(),
                path.display()
            );
        }

        Ok(records)
    }

    async fn save_records<T: serde::Serialize>(
        path: &Path,
        lock: &Mutex<()>,
        records: &[T],
    ) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(records)?;
        let _guard = lock.lock().await;

        // Write-then-rename so a crash never leaves a truncated table behind.
        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp_path, encoded)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e).with_context(|| format!("failed to replace {}", path.display()));
        }

        tracing::debug!("Saved {} record(s) to {}", records.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl CoordinatorStore for JsonFileStore {
    async fn load_assignments(&self) -> Result<Vec<AssignmentRecord>> {
        Self::load_records(&self.assignments_path).await
    }

    async fn save_assignments(&self, records: &[AssignmentRecord]) -> Result<()> {
        Self::save_records(&self.assignments_path, &self.assignments_write, records).await
    }

    async fn load_workers(&self) -> Result<Vec<WorkerRecord>> {
        Self::load_records(&self.workers_path).await
    }

    async fn save_workers(&self, records: &[WorkerRecord]) -> Result<()> {
        Self::save_records(&self.workers_path, &self.workers_write, records).await
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    assignments: Mutex<Vec<AssignmentRecord>>,
    workers: Mutex<Vec<WorkerRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinatorStore for InMemoryStore {
    async fn load_assignments(&self) -> Result<Vec<AssignmentRecord>> {
        Ok(self.assignments.lock().await.clone())
    }

    async fn save_assignments(&self, records: &[AssignmentRecord]) -> Result<()> {
        *self.assignments.lock().await = records.to_vec();
        Ok(())
    }

    async fn load_workers(&self) -> Result<Vec<WorkerRecord>> {
        Ok(self.workers.lock().await.clone())
    }

    async fn save_workers(&self, records: &[WorkerRecord]) -> Result<()> {
        *self.workers.lock().await = records.to_vec();
        Ok(())
    }
}

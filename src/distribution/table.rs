//! Assignment Table
//!
//! Which worker owns which shard. A shard is owned by at most one worker at any time;
//! `assign` refuses to hand an owned shard to a second worker.
//!
//! Alongside the forward map (worker -> shards) the table keeps a reverse index
//! (shard -> worker) updated in the same call as every forward write, so owner
//! lookups never scan.

use super::types::AssignmentRecord;
use crate::error::{CoordinatorError, Result};
use crate::workers::types::WorkerId;

use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default, Clone)]
pub struct AssignmentTable {
    owned: BTreeMap<WorkerId, BTreeSet<String>>,
    owners: HashMap<String, WorkerId>,
}

impl AssignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from persisted records.
    ///
    /// A shard listed under several workers keeps its first owner; the later claims
    /// are dropped with a warning.
    pub fn from_records(records: Vec<AssignmentRecord>) -> Self {
        let mut table = Self::new();

        for record in records {
            table.ensure_worker(&record.worker_id);
            for directory in record.directories {
                if let Err(e) = table.assign(&record.worker_id, &directory) {
                    tracing::warn!("Dropping conflicting stored assignment: {}", e);
                }
            }
        }

        table
    }

    pub fn to_records(&self) -> Vec<AssignmentRecord> {
        self.owned
            .iter()
            .map(|(worker_id, directories)| AssignmentRecord {
                worker_id: worker_id.clone(),
                directories: directories.iter().cloned().collect(),
            })
            .collect()
    }

    /// Makes sure the worker has an entry, even if it owns nothing yet.
    pub fn ensure_worker(&mut self, worker_id: &WorkerId) {
        self.owned.entry(worker_id.clone()).or_default();
    }

    /// Records `directory` as owned by `worker_id`. Re-assigning to the same owner is a no-op.
    pub fn assign(&mut self, worker_id: &WorkerId, directory: &str) -> Result<()> {
        if let Some(owner) = self.owners.get(directory) {
            if owner == worker_id {
                return Ok(());
            }
            return Err(CoordinatorError::ShardAlreadyOwned {
                directory: directory.to_string(),
                owner: owner.clone(),
            });
        }

        self.owned
            .entry(worker_id.clone())
            .or_default()
            .insert(directory.to_string());
        self.owners.insert(directory.to_string(), worker_id.clone());
        Ok(())
    }

    pub fn owner_of(&self, directory: &str) -> Option<&WorkerId> {
        self.owners.get(directory)
    }

    pub fn directories_of(&self, worker_id: &WorkerId) -> Vec<String> {
        self.owned
            .get(worker_id)
            .map(|directories| directories.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every assigned shard, grouped by worker in id order.
    pub fn all_directories(&self) -> Vec<String> {
        self.owned.values().flatten().cloned().collect()
    }

    pub fn assigned_count(&self) -> usize {
        self.owned.values().map(BTreeSet::len).sum()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.owned.keys().cloned().collect()
    }

    pub fn worker_count(&self) -> usize {
        self.owned.len()
    }

    pub fn workers_with_assignments(&self) -> usize {
        self.owned.values().filter(|dirs| !dirs.is_empty()).count()
    }

    pub fn clear(&mut self) {
        self.owned.clear();
        self.owners.clear();
    }

    /// True when the reverse index mirrors the forward map exactly and no shard has
    /// two owners.
    pub fn is_consistent(&self) -> bool {
        let mut seen = 0;
        for (worker_id, directories) in &self.owned {
            for directory in directories {
                if self.owners.get(directory) != Some(worker_id) {
                    return false;
                }
                seen += 1;
            }
        }
        seen == self.owners.len()
    }
}

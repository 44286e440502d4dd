use crate::workers::types::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Persisted ownership of one worker, in the format the distribution file has always used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentRecord {
    #[serde(rename = "serverId")]
    pub worker_id: WorkerId,
    #[serde(rename = "dirs")]
    pub directories: Vec<String>,
}

/// Local shards that no worker owns yet.
///
/// Distribution pops from the back, so the most recently loaded directories go out
/// first. Directories handed back after a failed placement are queued at the front.
#[derive(Debug, Default, Clone)]
pub struct UnassignedPool {
    queue: VecDeque<String>,
    members: HashSet<String>,
}

impl UnassignedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory unless it is already pooled. Returns whether it was added.
    pub fn push(&mut self, directory: String) -> bool {
        if !self.members.insert(directory.clone()) {
            return false;
        }
        self.queue.push_back(directory);
        true
    }

    /// Returns a directory to the pool behind everything already waiting.
    pub fn requeue(&mut self, directory: String) -> bool {
        if !self.members.insert(directory.clone()) {
            return false;
        }
        self.queue.push_front(directory);
        true
    }

    pub fn pop(&mut self) -> Option<String> {
        let directory = self.queue.pop_back()?;
        self.members.remove(&directory);
        Some(directory)
    }

    /// Keeps only the directories for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let members = &mut self.members;
        self.queue.retain(|directory| {
            let kept = keep(directory);
            if !kept {
                members.remove(directory);
            }
            kept
        });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.members.clear();
    }

    /// Directories in queue order (front first).
    pub fn to_vec(&self) -> Vec<String> {
        self.queue.iter().cloned().collect()
    }
}

/// One shard that failed an integrity check on a worker.
///
/// `missing` means the worker does not have the directory at all; otherwise
/// `bad_files` lists the files that are absent remotely or differ in checksum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BadDirsReport {
    pub directory: String,
    pub bad_files: Vec<String>,
    pub missing: bool,
}

impl BadDirsReport {
    pub fn missing(directory: &str) -> Self {
        Self {
            directory: directory.to_string(),
            bad_files: Vec::new(),
            missing: true,
        }
    }

    pub fn with_bad_files(directory: &str, bad_files: Vec<String>) -> Self {
        Self {
            directory: directory.to_string(),
            bad_files,
            missing: false,
        }
    }
}

/// A shard whose integrity could not be established in this pass.
///
/// The worker answered, but with an error that says nothing about the shard itself,
/// or the local copy could not be read. The shard needs another check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UncheckedShard {
    pub worker_id: WorkerId,
    pub directory: String,
    pub reason: String,
}

/// Summary of one distribution pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionReport {
    pub nothing_to_distribute: bool,
    pub directories_distributed: usize,
    pub files_uploaded: usize,
    pub upload_failures: usize,
    pub failed_directories: Vec<String>,
    pub skipped_workers: Vec<WorkerId>,
    pub remaining_unassigned: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepairSummary {
    pub files_uploaded: usize,
    pub upload_errors: usize,
    pub directories_created: usize,
    /// Reported shards that no longer exist in the local archive.
    pub missing_locally: Vec<String>,
}

impl RepairSummary {
    pub fn is_clean(&self) -> bool {
        self.upload_errors == 0 && self.missing_locally.is_empty()
    }
}

/// Result of a network integrity pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub bad_dirs: BTreeMap<WorkerId, Vec<BadDirsReport>>,
    pub unchecked: Vec<UncheckedShard>,
    pub checked_workers: Vec<WorkerId>,
    pub skipped_workers: Vec<WorkerId>,
    pub repair: Option<RepairSummary>,
}

impl IntegrityReport {
    pub fn bad_dir_count(&self) -> usize {
        self.bad_dirs.values().map(Vec::len).sum()
    }

    /// No bad shard found and every shard of a reachable worker was actually checked.
    pub fn is_clean(&self) -> bool {
        self.bad_dirs.is_empty() && self.unchecked.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedistributionReport {
    pub cleared_workers: Vec<WorkerId>,
    /// Reachable workers that did not acknowledge the wipe; excluded from the new placement.
    pub failed_clears: Vec<WorkerId>,
    pub unreachable_workers: Vec<WorkerId>,
    pub distribution: DistributionReport,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionStats {
    pub assigned: usize,
    pub unassigned: usize,
    pub workers_with_assignments: usize,
}

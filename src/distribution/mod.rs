//! Shard Distribution Module
//!
//! Places the local photo archive onto workers, one directory (shard) at a time.
//!
//! ## Core Concepts
//! - **Assignment table**: shard -> owning worker, persisted between runs. A shard has at
//!   most one owner.
//! - **Unassigned pool**: local shards no worker owns yet. A shard is never both pooled
//!   and assigned.
//! - **Integrity**: assigned shards are checked against their owner (presence, and
//!   optionally per-file CRC-32) and repaired by re-uploading.
//! - **Redistribution**: wipe every reachable worker and place everything again.

pub mod distributor;
pub mod handlers;
pub mod protocol;
pub mod table;
pub mod types;

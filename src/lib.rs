//! Face Search Shard Coordinator Library
//!
//! Coordinates a fleet of worker nodes that each hold a disjoint set of photo directories
//! (shards) and can run a face-match search over one shard. The binary (`main.rs`) wires
//! these modules into an HTTP service.
//!
//! ## Architecture Modules
//! - **`workers`**: the typed worker client, the worker registry with its health sweep,
//!   and worker self-registration.
//! - **`distribution`**: the assignment table, placement of local shards onto workers,
//!   integrity verification and repair, and full redistribution.
//! - **`search`**: the per-search task state machine and the scheduler that fans a search
//!   out over every shard.
//! - **`persistence`**: load/save of the registry and assignment table.
//! - **`archive`**: the coordinator's local copy of every shard.
//! - **`config`** and **`error`**: configuration and the error taxonomy.

pub mod archive;
pub mod config;
pub mod distribution;
pub mod error;
pub mod persistence;
pub mod search;
pub mod workers;

#[cfg(test)]
mod testing;

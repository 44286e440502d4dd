//! Face Search Module
//!
//! Turns one face-search request into one sub-task per shard and follows every
//! sub-task to a terminal outcome.
//!
//! ## Core Concepts
//! - **SearchTask**: per-shard state of one search, guarded by its own lock.
//! - **Scheduler**: a periodic tick that dispatches pending shards to their owners.
//! - **Callbacks**: workers report sub-task results through `/taskResult`.

pub mod handlers;
pub mod orchestrator;
pub mod protocol;
pub mod types;

#[cfg(test)]
mod tests;

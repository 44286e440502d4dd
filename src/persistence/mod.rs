//! Persistence Module
//!
//! Durable storage for the two pieces of coordinator state that survive restarts:
//! the worker registry and the shard assignment table. Search tasks are not persisted.
//!
//! - **`CoordinatorStore`**: the load/save contract the registry and distributor depend on.
//! - **`JsonFileStore`**: flat JSON files, compatible with the files earlier deployments wrote.
//! - **`InMemoryStore`**: a volatile store for embedding and tests.

pub mod store;

pub use store::{CoordinatorStore, InMemoryStore, JsonFileStore};

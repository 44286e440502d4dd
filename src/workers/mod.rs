//! Worker Management Module
//!
//! Everything the coordinator knows about its workers and how it talks to them.
//!
//! ## Core Concepts
//! - **Client**: `WorkerApi` is the typed remote interface; `HttpWorkerClient` speaks the
//!   worker's HTTP protocol with per-call deadlines and retry with backoff.
//! - **Registry**: `WorkerRegistry` holds membership and cached health, and answers
//!   selection queries.
//! - **Self-registration**: workers announce themselves through `/addServer`.

pub mod client;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod types;

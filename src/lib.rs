//! # Tasksync - Real-Time Todo Collaboration Engine
//!
//! The back-end collaboration core of a multi-user todo-list service:
//! every edit reaches every other connected participant of a list within
//! sub-second latency, survives server restarts, tolerates brief network
//! partitions, and converges to a single agreed state.
//!
//! ## Architecture
//!
//! - `model`: lists, items, membership, revisions, cache entries
//! - `repository`: typed CRUD against the durable database (L3)
//! - `store`: shared store (L2), atomic mutation scripts, store clock
//! - `cache`: L1 state manager and the three-tier coordinator
//! - `pubsub`: the fan-out bus listener, sole delivery path to sessions
//! - `writer`: bounded-queue write-behind worker
//! - `permissions`: role policy over list membership
//! - `protocol`: wire events and declarative payload validation
//! - `auth`: bearer-token verification
//! - `server`: WebSocket sessions, event handlers, operational surface

#![warn(clippy::all)]

// Core data types
pub mod model;

// Error taxonomy surfaced to clients
pub mod error;

// Environment configuration
pub mod config;

// Process-wide counters
pub mod metrics;

// Durable store (L3)
pub mod repository;

// Shared store (L2) and atomic scripts
pub mod store;

// L1 cache, connection registry, and the coordinator
pub mod cache;

// Fan-out bus listener
pub mod pubsub;

// Write-behind worker
pub mod writer;

// Permission policy
pub mod permissions;

// Wire protocol and validation
pub mod protocol;

// Token verification
pub mod auth;

// Server assembly: sessions, handlers, HTTP surface
pub mod server;

// Re-export commonly used types
pub use cache::{Coordinator, StateManager};
pub use config::Config;
pub use error::{EngineError, Result};
pub use model::{ListCacheEntry, Rev, TodoItem, TodoList};
pub use server::Server;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

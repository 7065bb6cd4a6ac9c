//! # Cache Layer
//!
//! The three-tier read/write logic lives here:
//! - [`StateManager`] owns the per-process L1 map and the connection
//!   registry.
//! - [`Coordinator`] fronts L1 ↔ L2 ↔ L3: read-through on misses,
//!   self-healing rebuilds when the shared store has been flushed, atomic
//!   script invocation for item mutations, and hand-off to the
//!   write-behind queue.

mod coordinator;
mod state;

pub use coordinator::{is_revision_conflict, Coordinator};
pub use state::{CacheSummary, EventSender, StateManager};

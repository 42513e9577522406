//! Publish session state
//!
//! This module manages state that outlives single messages:
//! - Per-attempt publish state (transaction ids, first key frame gate)
//! - Timestamp continuity across reconnects
//! - The durable store continuity persists into

pub mod continuity;
pub mod state;
pub mod store;

pub use continuity::TimestampContinuity;
pub use state::PublishSession;
pub use store::{FileStore, KeyValueStore, MemoryStore};

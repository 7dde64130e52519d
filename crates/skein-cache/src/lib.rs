//! Read-through cache layer shared by the Skein services.
//!
//! The store has two backends behind one type: a local DashMap for
//! single-instance deployments and tests, and Redis for anything shared
//! across instances. A store failure is never an error for the caller: reads
//! fall through to the source of truth and invalidations degrade to a logged
//! no-op, so the cache can disappear without failing a write.

pub mod keys;
pub mod store;

pub use store::{CacheStore, CachedEntry};

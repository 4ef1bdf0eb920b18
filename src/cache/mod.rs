//! Generic caching layer for server-owned collections.
//!
//! This module provides a collection-agnostic caching mechanism that:
//! - Keys entries by base key + sorted query parameters
//! - Tracks freshness (fresh, stale, expired) and evicts at capacity
//! - Coalesces concurrent fetches for the same key
//! - Serves stale data when the network is unavailable
//! - Warm-starts from a best-effort snapshot

mod key;
mod snapshot;
mod store;
mod traits;

pub use key::{compose, Params};
pub use snapshot::{NoopSnapshotStore, SnapshotStore, SqliteSnapshotStore};
pub use store::{CacheConfig, CacheEntry, CacheStore, Subscription};
pub use traits::{CacheEvent, CacheResult, CacheSource, Cacheable, FetchOptions, FetchStrategy};

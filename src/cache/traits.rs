//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Values that can be held by a [`CacheStore`](super::CacheStore).
///
/// Serializable so entries can be written to the warm-start snapshot.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, stale; a background refresh was triggered
  CacheStale,
  /// The fetch failed and previously cached data was served instead
  Offline,
}

/// How `fetch_with_cache` treats stale data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStrategy {
  /// Wait for a fresh fetch whenever the entry is not fresh
  #[default]
  Await,
  /// Serve stale data immediately and refresh in the background
  Background,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
  pub strategy: FetchStrategy,
  /// Skip the fresh-data shortcut and always fetch
  pub force_refresh: bool,
  /// TTL for the entry written by this fetch, instead of the store default
  pub custom_ttl: Option<Duration>,
}

impl FetchOptions {
  pub fn background() -> Self {
    Self {
      strategy: FetchStrategy::Background,
      ..Self::default()
    }
  }

  pub fn force() -> Self {
    Self {
      force_refresh: true,
      ..Self::default()
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.custom_ttl = Some(ttl);
    self
  }
}

/// Change notification delivered to subscribers of a key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent<T> {
  Updated { data: T, version: u64 },
  Invalidated,
}

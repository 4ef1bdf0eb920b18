//! In-memory TTL cache with request coalescing, subscriptions and a
//! best-effort warm-start snapshot.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::key::{compose, Params};
use super::snapshot::{NoopSnapshotStore, SnapshotStore};
use super::traits::{CacheEvent, CacheResult, Cacheable, FetchOptions, FetchStrategy};
use crate::error::SyncError;
use crate::inflight::{InflightRegistry, SharedCall};

/// Tuning knobs shared by every store built from one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
  /// Lifetime of an entry when `set` is called without an explicit TTL
  pub default_ttl: Duration,
  /// Age after which an entry is stale but still servable
  pub stale_time: Duration,
  pub max_entries: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl: Duration::from_secs(5 * 60),
      stale_time: Duration::from_secs(60),
      max_entries: 100,
    }
  }
}

/// A cached value plus its freshness bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub data: T,
  /// When the entry was written
  pub timestamp: Instant,
  pub stale_at: Instant,
  pub expires_at: Instant,
  /// Forced staleness from `mark_stale`
  pub is_stale: bool,
  pub version: u64,
}

impl<T> CacheEntry<T> {
  pub fn is_expired(&self, now: Instant) -> bool {
    now > self.expires_at
  }

  pub fn is_stale_at(&self, now: Instant) -> bool {
    self.is_stale || now >= self.stale_at
  }
}

type Callback<T> = Arc<dyn Fn(&CacheEvent<T>) + Send + Sync>;

/// Handle returned by [`CacheStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
  cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
  pub fn unsubscribe(mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

struct State<T> {
  entries: HashMap<String, CacheEntry<T>>,
  /// Last version handed out per key; outlives eviction so versions never repeat.
  versions: HashMap<String, u64>,
  timers: HashMap<String, JoinHandle<()>>,
  subscribers: HashMap<String, Vec<(u64, Callback<T>)>>,
}

impl<T> State<T> {
  fn remove(&mut self, key: &str) -> bool {
    if let Some(timer) = self.timers.remove(key) {
      timer.abort();
    }
    self.entries.remove(key).is_some()
  }

  fn evict_expired(&mut self, now: Instant) {
    let expired: Vec<String> = self
      .entries
      .iter()
      .filter(|(_, entry)| entry.is_expired(now))
      .map(|(key, _)| key.clone())
      .collect();
    for key in expired {
      debug!(key = %key, "evicting expired entry");
      self.remove(&key);
    }
  }

  fn evict_oldest(&mut self) {
    let oldest = self
      .entries
      .iter()
      .min_by_key(|(_, entry)| entry.timestamp)
      .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
      debug!(key = %key, "evicting oldest entry at capacity");
      self.remove(&key);
    }
  }

  fn callbacks(&self, key: &str) -> Vec<Callback<T>> {
    self
      .subscribers
      .get(key)
      .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
      .unwrap_or_default()
  }
}

struct Inner<T> {
  namespace: String,
  config: CacheConfig,
  state: Mutex<State<T>>,
  registry: Arc<InflightRegistry>,
  snapshots: Arc<dyn SnapshotStore>,
  next_subscriber: AtomicU64,
}

impl<T> Drop for Inner<T> {
  fn drop(&mut self) {
    let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
    for (_, timer) in state.timers.drain() {
      timer.abort();
    }
  }
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry<T> {
  data: T,
  stored_at: DateTime<Utc>,
  stale_at: DateTime<Utc>,
  expires_at: DateTime<Utc>,
  is_stale: bool,
  version: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot<T> {
  entries: BTreeMap<String, PersistedEntry<T>>,
}

/// Map a monotonic instant onto the wall clock, relative to a shared "now".
fn to_wall(at: Instant, now: Instant, wall_now: DateTime<Utc>) -> DateTime<Utc> {
  let delta = |d: Duration| chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
  if at >= now {
    wall_now + delta(at - now)
  } else {
    wall_now - delta(now - at)
  }
}

fn from_wall(at: DateTime<Utc>, now: Instant, wall_now: DateTime<Utc>) -> Instant {
  if at >= wall_now {
    now + (at - wall_now).to_std().unwrap_or_default()
  } else {
    now
      .checked_sub((wall_now - at).to_std().unwrap_or_default())
      .unwrap_or(now)
  }
}

/// Keyed TTL cache for one collection type.
///
/// Cheap to clone; clones share the same entries.
pub struct CacheStore<T: Cacheable> {
  inner: Arc<Inner<T>>,
}

impl<T: Cacheable> Clone for CacheStore<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Cacheable> CacheStore<T> {
  /// Create a store and warm it from the last snapshot of `namespace`.
  pub fn new(
    namespace: impl Into<String>,
    config: CacheConfig,
    registry: Arc<InflightRegistry>,
    snapshots: Arc<dyn SnapshotStore>,
  ) -> Self {
    let store = Self {
      inner: Arc::new(Inner {
        namespace: namespace.into(),
        config,
        state: Mutex::new(State {
          entries: HashMap::new(),
          versions: HashMap::new(),
          timers: HashMap::new(),
          subscribers: HashMap::new(),
        }),
        registry,
        snapshots,
        next_subscriber: AtomicU64::new(0),
      }),
    };
    store.warm_start();
    store
  }

  /// A store with its own registry and no persistence.
  pub fn in_memory(namespace: impl Into<String>, config: CacheConfig) -> Self {
    Self::new(
      namespace,
      config,
      InflightRegistry::new(),
      Arc::new(NoopSnapshotStore),
    )
  }

  pub fn namespace(&self) -> &str {
    &self.inner.namespace
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  /// Number of live (possibly expired but not yet evicted) entries.
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Cached data for `key`, fresh or stale. Expired entries read as a miss.
  pub fn get(&self, key: &str, params: &Params) -> Option<T> {
    self.get_entry(key, params).map(|entry| entry.data)
  }

  pub fn get_entry(&self, key: &str, params: &Params) -> Option<CacheEntry<T>> {
    self.entry(&compose(key, params), Instant::now())
  }

  pub fn has(&self, key: &str, params: &Params) -> bool {
    self.get_entry(key, params).is_some()
  }

  /// Whether the entry needs refreshing. A missing entry counts as stale.
  pub fn is_stale_data(&self, key: &str, params: &Params) -> bool {
    let now = Instant::now();
    self
      .entry(&compose(key, params), now)
      .map(|entry| entry.is_stale_at(now))
      .unwrap_or(true)
  }

  /// Store `data` under `key`, returning the entry's new version.
  pub fn set(&self, key: &str, data: T, params: &Params, ttl: Option<Duration>) -> u64 {
    self.set_composite(&compose(key, params), data, ttl)
  }

  pub fn invalidate(&self, key: &str, params: &Params) -> bool {
    let composite = compose(key, params);
    let (removed, callbacks) = {
      let mut state = self.lock();
      (state.remove(&composite), state.callbacks(&composite))
    };
    if removed {
      debug!(namespace = %self.inner.namespace, key = %composite, "invalidated");
      self.persist();
      Self::emit(&callbacks, &CacheEvent::Invalidated);
    }
    removed
  }

  /// Drop every entry whose composite key matches `pattern`.
  pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
    let notified = {
      let mut state = self.lock();
      let keys: Vec<String> = state
        .entries
        .keys()
        .filter(|key| pattern.is_match(key))
        .cloned()
        .collect();
      keys
        .into_iter()
        .map(|key| {
          state.remove(&key);
          state.callbacks(&key)
        })
        .collect::<Vec<_>>()
    };

    if !notified.is_empty() {
      debug!(
        namespace = %self.inner.namespace,
        pattern = pattern.as_str(),
        count = notified.len(),
        "invalidated by pattern"
      );
      self.persist();
      for callbacks in &notified {
        Self::emit(callbacks, &CacheEvent::Invalidated);
      }
    }
    notified.len()
  }

  /// Force the entry stale regardless of its age.
  pub fn mark_stale(&self, key: &str, params: &Params) -> bool {
    let composite = compose(key, params);
    let marked = match self.lock().entries.get_mut(&composite) {
      Some(entry) => {
        entry.is_stale = true;
        true
      }
      None => false,
    };
    if marked {
      self.persist();
    }
    marked
  }

  /// Register `callback` for changes to `key`.
  pub fn subscribe<F>(&self, key: &str, params: &Params, callback: F) -> Subscription
  where
    F: Fn(&CacheEvent<T>) + Send + Sync + 'static,
  {
    let composite = compose(key, params);
    let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
    self
      .lock()
      .subscribers
      .entry(composite.clone())
      .or_default()
      .push((id, Arc::new(callback)));

    let weak = Arc::downgrade(&self.inner);
    Subscription {
      cancel: Some(Box::new(move || {
        if let Some(inner) = weak.upgrade() {
          let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
          if let Some(subs) = state.subscribers.get_mut(&composite) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
              state.subscribers.remove(&composite);
            }
          }
        }
      })),
    }
  }

  /// Read through the cache.
  ///
  /// 1. Join a fetch already outstanding for this key
  /// 2. Fresh data (and no force-refresh) is returned immediately
  /// 3. Stale data with the background strategy is returned immediately while
  ///    a detached refresh updates the cache
  /// 4. Otherwise wait for the fetch; on failure fall back to any cached data
  pub async fn fetch_with_cache<F, Fut>(
    &self,
    key: &str,
    params: &Params,
    fetcher: F,
    options: FetchOptions,
  ) -> Result<CacheResult<T>, SyncError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    let composite = compose(key, params);
    let call_key = format!("cache:{}:{}", self.inner.namespace, composite);

    if let Some(call) = self.inner.registry.join::<T>(&call_key) {
      debug!(key = %composite, "coalescing with outstanding fetch");
      return self.settle(call.await, &composite);
    }

    let now = Instant::now();
    if let Some(entry) = self.entry(&composite, now) {
      let stale = entry.is_stale_at(now);
      if !options.force_refresh {
        if !stale {
          debug!(key = %composite, "cache hit");
          return Ok(CacheResult::from_cache(entry.data, false));
        }
        if options.strategy == FetchStrategy::Background {
          debug!(key = %composite, "serving stale data, refreshing in background");
          let _detached: SharedCall<T> = self.inner.registry.join_or_start(&call_key, || {
            self.refresh_call(composite.clone(), fetcher(), options.custom_ttl)
          });
          return Ok(CacheResult::from_cache(entry.data, true));
        }
      }
    }

    let call = self.inner.registry.join_or_start(&call_key, || {
      self.refresh_call(composite.clone(), fetcher(), options.custom_ttl)
    });
    self.settle(call.await, &composite)
  }

  /// Abort timers, flush a final snapshot and drop all entries and subscribers.
  pub fn shutdown(&self) {
    self.persist();
    let mut state = self.lock();
    for (_, timer) in state.timers.drain() {
      timer.abort();
    }
    state.entries.clear();
    state.subscribers.clear();
    info!(namespace = %self.inner.namespace, "cache shut down");
  }

  fn refresh_call<Fut>(
    &self,
    composite: String,
    fetch: Fut,
    ttl: Option<Duration>,
  ) -> impl Future<Output = Result<T, SyncError>> + Send + 'static
  where
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    let store = self.clone();
    async move {
      match fetch.await {
        Ok(data) => {
          store.set_composite(&composite, data.clone(), ttl);
          Ok(data)
        }
        Err(e) => {
          warn!(key = %composite, error = %e, "fetch failed");
          Err(SyncError::Fetch {
            key: composite,
            message: e.to_string(),
          })
        }
      }
    }
  }

  fn settle(
    &self,
    result: Result<T, SyncError>,
    composite: &str,
  ) -> Result<CacheResult<T>, SyncError> {
    match result {
      Ok(data) => Ok(CacheResult::from_network(data)),
      Err(e) => match self.entry(composite, Instant::now()) {
        Some(entry) => {
          warn!(key = %composite, "serving cached data after failed fetch");
          Ok(CacheResult::offline(entry.data))
        }
        None => Err(e),
      },
    }
  }

  fn entry(&self, composite: &str, now: Instant) -> Option<CacheEntry<T>> {
    let mut state = self.lock();
    match state.entries.get(composite) {
      Some(entry) if entry.is_expired(now) => {
        state.remove(composite);
        None
      }
      Some(entry) => Some(entry.clone()),
      None => None,
    }
  }

  fn set_composite(&self, composite: &str, data: T, ttl: Option<Duration>) -> u64 {
    let now = Instant::now();
    let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
    let stale_after = self.inner.config.stale_time.min(ttl);
    let event_data = data.clone();

    let (version, callbacks) = {
      let mut state = self.lock();
      state.evict_expired(now);
      if !state.entries.contains_key(composite) && state.entries.len() >= self.inner.config.max_entries
      {
        state.evict_oldest();
      }

      let counter = state.versions.entry(composite.to_string()).or_insert(0);
      *counter += 1;
      let version = *counter;

      let entry = CacheEntry {
        data,
        timestamp: now,
        stale_at: now + stale_after,
        expires_at: now + ttl,
        is_stale: false,
        version,
      };
      self.arm_timer(&mut state, composite, entry.expires_at, version);
      state.entries.insert(composite.to_string(), entry);
      (version, state.callbacks(composite))
    };

    debug!(namespace = %self.inner.namespace, key = %composite, version, "cached");
    self.persist();
    Self::emit(
      &callbacks,
      &CacheEvent::Updated {
        data: event_data,
        version,
      },
    );
    version
  }

  /// Spawn the eviction timer for one version of an entry. Without a runtime
  /// the entry is still evicted lazily on read.
  fn arm_timer(&self, state: &mut State<T>, composite: &str, expires_at: Instant, version: u64) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      return;
    };
    let weak = Arc::downgrade(&self.inner);
    let key = composite.to_string();
    let timer = handle.spawn(async move {
      tokio::time::sleep_until(expires_at).await;
      if let Some(inner) = weak.upgrade() {
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.entries.get(&key).is_some_and(|e| e.version == version) {
          debug!(key = %key, "entry expired");
          state.entries.remove(&key);
          state.timers.remove(&key);
        }
      }
    });
    if let Some(previous) = state.timers.insert(composite.to_string(), timer) {
      previous.abort();
    }
  }

  fn emit(callbacks: &[Callback<T>], event: &CacheEvent<T>) {
    for callback in callbacks {
      callback(event);
    }
  }

  /// Best-effort snapshot write. Failures are logged and otherwise ignored.
  fn persist(&self) {
    let now = Instant::now();
    let wall_now = Utc::now();
    let serialized = {
      let state = self.lock();
      let entries: BTreeMap<String, PersistedEntry<&T>> = state
        .entries
        .iter()
        .filter(|(_, entry)| !entry.is_expired(now))
        .map(|(key, entry)| {
          (
            key.clone(),
            PersistedEntry {
              data: &entry.data,
              stored_at: to_wall(entry.timestamp, now, wall_now),
              stale_at: to_wall(entry.stale_at, now, wall_now),
              expires_at: to_wall(entry.expires_at, now, wall_now),
              is_stale: entry.is_stale,
              version: entry.version,
            },
          )
        })
        .collect();
      serde_json::to_string(&Snapshot { entries })
    };

    let result = serialized
      .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize snapshot: {}", e))
      .and_then(|json| self.inner.snapshots.save(&self.inner.namespace, &json));
    if let Err(e) = result {
      warn!(namespace = %self.inner.namespace, error = %e, "failed to persist cache snapshot");
    }
  }

  fn warm_start(&self) {
    let raw = match self.inner.snapshots.load(&self.inner.namespace) {
      Ok(Some(raw)) => raw,
      Ok(None) => return,
      Err(e) => {
        warn!(namespace = %self.inner.namespace, error = %e, "failed to read cache snapshot");
        return;
      }
    };

    let snapshot: Snapshot<T> = match serde_json::from_str(&raw) {
      Ok(snapshot) => snapshot,
      Err(e) => {
        warn!(namespace = %self.inner.namespace, error = %e, "ignoring corrupt cache snapshot");
        return;
      }
    };

    let now = Instant::now();
    let wall_now = Utc::now();
    let mut state = self.lock();
    let mut restored = 0usize;
    for (key, persisted) in snapshot.entries {
      if persisted.expires_at <= wall_now {
        continue;
      }
      let entry = CacheEntry {
        data: persisted.data,
        timestamp: from_wall(persisted.stored_at, now, wall_now),
        stale_at: from_wall(persisted.stale_at, now, wall_now),
        expires_at: from_wall(persisted.expires_at, now, wall_now),
        is_stale: persisted.is_stale,
        version: persisted.version,
      };
      state.versions.insert(key.clone(), persisted.version);
      self.arm_timer(&mut state, &key, entry.expires_at, entry.version);
      state.entries.insert(key, entry);
      restored += 1;
    }
    info!(namespace = %self.inner.namespace, restored, "warm-started cache from snapshot");
  }

  fn lock(&self) -> MutexGuard<'_, State<T>> {
    self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteSnapshotStore};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::AtomicU32;

  fn board(id: &str) -> Params {
    Params::new().with("boardId", id)
  }

  fn store() -> CacheStore<Vec<String>> {
    CacheStore::in_memory("tasks", CacheConfig::default())
  }

  fn tasks(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[tokio::test]
  async fn test_set_then_get() {
    let cache = store();
    cache.set("tasks", tasks(&["t1", "t2"]), &board("b1"), None);

    assert_eq!(cache.get("tasks", &board("b1")), Some(tasks(&["t1", "t2"])));
    assert_eq!(cache.get("tasks", &board("b2")), None);
    assert!(cache.has("tasks", &board("b1")));
  }

  #[tokio::test]
  async fn test_version_counts_overwrites() {
    let cache = store();
    for n in 1..=5 {
      cache.set("tasks", tasks(&[&format!("v{}", n)]), &Params::new(), None);
    }

    let entry = cache.get_entry("tasks", &Params::new()).unwrap();
    assert_eq!(entry.data, tasks(&["v5"]));
    assert_eq!(entry.version, 5);
  }

  #[tokio::test]
  async fn test_version_survives_invalidate() {
    let cache = store();
    cache.set("tasks", tasks(&["a"]), &Params::new(), None);
    cache.invalidate("tasks", &Params::new());
    let version = cache.set("tasks", tasks(&["b"]), &Params::new(), None);
    assert_eq!(version, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_entry_reads_as_miss() {
    let cache = store();
    cache.set(
      "tasks",
      tasks(&["t1", "t2"]),
      &board("b1"),
      Some(Duration::from_millis(1000)),
    );

    tokio::time::advance(Duration::from_millis(999)).await;
    assert!(cache.get("tasks", &board("b1")).is_some());

    tokio::time::advance(Duration::from_millis(2)).await;
    assert_eq!(cache.get("tasks", &board("b1")), None);
    assert!(cache.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_after_stale_time() {
    let cache = CacheStore::in_memory(
      "tasks",
      CacheConfig {
        stale_time: Duration::from_secs(10),
        ..CacheConfig::default()
      },
    );
    cache.set("tasks", tasks(&["a"]), &Params::new(), None);
    assert!(!cache.is_stale_data("tasks", &Params::new()));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(cache.is_stale_data("tasks", &Params::new()));
    // Stale data is still served
    assert!(cache.get("tasks", &Params::new()).is_some());
  }

  #[tokio::test]
  async fn test_mark_stale_forces_staleness() {
    let cache = store();
    cache.set("tasks", tasks(&["a"]), &Params::new(), None);
    assert!(cache.mark_stale("tasks", &Params::new()));
    assert!(cache.is_stale_data("tasks", &Params::new()));
    assert!(!cache.mark_stale("missing", &Params::new()));
    assert!(cache.is_stale_data("missing", &Params::new()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_evicts_oldest_at_capacity() {
    let cache = CacheStore::in_memory(
      "tasks",
      CacheConfig {
        max_entries: 2,
        ..CacheConfig::default()
      },
    );
    cache.set("a", tasks(&["a"]), &Params::new(), None);
    tokio::time::advance(Duration::from_millis(5)).await;
    cache.set("b", tasks(&["b"]), &Params::new(), None);
    tokio::time::advance(Duration::from_millis(5)).await;
    cache.set("c", tasks(&["c"]), &Params::new(), None);

    assert!(!cache.has("a", &Params::new()));
    assert!(cache.has("b", &Params::new()));
    assert!(cache.has("c", &Params::new()));

    // Overwriting an existing key does not evict
    cache.set("b", tasks(&["b2"]), &Params::new(), None);
    assert!(cache.has("c", &Params::new()));
  }

  #[tokio::test]
  async fn test_invalidate_pattern() {
    let cache = store();
    cache.set("tasks", tasks(&["a"]), &board("b1"), None);
    cache.set("tasks", tasks(&["b"]), &board("b2"), None);
    cache.set("boards", tasks(&["x"]), &Params::new(), None);

    let removed = cache.invalidate_pattern(&Regex::new("^tasks").unwrap());
    assert_eq!(removed, 2);
    assert!(cache.has("boards", &Params::new()));
    assert!(!cache.has("tasks", &board("b1")));
  }

  #[tokio::test]
  async fn test_subscribers_see_updates_until_unsubscribed() {
    let cache = store();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = cache.subscribe("tasks", &board("b1"), move |event| {
      sink.lock().unwrap().push(event.clone());
    });

    cache.set("tasks", tasks(&["a"]), &board("b1"), None);
    cache.set("tasks", tasks(&["z"]), &board("b2"), None);
    cache.invalidate("tasks", &board("b1"));
    sub.unsubscribe();
    cache.set("tasks", tasks(&["b"]), &board("b1"), None);

    let seen = seen.lock().unwrap();
    assert_eq!(
      *seen,
      vec![
        CacheEvent::Updated {
          data: tasks(&["a"]),
          version: 1
        },
        CacheEvent::Invalidated,
      ]
    );
  }

  #[tokio::test]
  async fn test_concurrent_fetches_coalesce() {
    let cache = store();
    let calls = Arc::new(AtomicU32::new(0));

    let fetch = |calls: Arc<AtomicU32>| {
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
          tokio::time::sleep(Duration::from_millis(20)).await;
          Ok(tasks(&["t1"]))
        }
      }
    };

    let params = board("b1");
    let (a, b) = tokio::join!(
      cache.fetch_with_cache("tasks", &params, fetch(calls.clone()), FetchOptions::default()),
      cache.fetch_with_cache("tasks", &params, fetch(calls.clone()), FetchOptions::default()),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap().data, tasks(&["t1"]));
    assert_eq!(b.unwrap().data, tasks(&["t1"]));
    assert_eq!(cache.get("tasks", &board("b1")), Some(tasks(&["t1"])));
  }

  #[tokio::test]
  async fn test_fresh_data_skips_fetch_unless_forced() {
    let cache = store();
    cache.set("tasks", tasks(&["cached"]), &Params::new(), None);

    let result = cache
      .fetch_with_cache(
        "tasks",
        &Params::new(),
        || async { Err(eyre!("should not be called")) },
        FetchOptions::default(),
      )
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data, tasks(&["cached"]));

    let forced = cache
      .fetch_with_cache(
        "tasks",
        &Params::new(),
        || async { Ok(tasks(&["network"])) },
        FetchOptions::force(),
      )
      .await
      .unwrap();
    assert_eq!(forced.source, CacheSource::Network);
    assert_eq!(cache.get("tasks", &Params::new()), Some(tasks(&["network"])));
  }

  #[tokio::test]
  async fn test_failed_fetch_falls_back_to_stale() {
    let cache = store();
    cache.set("tasks", tasks(&["old"]), &Params::new(), None);
    cache.mark_stale("tasks", &Params::new());

    let result = cache
      .fetch_with_cache(
        "tasks",
        &Params::new(),
        || async { Err(eyre!("offline")) },
        FetchOptions::default(),
      )
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, tasks(&["old"]));
  }

  #[tokio::test]
  async fn test_failed_fetch_without_cache_propagates() {
    let cache = store();
    let err = cache
      .fetch_with_cache(
        "tasks",
        &Params::new(),
        || async { Err(eyre!("offline")) },
        FetchOptions::default(),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Fetch { ref message, .. } if message == "offline"));
  }

  #[tokio::test]
  async fn test_background_strategy_serves_stale_then_refreshes() {
    let cache = store();
    cache.set("tasks", tasks(&["old"]), &Params::new(), None);
    cache.mark_stale("tasks", &Params::new());

    let result = cache
      .fetch_with_cache(
        "tasks",
        &Params::new(),
        || async {
          tokio::time::sleep(Duration::from_millis(10)).await;
          Ok(tasks(&["new"]))
        },
        FetchOptions::background(),
      )
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::CacheStale);
    assert_eq!(result.data, tasks(&["old"]));

    tokio::time::sleep(Duration::from_millis(30)).await;
    let entry = cache.get_entry("tasks", &Params::new()).unwrap();
    assert_eq!(entry.data, tasks(&["new"]));
    assert_eq!(entry.version, 2);
    assert!(!cache.is_stale_data("tasks", &Params::new()));
  }

  #[tokio::test]
  async fn test_custom_ttl_applies_to_fetched_entry() {
    let cache = store();
    cache
      .fetch_with_cache(
        "tasks",
        &Params::new(),
        || async { Ok(tasks(&["a"])) },
        FetchOptions::default().with_ttl(Duration::from_secs(2)),
      )
      .await
      .unwrap();

    let entry = cache.get_entry("tasks", &Params::new()).unwrap();
    assert_eq!(entry.expires_at - entry.timestamp, Duration::from_secs(2));
  }

  #[tokio::test]
  async fn test_warm_start_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots: Arc<dyn SnapshotStore> =
      Arc::new(SqliteSnapshotStore::open(&dir.path().join("cache.db")).unwrap());

    let first: CacheStore<Vec<String>> = CacheStore::new(
      "tasks",
      CacheConfig::default(),
      InflightRegistry::new(),
      snapshots.clone(),
    );
    first.set("tasks", tasks(&["t1"]), &board("b1"), None);
    first.set("tasks", tasks(&["t1", "t2"]), &board("b1"), None);
    first.set("tasks", tasks(&["gone"]), &board("b2"), Some(Duration::ZERO));
    first.shutdown();

    let second: CacheStore<Vec<String>> = CacheStore::new(
      "tasks",
      CacheConfig::default(),
      InflightRegistry::new(),
      snapshots,
    );
    let entry = second.get_entry("tasks", &board("b1")).unwrap();
    assert_eq!(entry.data, tasks(&["t1", "t2"]));
    assert_eq!(entry.version, 2);
    assert_eq!(second.get("tasks", &board("b2")), None);
  }

  #[tokio::test]
  async fn test_corrupt_snapshot_is_ignored() {
    struct Corrupt;
    impl SnapshotStore for Corrupt {
      fn load(&self, _namespace: &str) -> color_eyre::Result<Option<String>> {
        Ok(Some("{not json".to_string()))
      }
      fn save(&self, _namespace: &str, _data: &str) -> color_eyre::Result<()> {
        Err(eyre!("disk full"))
      }
    }

    let cache: CacheStore<Vec<String>> = CacheStore::new(
      "tasks",
      CacheConfig::default(),
      InflightRegistry::new(),
      Arc::new(Corrupt),
    );
    assert!(cache.is_empty());

    // Persistence failures never affect in-memory state
    cache.set("tasks", tasks(&["a"]), &Params::new(), None);
    assert_eq!(cache.get("tasks", &Params::new()), Some(tasks(&["a"])));
  }
}

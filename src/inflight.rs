//! Registry of outstanding asynchronous calls keyed by idempotency key.
//!
//! Both the cache fetch path and the mutation engine go through one shared
//! registry: the cache joins an outstanding call for the same key, the
//! mutation engine refuses to start a second one.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

use crate::error::SyncError;

/// A call that any number of waiters can await; all observe the same result.
pub type SharedCall<T> = Shared<BoxFuture<'static, Result<T, SyncError>>>;

struct Entry {
  ticket: u64,
  call: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
pub struct InflightRegistry {
  calls: Mutex<HashMap<String, Entry>>,
  next_ticket: AtomicU64,
}

impl InflightRegistry {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Whether a call for `key` has been started and not yet resolved.
  pub fn is_inflight(&self, key: &str) -> bool {
    self.lock().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// The outstanding call for `key`, if there is one with output `T`.
  pub fn join<T>(&self, key: &str) -> Option<SharedCall<T>>
  where
    T: Clone + Send + Sync + 'static,
  {
    self
      .lock()
      .get(key)
      .and_then(|entry| entry.call.downcast_ref::<SharedCall<T>>())
      .cloned()
  }

  /// Join the outstanding call for `key`, or start one with `start`.
  ///
  /// `start` is only invoked when nothing is outstanding. The started call is
  /// driven by a spawned task, so it runs to completion (and clears its
  /// registry entry) even if every waiter goes away.
  pub fn join_or_start<T, F, Fut>(self: &Arc<Self>, key: &str, start: F) -> SharedCall<T>
  where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
  {
    let mut calls = self.lock();
    if let Some(entry) = calls.get(key) {
      match entry.call.downcast_ref::<SharedCall<T>>() {
        Some(call) => {
          debug!(key, "joining in-flight call");
          return call.clone();
        }
        None => warn!(key, "in-flight call has a different output type, replacing it"),
      }
    }

    let call = self.register(&mut calls, key, start());
    drop(calls);
    tokio::spawn(call.clone());
    call
  }

  /// Start a call for `key` unless one is already outstanding.
  ///
  /// Returns `None` for a duplicate; `start` is not invoked in that case.
  pub fn try_start<T, F, Fut>(self: &Arc<Self>, key: &str, start: F) -> Option<SharedCall<T>>
  where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
  {
    let mut calls = self.lock();
    if calls.contains_key(key) {
      debug!(key, "rejecting duplicate call");
      return None;
    }

    let call = self.register(&mut calls, key, start());
    drop(calls);
    tokio::spawn(call.clone());
    Some(call)
  }

  fn register<T, Fut>(
    self: &Arc<Self>,
    calls: &mut HashMap<String, Entry>,
    key: &str,
    fut: Fut,
  ) -> SharedCall<T>
  where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
  {
    let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
    let registry: Weak<Self> = Arc::downgrade(self);
    let owned_key = key.to_string();

    let call = async move {
      let result = fut.await;
      // Cleared before any waiter sees the result, so a follow-up call
      // issued on completion starts fresh instead of joining this one.
      if let Some(registry) = registry.upgrade() {
        registry.finish(&owned_key, ticket);
      }
      result
    }
    .boxed()
    .shared();

    calls.insert(
      key.to_string(),
      Entry {
        ticket,
        call: Box::new(call.clone()),
      },
    );
    call
  }

  fn finish(&self, key: &str, ticket: u64) {
    let mut calls = self.lock();
    if calls.get(key).is_some_and(|entry| entry.ticket == ticket) {
      calls.remove(key);
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
    self.calls.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl std::fmt::Debug for InflightRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let keys: Vec<String> = self.lock().keys().cloned().collect();
    f.debug_struct("InflightRegistry")
      .field("keys", &keys)
      .finish_non_exhaustive()
  }
}

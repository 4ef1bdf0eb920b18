//! Optimistic list state with per-action rollback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::action::{position, OptimisticAction, OptimisticItem};
use crate::error::SyncError;
use crate::inflight::InflightRegistry;
use crate::notify::{Notification, Notifier};

/// Snapshot of a list as seen by renderers.
#[derive(Debug, Clone)]
pub struct OptimisticState<T> {
  pub data: Arc<Vec<T>>,
  pub is_loading: bool,
  pub error: Option<String>,
}

impl<T> Default for OptimisticState<T> {
  fn default() -> Self {
    Self {
      data: Arc::new(Vec::new()),
      is_loading: false,
      error: None,
    }
  }
}

/// Per-call presentation options.
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
  pub success_message: Option<String>,
  pub error_message: Option<String>,
  /// Raise the loading flag while the remote call is outstanding
  pub show_loading: bool,
}

impl MutationOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn success(mut self, message: impl Into<String>) -> Self {
    self.success_message = Some(message.into());
    self
  }

  pub fn error(mut self, message: impl Into<String>) -> Self {
    self.error_message = Some(message.into());
    self
  }

  pub fn with_loading(mut self) -> Self {
    self.show_loading = true;
    self
  }
}

/// Restore point for one outstanding action
struct Pending<T> {
  baseline: Arc<Vec<T>>,
  /// List revision right after this action was applied
  applied_revision: u64,
}

struct ListState<T> {
  data: Arc<Vec<T>>,
  /// Bumped on every change to `data`
  revision: u64,
  loading: usize,
  error: Option<String>,
  /// Keyed by a per-call token; identical actions may overlap
  pending: HashMap<u64, Pending<T>>,
  next_token: u64,
}

impl<T: OptimisticItem> ListState<T> {
  fn view(&self) -> OptimisticState<T> {
    OptimisticState {
      data: Arc::clone(&self.data),
      is_loading: self.loading > 0,
      error: self.error.clone(),
    }
  }

  fn replace(&mut self, data: Vec<T>) {
    self.data = Arc::new(data);
    self.revision += 1;
  }

  /// Undo `action`. Restores its snapshot when nothing changed since it was
  /// applied, otherwise inverts it in place and returns true.
  fn undo(&mut self, action: &OptimisticAction<T>, pending: Option<Pending<T>>) -> bool {
    // Already discarded by an explicit rollback
    let Some(pending) = pending else {
      return false;
    };

    // Actions applied later captured this change in their restore points
    for later in self
      .pending
      .values_mut()
      .filter(|later| later.applied_revision > pending.applied_revision)
    {
      later.baseline = Arc::new(action.revert(&later.baseline, &pending.baseline));
    }

    if pending.applied_revision == self.revision {
      self.data = pending.baseline;
      self.revision += 1;
      false
    } else {
      let reverted = action.revert(&self.data, &pending.baseline);
      self.replace(reverted);
      true
    }
  }
}

/// Ordered collection whose changes show locally before the server confirms
/// them, and are undone if it refuses.
///
/// Every write swaps in a new `Arc<Vec<T>>`; a snapshot handed out earlier
/// is never modified.
pub struct OptimisticList<T: OptimisticItem> {
  name: String,
  state: Mutex<ListState<T>>,
  registry: Arc<InflightRegistry>,
  notifier: Arc<dyn Notifier>,
  tx: watch::Sender<OptimisticState<T>>,
}

impl<T: OptimisticItem> OptimisticList<T> {
  /// `name` scopes action ids in the shared registry.
  pub fn new(
    name: impl Into<String>,
    registry: Arc<InflightRegistry>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    let (tx, _rx) = watch::channel(OptimisticState::default());
    Self {
      name: name.into(),
      state: Mutex::new(ListState {
        data: Arc::new(Vec::new()),
        revision: 0,
        loading: 0,
        error: None,
        pending: HashMap::new(),
        next_token: 0,
      }),
      registry,
      notifier,
      tx,
    }
  }

  pub fn snapshot(&self) -> OptimisticState<T> {
    self.lock().view()
  }

  pub fn items(&self) -> Arc<Vec<T>> {
    Arc::clone(&self.lock().data)
  }

  /// Receiver that observes every published state.
  pub fn watch(&self) -> watch::Receiver<OptimisticState<T>> {
    self.tx.subscribe()
  }

  /// Number of actions awaiting their remote result.
  pub fn pending_count(&self) -> usize {
    self.lock().pending.len()
  }

  /// Replace the whole list with authoritative data.
  pub fn replace(&self, items: Vec<T>) {
    let mut state = self.lock();
    state.replace(dedupe(items));
    self.publish(&state);
  }

  pub fn clear_error(&self) {
    let mut state = self.lock();
    if state.error.take().is_some() {
      self.publish(&state);
    }
  }

  /// Reload the list from `fetch`, raising the loading flag meanwhile.
  pub async fn refresh<Fut>(&self, fetch: Fut) -> Result<(), SyncError>
  where
    Fut: Future<Output = Result<Vec<T>, SyncError>>,
  {
    {
      let mut state = self.lock();
      state.loading += 1;
      self.publish(&state);
    }

    let result = fetch.await;

    let mut state = self.lock();
    state.loading -= 1;
    let outcome = match result {
      Ok(items) => {
        state.replace(dedupe(items));
        state.error = None;
        Ok(())
      }
      Err(e) => {
        state.error = Some(e.to_string());
        self.notifier.notify(Notification::error(e.to_string()));
        Err(e)
      }
    };
    self.publish(&state);
    outcome
  }

  /// Restore the oldest outstanding baseline, discarding every optimistic
  /// change still awaiting confirmation. Returns false if none was pending.
  pub fn rollback(&self) -> bool {
    let mut state = self.lock();
    let oldest = state
      .pending
      .values()
      .min_by_key(|pending| pending.applied_revision)
      .map(|pending| Arc::clone(&pending.baseline));
    let Some(baseline) = oldest else {
      return false;
    };
    state.pending.clear();
    state.data = baseline;
    state.revision += 1;
    info!(list = %self.name, "rolled back all pending changes");
    self.publish(&state);
    true
  }

  /// Append `item` now; replace it with the server's copy on success.
  pub async fn add<F, Fut>(&self, item: T, remote: F, opts: MutationOptions) -> Result<T, SyncError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    let placeholder_id = item.id().to_string();
    self
      .mutate(OptimisticAction::Add(item), remote, opts, move |items, created| {
        reconcile(items, &placeholder_id, created)
      })
      .await
  }

  /// Patch item `id` now; replace it with the server's copy on success.
  pub async fn update<F, Fut>(
    &self,
    id: &str,
    patch: T::Patch,
    remote: F,
    opts: MutationOptions,
  ) -> Result<T, SyncError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    let target = id.to_string();
    let action = OptimisticAction::Update {
      id: id.to_string(),
      patch,
    };
    self
      .mutate(action, remote, opts, move |items, updated| {
        let mut next = reconcile(items, &target, updated)?;
        if let Some(index) = position(&next, updated.id()) {
          T::place(&mut next, index);
        }
        Some(next)
      })
      .await
  }

  /// Remove item `id` now; the removal stands on success.
  pub async fn delete<R, F, Fut>(&self, id: &str, remote: F, opts: MutationOptions) -> Result<R, SyncError>
  where
    R: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<R>> + Send + 'static,
  {
    let action = OptimisticAction::Delete { id: id.to_string() };
    self.mutate(action, remote, opts, |_, _| None).await
  }

  /// Move the item at `from` to `to` now; positions are renumbered once the
  /// server confirms.
  pub async fn reorder<R, F, Fut>(
    &self,
    from: usize,
    to: usize,
    remote: F,
    opts: MutationOptions,
  ) -> Result<R, SyncError>
  where
    R: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<R>> + Send + 'static,
  {
    let action = OptimisticAction::Reorder { from, to };
    self
      .mutate(action, remote, opts, move |items, _| {
        let mut next = items.to_vec();
        let moved = to.min(next.len().saturating_sub(1));
        T::resequence(&mut next, moved);
        Some(next)
      })
      .await
  }

  async fn mutate<R, F, Fut, S>(
    &self,
    action: OptimisticAction<T>,
    remote: F,
    opts: MutationOptions,
    on_success: S,
  ) -> Result<R, SyncError>
  where
    R: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<R>> + Send + 'static,
    S: FnOnce(&[T], &R) -> Option<Vec<T>>,
  {
    let action_id = action.action_id();
    let call_key = format!("mutation:{}:{}", self.name, action_id);

    if self.registry.is_inflight(&call_key) {
      debug!(list = %self.name, action = %action_id, "duplicate action rejected");
      return Err(SyncError::DuplicateAction { action_id });
    }

    // Apply locally first; invalid actions never reach the server.
    let token = {
      let mut state = self.lock();
      let next = action.apply(&state.data)?;
      let baseline = Arc::clone(&state.data);
      state.replace(next);
      let token = state.next_token;
      state.next_token += 1;
      let applied_revision = state.revision;
      state.pending.insert(
        token,
        Pending {
          baseline,
          applied_revision,
        },
      );
      if opts.show_loading {
        state.loading += 1;
      }
      self.publish(&state);
      token
    };

    let remote_id = action_id.clone();
    let call = self.registry.try_start(&call_key, move || {
      let fut = remote();
      async move {
        fut.await.map_err(|e| SyncError::Remote {
          action_id: remote_id,
          message: e.to_string(),
        })
      }
    });

    // Lost the race to an identical action: undo quietly
    let Some(call) = call else {
      let mut state = self.lock();
      if opts.show_loading {
        state.loading -= 1;
      }
      let pending = state.pending.remove(&token);
      state.undo(&action, pending);
      self.publish(&state);
      drop(state);
      debug!(list = %self.name, action = %action_id, "duplicate action rejected");
      return Err(SyncError::DuplicateAction { action_id });
    };

    if opts.show_loading {
      self
        .notifier
        .notify(Notification::loading(format!("Saving {}...", action.kind())));
    }

    let result = call.await;

    let mut state = self.lock();
    if opts.show_loading {
      state.loading -= 1;
    }
    let pending = state.pending.remove(&token);

    match result {
      Ok(value) => {
        if let Some(next) = on_success(state.data.as_slice(), &value) {
          state.replace(next);
        }
        self.publish(&state);
        drop(state);
        debug!(list = %self.name, action = %action_id, "action committed");
        if let Some(message) = opts.success_message {
          self.notifier.notify(Notification::success(message));
        }
        Ok(value)
      }
      Err(e) => {
        let conflict = state.undo(&action, pending);

        let message = match &e {
          SyncError::Remote { message, .. } => message.clone(),
          other => other.to_string(),
        };
        state.error = Some(message.clone());
        self.publish(&state);
        drop(state);

        if conflict {
          warn!(
            list = %self.name,
            action = %action_id,
            error = %message,
            "action failed after newer changes, undid it in place"
          );
        } else {
          warn!(list = %self.name, action = %action_id, error = %message, "action rolled back");
        }
        let text = opts
          .error_message
          .unwrap_or_else(|| format!("Could not {} item: {}", action.kind(), message));
        self.notifier.notify(Notification::error(text));

        Err(match e {
          SyncError::Remote { action_id, message } if conflict => {
            SyncError::RollbackConflict { action_id, message }
          }
          other => other,
        })
      }
    }
  }

  fn publish(&self, state: &ListState<T>) {
    self.tx.send_replace(state.view());
  }

  fn lock(&self) -> MutexGuard<'_, ListState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Swap the optimistic item `local_id` for the server's copy.
fn reconcile<T: OptimisticItem>(items: &[T], local_id: &str, confirmed: &T) -> Option<Vec<T>> {
  let mut next = items.to_vec();
  let existing = position(&next, confirmed.id());
  match position(&next, local_id) {
    Some(index) => {
      // A refresh may already have brought in the server copy
      match existing {
        Some(other) if other != index => {
          next[other] = confirmed.clone();
          next.remove(index);
        }
        _ => next[index] = confirmed.clone(),
      }
    }
    None => match existing {
      Some(other) => next[other] = confirmed.clone(),
      None => next.push(confirmed.clone()),
    },
  }
  Some(next)
}

/// Keep the first occurrence of every id.
fn dedupe<T: OptimisticItem>(items: Vec<T>) -> Vec<T> {
  let mut seen = std::collections::HashSet::new();
  let total = items.len();
  let unique: Vec<T> = items
    .into_iter()
    .filter(|item| seen.insert(item.id().to_string()))
    .collect();
  if unique.len() != total {
    warn!(dropped = total - unique.len(), "dropped items with duplicate ids");
  }
  unique
}

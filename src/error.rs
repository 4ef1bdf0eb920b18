//! Error taxonomy shared by the cache and the mutation engine.

use thiserror::Error;

/// Errors surfaced by the sync core.
///
/// Cloneable so a single outcome can be handed to every waiter of a
/// coalesced call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  /// A fetch failed while populating or refreshing the cache and no
  /// previously cached data was available to fall back on.
  #[error("failed to fetch {key}: {message}")]
  Fetch { key: String, message: String },

  /// A remote mutation failed and local state was restored.
  #[error("{action_id} failed: {message}")]
  Remote { action_id: String, message: String },

  /// A remote mutation failed after another change had already been
  /// applied on top of it; only this action was undone.
  #[error("{action_id} failed and was undone against a newer state: {message}")]
  RollbackConflict { action_id: String, message: String },

  /// An identical action is already outstanding. Nothing was done.
  #[error("{action_id} is already in flight")]
  DuplicateAction { action_id: String },

  #[error("no item with id {id}")]
  NotFound { id: String },

  #[error("an item with id {id} already exists")]
  DuplicateId { id: String },

  #[error("index {index} out of range for list of {len}")]
  InvalidIndex { index: usize, len: usize },
}

impl SyncError {
  /// True for the deliberate no-op signal raised on duplicate submissions.
  pub fn is_duplicate(&self) -> bool {
    matches!(self, SyncError::DuplicateAction { .. })
  }
}

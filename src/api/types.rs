//! Request bodies that only exist on the wire.

use serde::Serialize;

/// Body of a column reorder: `task_ids[i]` gets position `i`
#[derive(Debug, Serialize)]
pub struct ReorderRequest<'a> {
  pub task_ids: &'a [String],
}

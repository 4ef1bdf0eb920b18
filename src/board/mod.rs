//! Drag-and-drop on a kanban board.
//!
//! Columns map to task statuses; a drop either moves a task to another
//! status or reorders it within its own column.

mod drag;
mod status;

pub use drag::{DragOutcome, DragReconciler, DropTarget};
pub use status::{infer_status, status_map, StatusMap};

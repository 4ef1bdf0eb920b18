//! Server-side persistence seen from the client.

use async_trait::async_trait;
use color_eyre::Result;

use crate::model::{ActivityEntry, Board, Column, NewTask, Project, Task, TaskPatch, TaskStatus};

/// Remote store for boards and tasks.
///
/// Every call may fail; callers decide whether to fall back to cached data
/// or roll back an optimistic change.
#[async_trait]
pub trait TaskBackend: Send + Sync {
  async fn list_projects(&self) -> Result<Vec<Project>>;

  async fn list_boards(&self, project_id: &str) -> Result<Vec<Board>>;

  async fn list_columns(&self, board_id: &str) -> Result<Vec<Column>>;

  async fn list_tasks(&self, board_id: &str) -> Result<Vec<Task>>;

  async fn create_task(&self, task: &NewTask) -> Result<Task>;

  async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task>;

  async fn delete_task(&self, id: &str) -> Result<()>;

  /// Persist the order of one status group in a single transaction.
  /// `ordered_ids[i]` gets position `i`.
  async fn reorder_tasks(&self, board_id: &str, status: TaskStatus, ordered_ids: &[String])
    -> Result<()>;

  async fn record_activity(&self, entry: &ActivityEntry) -> Result<()>;
}

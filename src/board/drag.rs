use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::status::{status_map, StatusMap};
use crate::backend::TaskBackend;
use crate::error::SyncError;
use crate::model::{ActivityEntry, Column, Task, TaskPatch, TaskStatus};
use crate::notify::Announcer;
use crate::optimistic::{MutationOptions, OptimisticAction, OptimisticList};

/// What the pointer is currently over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
  Column { column_id: String, status: TaskStatus },
  /// Another task; the drop inherits its status
  Task { task_id: String, status: TaskStatus },
}

impl DropTarget {
  pub fn status(&self) -> TaskStatus {
    match self {
      DropTarget::Column { status, .. } | DropTarget::Task { status, .. } => *status,
    }
  }
}

/// How a drop was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
  NoOp,
  /// Status changed; `task` is the server's copy
  Moved {
    task: Task,
    from: TaskStatus,
    to: TaskStatus,
  },
  /// Order of one status group changed
  Reordered {
    status: TaskStatus,
    order: Vec<String>,
  },
}

/// Turns drag gestures on a board into task mutations.
pub struct DragReconciler {
  board_id: String,
  tasks: Arc<OptimisticList<Task>>,
  columns: RwLock<Arc<Vec<Column>>>,
  backend: Arc<dyn TaskBackend>,
  announcer: Arc<dyn Announcer>,
  active: Mutex<Option<String>>,
}

impl DragReconciler {
  pub fn new(
    board_id: impl Into<String>,
    tasks: Arc<OptimisticList<Task>>,
    backend: Arc<dyn TaskBackend>,
    announcer: Arc<dyn Announcer>,
  ) -> Self {
    Self {
      board_id: board_id.into(),
      tasks,
      columns: RwLock::new(Arc::new(Vec::new())),
      backend,
      announcer,
      active: Mutex::new(None),
    }
  }

  pub fn set_columns(&self, columns: Vec<Column>) {
    *self.columns.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(columns);
  }

  /// Lookup built from the current columns. Never cached: a renamed column
  /// takes effect on the next gesture.
  pub fn status_map(&self) -> StatusMap {
    let columns = Arc::clone(&self.columns.read().unwrap_or_else(PoisonError::into_inner));
    status_map(&columns)
  }

  /// Id of the task being dragged
  pub fn active(&self) -> Option<String> {
    self.active_slot().clone()
  }

  /// Pick up `task_id`. Unknown ids are ignored.
  pub fn drag_start(&self, task_id: &str) -> bool {
    let Some(task) = self.find(task_id) else {
      debug!(task = task_id, "drag start on unknown task ignored");
      return false;
    };
    *self.active_slot() = Some(task.id.clone());
    self
      .announcer
      .announce(&format!("Picked up task \"{}\".", task.title));
    true
  }

  /// Resolve the hovered element. Returns `None` when nothing is being
  /// dragged or `target_id` is neither a column nor a task.
  pub fn drag_over(&self, target_id: &str) -> Option<DropTarget> {
    let task = self.find(&self.active()?)?;
    let map = self.status_map();
    let target = self.resolve(target_id, &map)?;

    let over = match &target {
      DropTarget::Column { column_id, .. } => map
        .column(column_id)
        .map(|column| format!("column {}", column.name))
        .unwrap_or_default(),
      DropTarget::Task { task_id, .. } => self
        .find(task_id)
        .map(|other| format!("task \"{}\"", other.title))
        .unwrap_or_default(),
    };
    self
      .announcer
      .announce(&format!("Task \"{}\" is over {}.", task.title, over));
    Some(target)
  }

  pub fn drag_cancel(&self) {
    let Some(active) = self.active_slot().take() else {
      return;
    };
    let title = self.find(&active).map(|task| task.title).unwrap_or(active);
    self.announcer.announce(&format!(
      "Dragging was cancelled. Task \"{}\" was dropped.",
      title
    ));
  }

  /// Drop the active task on `target_id` and submit the resulting change.
  ///
  /// The announcement is made as soon as the drop is resolved, whatever the
  /// server later says.
  pub async fn drag_end(&self, target_id: &str) -> Result<DragOutcome, SyncError> {
    let Some(active) = self.active_slot().take() else {
      return Ok(DragOutcome::NoOp);
    };
    let Some(task) = self.find(&active) else {
      self
        .announcer
        .announce("The dragged task is no longer on the board.");
      return Ok(DragOutcome::NoOp);
    };
    if target_id == task.id {
      self.announce_in_place(&task);
      return Ok(DragOutcome::NoOp);
    }

    let map = self.status_map();
    let Some(target) = self.resolve(target_id, &map) else {
      self.announce_in_place(&task);
      return Ok(DragOutcome::NoOp);
    };

    if target.status() != task.status {
      return self.move_task(task, &target, &map).await;
    }
    match target {
      DropTarget::Task { task_id, .. } => self.reorder_within(task, &task_id, &map).await,
      DropTarget::Column { .. } => {
        self.announce_in_place(&task);
        Ok(DragOutcome::NoOp)
      }
    }
  }

  async fn move_task(
    &self,
    task: Task,
    target: &DropTarget,
    map: &StatusMap,
  ) -> Result<DragOutcome, SyncError> {
    let from = task.status;
    let to = target.status();
    let from_name = map.column_name(from);
    let to_name = match target {
      DropTarget::Column { column_id, .. } => map
        .column(column_id)
        .map(|column| column.name.clone())
        .unwrap_or_else(|| map.column_name(to)),
      DropTarget::Task { .. } => map.column_name(to),
    };

    // Append to the end of the destination group
    let position = self
      .tasks
      .items()
      .iter()
      .filter(|other| other.status == to)
      .map(|other| other.position + 1)
      .max()
      .unwrap_or(0);
    let patch = TaskPatch {
      position: Some(position),
      ..TaskPatch::status_change(to, Utc::now())
    };

    self.announcer.announce(&format!(
      "Task \"{}\" was moved from {} to {}.",
      task.title, from_name, to_name
    ));

    let backend = Arc::clone(&self.backend);
    let id = task.id.clone();
    let remote_patch = patch.clone();
    let updated = self
      .tasks
      .update(
        &task.id,
        patch,
        move || async move { backend.update_task(&id, &remote_patch).await },
        MutationOptions::new().error("Failed to move task"),
      )
      .await?;

    self.record_activity(
      &updated,
      format!("moved {} from {} to {}", updated.title, from_name, to_name),
    );
    Ok(DragOutcome::Moved {
      task: updated,
      from,
      to,
    })
  }

  async fn reorder_within(
    &self,
    task: Task,
    target_id: &str,
    map: &StatusMap,
  ) -> Result<DragOutcome, SyncError> {
    let items = self.tasks.items();
    let index_of = |id: &str| {
      items
        .iter()
        .position(|other| other.id == id)
        .ok_or_else(|| SyncError::NotFound { id: id.to_string() })
    };
    let from = index_of(&task.id)?;
    let to = index_of(target_id)?;

    let status = task.status;
    let order: Vec<String> = OptimisticAction::<Task>::Reorder { from, to }
      .apply(&items)?
      .into_iter()
      .filter(|other| other.status == status)
      .map(|other| other.id)
      .collect();
    let rank = order.iter().position(|id| *id == task.id).unwrap_or(0) + 1;

    self.announcer.announce(&format!(
      "Task \"{}\" was moved to position {} of {} in {}.",
      task.title,
      rank,
      order.len(),
      map.column_name(status)
    ));

    let backend = Arc::clone(&self.backend);
    let board_id = self.board_id.clone();
    let ids = order.clone();
    self
      .tasks
      .reorder(
        from,
        to,
        move || async move { backend.reorder_tasks(&board_id, status, &ids).await },
        MutationOptions::new().error("Failed to reorder tasks"),
      )
      .await?;

    debug!(board = %self.board_id, %status, ?order, "reordered column");
    Ok(DragOutcome::Reordered { status, order })
  }

  /// Log the change and hand it to the backend's activity feed without
  /// waiting.
  fn record_activity(&self, task: &Task, message: String) {
    info!(board = %self.board_id, task = %task.id, "{}", message);
    let entry = ActivityEntry {
      board_id: self.board_id.clone(),
      task_id: task.id.clone(),
      message,
      at: Utc::now(),
    };
    let backend = Arc::clone(&self.backend);
    tokio::spawn(async move {
      if let Err(e) = backend.record_activity(&entry).await {
        warn!(task = %entry.task_id, "Failed to record activity: {}", e);
      }
    });
  }

  fn announce_in_place(&self, task: &Task) {
    self.announcer.announce(&format!(
      "Task \"{}\" was dropped in its original place.",
      task.title
    ));
  }

  fn resolve(&self, target_id: &str, map: &StatusMap) -> Option<DropTarget> {
    if let Some(status) = map.status_of(target_id) {
      return Some(DropTarget::Column {
        column_id: target_id.to_string(),
        status,
      });
    }
    self.find(target_id).map(|task| DropTarget::Task {
      task_id: task.id,
      status: task.status,
    })
  }

  fn find(&self, task_id: &str) -> Option<Task> {
    self.tasks.items().iter().find(|task| task.id == task_id).cloned()
  }

  fn active_slot(&self) -> MutexGuard<'_, Option<String>> {
    self.active.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::testing::MemoryBackend;
  use crate::inflight::InflightRegistry;
  use crate::notify::testing::RecordingNotifier;
  use std::time::Duration;

  fn column(id: &str, name: &str, position: u32) -> Column {
    Column {
      id: id.to_string(),
      board_id: "b1".to_string(),
      name: name.to_string(),
      position,
      status: None,
    }
  }

  fn task(id: &str, status: TaskStatus, position: u32) -> Task {
    Task {
      id: id.to_string(),
      board_id: "b1".to_string(),
      title: format!("Task {}", id),
      description: None,
      status,
      position,
      completed_at: None,
      updated_at: None,
    }
  }

  struct Fixture {
    reconciler: DragReconciler,
    tasks: Arc<OptimisticList<Task>>,
    backend: Arc<MemoryBackend>,
    recorder: Arc<RecordingNotifier>,
  }

  fn fixture() -> Fixture {
    let columns = vec![
      column("c1", "To Do", 0),
      column("c2", "In Progress", 1),
      column("c3", "Done", 2),
    ];
    let items = vec![
      task("t1", TaskStatus::Todo, 0),
      task("t2", TaskStatus::Todo, 1),
      task("t3", TaskStatus::Todo, 2),
      task("t4", TaskStatus::Done, 0),
    ];
    let backend = Arc::new(MemoryBackend::with_board(columns.clone(), items.clone()));
    let recorder = Arc::new(RecordingNotifier::default());
    let tasks = Arc::new(OptimisticList::new(
      "tasks:b1",
      InflightRegistry::new(),
      recorder.clone(),
    ));
    tasks.replace(items);

    let reconciler = DragReconciler::new("b1", tasks.clone(), backend.clone(), recorder.clone());
    reconciler.set_columns(columns);
    Fixture {
      reconciler,
      tasks,
      backend,
      recorder,
    }
  }

  fn local(tasks: &OptimisticList<Task>, id: &str) -> Task {
    tasks.items().iter().find(|t| t.id == id).cloned().unwrap()
  }

  #[tokio::test]
  async fn test_drop_on_done_column_completes_task() {
    let f = fixture();
    assert!(f.reconciler.drag_start("t1"));
    assert_eq!(
      f.reconciler.drag_over("c3"),
      Some(DropTarget::Column {
        column_id: "c3".to_string(),
        status: TaskStatus::Done
      })
    );

    let outcome = f.reconciler.drag_end("c3").await.unwrap();
    let DragOutcome::Moved { task, from, to } = outcome else {
      panic!("expected a move, got {:?}", outcome);
    };
    assert_eq!((from, to), (TaskStatus::Todo, TaskStatus::Done));
    assert!(task.completed_at.is_some());
    assert_eq!(task.position, 1);

    let moved = local(&f.tasks, "t1");
    assert_eq!(moved.status, TaskStatus::Done);
    assert!(moved.completed_at.is_some());
    assert_eq!(
      f.recorder.last_announcement().as_deref(),
      Some("Task \"Task t1\" was moved from To Do to Done.")
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    let activity = f.backend.activity.lock().unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].message, "moved Task t1 from To Do to Done");
  }

  #[tokio::test]
  async fn test_moved_task_lands_after_destination_group() {
    let f = fixture();
    f.reconciler.drag_start("t1");
    f.reconciler.drag_end("c3").await.unwrap();

    let items = f.tasks.items();
    let done: Vec<(&str, u32)> = items
      .iter()
      .filter(|t| t.status == TaskStatus::Done)
      .map(|t| (t.id.as_str(), t.position))
      .collect();
    assert_eq!(done, vec![("t4", 0), ("t1", 1)]);

    // The next reorder works from the order the user sees
    f.reconciler.drag_start("t4");
    let outcome = f.reconciler.drag_end("t1").await.unwrap();
    assert_eq!(
      outcome,
      DragOutcome::Reordered {
        status: TaskStatus::Done,
        order: vec!["t1".to_string(), "t4".to_string()],
      }
    );
  }

  #[tokio::test]
  async fn test_leaving_done_clears_completion() {
    let f = fixture();
    f.reconciler.drag_start("t4");
    let outcome = f.reconciler.drag_end("c2").await.unwrap();
    assert!(matches!(
      outcome,
      DragOutcome::Moved {
        to: TaskStatus::InProgress,
        ..
      }
    ));
    assert_eq!(local(&f.tasks, "t4").completed_at, None);
  }

  #[tokio::test]
  async fn test_drop_on_task_in_other_column_inherits_status() {
    let f = fixture();
    f.reconciler.drag_start("t2");
    let outcome = f.reconciler.drag_end("t4").await.unwrap();
    assert!(matches!(
      outcome,
      DragOutcome::Moved {
        to: TaskStatus::Done,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_reorder_within_column_only_touches_positions() {
    let f = fixture();
    f.reconciler.drag_start("t2");
    let outcome = f.reconciler.drag_end("t1").await.unwrap();

    assert_eq!(
      outcome,
      DragOutcome::Reordered {
        status: TaskStatus::Todo,
        order: vec!["t2".to_string(), "t1".to_string(), "t3".to_string()],
      }
    );

    let items = f.tasks.items();
    let todo: Vec<(&str, u32)> = items
      .iter()
      .filter(|t| t.status == TaskStatus::Todo)
      .map(|t| (t.id.as_str(), t.position))
      .collect();
    assert_eq!(todo, vec![("t2", 0), ("t1", 1), ("t3", 2)]);
    assert!(items.iter().all(|t| t.completed_at.is_none()));
    assert_eq!(local(&f.tasks, "t4").position, 0);

    // One transactional call for the whole column
    let reorders = f.backend.reorders.lock().unwrap();
    assert_eq!(reorders.len(), 1);
    assert_eq!(reorders[0].0, TaskStatus::Todo);
    assert_eq!(
      f.recorder.last_announcement().as_deref(),
      Some("Task \"Task t2\" was moved to position 1 of 3 in To Do.")
    );
  }

  #[tokio::test]
  async fn test_noop_drops_still_announce() {
    let f = fixture();

    f.reconciler.drag_start("t1");
    assert_eq!(f.reconciler.drag_end("t1").await, Ok(DragOutcome::NoOp));

    f.reconciler.drag_start("t1");
    assert_eq!(f.reconciler.drag_end("c1").await, Ok(DragOutcome::NoOp));

    f.reconciler.drag_start("t1");
    assert_eq!(f.reconciler.drag_end("ghost").await, Ok(DragOutcome::NoOp));

    assert_eq!(
      f.recorder.last_announcement().as_deref(),
      Some("Task \"Task t1\" was dropped in its original place.")
    );
    assert!(f.backend.reorders.lock().unwrap().is_empty());
    assert_eq!(local(&f.tasks, "t1"), task("t1", TaskStatus::Todo, 0));
  }

  #[tokio::test]
  async fn test_cancel_clears_active_task() {
    let f = fixture();
    f.reconciler.drag_start("t3");
    assert_eq!(f.reconciler.drag_over("ghost"), None);
    f.reconciler.drag_cancel();

    assert_eq!(f.reconciler.active(), None);
    assert_eq!(
      f.recorder.last_announcement().as_deref(),
      Some("Dragging was cancelled. Task \"Task t3\" was dropped.")
    );
    assert_eq!(f.reconciler.drag_end("c3").await, Ok(DragOutcome::NoOp));
  }

  #[tokio::test]
  async fn test_failed_move_rolls_back_but_was_announced() {
    let f = fixture();
    f.backend.fail("update_task");

    f.reconciler.drag_start("t1");
    let result = f.reconciler.drag_end("c3").await;

    assert!(matches!(result, Err(SyncError::Remote { .. })));
    assert_eq!(local(&f.tasks, "t1"), task("t1", TaskStatus::Todo, 0));
    assert_eq!(f.recorder.errors(), vec!["Failed to move task"]);
    assert_eq!(
      f.recorder.last_announcement().as_deref(),
      Some("Task \"Task t1\" was moved from To Do to Done.")
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(f.backend.activity.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_renamed_column_changes_status_on_next_gesture() {
    let f = fixture();
    f.reconciler.set_columns(vec![
      column("c1", "To Do", 0),
      column("c2", "Code review", 1),
      column("c3", "Done", 2),
    ]);
    f.reconciler.drag_start("t1");
    assert_eq!(
      f.reconciler.drag_over("c2").map(|t| t.status()),
      Some(TaskStatus::Review)
    );
  }
}

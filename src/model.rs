//! Board domain types shared by the cache, the mutation engine and the
//! backend adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::optimistic::OptimisticItem;

/// Kanban status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
  #[default]
  Todo,
  InProgress,
  Review,
  Done,
}

impl TaskStatus {
  pub const ALL: [TaskStatus; 4] = [
    TaskStatus::Todo,
    TaskStatus::InProgress,
    TaskStatus::Review,
    TaskStatus::Done,
  ];

  /// Wire name, as used in API paths
  pub fn as_str(self) -> &'static str {
    match self {
      TaskStatus::Todo => "todo",
      TaskStatus::InProgress => "in-progress",
      TaskStatus::Review => "review",
      TaskStatus::Done => "done",
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      TaskStatus::Todo => "To Do",
      TaskStatus::InProgress => "In Progress",
      TaskStatus::Review => "Review",
      TaskStatus::Done => "Done",
    }
  }

  pub fn is_terminal(self) -> bool {
    self == TaskStatus::Done
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Project summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
}

/// Board summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
  pub id: String,
  pub project_id: String,
  pub name: String,
}

/// Board column configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
  pub id: String,
  pub board_id: String,
  pub name: String,
  pub position: u32,
  /// Explicit status; when absent it is inferred from the column name
  #[serde(default)]
  pub status: Option<TaskStatus>,
}

/// A task card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub board_id: String,
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  pub status: TaskStatus,
  /// Sort key within the task's status group
  pub position: u32,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
  /// A local stand-in shown until the server returns the real task.
  pub fn placeholder(board_id: &str, title: &str, status: TaskStatus, position: u32) -> Self {
    let now = Utc::now();
    Self {
      id: format!(
        "tmp-{}",
        now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros())
      ),
      board_id: board_id.to_string(),
      title: title.to_string(),
      description: None,
      status,
      position,
      completed_at: None,
      updated_at: None,
    }
  }

  pub fn is_placeholder(&self) -> bool {
    self.id.starts_with("tmp-")
  }
}

/// Partial update of a task. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<Option<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<TaskStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub position: Option<u32>,
  /// `Some(None)` clears the completion marker
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
  /// Move to `status`, stamping or clearing the completion marker.
  pub fn status_change(status: TaskStatus, now: DateTime<Utc>) -> Self {
    Self {
      status: Some(status),
      completed_at: Some(status.is_terminal().then_some(now)),
      ..Self::default()
    }
  }

  pub fn apply(&self, task: &mut Task) {
    if let Some(title) = &self.title {
      task.title = title.clone();
    }
    if let Some(description) = &self.description {
      task.description = description.clone();
    }
    if let Some(status) = self.status {
      task.status = status;
    }
    if let Some(position) = self.position {
      task.position = position;
    }
    if let Some(completed_at) = self.completed_at {
      task.completed_at = completed_at;
    }
  }
}

impl OptimisticItem for Task {
  type Patch = TaskPatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn apply_patch(&mut self, patch: &TaskPatch) {
    patch.apply(self);
  }

  /// Renumber the moved task's status group 0..N-1 in list order. Other
  /// groups keep their positions.
  fn resequence(items: &mut [Self], moved: usize) {
    let Some(status) = items.get(moved).map(|task| task.status) else {
      return;
    };
    for (position, task) in items
      .iter_mut()
      .filter(|task| task.status == status)
      .enumerate()
    {
      task.position = position as u32;
    }
  }

  /// Keep each status group ordered by position: the task lands after the
  /// last member of its group that sorts at or before it.
  fn place(items: &mut Vec<Self>, index: usize) {
    if index >= items.len() {
      return;
    }
    let task = items.remove(index);
    let same = |other: &Task| other.status == task.status;
    let at = items
      .iter()
      .rposition(|other| same(other) && other.position <= task.position)
      .map(|i| i + 1)
      .or_else(|| {
        items
          .iter()
          .position(|other| same(other) && other.position > task.position)
      })
      .unwrap_or(index.min(items.len()));
    items.insert(at, task);
  }
}

/// A new task as submitted to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTask {
  pub board_id: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub status: TaskStatus,
  pub position: u32,
}

impl From<&Task> for NewTask {
  fn from(task: &Task) -> Self {
    Self {
      board_id: task.board_id.clone(),
      title: task.title.clone(),
      description: task.description.clone(),
      status: task.status,
      position: task.position,
    }
  }
}

/// Human-readable record of a board change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
  pub board_id: String,
  pub task_id: String,
  pub message: String,
  pub at: DateTime<Utc>,
}

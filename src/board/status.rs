use crate::model::{Column, TaskStatus};

/// Column lookup for one evaluation of a drag gesture.
#[derive(Debug, Clone, Default)]
pub struct StatusMap {
  /// Sorted by column position
  columns: Vec<(Column, TaskStatus)>,
}

/// Build the lookup from the live column list.
pub fn status_map(columns: &[Column]) -> StatusMap {
  let mut columns: Vec<(Column, TaskStatus)> = columns
    .iter()
    .map(|column| {
      let status = column.status.unwrap_or_else(|| infer_status(&column.name));
      (column.clone(), status)
    })
    .collect();
  columns.sort_by_key(|(column, _)| column.position);
  StatusMap { columns }
}

/// Guess a column's status from its display name. Only used for columns
/// without an explicit status.
pub fn infer_status(name: &str) -> TaskStatus {
  let name = name.to_lowercase();
  if name.contains("done") || name.contains("completed") {
    TaskStatus::Done
  } else if name.contains("in progress") {
    TaskStatus::InProgress
  } else if name.contains("review") || name.contains("testing") {
    TaskStatus::Review
  } else {
    TaskStatus::Todo
  }
}

impl StatusMap {
  pub fn status_of(&self, column_id: &str) -> Option<TaskStatus> {
    self
      .columns
      .iter()
      .find(|(column, _)| column.id == column_id)
      .map(|(_, status)| *status)
  }

  pub fn column(&self, column_id: &str) -> Option<&Column> {
    self
      .columns
      .iter()
      .find(|(column, _)| column.id == column_id)
      .map(|(column, _)| column)
  }

  /// First column (by position) that holds `status`.
  pub fn column_for(&self, status: TaskStatus) -> Option<&Column> {
    self
      .columns
      .iter()
      .find(|(_, s)| *s == status)
      .map(|(column, _)| column)
  }

  /// Display name for `status`, falling back to its label when no column
  /// maps to it.
  pub fn column_name(&self, status: TaskStatus) -> String {
    self
      .column_for(status)
      .map(|column| column.name.clone())
      .unwrap_or_else(|| status.label().to_string())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&Column, TaskStatus)> {
    self.columns.iter().map(|(column, status)| (column, *status))
  }

  pub fn len(&self) -> usize {
    self.columns.len()
  }

  pub fn is_empty(&self) -> bool {
    self.columns.is_empty()
  }
}

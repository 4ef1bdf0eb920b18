//! Wiring of caches, the mutation engine and the drag reconciler for one
//! running client.

use color_eyre::Result;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::backend::TaskBackend;
use crate::board::{DragOutcome, DragReconciler, StatusMap};
use crate::cache::{
  CacheConfig, CacheEvent, CacheResult, CacheSource, CacheStore, FetchOptions, NoopSnapshotStore,
  Params, SnapshotStore, SqliteSnapshotStore, Subscription,
};
use crate::config::Config;
use crate::error::SyncError;
use crate::inflight::InflightRegistry;
use crate::model::{Board, Column, NewTask, Project, Task, TaskPatch, TaskStatus};
use crate::notify::{Announcer, Notifier};
use crate::optimistic::{MutationOptions, OptimisticList, OptimisticState};

const PROJECTS: &str = "projects";
const BOARDS: &str = "boards";
const COLUMNS: &str = "columns";
const TASKS: &str = "tasks";

/// Everything shared by the screens of one client: the call registry, one
/// cache per collection and the backend.
pub struct SyncContext {
  backend: Arc<dyn TaskBackend>,
  notifier: Arc<dyn Notifier>,
  announcer: Arc<dyn Announcer>,
  registry: Arc<InflightRegistry>,
  projects: CacheStore<Vec<Project>>,
  boards: CacheStore<Vec<Board>>,
  columns: CacheStore<Vec<Column>>,
  tasks: CacheStore<Vec<Task>>,
}

impl SyncContext {
  pub fn new(
    config: &Config,
    backend: Arc<dyn TaskBackend>,
    notifier: Arc<dyn Notifier>,
    announcer: Arc<dyn Announcer>,
  ) -> Result<Self> {
    let snapshots: Arc<dyn SnapshotStore> = if config.cache.persist {
      let store = match &config.cache.path {
        Some(path) => SqliteSnapshotStore::open(path)?,
        None => SqliteSnapshotStore::open_default()?,
      };
      Arc::new(store)
    } else {
      Arc::new(NoopSnapshotStore)
    };

    Ok(Self::with_snapshots(
      config.cache.cache_config(),
      snapshots,
      backend,
      notifier,
      announcer,
    ))
  }

  pub fn with_snapshots(
    cache: CacheConfig,
    snapshots: Arc<dyn SnapshotStore>,
    backend: Arc<dyn TaskBackend>,
    notifier: Arc<dyn Notifier>,
    announcer: Arc<dyn Announcer>,
  ) -> Self {
    let registry = InflightRegistry::new();

    Self {
      projects: CacheStore::new(PROJECTS, cache, Arc::clone(&registry), Arc::clone(&snapshots)),
      boards: CacheStore::new(BOARDS, cache, Arc::clone(&registry), Arc::clone(&snapshots)),
      columns: CacheStore::new(COLUMNS, cache, Arc::clone(&registry), Arc::clone(&snapshots)),
      tasks: CacheStore::new(TASKS, cache, Arc::clone(&registry), snapshots),
      backend,
      notifier,
      announcer,
      registry,
    }
  }

  pub fn registry(&self) -> &Arc<InflightRegistry> {
    &self.registry
  }

  pub fn tasks_cache(&self) -> &CacheStore<Vec<Task>> {
    &self.tasks
  }

  pub async fn projects(&self) -> Result<CacheResult<Vec<Project>>, SyncError> {
    let backend = Arc::clone(&self.backend);
    self
      .projects
      .fetch_with_cache(
        PROJECTS,
        &Params::new(),
        move || async move { backend.list_projects().await },
        FetchOptions::background(),
      )
      .await
  }

  pub async fn boards(&self, project_id: &str) -> Result<CacheResult<Vec<Board>>, SyncError> {
    let backend = Arc::clone(&self.backend);
    let id = project_id.to_string();
    self
      .boards
      .fetch_with_cache(
        BOARDS,
        &Params::new().with("project", project_id),
        move || async move { backend.list_boards(&id).await },
        FetchOptions::background(),
      )
      .await
  }

  /// Load a board through the caches and bind a session to it.
  pub async fn open_board(&self, board_id: &str) -> Result<BoardSession, SyncError> {
    let session = BoardSession::new(self, board_id);
    session.refresh(false).await?;
    info!(board = board_id, "board opened");
    Ok(session)
  }

  /// Stop timers and flush snapshots. The context is unusable afterwards.
  pub fn shutdown(&self) {
    self.projects.shutdown();
    self.boards.shutdown();
    self.columns.shutdown();
    self.tasks.shutdown();
  }
}

/// One open board: its columns, its tasks as an optimistic list and the
/// drag reconciler acting on them.
pub struct BoardSession {
  board_id: String,
  params: Params,
  backend: Arc<dyn TaskBackend>,
  columns_cache: CacheStore<Vec<Column>>,
  tasks_cache: CacheStore<Vec<Task>>,
  tasks: Arc<OptimisticList<Task>>,
  drag: Arc<DragReconciler>,
  _subscriptions: Vec<Subscription>,
}

impl BoardSession {
  fn new(ctx: &SyncContext, board_id: &str) -> Self {
    let params = Params::new().with("board", board_id);
    let tasks = Arc::new(OptimisticList::new(
      format!("tasks:{}", board_id),
      Arc::clone(&ctx.registry),
      Arc::clone(&ctx.notifier),
    ));
    let drag = Arc::new(DragReconciler::new(
      board_id,
      Arc::clone(&tasks),
      Arc::clone(&ctx.backend),
      Arc::clone(&ctx.announcer),
    ));

    // Background refreshes land in the cache; forward them to the views.
    let list: Weak<OptimisticList<Task>> = Arc::downgrade(&tasks);
    let on_tasks = ctx.tasks.subscribe(TASKS, &params, move |event| {
      let (Some(list), CacheEvent::Updated { data, .. }) = (list.upgrade(), event) else {
        return;
      };
      // Never clobber changes that are still waiting for the server
      if list.pending_count() == 0 {
        list.replace(sorted(data.clone()));
      }
    });
    let reconciler: Weak<DragReconciler> = Arc::downgrade(&drag);
    let on_columns = ctx.columns.subscribe(COLUMNS, &params, move |event| {
      if let (Some(drag), CacheEvent::Updated { data, .. }) = (reconciler.upgrade(), event) {
        drag.set_columns(data.clone());
      }
    });

    Self {
      board_id: board_id.to_string(),
      params,
      backend: Arc::clone(&ctx.backend),
      columns_cache: ctx.columns.clone(),
      tasks_cache: ctx.tasks.clone(),
      tasks,
      drag,
      _subscriptions: vec![on_tasks, on_columns],
    }
  }

  pub fn board_id(&self) -> &str {
    &self.board_id
  }

  pub fn state(&self) -> OptimisticState<Task> {
    self.tasks.snapshot()
  }

  pub fn tasks(&self) -> &Arc<OptimisticList<Task>> {
    &self.tasks
  }

  pub fn drag(&self) -> &DragReconciler {
    &self.drag
  }

  pub fn status_map(&self) -> StatusMap {
    self.drag.status_map()
  }

  /// Tasks in `status`, in display order
  pub fn column_tasks(&self, status: TaskStatus) -> Vec<Task> {
    self
      .tasks
      .items()
      .iter()
      .filter(|task| task.status == status)
      .cloned()
      .collect()
  }

  /// Reload columns and tasks. Without `force`, stale data is served at once
  /// and refreshed in the background.
  pub async fn refresh(&self, force: bool) -> Result<CacheSource, SyncError> {
    let options = if force {
      FetchOptions::force()
    } else {
      FetchOptions::background()
    };

    let backend = Arc::clone(&self.backend);
    let id = self.board_id.clone();
    let columns = self
      .columns_cache
      .fetch_with_cache(
        COLUMNS,
        &self.params,
        move || async move { backend.list_columns(&id).await },
        options,
      )
      .await?;
    self.drag.set_columns(columns.data);

    let backend = Arc::clone(&self.backend);
    let id = self.board_id.clone();
    let mut source = CacheSource::Network;
    self
      .tasks
      .refresh(async {
        let result = self
          .tasks_cache
          .fetch_with_cache(
            TASKS,
            &self.params,
            move || async move { backend.list_tasks(&id).await },
            options,
          )
          .await?;
        source = result.source;
        Ok(sorted(result.data))
      })
      .await?;

    debug!(board = %self.board_id, ?source, "board refreshed");
    Ok(source)
  }

  pub async fn create_task(&self, title: &str, status: TaskStatus) -> Result<Task, SyncError> {
    let position = self
      .tasks
      .items()
      .iter()
      .filter(|task| task.status == status)
      .map(|task| task.position + 1)
      .max()
      .unwrap_or(0);
    let placeholder = Task::placeholder(&self.board_id, title, status, position);
    let new_task = NewTask::from(&placeholder);

    let backend = Arc::clone(&self.backend);
    let result = self
      .tasks
      .add(
        placeholder,
        move || async move { backend.create_task(&new_task).await },
        MutationOptions::new()
          .success("Task created")
          .error("Failed to create task")
          .with_loading(),
      )
      .await;
    self.after_commit(result)
  }

  pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, SyncError> {
    let backend = Arc::clone(&self.backend);
    let task_id = id.to_string();
    let remote_patch = patch.clone();
    let result = self
      .tasks
      .update(
        id,
        patch,
        move || async move { backend.update_task(&task_id, &remote_patch).await },
        MutationOptions::new()
          .success("Task updated")
          .error("Failed to update task"),
      )
      .await;
    self.after_commit(result)
  }

  pub async fn delete_task(&self, id: &str) -> Result<(), SyncError> {
    let backend = Arc::clone(&self.backend);
    let task_id = id.to_string();
    let result = self
      .tasks
      .delete(
        id,
        move || async move { backend.delete_task(&task_id).await },
        MutationOptions::new()
          .success("Task deleted")
          .error("Failed to delete task"),
      )
      .await;
    self.after_commit(result)
  }

  /// Finish the current drag on `target_id`.
  pub async fn drop_on(&self, target_id: &str) -> Result<DragOutcome, SyncError> {
    let result = self.drag.drag_end(target_id).await;
    match result {
      Ok(DragOutcome::NoOp) => result,
      other => self.after_commit(other),
    }
  }

  /// The cached task list no longer matches the server once a mutation
  /// commits; the next read refetches it.
  fn after_commit<R>(&self, result: Result<R, SyncError>) -> Result<R, SyncError> {
    if result.is_ok() {
      self.tasks_cache.mark_stale(TASKS, &self.params);
    }
    result
  }
}

/// Stable sort by position, so each status group is in display order.
fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
  tasks.sort_by_key(|task| task.position);
  tasks
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::testing::MemoryBackend;
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

  fn setup() -> (SyncContext, Arc<MemoryBackend>, Arc<RecordingNotifier>) {
    let backend = Arc::new(MemoryBackend::with_board(
      vec![
        column("c2", "In Progress", 1),
        column("c1", "To Do", 0),
        column("c3", "Done", 2),
      ],
      vec![
        task("t2", TaskStatus::Todo, 1),
        task("t1", TaskStatus::Todo, 0),
        task("t9", TaskStatus::Done, 0),
      ],
    ));
    let recorder = Arc::new(RecordingNotifier::default());
    let ctx = SyncContext::with_snapshots(
      CacheConfig::default(),
      Arc::new(NoopSnapshotStore),
      backend.clone(),
      recorder.clone(),
      recorder.clone(),
    );
    (ctx, backend, recorder)
  }

  fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.id.as_str()).collect()
  }

  #[tokio::test]
  async fn test_open_board_loads_sorted_columns_and_tasks() {
    let (ctx, _, _) = setup();
    let session = ctx.open_board("b1").await.unwrap();

    assert_eq!(ids(&session.column_tasks(TaskStatus::Todo)), vec!["t1", "t2"]);
    assert_eq!(ids(&session.column_tasks(TaskStatus::Done)), vec!["t9"]);
    let map = session.status_map();
    let names: Vec<&str> = map.iter().map(|(c, _)| c.name.as_str()).collect();
    assert_eq!(names, vec!["To Do", "In Progress", "Done"]);
    assert!(ctx.registry().is_empty());
  }

  #[tokio::test]
  async fn test_create_task_reconciles_and_marks_cache_stale() {
    let (ctx, backend, recorder) = setup();
    let session = ctx.open_board("b1").await.unwrap();
    let params = Params::new().with("board", "b1");
    assert!(!ctx.tasks_cache().is_stale_data(TASKS, &params));

    let created = session
      .create_task("Write changelog", TaskStatus::Todo)
      .await
      .unwrap();

    assert_eq!(created.id, "srv-1");
    assert_eq!(created.position, 2);
    let todo = session.column_tasks(TaskStatus::Todo);
    assert_eq!(ids(&todo), vec!["t1", "t2", "srv-1"]);
    assert!(todo.iter().all(|t| !t.is_placeholder()));
    assert!(ctx.tasks_cache().is_stale_data(TASKS, &params));
    assert_eq!(backend.tasks.lock().unwrap().len(), 4);
    assert!(recorder
      .notifications
      .lock()
      .unwrap()
      .iter()
      .any(|n| n.message == "Task created"));
  }

  #[tokio::test]
  async fn test_slow_create_shows_placeholder_while_loading() {
    let (ctx, backend, _) = setup();
    let session = Arc::new(ctx.open_board("b1").await.unwrap());
    backend.set_latency(Duration::from_millis(30));

    let worker = session.clone();
    let handle = tokio::spawn(async move { worker.create_task("Slow", TaskStatus::Todo).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let state = session.state();
    assert!(state.is_loading);
    assert!(state.data.iter().any(|t| t.is_placeholder() && t.title == "Slow"));

    let created = handle.await.unwrap().unwrap();
    let state = session.state();
    assert!(!state.is_loading);
    assert!(state.data.iter().any(|t| t.id == created.id));
    assert!(state.data.iter().all(|t| !t.is_placeholder()));
  }

  #[tokio::test]
  async fn test_failed_delete_leaves_cache_fresh() {
    let (ctx, backend, recorder) = setup();
    let session = ctx.open_board("b1").await.unwrap();
    backend.fail("delete_task");

    assert!(session.delete_task("t1").await.is_err());
    assert_eq!(ids(&session.column_tasks(TaskStatus::Todo)), vec!["t1", "t2"]);
    assert!(!ctx
      .tasks_cache()
      .is_stale_data(TASKS, &Params::new().with("board", "b1")));
    assert_eq!(recorder.errors(), vec!["Failed to delete task"]);
  }

  #[tokio::test]
  async fn test_stale_board_refreshes_in_background() {
    let (ctx, backend, _) = setup();
    let session = ctx.open_board("b1").await.unwrap();

    session
      .update_task(
        "t2",
        TaskPatch {
          title: Some("Renamed".to_string()),
          ..TaskPatch::default()
        },
      )
      .await
      .unwrap();
    // Someone else adds a task on the server
    backend
      .tasks
      .lock()
      .unwrap()
      .push(task("t5", TaskStatus::Todo, 2));

    let source = session.refresh(false).await.unwrap();
    assert_eq!(source, CacheSource::CacheStale);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let todo = session.column_tasks(TaskStatus::Todo);
    assert_eq!(ids(&todo), vec!["t1", "t2", "t5"]);
    assert_eq!(todo[1].title, "Renamed");
    assert_eq!(backend.list_task_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_drop_on_column_marks_cache_stale() {
    let (ctx, _, _) = setup();
    let session = ctx.open_board("b1").await.unwrap();

    assert!(session.drag().drag_start("t1"));
    let outcome = session.drop_on("c3").await.unwrap();
    assert!(matches!(outcome, DragOutcome::Moved { .. }));
    assert!(ctx
      .tasks_cache()
      .is_stale_data(TASKS, &Params::new().with("board", "b1")));
  }

  #[tokio::test]
  async fn test_offline_open_serves_cached_board() {
    let (ctx, backend, _) = setup();
    let session = ctx.open_board("b1").await.unwrap();
    drop(session);

    backend.fail("list_tasks");
    backend.fail("list_columns");
    let session = ctx.open_board("b1").await.unwrap();
    let source = session.refresh(true).await.unwrap();
    assert_eq!(source, CacheSource::Offline);
    assert_eq!(session.column_tasks(TaskStatus::Todo).len(), 2);
  }

  #[tokio::test]
  async fn test_shutdown_clears_caches() {
    let (ctx, _, _) = setup();
    let _session = ctx.open_board("b1").await.unwrap();
    ctx.shutdown();
    assert!(ctx.tasks_cache().is_empty());
  }
}

use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::board::DragOutcome;
use crate::context::{BoardSession, SyncContext};
use crate::event::{Event, EventHandler};
use crate::model::{Task, TaskStatus};
use crate::notify::{Notification, NotificationLevel, UiMessage};
use crate::ui;
use crate::ui::input::{InputResult, TitleInput};

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  /// Carrying task `task_id`; the cursor picks the drop target
  Dragging { task_id: String },
  /// Typing the title of a new task
  NewTask,
}

/// Cursor on the board: a column and a row within it. A row one past the
/// last task points at the column itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
  pub column: usize,
  pub row: usize,
}

/// One column as rendered
pub struct ColumnView {
  pub id: String,
  pub name: String,
  pub status: TaskStatus,
  pub tasks: Vec<Task>,
}

/// Main application state
pub struct App {
  ctx: Arc<SyncContext>,
  board_id: String,
  api_url: String,
  session: Option<Arc<BoardSession>>,
  mode: Mode,
  cursor: Cursor,
  input: TitleInput,
  /// Last toast from the sync core
  notification: Option<Notification>,
  /// Last live-region announcement
  announcement: Option<String>,
  loading: bool,
  event_tx: mpsc::UnboundedSender<Event>,
  should_quit: bool,
}

impl App {
  pub fn new(ctx: Arc<SyncContext>, board_id: String, api_url: String) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();
    Self {
      ctx,
      board_id,
      api_url,
      session: None,
      mode: Mode::Normal,
      cursor: Cursor::default(),
      input: TitleInput::default(),
      notification: None,
      announcement: None,
      loading: true,
      event_tx: tx,
      should_quit: false,
    }
  }

  pub async fn run(&mut self, ui_messages: mpsc::UnboundedReceiver<UiMessage>) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();
    events.forward(ui_messages);

    self.open_board();

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  fn open_board(&mut self) {
    let ctx = Arc::clone(&self.ctx);
    let board_id = self.board_id.clone();
    let tx = self.event_tx.clone();
    self.loading = true;

    tokio::spawn(async move {
      let result = ctx.open_board(&board_id).await.map(Arc::new);
      let _ = tx.send(Event::BoardOpened(result));
    });
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {}
      Event::Ui(UiMessage::Notification(notification)) => {
        self.notification = Some(notification);
      }
      Event::Ui(UiMessage::Announcement(text)) => self.announcement = Some(text),
      Event::BoardOpened(Ok(session)) => {
        self.loading = false;
        self.session = Some(session);
        self.clamp_cursor();
      }
      Event::BoardOpened(Err(e)) => {
        self.loading = false;
        self.notification = Some(Notification::error(e.to_string()));
      }
      Event::Dropped(Ok(outcome)) => {
        debug!(?outcome, "drop resolved");
        self.clamp_cursor();
      }
      Event::Dropped(Err(e)) => {
        // The engine already notified and rolled back
        warn!(error = %e, "drop was not applied");
        self.clamp_cursor();
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    match self.mode.clone() {
      Mode::Normal => self.handle_normal_key(key),
      Mode::Dragging { task_id } => self.handle_drag_key(key, &task_id),
      Mode::NewTask => self.handle_input_key(key),
    }
  }

  fn handle_normal_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Up | KeyCode::Char('k') => self.move_cursor(0, -1),
      KeyCode::Down | KeyCode::Char('j') => self.move_cursor(0, 1),
      KeyCode::Left | KeyCode::Char('h') => self.move_cursor(-1, 0),
      KeyCode::Right | KeyCode::Char('l') => self.move_cursor(1, 0),
      KeyCode::Char(' ') => self.pick_up(),
      KeyCode::Char('n') => {
        self.input.clear();
        self.mode = Mode::NewTask;
      }
      KeyCode::Char('d') => self.delete_selected(),
      KeyCode::Char('r') => self.refresh(),
      KeyCode::Esc => self.notification = None,
      _ => {}
    }
  }

  fn handle_drag_key(&mut self, key: KeyEvent, task_id: &str) {
    let Some(session) = self.session.clone() else {
      self.mode = Mode::Normal;
      return;
    };
    match key.code {
      KeyCode::Up | KeyCode::Char('k') => self.hover(&session, 0, -1),
      KeyCode::Down | KeyCode::Char('j') => self.hover(&session, 0, 1),
      KeyCode::Left | KeyCode::Char('h') => self.hover(&session, -1, 0),
      KeyCode::Right | KeyCode::Char('l') => self.hover(&session, 1, 0),
      KeyCode::Char(' ') | KeyCode::Enter => {
        let target = self.target_id().unwrap_or_else(|| task_id.to_string());
        self.mode = Mode::Normal;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
          let result = session.drop_on(&target).await;
          let _ = tx.send(Event::Dropped(result));
        });
      }
      KeyCode::Esc => {
        session.drag().drag_cancel();
        self.mode = Mode::Normal;
      }
      _ => {}
    }
  }

  fn handle_input_key(&mut self, key: KeyEvent) {
    match self.input.handle_key(key) {
      InputResult::Consumed => {}
      InputResult::Cancelled => self.mode = Mode::Normal,
      InputResult::Submitted(title) => {
        self.mode = Mode::Normal;
        let title = title.trim().to_string();
        let (Some(session), Some(column)) = (self.session.clone(), self.current_column()) else {
          return;
        };
        if title.is_empty() {
          return;
        }
        tokio::spawn(async move {
          // Failures are reported through the notifier
          let _ = session.create_task(&title, column.status).await;
        });
      }
    }
  }

  fn pick_up(&mut self) {
    let (Some(session), Some(task)) = (self.session.clone(), self.selected_task()) else {
      return;
    };
    if session.drag().drag_start(&task.id) {
      self.mode = Mode::Dragging { task_id: task.id };
    }
  }

  fn hover(&mut self, session: &BoardSession, dx: i32, dy: i32) {
    self.move_cursor(dx, dy);
    if let Some(target) = self.target_id() {
      session.drag().drag_over(&target);
    }
  }

  fn delete_selected(&mut self) {
    let (Some(session), Some(task)) = (self.session.clone(), self.selected_task()) else {
      return;
    };
    tokio::spawn(async move {
      let _ = session.delete_task(&task.id).await;
    });
  }

  fn refresh(&mut self) {
    let Some(session) = self.session.clone() else {
      self.open_board();
      return;
    };
    tokio::spawn(async move {
      let _ = session.refresh(true).await;
    });
  }

  fn move_cursor(&mut self, dx: i32, dy: i32) {
    let columns = self.columns();
    if columns.is_empty() {
      return;
    }
    let column = (self.cursor.column as i32 + dx).rem_euclid(columns.len() as i32) as usize;
    // While dragging the cursor may rest on the column itself (one past the end)
    let extra = usize::from(matches!(self.mode, Mode::Dragging { .. }));
    let rows = columns[column].tasks.len() + extra;
    let row = if dx != 0 || rows == 0 {
      self.cursor.row.min(rows.saturating_sub(1))
    } else {
      (self.cursor.row as i32 + dy).rem_euclid(rows as i32) as usize
    };
    self.cursor = Cursor { column, row };
  }

  fn clamp_cursor(&mut self) {
    self.move_cursor(0, 0);
  }

  /// Task or column id under the cursor
  fn target_id(&self) -> Option<String> {
    let column = self.current_column()?;
    Some(
      column
        .tasks
        .get(self.cursor.row)
        .map(|task| task.id.clone())
        .unwrap_or(column.id),
    )
  }

  fn current_column(&self) -> Option<ColumnView> {
    self.columns().into_iter().nth(self.cursor.column)
  }

  fn selected_task(&self) -> Option<Task> {
    self.current_column()?.tasks.get(self.cursor.row).cloned()
  }

  // Accessors for UI rendering

  /// Columns in board order with their tasks
  pub fn columns(&self) -> Vec<ColumnView> {
    let Some(session) = &self.session else {
      return Vec::new();
    };
    let map = session.status_map();
    map
      .iter()
      .map(|(column, status)| {
        // Tasks show under the first column holding their status
        let owns = map.column_for(status).is_some_and(|first| first.id == column.id);
        ColumnView {
          id: column.id.clone(),
          name: column.name.clone(),
          status,
          tasks: if owns {
            session.column_tasks(status)
          } else {
            Vec::new()
          },
        }
      })
      .collect()
  }

  pub fn cursor(&self) -> Cursor {
    self.cursor
  }

  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn input(&self) -> &TitleInput {
    &self.input
  }

  pub fn board_id(&self) -> &str {
    &self.board_id
  }

  pub fn api_url(&self) -> &str {
    &self.api_url
  }

  pub fn is_loading(&self) -> bool {
    self.loading
      || self
        .session
        .as_ref()
        .is_some_and(|session| session.state().is_loading)
  }

  pub fn error(&self) -> Option<String> {
    self.session.as_ref().and_then(|session| session.state().error)
  }

  pub fn notification(&self) -> Option<&Notification> {
    self
      .notification
      .as_ref()
      .filter(|n| n.level != NotificationLevel::Loading || self.is_loading())
  }

  pub fn announcement(&self) -> Option<&str> {
    self.announcement.as_deref()
  }
}

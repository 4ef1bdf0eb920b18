use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::board::DragOutcome;
use crate::context::BoardSession;
use crate::error::SyncError;
use crate::notify::UiMessage;

/// Application events
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for UI refresh
  Tick,
  /// Notification or live-region announcement from the sync core
  Ui(UiMessage),
  /// Board finished loading
  BoardOpened(Result<Arc<BoardSession>, SyncError>),
  /// A drop was resolved and, if it changed anything, confirmed or refused
  Dropped(Result<DragOutcome, SyncError>),
}

/// Event handler that produces events from terminal input and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let input_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
      if event::poll(tick_rate).unwrap_or(false) {
        if let Ok(CrosstermEvent::Key(key)) = event::read() {
          if key.kind == KeyEventKind::Press && input_tx.send(Event::Key(key)).is_err() {
            break;
          }
        }
      } else if input_tx.send(Event::Tick).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  /// Sender for background tasks
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Forward notifications from the sync core into this event stream.
  pub fn forward(&self, mut messages: mpsc::UnboundedReceiver<UiMessage>) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      while let Some(message) = messages.recv().await {
        if tx.send(Event::Ui(message)).is_err() {
          break;
        }
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

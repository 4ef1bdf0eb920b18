mod board;
mod bars;
pub mod input;

use crate::app::{App, Mode};
use ratatui::prelude::*;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Board
      Constraint::Length(1), // Announcement / notification
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  bars::draw_header(frame, chunks[0], app);
  board::draw_board(frame, chunks[1], app);
  bars::draw_message_line(frame, chunks[2], app);

  match app.mode() {
    Mode::NewTask => bars::draw_input_line(frame, chunks[3], app.input()),
    mode => bars::draw_status_bar(frame, chunks[3], mode),
  }
}

use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::input::TitleInput;
use crate::app::{App, Mode};
use crate::model::TaskStatus;
use crate::notify::NotificationLevel;

/// Draw the header bar with logo, API host and board
pub fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
  let mut spans = vec![
    Span::styled(" boardsync ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", extract_domain(app.api_url())),
      Style::default().fg(Color::White),
    ),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", app.board_id()),
      Style::default().fg(Color::Yellow).bold(),
    ),
  ];
  if app.is_loading() {
    spans.push(Span::styled(" syncing...", Style::default().fg(Color::DarkGray)));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

/// Latest notification, falling back to the latest announcement
pub fn draw_message_line(frame: &mut Frame, area: Rect, app: &App) {
  let line = match (app.notification(), app.error()) {
    (Some(notification), _) => {
      let color = match notification.level {
        NotificationLevel::Success => Color::Green,
        NotificationLevel::Error => Color::Red,
        NotificationLevel::Loading => Color::DarkGray,
      };
      Span::styled(
        format!(" {}", notification.message),
        Style::default().fg(color),
      )
    }
    (None, Some(error)) => Span::styled(format!(" {}", error), Style::default().fg(Color::Red)),
    (None, None) => Span::styled(
      format!(" {}", app.announcement().unwrap_or_default()),
      Style::default().fg(Color::Gray),
    ),
  };
  frame.render_widget(Paragraph::new(line), area);
}

pub fn draw_status_bar(frame: &mut Frame, area: Rect, mode: &Mode) {
  let (hint, color) = match mode {
    Mode::Dragging { .. } => (
      " h/j/k/l:choose target  space/Enter:drop  Esc:cancel",
      Color::Magenta,
    ),
    _ => (
      " h/j/k/l:nav  space:pick up  n:new  d:delete  r:refresh  q:quit",
      Color::DarkGray,
    ),
  };
  frame.render_widget(Paragraph::new(hint).style(Style::default().fg(color)), area);
}

pub fn draw_input_line(frame: &mut Frame, area: Rect, input: &TitleInput) {
  let prompt = " New task: ";
  frame.render_widget(
    Paragraph::new(format!("{}{}", prompt, input.value())).style(Style::default().fg(Color::Yellow)),
    area,
  );
  frame.set_cursor_position((
    area.x + (prompt.len() + input.value().chars().count()) as u16,
    area.y,
  ));
}

/// Truncate to `max_len` characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

pub fn status_color(status: TaskStatus) -> Color {
  match status {
    TaskStatus::Done => Color::Green,
    TaskStatus::InProgress | TaskStatus::Review => Color::Yellow,
    TaskStatus::Todo => Color::White,
  }
}

/// Host part of the API URL
fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

use super::bars::{status_color, truncate};
use crate::app::{App, Mode};

/// Render the board as one bordered list per column
pub fn draw_board(frame: &mut Frame, area: Rect, app: &App) {
  let columns = app.columns();
  if columns.is_empty() {
    let content = if app.is_loading() {
      "Loading board..."
    } else {
      "No columns configured for this board. Press 'r' to retry."
    };
    let block = Block::default()
      .title(format!(" {} ", app.board_id()))
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));
    let paragraph = Paragraph::new(content)
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let constraints: Vec<Constraint> = columns
    .iter()
    .map(|_| Constraint::Ratio(1, columns.len() as u32))
    .collect();
  let col_areas = Layout::horizontal(constraints).split(area);

  let cursor = app.cursor();
  let dragged = match app.mode() {
    Mode::Dragging { task_id } => Some(task_id.as_str()),
    _ => None,
  };

  for (col_idx, column) in columns.iter().enumerate() {
    let is_selected_column = col_idx == cursor.column;
    // Dropping on the column itself rather than on one of its tasks
    let column_targeted =
      dragged.is_some() && is_selected_column && cursor.row >= column.tasks.len();

    let border_color = if column_targeted {
      Color::Magenta
    } else if is_selected_column {
      Color::Yellow
    } else {
      Color::Blue
    };

    let width = col_areas[col_idx].width.saturating_sub(4) as usize;
    let title = format!(
      " {} ({}) ",
      truncate(&column.name, width.saturating_sub(5)),
      column.tasks.len()
    );
    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(border_color));

    let items: Vec<ListItem> = column
      .tasks
      .iter()
      .map(|task| {
        let mut style = Style::default().fg(status_color(task.status));
        if Some(task.id.as_str()) == dragged {
          style = style.add_modifier(Modifier::ITALIC | Modifier::DIM);
        }
        if task.is_placeholder() {
          style = style.fg(Color::DarkGray);
        }
        ListItem::new(Line::from(Span::styled(truncate(&task.title, width), style)))
      })
      .collect();

    let highlight = if dragged.is_some() {
      Style::default().bg(Color::Magenta).fg(Color::Black)
    } else {
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD)
    };
    let list = List::new(items)
      .block(block)
      .highlight_style(highlight)
      .highlight_symbol("> ");

    if is_selected_column && !column_targeted {
      let mut state = ListState::default();
      state.select(Some(cursor.row));
      frame.render_stateful_widget(list, col_areas[col_idx], &mut state);
    } else {
      frame.render_widget(list, col_areas[col_idx]);
    }
  }
}

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Result of a key press in the title prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputResult {
  Consumed,
  /// Enter pressed, here's the title
  Submitted(String),
  Cancelled,
}

/// Single-line prompt for a task title
#[derive(Debug, Clone, Default)]
pub struct TitleInput {
  buffer: String,
}

impl TitleInput {
  pub fn value(&self) -> &str {
    &self.buffer
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
  }

  pub fn handle_key(&mut self, key: KeyEvent) -> InputResult {
    match key.code {
      KeyCode::Esc => InputResult::Cancelled,
      KeyCode::Enter => InputResult::Submitted(std::mem::take(&mut self.buffer)),
      KeyCode::Backspace => {
        self.buffer.pop();
        InputResult::Consumed
      }
      KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.buffer.clear();
        InputResult::Consumed
      }
      KeyCode::Char(c) => {
        self.buffer.push(c);
        InputResult::Consumed
      }
      _ => InputResult::Consumed,
    }
  }
}

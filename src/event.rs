use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::sync::Lifecycle;

/// Terminal events for the watch screen
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Terminal gained or lost focus
  Lifecycle(Lifecycle),
  /// Periodic tick for query polling
  Tick,
}

impl Event {
  fn from_terminal(evt: CrosstermEvent) -> Option<Self> {
    match evt {
      CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => Some(Event::Key(key)),
      CrosstermEvent::FocusGained => Some(Event::Lifecycle(Lifecycle::Foreground)),
      CrosstermEvent::FocusLost => Some(Event::Lifecycle(Lifecycle::Background)),
      _ => None,
    }
  }
}

/// Event handler that produces events from terminal input and a tick timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // crossterm polling blocks, keep it off the async workers
    tokio::task::spawn_blocking(move || loop {
      let next = if event::poll(tick_rate).unwrap_or(false) {
        match event::read() {
          Ok(evt) => Event::from_terminal(evt),
          Err(_) => None,
        }
      } else {
        Some(Event::Tick)
      };

      if let Some(next) = next {
        if tx.send(next).is_err() {
          break;
        }
      } else if tx.is_closed() {
        break;
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::{KeyCode, KeyModifiers};

  #[test]
  fn test_focus_maps_to_lifecycle() {
    assert!(matches!(
      Event::from_terminal(CrosstermEvent::FocusGained),
      Some(Event::Lifecycle(Lifecycle::Foreground))
    ));
    assert!(matches!(
      Event::from_terminal(CrosstermEvent::FocusLost),
      Some(Event::Lifecycle(Lifecycle::Background))
    ));
  }

  #[test]
  fn test_key_release_is_ignored() {
    let mut key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
    assert!(matches!(
      Event::from_terminal(CrosstermEvent::Key(key)),
      Some(Event::Key(_))
    ));

    key.kind = KeyEventKind::Release;
    assert!(Event::from_terminal(CrosstermEvent::Key(key)).is_none());
  }
}

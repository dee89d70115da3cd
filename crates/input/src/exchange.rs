use parking_lot::Mutex;

use crate::key::KeyEvent;

/// Values exchanged with the viewer on each `update_view` call.
///
/// `key_event` is filled in with the latest unconsumed keystroke (if any);
/// `msg_lines` is the status text to display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuiIo {
    pub key_event: Option<KeyEvent>,
    pub msg_lines: String,
}

impl GuiIo {
    pub fn with_message(msg: impl Into<String>) -> Self {
        Self {
            key_event: None,
            msg_lines: msg.into(),
        }
    }
}

/// Cells shared between the rendering actor and the calling thread.
///
/// Each cell has its own lock, independent of the world lock:
/// - `key`: written by the rendering actor, taken by the caller. A new key
///   overwrites an unconsumed one.
/// - `messages`: written by the caller, read by the rendering actor.
#[derive(Debug, Default)]
pub struct GuiExchange {
    key: Mutex<Option<KeyEvent>>,
    messages: Mutex<String>,
}

impl GuiExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a keystroke, replacing any unconsumed one.
    pub fn push_key(&self, event: KeyEvent) {
        let replaced = self.key.lock().replace(event);
        if let Some(old) = replaced {
            tracing::trace!(%old, new = %event, "unconsumed key event overwritten");
        }
    }

    /// Take the pending keystroke, leaving the cell empty.
    pub fn take_key(&self) -> Option<KeyEvent> {
        self.key.lock().take()
    }

    pub fn has_key(&self) -> bool {
        self.key.lock().is_some()
    }

    pub fn set_messages(&self, text: impl Into<String>) {
        *self.messages.lock() = text.into();
    }

    pub fn messages(&self) -> String {
        self.messages.lock().clone()
    }

    /// Caller-side exchange: hand out the pending key, publish the messages.
    pub fn exchange(&self, io: &mut GuiIo) {
        io.key_event = self.take_key();
        self.set_messages(io.msg_lines.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyCode;
    use std::sync::Arc;

    #[test]
    fn latest_key_wins() {
        let ex = GuiExchange::new();
        ex.push_key(KeyEvent::char('a'));
        ex.push_key(KeyEvent::char('b'));
        assert_eq!(ex.take_key(), Some(KeyEvent::char('b')));
        assert_eq!(ex.take_key(), None);
    }

    #[test]
    fn exchange_moves_key_and_messages() {
        let ex = GuiExchange::new();
        ex.push_key(KeyEvent::new(KeyCode::Up));
        let mut io = GuiIo::with_message("t=1.0s");
        ex.exchange(&mut io);
        assert_eq!(io.key_event, Some(KeyEvent::new(KeyCode::Up)));
        assert_eq!(ex.messages(), "t=1.0s");
        assert!(!ex.has_key());

        let mut io = GuiIo::default();
        ex.exchange(&mut io);
        assert_eq!(io.key_event, None);
        assert_eq!(ex.messages(), "");
    }

    #[test]
    fn producer_and_consumer_threads() {
        let ex = Arc::new(GuiExchange::new());
        let producer = {
            let ex = Arc::clone(&ex);
            std::thread::spawn(move || {
                for i in 0..100u8 {
                    ex.push_key(KeyEvent::new(KeyCode::Other(u32::from(i))));
                }
            })
        };
        let mut seen = 0;
        while !producer.is_finished() {
            if ex.take_key().is_some() {
                seen += 1;
            }
        }
        producer.join().unwrap();
        seen += usize::from(ex.take_key().is_some());
        assert!((1..=100).contains(&seen));
    }
}

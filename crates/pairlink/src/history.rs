//! Bounded, order-preserving record of recent messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use pairlink_protocol::Message;

use crate::LiveValue;

/// The most recent messages in one direction, oldest first.
///
/// The capacity is read from a live setting on every push, so lowering it
/// trims the history on the next push.
pub(crate) struct History {
    entries: Mutex<VecDeque<Message>>,
    capacity: Arc<dyn LiveValue<usize>>,
}

impl History {
    pub(crate) fn new(capacity: Arc<dyn LiveValue<usize>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub(crate) fn push(&self, message: Message) {
        let capacity = self.capacity.get();
        let mut entries =
            self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while !entries.is_empty() && entries.len() >= capacity {
            entries.pop_front();
        }
        if capacity > 0 {
            entries.push_back(message);
        }
    }

    /// A point-in-time copy, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<Message> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryValue;

    fn chat(n: u32) -> Message {
        Message::Chat {
            text: n.to_string(),
        }
    }

    #[test]
    fn test_keeps_newest_in_order() {
        let history = History::new(Arc::new(InMemoryValue::new(3usize)));
        for n in 1..=5 {
            history.push(chat(n));
        }
        assert_eq!(history.snapshot(), vec![chat(3), chat(4), chat(5)]);
    }

    #[test]
    fn test_shrinking_capacity_applies_on_next_push() {
        let capacity = Arc::new(InMemoryValue::new(4usize));
        let history = History::new(capacity.clone());
        for n in 1..=4 {
            history.push(chat(n));
        }

        capacity.set(2);
        assert_eq!(history.snapshot().len(), 4);
        history.push(chat(5));
        assert_eq!(history.snapshot(), vec![chat(4), chat(5)]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let history = History::new(Arc::new(InMemoryValue::new(0usize)));
        history.push(chat(1));
        assert!(history.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let history = History::new(Arc::new(InMemoryValue::new(5usize)));
        history.push(chat(1));
        let before = history.snapshot();
        history.push(chat(2));
        assert_eq!(before, vec![chat(1)]);
    }
}

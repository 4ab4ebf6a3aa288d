//! Recent events kept for `Last-Event-ID` resume.

use crate::domain::event::Event;
use std::collections::VecDeque;
use std::sync::Arc;

/// Fixed-capacity ring of the latest events, ordered by sequence.
///
/// Owned by the broker task, so it needs no locking.
pub struct Backlog {
    capacity: usize,
    events: VecDeque<Arc<Event>>,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: Arc<Event>) {
        if self.capacity == 0 {
            return;
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Events with a sequence greater than `after`, oldest first.
    pub fn since(&self, after: u64) -> Vec<Arc<Event>> {
        let start = self.events.partition_point(|e| e.sequence <= after);
        self.events.iter().skip(start).cloned().collect()
    }

    pub fn oldest_sequence(&self) -> Option<u64> {
        self.events.front().map(|e| e.sequence)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

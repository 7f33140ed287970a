//! Timer heap for deadline management.
//!
//! A small min-heap of `(deadline, registration)` pairs used by the loop to
//! compute poll timeouts and to collect expired timers. Cancelled timers are
//! removed lazily: the dispatch pass skips ids that are no longer registered.

use crate::reactor::RegistrationId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Instant,
    id: RegistrationId,
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a timer for a registration with the given deadline.
    pub(crate) fn insert(&mut self, id: RegistrationId, deadline: Instant) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            id,
            generation,
        });
    }

    /// Returns the earliest deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops all timers whose deadline is `<= now`, with their deadlines.
    ///
    /// The deadline is returned so periodic timers can be re-armed relative
    /// to it rather than to the dispatch time.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<(RegistrationId, Instant)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline <= now {
                if let Some(entry) = self.heap.pop() {
                    expired.push((entry.id, entry.deadline));
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        expired
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}

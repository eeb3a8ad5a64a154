//! Deferred task queue with a virtual clock.
//!
//! Tasks run in (due time, scheduling order). There is no cancellation. The queue
//! only stores work; [`crate::engine::Engine`] pops and runs tasks so that no borrow
//! of the queue is held while a task executes.

use std::collections::BTreeMap;

use crate::engine::Engine;

pub type Task = Box<dyn FnOnce(&Engine)>;

#[derive(Default)]
pub struct TaskQueue {
    now: u64,
    seq: u64,
    pending: BTreeMap<(u64, u64), (&'static str, Task)>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn schedule(&mut self, label: &'static str, delay_ms: u64, task: Task) {
        let key = (self.now + delay_ms, self.seq);
        self.seq += 1;
        self.pending.insert(key, (label, task));
    }

    pub fn next_due(&self) -> Option<u64> {
        self.pending.keys().next().map(|(due, _)| *due)
    }

    /// Earliest task due at or before the current time.
    pub fn pop_due(&mut self) -> Option<(&'static str, Task)> {
        let key = *self.pending.keys().next()?;
        if key.0 > self.now {
            return None;
        }
        self.pending.remove(&key)
    }

    /// Move the clock forward (never backward).
    pub fn set_now(&mut self, now: u64) {
        self.now = self.now.max(now);
    }
}

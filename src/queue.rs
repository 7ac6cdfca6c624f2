//! Priority-ordered backlog of pending tasks.
//!
//! A `BinaryHeap` behind a mutex. Any number of producers push; the
//! dispatch loop is the only consumer. The capacity hint sizes the initial
//! allocation and nothing else: the queue never rejects or blocks a push,
//! so a sustained overload grows it without bound.

use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};

use crate::task::{Task, TaskSubmitter};

/// Thread-safe max-priority queue of tasks.
#[derive(Debug)]
pub struct TaskQueue<T: Task> {
    heap: Mutex<BinaryHeap<T>>,
}

impl<T: Task> TaskQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    /// Create an empty queue pre-sized for `capacity_hint` tasks.
    pub fn with_capacity(capacity_hint: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity_hint)),
        }
    }

    // A panicking producer cannot leave the heap half-updated, so a
    // poisoned lock is still safe to use.
    fn heap(&self) -> MutexGuard<'_, BinaryHeap<T>> {
        self.heap.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a task by priority.
    pub fn push(&self, task: T) {
        self.heap().push(task);
    }

    /// Insert several tasks under a single lock acquisition.
    pub fn extend<I: IntoIterator<Item = T>>(&self, tasks: I) {
        self.heap().extend(tasks);
    }

    /// Remove the highest-priority task, or `None` when empty.
    pub fn pop(&self) -> Option<T> {
        self.heap().pop()
    }

    /// Current number of queued tasks. May be stale by the time it is used.
    pub fn len(&self) -> usize {
        self.heap().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.heap().is_empty()
    }

    /// Remove every queued task, highest priority first.
    pub fn drain(&self) -> Vec<T> {
        let heap = std::mem::take(&mut *self.heap());
        heap.into_sorted_vec().into_iter().rev().collect()
    }
}

impl<T: Task> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> TaskSubmitter<T> for TaskQueue<T> {
    fn submit_task(&self, task: T) {
        self.push(task);
    }

    fn submit_tasks(&self, tasks: Vec<T>) {
        self.extend(tasks);
    }
}

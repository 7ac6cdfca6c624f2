//! Task contract consumed by the dispatcher.
//!
//! The dispatcher never looks inside a task. It only needs a total order
//! (greater = dispatched first), a `Debug` rendering for the abandoned and
//! cancelled logs, and the ability to move the task across threads.

use std::fmt::Debug;

/// Opaque, priority-comparable unit of pending work.
///
/// Implemented for every `Ord + Debug + Send + 'static` type, so plain
/// integers work as tasks in tests.
pub trait Task: Ord + Debug + Send + 'static {}

impl<T> Task for T where T: Ord + Debug + Send + 'static {}

/// Narrow handle that lets workers feed discovered work back in.
///
/// Workers get this instead of the full `Manager` surface.
pub trait TaskSubmitter<T: Task>: Send + Sync {
    /// Queue a task. Never blocks and never drops the task.
    fn submit_task(&self, task: T);

    /// Queue several tasks.
    fn submit_tasks(&self, tasks: Vec<T>) {
        for task in tasks {
            self.submit_task(task);
        }
    }
}

//! Pluggable execution order for a tick's [`TaskGraph`].
//!
//! The scheduler hands each tick's tasks to a [`TaskRunner`] and then polls it
//! for the next task to execute until it returns `None`. Every task still
//! executes on the calling thread against the one frame, so a runner decides
//! *order*, never concurrency. The scheduler rejects a handle whose dependency
//! has not run yet, and runs anything the runner never handed out afterwards in
//! chain order, so the frame result cannot depend on the runner.

use super::task::{TaskGraph, TaskHandle};

/// Decides the order in which a tick's tasks run.
#[cfg(feature = "sync-send")]
pub trait TaskRunner: Send + Sync {
    /// Receives the tasks of a tick before any of them runs.
    fn schedule(&mut self, tasks: &TaskGraph);

    /// The next task to run, or `None` once the runner has nothing left.
    fn poll(&mut self) -> Option<TaskHandle>;
}

/// Decides the order in which a tick's tasks run.
#[cfg(not(feature = "sync-send"))]
pub trait TaskRunner {
    /// Receives the tasks of a tick before any of them runs.
    fn schedule(&mut self, tasks: &TaskGraph);

    /// The next task to run, or `None` once the runner has nothing left.
    fn poll(&mut self) -> Option<TaskHandle>;
}

/// Hands out tasks front to back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialRunner {
    next: usize,
    len: usize,
}

impl SerialRunner {
    /// Creates an idle runner.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0, len: 0 }
    }
}

impl TaskRunner for SerialRunner {
    fn schedule(&mut self, tasks: &TaskGraph) {
        self.next = 0;
        self.len = tasks.len();
    }

    fn poll(&mut self) -> Option<TaskHandle> {
        if self.next >= self.len {
            return None;
        }
        let handle = TaskHandle::at(self.next);
        self.next += 1;
        Some(handle)
    }
}

/// Which tasks of a tick have run.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    done: Vec<bool>,
}

impl Completion {
    pub fn reset(&mut self, len: usize) {
        self.done.clear();
        self.done.resize(len, false);
    }

    /// Whether `handle` names a task that has not run and whose dependency has.
    pub fn is_ready(&self, tasks: &TaskGraph, handle: TaskHandle) -> bool {
        let Some(task) = handle.index().and_then(|i| tasks.tasks().get(i)) else {
            return false;
        };
        if self.is_done(handle) {
            return false;
        }
        match task.depends_on.index() {
            None => true,
            Some(_) => self.is_done(task.depends_on),
        }
    }

    pub fn is_done(&self, handle: TaskHandle) -> bool {
        handle
            .index()
            .and_then(|i| self.done.get(i))
            .copied()
            .unwrap_or(false)
    }

    pub fn mark(&mut self, handle: TaskHandle) {
        if let Some(slot) = handle.index().and_then(|i| self.done.get_mut(i)) {
            *slot = true;
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::systems::SystemId;

    fn chain(len: usize) -> TaskGraph {
        let mut graph = TaskGraph::new();
        let mut after = TaskHandle::NONE;
        for i in 0..len {
            after = graph.push(smallvec![SystemId::new(i)], false, after);
        }
        graph
    }

    #[test]
    fn serial_runner_yields_every_task_once_in_order() {
        let graph = chain(3);
        let mut runner = SerialRunner::new();
        runner.schedule(&graph);
        let order: Vec<Option<usize>> = std::iter::from_fn(|| runner.poll())
            .map(TaskHandle::index)
            .collect();
        assert_eq!(order, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(runner.poll(), None);

        runner.schedule(&TaskGraph::new());
        assert_eq!(runner.poll(), None);
    }

    #[test]
    fn completion_tracks_dependencies() {
        let graph = chain(2);
        let mut done = Completion::default();
        done.reset(graph.len());
        assert!(done.is_ready(&graph, TaskHandle::at(0)));
        assert!(!done.is_ready(&graph, TaskHandle::at(1)));
        assert!(!done.is_ready(&graph, TaskHandle::at(7)));
        assert!(!done.is_ready(&graph, TaskHandle::NONE));

        done.mark(TaskHandle::at(0));
        assert!(!done.is_ready(&graph, TaskHandle::at(0)));
        assert!(done.is_ready(&graph, TaskHandle::at(1)));
    }
}

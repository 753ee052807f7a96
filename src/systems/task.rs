//! Per-tick task graph produced by the scheduler.
//!
//! Tasks are appended in an order that already satisfies their dependencies,
//! so a single-threaded runner can execute them front to back. Each task
//! names the task it waits on; a pool-based runner can use that chain and
//! [`Task::main_thread`] to distribute work without changing the result.

use smallvec::SmallVec;

use super::SystemId;

/// Handle to a task in a [`TaskGraph`], used as the dependency of the next task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaskHandle(Option<usize>);

impl TaskHandle {
    /// No dependency.
    pub const NONE: Self = Self(None);

    /// Handle of the task at `index`.
    #[must_use]
    pub const fn at(index: usize) -> Self {
        Self(Some(index))
    }

    /// Index of the task, if any.
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        self.0
    }
}

/// One schedulable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Systems whose `update` runs in this task, in order.
    pub systems: SmallVec<[SystemId; 4]>,
    /// Must run on the designated main-thread worker.
    pub main_thread: bool,
    /// Task that must complete first.
    pub depends_on: TaskHandle,
}

/// Ordered tasks for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskGraph {
    tasks: Vec<Task>,
}

impl TaskGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every task, keeping the allocation.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Appends a task that waits on `depends_on` and returns its handle.
    pub fn push(
        &mut self,
        systems: SmallVec<[SystemId; 4]>,
        main_thread: bool,
        depends_on: TaskHandle,
    ) -> TaskHandle {
        self.tasks.push(Task {
            systems,
            main_thread,
            depends_on,
        });
        TaskHandle(Some(self.tasks.len() - 1))
    }

    /// Tasks in execution order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every scheduled system in execution order.
    pub fn system_order(&self) -> impl Iterator<Item = SystemId> + '_ {
        self.tasks.iter().flat_map(|t| t.systems.iter().copied())
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

    #[test]
    fn push_chains_handles() {
        let mut graph = TaskGraph::new();
        let a = graph.push(smallvec![SystemId::new(0)], false, TaskHandle::NONE);
        let b = graph.push(smallvec![SystemId::new(1), SystemId::new(2)], true, a);
        assert_eq!(a.index(), Some(0));
        assert_eq!(graph.tasks()[1].depends_on, a);
        assert!(graph.tasks()[1].main_thread);
        assert_eq!(b.index(), Some(1));
        assert_eq!(
            graph.system_order().collect::<Vec<_>>(),
            vec![SystemId::new(0), SystemId::new(1), SystemId::new(2)]
        );
        graph.clear();
        assert!(graph.is_empty());
    }
}

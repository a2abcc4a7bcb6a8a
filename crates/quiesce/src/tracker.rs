//! Blocking-state tracker
//!
//! TigerStyle: Every task is in exactly one of Runnable, Running or Blocked,
//! and only Runnable tasks are in the run queue.
//!
//! A task is marked Blocked as soon as its poll returns `Pending`. Its block
//! becomes *durable* only when `confirm_durable` runs at quiescence (nothing
//! left to run) and the registered wait is one the bubble can observe.

use crate::rng::DeterministicRng;
use crate::task::Wait;
use quiesce_core::{BlockedTask, BlockingReason, TaskId, TaskState};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug)]
struct Tracked {
    state: TaskState,
    wait: Option<Wait>,
    durable: bool,
    /// Woken while Running; requeue on suspend
    notified: bool,
}

impl Tracked {
    fn new(state: TaskState) -> Self {
        Self {
            state,
            wait: None,
            durable: false,
            notified: false,
        }
    }
}

/// Per-task scheduling state and the run queue
#[derive(Debug, Default)]
pub(crate) struct BlockingTracker {
    tasks: BTreeMap<TaskId, Tracked>,
    run_queue: VecDeque<TaskId>,
}

impl BlockingTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track the root task; it starts Running (the test body owns the thread)
    pub(crate) fn register_root(&mut self) {
        self.tasks
            .insert(TaskId::ROOT, Tracked::new(TaskState::Running));
    }

    /// Track a newly spawned task and queue its first poll
    pub(crate) fn register(&mut self, id: TaskId) {
        debug_assert!(!self.tasks.contains_key(&id));
        self.tasks.insert(id, Tracked::new(TaskState::Runnable));
        self.run_queue.push_back(id);
    }

    /// Deliver a wake; returns true if the task was moved to the run queue
    pub(crate) fn wake(&mut self, id: TaskId) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            return false;
        };
        match task.state {
            TaskState::Blocked => {
                task.state = TaskState::Runnable;
                task.wait = None;
                task.durable = false;
                self.run_queue.push_back(id);
                true
            }
            TaskState::Running => {
                task.notified = true;
                false
            }
            TaskState::Runnable => false,
        }
    }

    /// Queue a Running task for its next poll regardless of pending wakes
    pub(crate) fn resume(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&id) {
            if task.state != TaskState::Runnable {
                task.state = TaskState::Runnable;
                task.wait = None;
                task.durable = false;
                task.notified = false;
                self.run_queue.push_back(id);
            }
        }
    }

    /// Pick the next task to poll and mark it Running
    ///
    /// FIFO without an RNG; a seeded pick among all queued tasks otherwise.
    pub(crate) fn next_runnable(&mut self, rng: Option<&mut DeterministicRng>) -> Option<TaskId> {
        let id = match rng {
            Some(rng) if !self.run_queue.is_empty() => {
                let index = rng.next_index(self.run_queue.len());
                self.run_queue.remove(index)?
            }
            _ => self.run_queue.pop_front()?,
        };

        let task = self.tasks.get_mut(&id)?;
        debug_assert_eq!(task.state, TaskState::Runnable);
        task.state = TaskState::Running;
        task.notified = false;
        Some(id)
    }

    /// Record the end of a poll that returned `Pending`
    ///
    /// A task without a registered wait is blocked on something unobservable.
    pub(crate) fn suspend(&mut self, id: TaskId, wait: Option<Wait>) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        debug_assert_eq!(task.state, TaskState::Running);

        if task.notified {
            task.notified = false;
            task.state = TaskState::Runnable;
            self.run_queue.push_back(id);
            return;
        }

        task.state = TaskState::Blocked;
        task.durable = false;
        task.wait = Some(wait.unwrap_or(Wait {
            reason: BlockingReason::Unknown,
            durable: false,
        }));
    }

    /// Stop tracking a task that finished or was dropped
    pub(crate) fn remove(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.remove(&id) {
            if task.state == TaskState::Runnable {
                self.run_queue.retain(|queued| *queued != id);
            }
        }
    }

    pub(crate) fn has_runnable(&self) -> bool {
        !self.run_queue.is_empty()
    }

    pub(crate) fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(|t| t.state)
    }

    /// Confirm durability of every observable wait
    ///
    /// Only valid once the run queue is empty: every task that could run has
    /// reached its next suspension point.
    pub(crate) fn confirm_durable(&mut self) {
        debug_assert!(self.run_queue.is_empty(), "confirm_durable before quiescence");
        for task in self.tasks.values_mut() {
            if task.state == TaskState::Blocked {
                task.durable = task.wait.map(|w| w.durable).unwrap_or(false);
            }
        }
    }

    /// Snapshot of blocked tasks in task-id order
    pub(crate) fn blocked<F>(&self, mut name_of: F) -> Vec<BlockedTask>
    where
        F: FnMut(TaskId) -> Option<String>,
    {
        self.tasks
            .iter()
            .filter(|(_, t)| t.state == TaskState::Blocked)
            .map(|(id, t)| BlockedTask {
                id: *id,
                name: name_of(*id),
                reason: t.wait.map(|w| w.reason).unwrap_or(BlockingReason::Unknown),
                durable: t.durable,
            })
            .collect()
    }
}

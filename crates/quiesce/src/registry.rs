//! Task registry for a bubble
//!
//! Tracks every live member task: its future, waker, diagnostic name and
//! parent. The root task is not stored here; it is polled from the stack of
//! `BubbleHandle::block_on`.

use crate::task::TaskCell;
use quiesce_core::{BubbleId, TaskId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::Waker;

/// A live member task
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub(crate) cell: Arc<TaskCell>,
    pub(crate) waker: Waker,
    pub(crate) name: Option<String>,
    pub(crate) parent: TaskId,
    pub(crate) aborted: bool,
}

/// What the controller should do with a dequeued task
pub(crate) enum PollTarget {
    /// Poll the task's future with this waker
    Poll(Arc<TaskCell>, Waker),
    /// The task was aborted: drop its future
    Drop(Arc<TaskCell>),
    /// The task no longer exists
    Gone,
}

/// Registry of member tasks, keyed and iterated in task-id order
#[derive(Debug)]
pub(crate) struct TaskRegistry {
    bubble_id: BubbleId,
    next_id: u64,
    tasks: BTreeMap<TaskId, TaskEntry>,
    spawned: u64,
    completed: u64,
}

impl TaskRegistry {
    pub(crate) fn new(bubble_id: BubbleId) -> Self {
        Self {
            bubble_id,
            // TaskId(0) is the root
            next_id: 1,
            tasks: BTreeMap::new(),
            spawned: 0,
            completed: 0,
        }
    }

    /// Reserve the id of the next spawned task
    pub(crate) fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a spawned task under an id from `allocate_id`
    pub(crate) fn insert(&mut self, id: TaskId, entry: TaskEntry) {
        debug_assert_eq!(entry.cell.id, id);
        debug_assert!(!id.is_root(), "the root is not a registry member");
        let previous = self.tasks.insert(id, entry);
        debug_assert!(previous.is_none(), "task ids are never reused");
        self.spawned += 1;

        tracing::trace!(bubble = %self.bubble_id, task = %id, live = self.tasks.len(), "task registered");
    }

    /// Decide how to run a dequeued task
    pub(crate) fn poll_target(&self, id: TaskId) -> PollTarget {
        match self.tasks.get(&id) {
            Some(entry) if entry.aborted => PollTarget::Drop(entry.cell.clone()),
            Some(entry) => PollTarget::Poll(entry.cell.clone(), entry.waker.clone()),
            None => PollTarget::Gone,
        }
    }

    /// Remove a task whose future finished or was dropped
    pub(crate) fn complete(&mut self, id: TaskId, finished: bool) -> Option<TaskEntry> {
        let entry = self.tasks.remove(&id)?;
        if finished {
            self.completed += 1;
        }
        tracing::trace!(bubble = %self.bubble_id, task = %id, finished, "task removed");
        Some(entry)
    }

    /// Flag a task for abort; returns false if it no longer exists
    pub(crate) fn mark_aborted(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(&id) {
            Some(entry) => {
                entry.aborted = true;
                true
            }
            None => false,
        }
    }

    /// Remove every remaining task (teardown)
    pub(crate) fn drain(&mut self) -> Vec<TaskEntry> {
        std::mem::take(&mut self.tasks).into_values().collect()
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub(crate) fn name(&self, id: TaskId) -> Option<&str> {
        self.tasks.get(&id).and_then(|e| e.name.as_deref())
    }

    pub(crate) fn parent(&self, id: TaskId) -> Option<TaskId> {
        self.tasks.get(&id).map(|e| e.parent)
    }

    /// Number of live member tasks
    pub(crate) fn live_count(&self) -> usize {
        self.tasks.len()
    }

    /// Total tasks ever spawned
    pub(crate) fn spawned(&self) -> u64 {
        self.spawned
    }

    /// Tasks that ran to completion
    pub(crate) fn completed(&self) -> u64 {
        self.completed
    }
}

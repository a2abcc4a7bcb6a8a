//! Executor plumbing shared by the controller and the blocking primitives
//!
//! While a bubble task is being polled, a thread-local slot identifies it.
//! Blocking primitives use the slot to tell the tracker *why* the task is
//! about to return `Pending`; the controller reads the registration back
//! when the poll ends.

use crate::bubble::Shared;
use futures::future::BoxFuture;
use futures::task::ArcWake;
use parking_lot::Mutex;
use quiesce_core::{BlockingReason, BubbleId, TaskId};
use std::cell::{Cell, RefCell};
use std::sync::{Arc, Weak};

/// A spawned task: its future, taken out once it completes or is dropped
pub(crate) struct TaskCell {
    pub(crate) id: TaskId,
    pub(crate) future: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId, future: BoxFuture<'static, ()>) -> Arc<Self> {
        Arc::new(Self {
            id,
            future: Mutex::new(Some(future)),
        })
    }
}

impl std::fmt::Debug for TaskCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCell").field("id", &self.id).finish()
    }
}

/// Waker of a bubble task: marks the task Runnable in its bubble's tracker
pub(crate) struct TaskWaker {
    pub(crate) shared: Weak<Shared>,
    pub(crate) id: TaskId,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Some(shared) = arc_self.shared.upgrade() {
            shared.wake(arc_self.id);
        }
    }
}

/// A wait registered by a blocking primitive during the current poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Wait {
    pub(crate) reason: BlockingReason,
    /// Whether the tracker may confirm this wait as durable
    pub(crate) durable: bool,
}

impl Wait {
    /// Merge another registration made in the same poll (e.g. a select)
    ///
    /// Durability requires every branch to be observable; the reported reason
    /// prefers a timer, otherwise the first registration wins.
    fn merge(self, other: Wait) -> Wait {
        let reason = if !self.reason.is_timer() && other.reason.is_timer() {
            other.reason
        } else {
            self.reason
        };
        Wait {
            reason,
            durable: self.durable && other.durable,
        }
    }
}

struct CurrentTask {
    bubble: BubbleId,
    task: TaskId,
    wait: Option<Wait>,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentTask>> = const { RefCell::new(None) };
    static ACTIVE_BUBBLE: Cell<Option<BubbleId>> = const { Cell::new(None) };
}

/// The bubble task being polled on this thread, if any
pub(crate) fn current_task() -> Option<(BubbleId, TaskId)> {
    CURRENT.with(|c| c.borrow().as_ref().map(|t| (t.bubble, t.task)))
}

/// The bubble owning this thread: the task being polled, else the open handle
pub(crate) fn current_bubble() -> Option<BubbleId> {
    current_task()
        .map(|(bubble, _)| bubble)
        .or_else(|| ACTIVE_BUBBLE.with(|a| a.get()))
}

/// Record that the current task is about to block for `reason`
///
/// `owner` is the bubble the primitive belongs to. A wait on a primitive of
/// another bubble (or of none) can be resolved by code the bubble does not
/// see, so it is never durable. Outside a bubble task this is a no-op.
pub(crate) fn register_wait(owner: Option<BubbleId>, reason: BlockingReason) {
    CURRENT.with(|c| {
        let mut slot = c.borrow_mut();
        let Some(current) = slot.as_mut() else {
            return;
        };
        let wait = Wait {
            reason,
            durable: owner == Some(current.bubble),
        };
        current.wait = Some(match current.wait {
            Some(prev) => prev.merge(wait),
            None => wait,
        });
    });
}

/// Marks a task as the one being polled for as long as it is alive
pub(crate) struct PollGuard {
    _private: (),
}

impl PollGuard {
    pub(crate) fn enter(bubble: BubbleId, task: TaskId) -> Self {
        CURRENT.with(|c| {
            let mut slot = c.borrow_mut();
            debug_assert!(slot.is_none(), "polls must not nest");
            *slot = Some(CurrentTask {
                bubble,
                task,
                wait: None,
            });
        });
        Self { _private: () }
    }

    /// End the poll and return the wait registered during it
    pub(crate) fn finish(self) -> Option<Wait> {
        CURRENT.with(|c| c.borrow_mut().as_mut().and_then(|t| t.wait.take()))
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| *c.borrow_mut() = None);
    }
}

/// The bubble whose handle is open on this thread
pub(crate) fn active_bubble() -> Option<BubbleId> {
    ACTIVE_BUBBLE.with(|a| a.get())
}

pub(crate) fn set_active_bubble(bubble: Option<BubbleId>) {
    ACTIVE_BUBBLE.with(|a| a.set(bubble));
}

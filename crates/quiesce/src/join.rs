//! Join handles for bubble tasks

use crate::bubble::Shared;
use crate::task::register_wait;
use parking_lot::Mutex;
use quiesce_core::{BlockingReason, BubbleId, ChannelOp, TaskId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

/// Why a join did not produce the task's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The task was aborted, or dropped at teardown before finishing
    Cancelled { id: TaskId },
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Cancelled { id } => write!(f, "{} was cancelled before it finished", id),
        }
    }
}

impl std::error::Error for JoinError {}

#[derive(Debug)]
struct JoinState<T> {
    output: Option<T>,
    finished: bool,
    cancelled: bool,
    waiter: Option<Waker>,
}

/// Lives inside the spawned future; reports its output or its drop
pub(crate) struct JoinNotifier<T> {
    state: Arc<Mutex<JoinState<T>>>,
}

impl<T> JoinNotifier<T> {
    pub(crate) fn pair(shared: Weak<Shared>, bubble: BubbleId, id: TaskId) -> (Self, JoinHandle<T>) {
        let state = Arc::new(Mutex::new(JoinState {
            output: None,
            finished: false,
            cancelled: false,
            waiter: None,
        }));
        let handle = JoinHandle {
            shared,
            bubble,
            id,
            state: state.clone(),
        };
        (Self { state }, handle)
    }

    pub(crate) fn complete(self, output: T) {
        let waiter = {
            let mut state = self.state.lock();
            state.output = Some(output);
            state.finished = true;
            state.waiter.take()
        };
        if let Some(waker) = waiter {
            waker.wake();
        }
    }
}

impl<T> Drop for JoinNotifier<T> {
    fn drop(&mut self) {
        let waiter = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.cancelled = true;
            state.waiter.take()
        };
        if let Some(waker) = waiter {
            waker.wake();
        }
    }
}

/// Handle to a spawned task; awaiting it yields the task's output
///
/// Dropping the handle detaches the task; it keeps running.
pub struct JoinHandle<T> {
    shared: Weak<Shared>,
    bubble: BubbleId,
    id: TaskId,
    state: Arc<Mutex<JoinState<T>>>,
}

impl<T> JoinHandle<T> {
    /// Id of the task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the task finished or was cancelled
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.finished || state.cancelled
    }

    /// Cancel the task; its future is dropped on its next turn
    ///
    /// Has no effect on a task that already finished.
    pub fn abort(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.abort_task(self.id);
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("bubble", &self.bubble)
            .field("id", &self.id)
            .finish()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();
        if let Some(output) = state.output.take() {
            return Poll::Ready(Ok(output));
        }
        if state.cancelled || state.finished {
            return Poll::Ready(Err(JoinError::Cancelled { id: self.id }));
        }

        match &state.waiter {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => state.waiter = Some(cx.waker().clone()),
        }
        drop(state);

        register_wait(Some(self.bubble), BlockingReason::Channel { op: ChannelOp::Join });
        Poll::Pending
    }
}

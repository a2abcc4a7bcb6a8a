//! Task identity and blocking state
//!
//! TigerStyle: Blocking reasons are a closed, tagged set so the deadlock
//! decision logic is exhaustive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a bubble, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BubbleId(pub u64);

impl fmt::Display for BubbleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bubble-{}", self.0)
    }
}

/// Identifier of a task, unique within its bubble
///
/// The root task is always `TaskId::ROOT`; spawned tasks are numbered from 1
/// in spawn order, which is also the timer tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    /// The task running the test body
    pub const ROOT: TaskId = TaskId(0);

    /// Whether this is the root task
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "task-0(root)")
        } else {
            write!(f, "task-{}", self.0)
        }
    }
}

/// Scheduling state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Ready to be polled
    Runnable,
    /// Currently being polled
    Running,
    /// Suspended at a blocking operation
    Blocked,
}

/// Operation a task is blocked on when waiting for another task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelOp {
    /// Waiting for capacity or a rendezvous partner
    Send,
    /// Waiting for a value
    Recv,
    /// Waiting for a cancellation signal
    Cancelled,
    /// Waiting for another task to finish
    Join,
}

/// Operation a task is blocked on when waiting on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamOp {
    /// Waiting for data, close or abort
    Read,
    /// Waiting for the reader to drain
    Write,
}

/// Why a task is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockingReason {
    /// Waiting for the virtual clock to reach `deadline` (time since epoch)
    Timer { deadline: Duration },
    /// Waiting for another task's channel action
    Channel { op: ChannelOp },
    /// Waiting on a pipe whose other end is held by another task
    StreamIo { op: StreamOp },
    /// Suspended on something the harness cannot observe
    Unknown,
}

impl BlockingReason {
    /// Whether the reason is a timer wait
    pub fn is_timer(&self) -> bool {
        matches!(self, BlockingReason::Timer { .. })
    }

    /// Short tag used in reports and logs
    pub fn tag(&self) -> &'static str {
        match self {
            BlockingReason::Timer { .. } => "timer-wait",
            BlockingReason::Channel { .. } => "channel-op",
            BlockingReason::StreamIo { .. } => "stream-io",
            BlockingReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingReason::Timer { deadline } => {
                write!(f, "timer-wait(deadline={}ms)", deadline.as_millis())
            }
            BlockingReason::Channel { op } => write!(f, "channel-op({:?})", op),
            BlockingReason::StreamIo { op } => write!(f, "stream-io({:?})", op),
            BlockingReason::Unknown => write!(f, "unknown"),
        }
    }
}

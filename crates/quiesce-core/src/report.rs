//! Reports produced when a bubble is torn down
//!
//! A clean exit yields a `BubbleReport`; a deadlock yields a `DeadlockReport`
//! carried by `Error::Deadlock`, next to a `BubbleReport` whose verdict is
//! `Verdict::Deadlocked`.

use crate::task::{BlockingReason, BubbleId, TaskId};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// A task that was still blocked when the deadlock was declared
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    /// Task identifier
    pub id: TaskId,
    /// Diagnostic name given at spawn, if any
    pub name: Option<String>,
    /// Registered blocking reason
    pub reason: BlockingReason,
    /// Whether the tracker had confirmed the block as durable
    pub durable: bool,
}

impl BlockedTask {
    /// Whether this entry is the root task
    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }
}

impl fmt::Display for BlockedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(name) = &self.name {
            write!(f, " \"{}\"", name)?;
        }
        write!(f, " blocked on {}", self.reason)?;
        if !self.durable {
            write!(f, " (not durable)")?;
        }
        Ok(())
    }
}

/// Structured description of a detected deadlock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlockReport {
    /// Bubble that deadlocked
    pub bubble_id: BubbleId,
    /// Virtual time since the bubble epoch at failure
    pub elapsed: Duration,
    /// Whether the root task had already finished
    pub root_finished: bool,
    /// Blocked tasks in task-id order
    pub blocked: Vec<BlockedTask>,
}

impl DeadlockReport {
    /// Ids of the blocked tasks
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.blocked.iter().map(|t| t.id).collect()
    }

    /// Number of blocked tasks other than the root
    pub fn blocked_member_count(&self) -> usize {
        self.blocked.iter().filter(|t| !t.is_root()).count()
    }

    /// Look up a blocked task by id
    pub fn task(&self, id: TaskId) -> Option<&BlockedTask> {
        self.blocked.iter().find(|t| t.id == id)
    }
}

impl fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let context = if self.root_finished {
            "root task has exited but blocked tasks remain"
        } else {
            "all tasks are durably blocked and no timer is pending"
        };
        write!(
            f,
            "{}: {} at t={}ms; {} blocked task(s)",
            self.bubble_id,
            context,
            self.elapsed.as_millis(),
            self.blocked.len()
        )?;
        for task in &self.blocked {
            write!(f, "\n  - {}", task)?;
        }
        Ok(())
    }
}

/// One step of the virtual clock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockAdvance {
    /// Virtual time since the epoch after the advance
    pub to: Duration,
    /// Tasks woken by the advance, in firing order
    pub woken: Vec<TaskId>,
}

/// Terminal outcome of a bubble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Root finished with no outstanding blocked members
    Closed,
    /// A deadlock was reported
    Deadlocked,
}

/// Summary of a bubble run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BubbleReport {
    /// Bubble identifier
    pub bubble_id: BubbleId,
    /// Terminal outcome
    pub verdict: Verdict,
    /// Every clock advance, in order
    pub advances: Vec<ClockAdvance>,
    /// Poll order of tasks (truncated at the schedule limit)
    pub schedule: Vec<TaskId>,
    /// Total number of polls
    pub steps: u64,
    /// Number of tasks spawned (excluding the root)
    pub tasks_spawned: u64,
    /// Number of spawned tasks that ran to completion
    pub tasks_completed: u64,
    /// Virtual time since the epoch at exit
    pub elapsed: Duration,
}

impl BubbleReport {
    /// Virtual times the clock advanced to, in order
    pub fn advance_times(&self) -> Vec<Duration> {
        self.advances.iter().map(|a| a.to).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StreamOp;

    fn sample_report() -> DeadlockReport {
        DeadlockReport {
            bubble_id: BubbleId(7),
            elapsed: Duration::from_millis(250),
            root_finished: true,
            blocked: vec![BlockedTask {
                id: TaskId(2),
                name: Some("reader".into()),
                reason: BlockingReason::StreamIo { op: StreamOp::Read },
                durable: true,
            }],
        }
    }

    #[test]
    fn test_deadlock_report_display() {
        let report = sample_report();
        let text = report.to_string();
        assert!(text.contains("bubble-7"));
        assert!(text.contains("root task has exited"));
        assert!(text.contains("t=250ms"));
        assert!(text.contains("task-2 \"reader\" blocked on stream-io(Read)"));
    }

    #[test]
    fn test_deadlock_report_queries() {
        let report = sample_report();
        assert_eq!(report.task_ids(), vec![TaskId(2)]);
        assert_eq!(report.blocked_member_count(), 1);
        assert!(report.task(TaskId(2)).is_some());
        assert!(report.task(TaskId(9)).is_none());
    }
}

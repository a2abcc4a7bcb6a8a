//! Deadlock detector
//!
//! TigerStyle: A pure decision over a snapshot; no side effects, every branch
//! unit tested.
//!
//! The controller calls `decide` whenever its run queue is empty: while the
//! bubble is open (to pick between advancing time, waiting and failing) and
//! at teardown with `root_finished` set.

use quiesce_core::BlockedTask;
use std::time::Duration;

/// State of a bubble at a quiescent point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuiescenceSnapshot {
    /// Whether the root task has returned from the test body
    pub root_finished: bool,
    /// Blocked tasks in task-id order (the root included while it blocks)
    pub blocked: Vec<BlockedTask>,
    /// Earliest pending timer deadline
    pub next_deadline: Option<Duration>,
}

/// What the controller does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Advance the clock to this deadline and wake its tasks
    AdvanceTo(Duration),
    /// Do not advance; wait (bounded, in real time) for a wake from outside
    AwaitExternal,
    /// Teardown found nothing blocked
    Closed,
    /// Fail with a deadlock report
    Deadlocked,
}

/// Decide the next step for a quiescent bubble
pub fn decide(snapshot: &QuiescenceSnapshot) -> Decision {
    // Time never moves while a block might still be resolved from outside.
    if snapshot.blocked.iter().any(|t| !t.durable) {
        return Decision::AwaitExternal;
    }

    if snapshot.root_finished {
        // Once the test body returned nothing may advance time on its behalf.
        return if snapshot.blocked.iter().any(|t| !t.is_root()) {
            Decision::Deadlocked
        } else {
            Decision::Closed
        };
    }

    if let Some(deadline) = snapshot.next_deadline {
        return Decision::AdvanceTo(deadline);
    }

    if snapshot.blocked.is_empty() {
        Decision::AwaitExternal
    } else {
        Decision::Deadlocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiesce_core::{BlockingReason, ChannelOp, StreamOp, TaskId};

    fn blocked(id: u64, reason: BlockingReason, durable: bool) -> BlockedTask {
        BlockedTask {
            id: TaskId(id),
            name: None,
            reason,
            durable,
        }
    }

    fn read(id: u64) -> BlockedTask {
        blocked(id, BlockingReason::StreamIo { op: StreamOp::Read }, true)
    }

    fn timer(id: u64, ms: u64) -> BlockedTask {
        blocked(
            id,
            BlockingReason::Timer {
                deadline: Duration::from_millis(ms),
            },
            true,
        )
    }

    fn snapshot(root_finished: bool, blocked: Vec<BlockedTask>, next: Option<u64>) -> QuiescenceSnapshot {
        QuiescenceSnapshot {
            root_finished,
            blocked,
            next_deadline: next.map(Duration::from_millis),
        }
    }

    #[test]
    fn test_non_durable_block_never_advances() {
        let s = snapshot(
            false,
            vec![timer(1, 100), blocked(2, BlockingReason::Unknown, false)],
            Some(100),
        );
        assert_eq!(decide(&s), Decision::AwaitExternal);

        let s = snapshot(true, vec![blocked(1, BlockingReason::Unknown, false)], None);
        assert_eq!(decide(&s), Decision::AwaitExternal);
    }

    #[test]
    fn test_pending_timer_advances() {
        let s = snapshot(false, vec![timer(0, 250), read(1)], Some(250));
        assert_eq!(decide(&s), Decision::AdvanceTo(Duration::from_millis(250)));
    }

    #[test]
    fn test_root_finished_clean() {
        assert_eq!(decide(&snapshot(true, vec![], None)), Decision::Closed);
        // Stray timers of finished tasks do not keep the bubble alive
        assert_eq!(decide(&snapshot(true, vec![], Some(10))), Decision::Closed);
    }

    #[test]
    fn test_root_finished_with_blocked_member() {
        let s = snapshot(true, vec![read(2)], None);
        assert_eq!(decide(&s), Decision::Deadlocked);

        // A member sleeping past the end of the test body is a leak too
        let s = snapshot(true, vec![timer(1, 1000)], Some(1000));
        assert_eq!(decide(&s), Decision::Deadlocked);
    }

    #[test]
    fn test_all_blocked_without_timer() {
        let s = snapshot(
            false,
            vec![
                blocked(0, BlockingReason::Channel { op: ChannelOp::Join }, true),
                read(1),
            ],
            None,
        );
        assert_eq!(decide(&s), Decision::Deadlocked);
    }

    #[test]
    fn test_nothing_blocked_before_root_finished() {
        assert_eq!(decide(&snapshot(false, vec![], None)), Decision::AwaitExternal);
    }
}

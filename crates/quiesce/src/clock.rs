//! Virtual clock for a bubble
//!
//! TigerStyle: Explicit time control, no system time dependencies.
//!
//! The clock holds the current virtual time and the set of pending wake-ups.
//! It never moves on its own: the bubble controller calls `advance_to_next`
//! once every member task is durably blocked.

use quiesce_core::TaskId;
use std::collections::{BTreeMap, HashMap};
use std::task::Waker;
use std::time::Duration;

/// Handle to a scheduled wake-up, used to re-arm or cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey(u64);

/// Ordering key of a wake-up: deadline, then owning task, then registration
///
/// Wake-ups owned by no bubble task sort after all task-owned ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
    deadline: Duration,
    owner: u64,
    seq: u64,
}

#[derive(Debug)]
struct Entry {
    owner: Option<TaskId>,
    waker: Waker,
}

/// A wake-up that fired during an advance
#[derive(Debug)]
pub struct Fired {
    /// Task that registered the wake-up, if it was a bubble task
    pub owner: Option<TaskId>,
    /// Waker to invoke (outside of any bubble lock)
    pub waker: Waker,
}

/// Deterministic virtual clock
///
/// Time is a `Duration` since the bubble epoch. It is monotonically
/// nondecreasing and only ever jumps to the deadline of a pending wake-up.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Duration,
    next_seq: u64,
    entries: BTreeMap<EntryKey, Entry>,
    index: HashMap<TimerKey, EntryKey>,
}

impl VirtualClock {
    /// Create a clock at the epoch with no pending wake-ups
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time since the epoch
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Whether `deadline` has been reached
    pub fn is_past(&self, deadline: Duration) -> bool {
        self.now >= deadline
    }

    /// Number of pending wake-ups
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.keys().next().map(|k| k.deadline)
    }

    /// Schedule a wake-up at `deadline`
    ///
    /// A deadline in the past is still accepted and fires on the next advance
    /// without moving the clock backwards.
    pub fn schedule(&mut self, deadline: Duration, owner: Option<TaskId>, waker: Waker) -> TimerKey {
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = EntryKey {
            deadline,
            owner: owner_rank(owner),
            seq,
        };
        let timer = TimerKey(seq);
        self.entries.insert(key, Entry { owner, waker });
        self.index.insert(timer, key);

        debug_assert_eq!(self.entries.len(), self.index.len());
        timer
    }

    /// Replace the waker of a pending wake-up; returns false if it already fired
    ///
    /// A wake-up now polled by a different task is re-keyed under that task,
    /// so ties are broken by its current owner.
    pub fn rearm(&mut self, timer: TimerKey, owner: Option<TaskId>, waker: &Waker) -> bool {
        let Some(key) = self.index.get(&timer).copied() else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };

        if !entry.waker.will_wake(waker) {
            entry.waker = waker.clone();
        }
        if entry.owner != owner {
            let Some(mut entry) = self.entries.remove(&key) else {
                return false;
            };
            entry.owner = owner;
            let rekeyed = EntryKey {
                owner: owner_rank(owner),
                ..key
            };
            self.entries.insert(rekeyed, entry);
            self.index.insert(timer, rekeyed);
        }
        true
    }

    /// Cancel a pending wake-up; returns false if it already fired
    pub fn cancel(&mut self, timer: TimerKey) -> bool {
        match self.index.remove(&timer) {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    /// Whether a wake-up is still pending
    pub fn is_pending(&self, timer: TimerKey) -> bool {
        self.index.contains_key(&timer)
    }

    /// Advance to the earliest pending deadline and pop every wake-up due then
    ///
    /// Ties fire together, ordered by owning task id and then registration
    /// order. Returns `None` when nothing is pending.
    pub fn advance_to_next(&mut self) -> Option<(Duration, Vec<Fired>)> {
        let deadline = self.next_deadline()?;
        let target = deadline.max(self.now);

        let mut fired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().deadline != deadline {
                break;
            }
            let (key, entry) = entry.remove_entry();
            self.index.remove(&TimerKey(key.seq));
            fired.push(Fired {
                owner: entry.owner,
                waker: entry.waker,
            });
        }

        debug_assert!(target >= self.now, "cannot go back in time");
        self.now = target;
        Some((target, fired))
    }
}

/// Unowned wake-ups sort after every task-owned one
fn owner_rank(owner: Option<TaskId>) -> u64 {
    owner.map(|id| id.0).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    #[test]
    fn test_clock_starts_at_epoch() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        assert_eq!(clock.next_deadline(), None);
        assert!(clock.is_past(Duration::ZERO));
    }

    #[test]
    fn test_advance_jumps_to_earliest_deadline() {
        let mut clock = VirtualClock::new();
        clock.schedule(Duration::from_millis(300), Some(TaskId(1)), noop_waker());
        clock.schedule(Duration::from_millis(100), Some(TaskId(2)), noop_waker());

        let (now, fired) = clock.advance_to_next().unwrap();
        assert_eq!(now, Duration::from_millis(100));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].owner, Some(TaskId(2)));
        assert_eq!(clock.now(), Duration::from_millis(100));

        let (now, _) = clock.advance_to_next().unwrap();
        assert_eq!(now, Duration::from_millis(300));
        assert!(clock.advance_to_next().is_none());
    }

    #[test]
    fn test_ties_fire_together_in_task_order() {
        let mut clock = VirtualClock::new();
        let deadline = Duration::from_secs(1);
        clock.schedule(deadline, Some(TaskId(3)), noop_waker());
        clock.schedule(deadline, None, noop_waker());
        clock.schedule(deadline, Some(TaskId(1)), noop_waker());
        clock.schedule(deadline, Some(TaskId(2)), noop_waker());

        let (_, fired) = clock.advance_to_next().unwrap();
        let owners: Vec<_> = fired.iter().map(|f| f.owner).collect();
        assert_eq!(
            owners,
            vec![Some(TaskId(1)), Some(TaskId(2)), Some(TaskId(3)), None]
        );
        assert_eq!(clock.pending_count(), 0);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut clock = VirtualClock::new();
        let key = clock.schedule(Duration::from_millis(10), Some(TaskId(1)), noop_waker());
        assert!(clock.is_pending(key));
        assert!(clock.cancel(key));
        assert!(!clock.is_pending(key));
        assert!(!clock.cancel(key));
        assert!(clock.advance_to_next().is_none());
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn test_past_deadline_does_not_rewind() {
        let mut clock = VirtualClock::new();
        clock.schedule(Duration::from_millis(50), Some(TaskId(1)), noop_waker());
        clock.advance_to_next().unwrap();

        let key = clock.schedule(Duration::from_millis(10), Some(TaskId(1)), noop_waker());
        assert!(clock.rearm(key, Some(TaskId(1)), &noop_waker()));
        let (now, fired) = clock.advance_to_next().unwrap();
        assert_eq!(now, Duration::from_millis(50));
        assert_eq!(fired.len(), 1);
        assert!(!clock.rearm(key, Some(TaskId(1)), &noop_waker()));
    }

    #[test]
    fn test_rearm_by_another_task_rekeys_tie_break() {
        let mut clock = VirtualClock::new();
        let deadline = Duration::from_millis(100);
        let moved = clock.schedule(deadline, Some(TaskId(1)), noop_waker());
        clock.schedule(deadline, Some(TaskId(2)), noop_waker());

        // Now polled by task 3
        assert!(clock.rearm(moved, Some(TaskId(3)), &noop_waker()));
        assert_eq!(clock.pending_count(), 2);

        let (_, fired) = clock.advance_to_next().unwrap();
        let owners: Vec<_> = fired.iter().map(|f| f.owner).collect();
        assert_eq!(owners, vec![Some(TaskId(2)), Some(TaskId(3))]);
        assert!(!clock.is_pending(moved));
    }
}

//! Bubble controller
//!
//! TigerStyle: One lock, one state machine, explicit budgets.
//!
//! A bubble runs the test body (the root task) and every task it spawns on a
//! single-threaded executor. The controller runs tasks until none is
//! runnable, then asks the detector what to do: advance the virtual clock to
//! the next timer, wait briefly for a wake from outside, or fail with a
//! deadlock report. At teardown every member task must have finished.
//!
//! ```text
//!   Open ──► Quiescent ──► AdvancingTime ──► Open
//!                 │
//!                 ├──► Deadlocked (terminal)
//!                 └──► Closed     (terminal)
//! ```

use crate::clock::{TimerKey, VirtualClock};
use crate::context::BubbleContext;
use crate::detector::{decide, Decision, QuiescenceSnapshot};
use crate::join::{JoinHandle, JoinNotifier};
use crate::registry::{PollTarget, TaskEntry, TaskRegistry};
use crate::rng::DeterministicRng;
use crate::task::{self, PollGuard, TaskCell, TaskWaker};
use crate::tracker::BlockingTracker;
use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use quiesce_core::{
    BubbleConfig, BubbleId, BubbleReport, ClockAdvance, DeadlockReport, Error, Result, TaskId,
    TaskState, UsageError, Verdict, BUBBLE_SCHEDULE_ENTRIES_COUNT_MAX, TASK_LIVE_COUNT_MAX,
    TASK_NAME_LENGTH_BYTES_MAX,
};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

static NEXT_BUBBLE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle phase of a bubble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubblePhase {
    /// Tasks are running
    Open,
    /// No task is runnable; the detector is being consulted
    Quiescent,
    /// The clock is moving to the next deadline
    AdvancingTime,
    /// A deadlock was reported
    Deadlocked,
    /// Torn down, or failed on a budget
    Closed,
}

impl BubblePhase {
    /// Whether the bubble accepts no more work
    pub fn is_terminal(&self) -> bool {
        matches!(self, BubblePhase::Deadlocked | BubblePhase::Closed)
    }
}

/// Mutable bubble state, guarded by `Shared::state`
pub(crate) struct Inner {
    pub(crate) clock: VirtualClock,
    pub(crate) registry: TaskRegistry,
    pub(crate) tracker: BlockingTracker,
    rng: Option<DeterministicRng>,
    pub(crate) phase: BubblePhase,
    steps: u64,
    schedule: Vec<TaskId>,
    advances: Vec<ClockAdvance>,
}

impl Inner {
    fn snapshot(&self, root_finished: bool) -> QuiescenceSnapshot {
        let registry = &self.registry;
        QuiescenceSnapshot {
            root_finished,
            blocked: self
                .tracker
                .blocked(|id| registry.name(id).map(String::from)),
            next_deadline: self.clock.next_deadline(),
        }
    }

    fn deadlock_report(&self, bubble_id: BubbleId, snapshot: QuiescenceSnapshot) -> DeadlockReport {
        DeadlockReport {
            bubble_id,
            elapsed: self.clock.now(),
            root_finished: snapshot.root_finished,
            blocked: snapshot.blocked,
        }
    }

    /// Summarize the run; takes the recorded advances and schedule
    fn bubble_report(&mut self, bubble_id: BubbleId, verdict: Verdict) -> BubbleReport {
        BubbleReport {
            bubble_id,
            verdict,
            advances: std::mem::take(&mut self.advances),
            schedule: std::mem::take(&mut self.schedule),
            steps: self.steps,
            tasks_spawned: self.registry.spawned(),
            tasks_completed: self.registry.completed(),
            elapsed: self.clock.now(),
        }
    }

    /// Fail with a deadlock: report the blocked tasks and summarize the run
    fn deadlocked(&mut self, bubble_id: BubbleId, snapshot: QuiescenceSnapshot) -> Error {
        let report = self.deadlock_report(bubble_id, snapshot);
        self.phase = BubblePhase::Deadlocked;
        let summary = self.bubble_report(bubble_id, Verdict::Deadlocked);
        Error::deadlock_with_summary(report, summary)
    }
}

/// State shared between the handle, contexts, wakers and primitives
pub(crate) struct Shared {
    pub(crate) id: BubbleId,
    pub(crate) config: BubbleConfig,
    pub(crate) state: Mutex<Inner>,
    /// Signalled on every wake, for the controller's external wait
    wake_signal: Condvar,
}

/// Result of consulting the detector
#[derive(Debug, PartialEq, Eq)]
enum Quiesced {
    Continue,
    Closed,
}

impl Shared {
    /// Mark a task Runnable (called by its waker, from any thread)
    pub(crate) fn wake(&self, id: TaskId) {
        let queued = self.state.lock().tracker.wake(id);
        if queued {
            tracing::trace!(bubble = %self.id, task = %id, "task woken");
        }
        self.wake_signal.notify_all();
    }

    /// Current virtual time since the epoch
    pub(crate) fn now(&self) -> Duration {
        self.state.lock().clock.now()
    }

    /// Wait for `deadline`, or re-arm an existing wait
    ///
    /// Returns `None` once the deadline has been reached. The caller must be
    /// a bubble task or a foreign poller; the owner recorded for tie-breaks
    /// is the current task when it belongs to this bubble.
    pub(crate) fn poll_timer(
        &self,
        deadline: Duration,
        key: Option<TimerKey>,
        waker: &Waker,
    ) -> Option<TimerKey> {
        let mut inner = self.state.lock();
        if inner.clock.is_past(deadline) {
            if let Some(key) = key {
                inner.clock.cancel(key);
            }
            return None;
        }

        let owner = task::current_task()
            .filter(|(bubble, _)| *bubble == self.id)
            .map(|(_, task)| task);
        let key = match key {
            Some(key) if inner.clock.rearm(key, owner, waker) => key,
            _ => inner.clock.schedule(deadline, owner, waker.clone()),
        };
        Some(key)
    }

    pub(crate) fn cancel_timer(&self, key: TimerKey) {
        self.state.lock().clock.cancel(key);
    }

    /// Spawn a member task
    pub(crate) fn spawn_task<F, T>(
        self: &Arc<Self>,
        name: Option<String>,
        future: F,
    ) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let parent = match task::current_task() {
            Some((bubble, task)) if bubble != self.id => {
                return Err(UsageError::CrossBubbleSpawn {
                    task,
                    from: bubble,
                    into: self.id,
                }
                .into());
            }
            Some((_, task)) => task,
            None => match task::active_bubble() {
                Some(active) if active != self.id => {
                    return Err(UsageError::CrossBubbleSpawn {
                        task: TaskId::ROOT,
                        from: active,
                        into: self.id,
                    }
                    .into());
                }
                _ => TaskId::ROOT,
            },
        };

        if let Some(name) = &name {
            if name.len() > TASK_NAME_LENGTH_BYTES_MAX {
                return Err(UsageError::TaskNameTooLong {
                    length: name.len(),
                    limit: TASK_NAME_LENGTH_BYTES_MAX,
                }
                .into());
            }
        }

        let mut inner = self.state.lock();
        if inner.phase.is_terminal() {
            return Err(UsageError::BubbleClosed { bubble_id: self.id }.into());
        }
        let live = inner.registry.live_count();
        if live >= TASK_LIVE_COUNT_MAX {
            return Err(UsageError::TooManyTasks {
                bubble_id: self.id,
                live,
                limit: TASK_LIVE_COUNT_MAX,
            }
            .into());
        }

        let id = inner.registry.allocate_id();
        let (notifier, handle) = JoinNotifier::pair(Arc::downgrade(self), self.id, id);
        let wrapped = async move {
            let output = future.await;
            notifier.complete(output);
        }
        .boxed();

        let waker = futures::task::waker(Arc::new(TaskWaker {
            shared: Arc::downgrade(self),
            id,
        }));
        tracing::debug!(bubble = %self.id, task = %id, parent = %parent, name = ?name, "task spawned");
        inner.registry.insert(
            id,
            TaskEntry {
                cell: TaskCell::new(id, wrapped),
                waker,
                name,
                parent,
                aborted: false,
            },
        );
        inner.tracker.register(id);
        drop(inner);

        self.wake_signal.notify_all();
        Ok(handle)
    }

    /// Flag a task for abort; its future is dropped on its next turn
    pub(crate) fn abort_task(&self, id: TaskId) {
        let mut inner = self.state.lock();
        if inner.registry.mark_aborted(id) {
            inner.tracker.wake(id);
            tracing::debug!(bubble = %self.id, task = %id, "task aborted");
        }
        drop(inner);
        self.wake_signal.notify_all();
    }

    /// Dequeue the next task to poll, charging the step budget
    fn next_task(&self) -> Result<Option<TaskId>> {
        let mut guard = self.state.lock();
        let inner = &mut *guard;
        let Some(id) = inner.tracker.next_runnable(inner.rng.as_mut()) else {
            return Ok(None);
        };

        inner.steps += 1;
        if inner.steps > self.config.max_steps {
            inner.phase = BubblePhase::Closed;
            return Err(Error::StepsExceeded {
                steps: inner.steps,
                limit: self.config.max_steps,
            });
        }
        if self.config.record_schedule && inner.schedule.len() < BUBBLE_SCHEDULE_ENTRIES_COUNT_MAX {
            inner.schedule.push(id);
        }
        inner.phase = BubblePhase::Open;

        tracing::trace!(bubble = %self.id, task = %id, step = inner.steps, "polling task");
        Ok(Some(id))
    }

    /// Poll a member task once
    fn poll_member(&self, id: TaskId) {
        let target = self.state.lock().registry.poll_target(id);
        match target {
            PollTarget::Gone => self.state.lock().tracker.remove(id),
            PollTarget::Drop(cell) => {
                let future = cell.future.lock().take();
                let entry = self.retire(id, false);
                drop(future);
                drop(entry);
            }
            PollTarget::Poll(cell, waker) => {
                let mut slot = cell.future.lock();
                let Some(future) = slot.as_mut() else {
                    drop(slot);
                    drop(self.retire(id, false));
                    return;
                };

                let guard = PollGuard::enter(self.id, id);
                let poll = future.as_mut().poll(&mut Context::from_waker(&waker));
                let wait = guard.finish();

                match poll {
                    Poll::Ready(()) => {
                        let finished = slot.take();
                        drop(slot);
                        let entry = self.retire(id, true);
                        drop(finished);
                        drop(entry);
                    }
                    Poll::Pending => {
                        drop(slot);
                        self.state.lock().tracker.suspend(id, wait);
                    }
                }
            }
        }
    }

    /// Forget a task; the caller drops the entry after the lock is released
    fn retire(&self, id: TaskId, finished: bool) -> Option<TaskEntry> {
        let mut inner = self.state.lock();
        inner.tracker.remove(id);
        inner.registry.complete(id, finished)
    }

    /// Consult the detector at a point where nothing is runnable
    fn quiesce(&self, root_finished: bool) -> Result<Quiesced> {
        let mut inner = self.state.lock();
        if inner.tracker.has_runnable() {
            return Ok(Quiesced::Continue);
        }

        inner.phase = BubblePhase::Quiescent;
        inner.tracker.confirm_durable();
        let snapshot = inner.snapshot(root_finished);

        match decide(&snapshot) {
            Decision::AdvanceTo(deadline) => {
                let deadline_ms = deadline.as_millis() as u64;
                if deadline_ms > self.config.max_time_ms {
                    inner.phase = BubblePhase::Closed;
                    return Err(Error::TimeExceeded {
                        elapsed_ms: deadline_ms,
                        limit_ms: self.config.max_time_ms,
                    });
                }

                inner.phase = BubblePhase::AdvancingTime;
                let Some((to, fired)) = inner.clock.advance_to_next() else {
                    return Err(Error::internal("detector advanced time with no pending timer"));
                };
                let woken: Vec<TaskId> = fired.iter().filter_map(|f| f.owner).collect();
                tracing::debug!(bubble = %self.id, to_ms = to.as_millis() as u64, woken = ?woken, "clock advanced");
                inner.advances.push(ClockAdvance { to, woken });
                inner.phase = BubblePhase::Open;
                drop(inner);

                for fired in fired {
                    fired.waker.wake();
                }
                Ok(Quiesced::Continue)
            }
            Decision::AwaitExternal => {
                let wait = Duration::from_millis(self.config.external_wake_wait_ms);
                let until = Instant::now() + wait;
                tracing::debug!(bubble = %self.id, wait_ms = self.config.external_wake_wait_ms, "waiting for external wake");

                while !inner.tracker.has_runnable() {
                    if self.wake_signal.wait_until(&mut inner, until).timed_out() {
                        break;
                    }
                }
                if inner.tracker.has_runnable() {
                    inner.phase = BubblePhase::Open;
                    return Ok(Quiesced::Continue);
                }

                let err = inner.deadlocked(self.id, snapshot);
                tracing::warn!(bubble = %self.id, "no external wake arrived: {}", err);
                Err(err)
            }
            Decision::Closed => {
                inner.phase = BubblePhase::Closed;
                Ok(Quiesced::Closed)
            }
            Decision::Deadlocked => {
                let err = inner.deadlocked(self.id, snapshot);
                tracing::warn!(bubble = %self.id, "{}", err);
                Err(err)
            }
        }
    }

    /// Remove every task and drop its future outside the lock
    fn drain(&self) {
        let entries = {
            let mut inner = self.state.lock();
            if !inner.phase.is_terminal() {
                inner.phase = BubblePhase::Closed;
            }
            let entries = inner.registry.drain();
            for entry in &entries {
                inner.tracker.remove(entry.cell.id);
            }
            entries
        };

        let count = entries.len();
        for entry in entries {
            let future = entry.cell.future.lock().take();
            drop(future);
        }
        if count > 0 {
            tracing::debug!(bubble = %self.id, dropped = count, "dangling tasks dropped");
        }
    }
}

/// Entry point for creating bubbles
///
/// # Example
///
/// ```rust
/// use quiesce::{Bubble, BubbleConfig};
/// use std::time::Duration;
///
/// let elapsed = Bubble::new(BubbleConfig::default())
///     .run(|cx| async move {
///         cx.sleep(Duration::from_secs(5)).await;
///         Ok(cx.elapsed())
///     })
///     .unwrap();
/// assert_eq!(elapsed, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Bubble {
    config: BubbleConfig,
}

impl Bubble {
    /// Create a bubble builder with the given config
    pub fn new(config: BubbleConfig) -> Self {
        Self { config }
    }

    /// Create a bubble and bind it to the calling thread
    ///
    /// The calling thread's work becomes the root task; drive it with
    /// `BubbleHandle::block_on` and finish with `BubbleHandle::exit`.
    pub fn enter(config: BubbleConfig) -> Result<BubbleHandle> {
        if let Some(outer) = task::current_bubble() {
            return Err(UsageError::NestedBubble { outer }.into());
        }
        config.validate()?;

        let id = BubbleId(NEXT_BUBBLE_ID.fetch_add(1, Ordering::Relaxed));
        let mut tracker = BlockingTracker::new();
        tracker.register_root();

        let shared = Arc::new(Shared {
            id,
            state: Mutex::new(Inner {
                clock: VirtualClock::new(),
                registry: TaskRegistry::new(id),
                tracker,
                rng: config.seed.map(DeterministicRng::new),
                phase: BubblePhase::Open,
                steps: 0,
                schedule: Vec::new(),
                advances: Vec::new(),
            }),
            config,
            wake_signal: Condvar::new(),
        });
        let root_waker = futures::task::waker(Arc::new(TaskWaker {
            shared: Arc::downgrade(&shared),
            id: TaskId::ROOT,
        }));

        task::set_active_bubble(Some(id));
        tracing::debug!(bubble = %id, seed = ?shared.config.seed, "bubble entered");

        Ok(BubbleHandle {
            shared,
            root_waker,
            exited: false,
            failed: false,
            _not_send: PhantomData,
        })
    }

    /// Run `body` as the root task, tear down, and return its value
    ///
    /// Fails with `Error::Deadlock` if any spawned task is left blocked.
    pub fn run<F, Fut, T>(self, body: F) -> Result<T>
    where
        F: FnOnce(BubbleContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_report(body).map(|(value, _)| value)
    }

    /// Like `run`, also returning the bubble report
    pub fn run_with_report<F, Fut, T>(self, body: F) -> Result<(T, BubbleReport)>
    where
        F: FnOnce(BubbleContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut handle = Bubble::enter(self.config)?;
        let cx = handle.context();

        match handle.block_on(body(cx)) {
            Err(harness) => {
                handle.abandon();
                Err(harness)
            }
            Ok(Err(body_error)) => {
                if let Err(teardown) = handle.exit() {
                    tracing::warn!(
                        bubble = %handle.id(),
                        error = %teardown,
                        "teardown failed after the test body returned an error"
                    );
                }
                Err(body_error)
            }
            Ok(Ok(value)) => {
                let report = handle.exit()?;
                Ok((value, report))
            }
        }
    }
}

/// Run `body` in a bubble with the default configuration
pub fn run<F, Fut, T>(body: F) -> Result<T>
where
    F: FnOnce(BubbleContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Bubble::default().run(body)
}

/// An open bubble, bound to the thread that entered it
///
/// Dropping a handle that was never exited tears the bubble down and panics
/// if a deadlock is found.
pub struct BubbleHandle {
    shared: Arc<Shared>,
    root_waker: Waker,
    exited: bool,
    /// `block_on` already reported a harness error
    failed: bool,
    _not_send: PhantomData<*const ()>,
}

impl std::fmt::Debug for BubbleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BubbleHandle")
            .field("id", &self.shared.id)
            .field("exited", &self.exited)
            .field("failed", &self.failed)
            .finish()
    }
}

impl BubbleHandle {
    /// Bubble identifier
    pub fn id(&self) -> BubbleId {
        self.shared.id
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> BubblePhase {
        self.shared.state.lock().phase
    }

    /// Context for spawning and timers, cloneable into tasks
    pub fn context(&self) -> BubbleContext {
        BubbleContext::new(&self.shared)
    }

    /// Spawn a member task from the root
    pub fn spawn<F, T>(&self, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.spawn_task(None, future)
    }

    /// Spawn a named member task from the root
    pub fn spawn_named<F, T>(&self, name: impl Into<String>, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.spawn_task(Some(name.into()), future)
    }

    /// Run `future` as the root task's work until it completes
    ///
    /// Member tasks run whenever the root is blocked; time advances only when
    /// every task is durably blocked on a timer or on each other.
    pub fn block_on<F: Future>(&mut self, future: F) -> Result<F::Output> {
        self.ensure_open()?;

        self.shared.state.lock().tracker.resume(TaskId::ROOT);
        let mut future = std::pin::pin!(future);
        let root: Pin<&mut dyn Future<Output = F::Output>> = future.as_mut();

        match self.drive(Some(root)) {
            Ok(Some(output)) => Ok(output),
            Ok(None) => Err(Error::internal("scheduler stopped before the root task finished")),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Tear the bubble down
    ///
    /// Runs the remaining member tasks until they finish or block. Returns
    /// the report if none is left blocked, `Error::Deadlock` otherwise.
    pub fn exit(&mut self) -> Result<BubbleReport> {
        if self.exited {
            return Err(UsageError::AlreadyExited {
                bubble_id: self.shared.id,
            }
            .into());
        }
        if self.shared.state.lock().tracker.state(TaskId::ROOT) == Some(TaskState::Blocked) {
            return Err(UsageError::RootStillBlocked {
                bubble_id: self.shared.id,
            }
            .into());
        }
        if self.failed {
            self.abandon();
            return Err(UsageError::BubbleClosed {
                bubble_id: self.shared.id,
            }
            .into());
        }

        self.exited = true;
        let result = self.teardown();
        task::set_active_bubble(None);
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.exited {
            return Err(UsageError::AlreadyExited {
                bubble_id: self.shared.id,
            }
            .into());
        }
        if self.failed {
            return Err(UsageError::BubbleClosed {
                bubble_id: self.shared.id,
            }
            .into());
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<BubbleReport> {
        self.shared.state.lock().tracker.remove(TaskId::ROOT);

        match self.drive::<()>(None) {
            Ok(_) => {
                let report = self
                    .shared
                    .state
                    .lock()
                    .bubble_report(self.shared.id, Verdict::Closed);
                tracing::info!(
                    bubble = %self.shared.id,
                    steps = report.steps,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "bubble closed"
                );
                Ok(report)
            }
            Err(e) => {
                self.failed = true;
                self.shared.drain();
                Err(e)
            }
        }
    }

    /// Drop everything without a verdict (after a reported failure)
    fn abandon(&mut self) {
        self.exited = true;
        self.shared.drain();
        task::set_active_bubble(None);
    }

    /// Run tasks until the root completes or, without a root, until teardown
    /// reaches a verdict
    fn drive<T>(&mut self, mut root: Option<Pin<&mut dyn Future<Output = T>>>) -> Result<Option<T>> {
        let root_finished = root.is_none();
        loop {
            match self.shared.next_task()? {
                Some(id) if id.is_root() => {
                    let Some(future) = root.as_mut() else {
                        return Err(Error::internal("root task scheduled after the test body returned"));
                    };

                    let guard = PollGuard::enter(self.shared.id, id);
                    let poll = future.as_mut().poll(&mut Context::from_waker(&self.root_waker));
                    let wait = guard.finish();

                    match poll {
                        // The root stays Running: the thread is back in the test body
                        Poll::Ready(output) => return Ok(Some(output)),
                        Poll::Pending => self.shared.state.lock().tracker.suspend(id, wait),
                    }
                }
                Some(id) => self.shared.poll_member(id),
                None => {
                    if self.shared.quiesce(root_finished)? == Quiesced::Closed {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl Drop for BubbleHandle {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        if self.failed || std::thread::panicking() {
            self.abandon();
            return;
        }

        if let Err(e) = self.exit() {
            panic!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiesce_core::{BlockingReason, ChannelOp};

    #[test]
    fn test_block_on_ready_future() {
        let mut handle = Bubble::enter(BubbleConfig::default()).unwrap();
        assert_eq!(handle.block_on(async { 7 }).unwrap(), 7);
        let report = handle.exit().unwrap();
        assert_eq!(report.verdict, Verdict::Closed);
        assert_eq!(report.steps, 1);
        assert_eq!(report.schedule, vec![TaskId::ROOT]);
    }

    #[test]
    fn test_nested_enter_rejected() {
        let mut outer = Bubble::enter(BubbleConfig::default()).unwrap();
        let err = Bubble::enter(BubbleConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::Usage(UsageError::NestedBubble { outer: id }) if id == outer.id()
        ));
        outer.exit().unwrap();

        // The thread is free again
        let mut next = Bubble::enter(BubbleConfig::default()).unwrap();
        next.exit().unwrap();
    }

    #[test]
    fn test_exit_twice() {
        let mut handle = Bubble::enter(BubbleConfig::default()).unwrap();
        handle.exit().unwrap();
        let err = handle.exit().unwrap_err();
        assert!(matches!(err, Error::Usage(UsageError::AlreadyExited { .. })));
        assert!(handle.block_on(async {}).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Bubble::enter(BubbleConfig::default().with_max_steps(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }));
        assert!(task::active_bubble().is_none());
    }

    #[test]
    fn test_spawned_tasks_run_in_spawn_order() {
        let mut handle = Bubble::enter(BubbleConfig::default()).unwrap();
        let a = handle.spawn(async { 1 }).unwrap();
        let b = handle.spawn(async { 2 }).unwrap();
        assert_eq!(a.id(), TaskId(1));
        assert_eq!(b.id(), TaskId(2));

        let sum = handle
            .block_on(async move { a.await.unwrap() + b.await.unwrap() })
            .unwrap();
        assert_eq!(sum, 3);

        let report = handle.exit().unwrap();
        assert_eq!(report.tasks_spawned, 2);
        assert_eq!(report.tasks_completed, 2);
        assert_eq!(report.schedule[..3], [TaskId::ROOT, TaskId(1), TaskId(2)]);
    }

    #[test]
    fn test_unpolled_member_runs_at_teardown() {
        let mut handle = Bubble::enter(BubbleConfig::default()).unwrap();
        let task = handle.spawn(async {}).unwrap();
        let report = handle.exit().unwrap();
        assert_eq!(report.tasks_completed, 1);
        assert!(task.is_finished());
    }

    #[test]
    fn test_foreign_wait_reported_after_external_wait() {
        let config = BubbleConfig::default().with_external_wake_wait_ms(10);
        let mut handle = Bubble::enter(config).unwrap();
        let cx = handle.context();
        let err = handle
            .block_on(async move {
                let stuck = cx.spawn(futures::future::pending::<()>()).unwrap();
                stuck.await
            })
            .unwrap_err();

        // A bare pending future registers nothing, so the member is not durable
        let report = err.deadlock_report().unwrap();
        assert!(!report.root_finished);
        assert_eq!(
            report.task(TaskId::ROOT).unwrap().reason,
            BlockingReason::Channel { op: ChannelOp::Join }
        );
        assert_eq!(report.task(TaskId(1)).unwrap().reason, BlockingReason::Unknown);

        let err = handle.exit().unwrap_err();
        assert!(matches!(err, Error::Usage(UsageError::RootStillBlocked { .. })));
    }

    #[test]
    fn test_spawn_rejected_after_exit() {
        let mut handle = Bubble::enter(BubbleConfig::default()).unwrap();
        let cx = handle.context();
        handle.exit().unwrap();
        let err = cx.spawn(async {}).unwrap_err();
        assert!(matches!(err, Error::Usage(UsageError::BubbleClosed { .. })));
    }

    #[test]
    fn test_task_name_limit() {
        let mut handle = Bubble::enter(BubbleConfig::default()).unwrap();
        let long = "x".repeat(TASK_NAME_LENGTH_BYTES_MAX + 1);
        let err = handle.spawn_named(long, async {}).unwrap_err();
        assert!(matches!(err, Error::Usage(UsageError::TaskNameTooLong { .. })));
        handle.exit().unwrap();
    }

    #[test]
    fn test_step_budget() {
        let config = BubbleConfig::default().with_max_steps(10);
        let mut handle = Bubble::enter(config).unwrap();
        let cx = handle.context();
        let err = handle
            .block_on(async move {
                loop {
                    cx.yield_now().await;
                }
            })
            .unwrap_err();
        assert!(matches!(err, Error::StepsExceeded { limit: 10, .. }));
    }
}

//! Per-bubble context passed to the test body and its tasks

use crate::bubble::Shared;
use crate::join::JoinHandle;
use crate::time::{After, Elapsed, Sleep, Ticker, VirtualTime, YieldNow};
use chrono::{DateTime, Utc};
use quiesce_core::{BubbleId, Result, UsageError, TIMER_DURATION_MS_MAX};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Handle to a bubble's scheduler and clock
///
/// Cheap to clone and `Send`, so it can be moved into spawned tasks. It does
/// not keep the bubble alive: once the bubble is gone, spawns fail with
/// `UsageError::BubbleClosed` and timers resolve immediately.
#[derive(Debug, Clone)]
pub struct BubbleContext {
    shared: Weak<Shared>,
    id: BubbleId,
    epoch_ms: u64,
}

impl BubbleContext {
    pub(crate) fn new(shared: &Arc<Shared>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            id: shared.id,
            epoch_ms: shared.config.epoch_ms,
        }
    }

    /// Bubble this context belongs to
    pub fn bubble_id(&self) -> BubbleId {
        self.id
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.shared
            .upgrade()
            .ok_or_else(|| UsageError::BubbleClosed { bubble_id: self.id }.into())
    }

    /// Spawn a task into this bubble
    pub fn spawn<F, T>(&self, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.shared()?.spawn_task(None, future)
    }

    /// Spawn a task with a diagnostic name shown in deadlock reports
    pub fn spawn_named<F, T>(&self, name: impl Into<String>, future: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.shared()?.spawn_task(Some(name.into()), future)
    }

    /// Virtual time since the bubble epoch
    pub fn elapsed(&self) -> Duration {
        self.shared
            .upgrade()
            .map(|shared| shared.now())
            .unwrap_or_default()
    }

    /// Virtual wall-clock time in milliseconds since the Unix epoch
    pub fn now_ms(&self) -> u64 {
        self.epoch_ms + self.elapsed().as_millis() as u64
    }

    /// Virtual wall-clock time
    pub fn now(&self) -> DateTime<Utc> {
        to_datetime(self.epoch_ms, self.elapsed())
    }

    /// Sleep for `duration` of virtual time
    pub fn sleep(&self, duration: Duration) -> Sleep {
        let deadline = self.elapsed().saturating_add(clamp(duration));
        Sleep::new(self.shared.clone(), self.id, deadline)
    }

    /// Sleep until `deadline` (virtual time since the bubble epoch)
    pub fn sleep_until(&self, deadline: Duration) -> Sleep {
        Sleep::new(self.shared.clone(), self.id, deadline)
    }

    /// Resolve to the virtual wall-clock instant at which `duration` elapsed
    pub fn after(&self, duration: Duration) -> After {
        After::new(self.sleep(duration), self.epoch_ms)
    }

    /// Fire every `period` of virtual time, starting one period from now
    pub fn ticker(&self, period: Duration) -> Ticker {
        Ticker::new(self.shared.clone(), self.id, self.elapsed(), clamp(period), self.epoch_ms)
    }

    /// Run `future`, failing with `Elapsed` if it has not finished in time
    pub async fn timeout<F: Future>(
        &self,
        duration: Duration,
        future: F,
    ) -> std::result::Result<F::Output, Elapsed> {
        crate::time::timeout(self.sleep(duration), future).await
    }

    /// Let every other runnable task run before continuing
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::default()
    }

    /// `TimeProvider` backed by this bubble's clock
    pub fn time_provider(&self) -> VirtualTime {
        VirtualTime::new(self.clone())
    }
}

fn clamp(duration: Duration) -> Duration {
    duration.min(Duration::from_millis(TIMER_DURATION_MS_MAX))
}

pub(crate) fn to_datetime(epoch_ms: u64, elapsed: Duration) -> DateTime<Utc> {
    let ms = epoch_ms.saturating_add(elapsed.as_millis() as u64);
    DateTime::<Utc>::from_timestamp_millis(ms as i64).unwrap_or_default()
}

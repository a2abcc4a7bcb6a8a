//! Timer primitives backed by the bubble's virtual clock
//!
//! TigerStyle: Explicit time control, trait-based abstraction.
//!
//! Every timer registers a wake-up with the bubble clock and tells the
//! tracker it is a timer wait. The clock only reaches the deadline once all
//! bubble tasks are durably blocked, so a `sleep(1h)` completes instantly in
//! real time and never before the rest of the bubble has settled.
//!
//! `VirtualTime` implements `quiesce_core::TimeProvider`, so code written
//! against the trait runs unchanged in production (`WallClockTime`) and
//! inside a bubble.

use crate::bubble::Shared;
use crate::clock::TimerKey;
use crate::context::{to_datetime, BubbleContext};
use crate::task::register_wait;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{self, Either};
use futures::Stream;
use quiesce_core::{BlockingReason, BubbleId, TimeProvider};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;

/// Future that completes when the virtual clock reaches its deadline
///
/// Dropping it cancels the wake-up. If the bubble is gone it completes
/// immediately.
pub struct Sleep {
    shared: Weak<Shared>,
    bubble: BubbleId,
    deadline: Duration,
    key: Option<TimerKey>,
}

impl Sleep {
    pub(crate) fn new(shared: Weak<Shared>, bubble: BubbleId, deadline: Duration) -> Self {
        Self {
            shared,
            bubble,
            deadline,
            key: None,
        }
    }

    /// Deadline as virtual time since the bubble epoch
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Whether the deadline has been reached
    pub fn is_elapsed(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.now() >= self.deadline,
            None => true,
        }
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("bubble", &self.bubble)
            .field("deadline", &self.deadline)
            .field("armed", &self.key.is_some())
            .finish()
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(shared) = self.shared.upgrade() else {
            return Poll::Ready(());
        };

        let key = self.key.take();
        match shared.poll_timer(self.deadline, key, cx.waker()) {
            None => Poll::Ready(()),
            Some(key) => {
                self.key = Some(key);
                register_wait(
                    Some(self.bubble),
                    BlockingReason::Timer {
                        deadline: self.deadline,
                    },
                );
                Poll::Pending
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Some(shared) = self.shared.upgrade() {
                shared.cancel_timer(key);
            }
        }
    }
}

/// Future resolving to the virtual wall-clock instant its timer fired
#[derive(Debug)]
pub struct After {
    sleep: Sleep,
    epoch_ms: u64,
}

impl After {
    pub(crate) fn new(sleep: Sleep, epoch_ms: u64) -> Self {
        Self { sleep, epoch_ms }
    }
}

impl Future for After {
    type Output = DateTime<Utc>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.sleep).poll(cx) {
            Poll::Ready(()) => Poll::Ready(to_datetime(self.epoch_ms, self.sleep.deadline)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Periodic timer
///
/// Ticks fall on multiples of the period from its creation. Ticks missed
/// while the owner was busy are skipped, not delivered in a burst.
#[derive(Debug)]
pub struct Ticker {
    sleep: Sleep,
    period: Duration,
    epoch_ms: u64,
}

impl Ticker {
    pub(crate) fn new(
        shared: Weak<Shared>,
        bubble: BubbleId,
        start: Duration,
        period: Duration,
        epoch_ms: u64,
    ) -> Self {
        assert!(!period.is_zero(), "ticker period must be positive");
        Self {
            sleep: Sleep::new(shared, bubble, start.saturating_add(period)),
            period,
            epoch_ms,
        }
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick; returns the virtual instant it was due
    pub async fn tick(&mut self) -> DateTime<Utc> {
        future::poll_fn(|cx| self.poll_tick(cx)).await
    }

    /// Poll for the next tick
    pub fn poll_tick(&mut self, cx: &mut Context<'_>) -> Poll<DateTime<Utc>> {
        match Pin::new(&mut self.sleep).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => {
                let due = self.sleep.deadline;
                let now = match self.sleep.shared.upgrade() {
                    Some(shared) => shared.now(),
                    None => due,
                };
                let next = next_tick(due, now, self.period);
                self.sleep = Sleep::new(self.sleep.shared.clone(), self.sleep.bubble, next);
                Poll::Ready(to_datetime(self.epoch_ms, due))
            }
        }
    }
}

impl Stream for Ticker {
    type Item = DateTime<Utc>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_tick(cx).map(Some)
    }
}

/// First multiple of `period` after `due` that is later than `now`
fn next_tick(due: Duration, now: Duration, period: Duration) -> Duration {
    let behind = now.saturating_sub(due).as_nanos();
    let periods = behind / period.as_nanos() + 1;
    let step = period.as_nanos().saturating_mul(periods);
    due.saturating_add(Duration::from_nanos(u64::try_from(step).unwrap_or(u64::MAX)))
}

/// Returned by `timeout` when the deadline passed first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    deadline: Duration,
}

impl Elapsed {
    /// The deadline that passed (virtual time since the epoch)
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline of {}ms has elapsed", self.deadline.as_millis())
    }
}

impl std::error::Error for Elapsed {}

/// Race `future` against `sleep`; the future wins a tie
pub(crate) async fn timeout<F: Future>(sleep: Sleep, future: F) -> Result<F::Output, Elapsed> {
    let deadline = sleep.deadline();
    let future = std::pin::pin!(future);
    match future::select(future, sleep).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(Elapsed { deadline }),
    }
}

/// Requeues the current task once without blocking it
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// `TimeProvider` backed by a bubble's virtual clock
#[derive(Debug, Clone)]
pub struct VirtualTime {
    cx: BubbleContext,
}

impl VirtualTime {
    pub(crate) fn new(cx: BubbleContext) -> Self {
        Self { cx }
    }
}

#[async_trait]
impl TimeProvider for VirtualTime {
    fn now_ms(&self) -> u64 {
        self.cx.now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        self.cx.sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bubble;
    use futures::StreamExt;
    use quiesce_core::BubbleConfig;
    use std::sync::Arc;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_next_tick_skips_missed_periods() {
        assert_eq!(next_tick(ms(100), ms(100), ms(100)), ms(200));
        assert_eq!(next_tick(ms(100), ms(350), ms(100)), ms(400));
        assert_eq!(next_tick(ms(100), ms(400), ms(100)), ms(500));
    }

    #[test]
    fn test_sleep_advances_virtual_time() {
        let (_, report) = Bubble::new(BubbleConfig::default())
            .run_with_report(|cx| async move {
                cx.sleep(Duration::from_secs(3600)).await;
                assert_eq!(cx.elapsed(), Duration::from_secs(3600));
                Ok(())
            })
            .unwrap();
        assert_eq!(report.advance_times(), vec![Duration::from_secs(3600)]);
    }

    #[test]
    fn test_zero_sleep_is_ready() {
        let (_, report) = Bubble::new(BubbleConfig::default())
            .run_with_report(|cx| async move {
                cx.sleep(Duration::ZERO).await;
                Ok(())
            })
            .unwrap();
        assert!(report.advances.is_empty());
    }

    #[test]
    fn test_after_returns_fire_instant() {
        Bubble::new(BubbleConfig::default())
            .run(|cx| async move {
                let start = cx.now();
                let fired = cx.after(Duration::from_millis(1500)).await;
                assert_eq!(fired - start, chrono::Duration::milliseconds(1500));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_ticker_ticks_on_period() {
        Bubble::new(BubbleConfig::default())
            .run(|cx| async move {
                let mut ticker = cx.ticker(Duration::from_millis(250));
                ticker.tick().await;
                ticker.tick().await;
                assert_eq!(cx.elapsed(), Duration::from_millis(500));

                let ticks: Vec<_> = ticker.take(2).collect().await;
                assert_eq!(ticks.len(), 2);
                assert_eq!(cx.elapsed(), Duration::from_millis(1000));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_timeout_elapses() {
        Bubble::new(BubbleConfig::default())
            .run(|cx| async move {
                let slow = cx.sleep(Duration::from_secs(10));
                let err = cx.timeout(Duration::from_secs(1), slow).await.unwrap_err();
                assert_eq!(err.deadline(), Duration::from_secs(1));
                assert_eq!(cx.elapsed(), Duration::from_secs(1));

                let fast = cx.timeout(Duration::from_secs(5), async { 42 }).await;
                assert_eq!(fast, Ok(42));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_dropped_sleep_never_fires() {
        let (_, report) = Bubble::new(BubbleConfig::default())
            .run_with_report(|cx| async move {
                drop(cx.sleep(Duration::from_secs(1)));
                let pending = cx.sleep(Duration::from_secs(5));
                // Arm it, then drop it
                let _ = cx.timeout(Duration::from_secs(2), pending).await;
                cx.sleep(Duration::from_secs(4)).await;
                Ok(())
            })
            .unwrap();
        assert_eq!(
            report.advance_times(),
            vec![Duration::from_secs(2), Duration::from_secs(6)]
        );
    }

    #[test]
    fn test_virtual_time_provider() {
        async fn wait_twice(time: Arc<dyn TimeProvider>) -> u64 {
            let start = time.now_ms();
            time.sleep_ms(100).await;
            time.sleep(Duration::from_millis(50)).await;
            time.now_ms() - start
        }

        let waited = Bubble::new(BubbleConfig::default())
            .run(|cx| async move { Ok(wait_twice(Arc::new(cx.time_provider())).await) })
            .unwrap();
        assert_eq!(waited, 150);
    }
}

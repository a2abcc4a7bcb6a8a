//! Time abstraction shared by production code and bubble tests
//!
//! TigerStyle: All time access goes through an abstraction trait.
//!
//! Code written against `TimeProvider` runs unchanged in production
//! (`WallClockTime`, backed by tokio) and inside a bubble (`VirtualTime` in
//! the `quiesce` crate, backed by the bubble's virtual clock).
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Code under test (SAME CODE)          │
//! └──────────────────────┬──────────────────────┘
//!                        │ TimeProvider
//!           ┌────────────┴────────────┐
//!     ┌─────▼─────┐            ┌──────▼──────┐
//!     │ WallClock │            │ VirtualTime │
//!     │  (tokio)  │            │  (bubble)   │
//!     └───────────┘            └─────────────┘
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time provider abstraction
///
/// Never call `SystemTime::now()` or `tokio::time::sleep` directly in code
/// that should be testable inside a bubble.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the given number of milliseconds
    ///
    /// In production: real delay. In a bubble: a timer wait that completes
    /// when the virtual clock reaches the deadline.
    async fn sleep_ms(&self, ms: u64);

    /// Sleep for a duration (millisecond resolution)
    async fn sleep(&self, duration: Duration) {
        self.sleep_ms(duration.as_millis() as u64).await;
    }
}

/// Shared, dynamically dispatched time provider
pub type SharedTimeProvider = Arc<dyn TimeProvider>;

/// Production time provider using the wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

//! TigerStyle constants for quiesce
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Bubble Limits
// =============================================================================

/// Maximum number of task polls in one bubble before forced termination
pub const BUBBLE_STEPS_COUNT_MAX: u64 = 10_000_000;

/// Maximum virtual time a bubble may reach in milliseconds (1 year)
pub const BUBBLE_TIME_MS_MAX: u64 = 365 * 24 * 60 * 60 * 1000;

/// Virtual epoch of every bubble clock: 2000-01-01T00:00:00Z in milliseconds
pub const BUBBLE_EPOCH_MS: u64 = 946_684_800_000;

/// Default real-time wait for a wake from outside the bubble (1 sec)
pub const BUBBLE_EXTERNAL_WAKE_WAIT_MS_DEFAULT: u64 = 1000;

/// Maximum real-time wait for a wake from outside the bubble (1 min)
pub const BUBBLE_EXTERNAL_WAKE_WAIT_MS_MAX: u64 = 60 * 1000;

/// Maximum number of scheduling decisions kept in a bubble report
pub const BUBBLE_SCHEDULE_ENTRIES_COUNT_MAX: usize = 100_000;

// =============================================================================
// Task Limits
// =============================================================================

/// Maximum length of a task name in bytes
pub const TASK_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of live tasks in one bubble
pub const TASK_LIVE_COUNT_MAX: usize = 100_000;

// =============================================================================
// Primitive Limits
// =============================================================================

/// Maximum capacity of a bubble channel
pub const CHANNEL_CAPACITY_COUNT_MAX: usize = 1 << 20;

/// Maximum buffer capacity of a pipe in bytes (16 MB)
pub const PIPE_CAPACITY_BYTES_MAX: usize = 16 * 1024 * 1024;

/// Maximum length of a single line read by a line reader in bytes (1 MB)
pub const LINE_LENGTH_BYTES_MAX: usize = 1024 * 1024;

/// Maximum duration of a single timer in milliseconds (matches the time budget)
pub const TIMER_DURATION_MS_MAX: u64 = BUBBLE_TIME_MS_MAX;

// Compile-time assertions for constant validity
const _: () = {
    assert!(BUBBLE_STEPS_COUNT_MAX >= 1_000);
    assert!(BUBBLE_EXTERNAL_WAKE_WAIT_MS_MAX >= BUBBLE_EXTERNAL_WAKE_WAIT_MS_DEFAULT);
    assert!(TASK_NAME_LENGTH_BYTES_MAX >= 16);
    assert!(PIPE_CAPACITY_BYTES_MAX >= LINE_LENGTH_BYTES_MAX);
    assert!(TIMER_DURATION_MS_MAX <= BUBBLE_TIME_MS_MAX);
};

//! quiesce core
//!
//! Core types, errors, configuration and constants for the quiesce
//! deterministic concurrency test harness.
//!
//! # Overview
//!
//! The harness runs a test body and the tasks it spawns inside a *bubble*: an
//! isolated scheduler with a virtual clock that only advances once every task
//! is durably blocked, and that fails the test when tasks are left blocked at
//! teardown. This crate holds the vocabulary shared by the harness and by
//! code under test; the scheduler lives in the `quiesce` crate.
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `TASK_NAME_LENGTH_BYTES_MAX`)
//! - Exhaustive, tagged state (`BlockingReason`, `TaskState`)
//! - Errors carry enough context to diagnose without a debugger

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod report;
pub mod task;
pub mod telemetry;

pub use config::BubbleConfig;
pub use constants::*;
pub use error::{Error, Result, StreamError, UsageError};
pub use io::{SharedTimeProvider, TimeProvider, WallClockTime};
pub use report::{BlockedTask, BubbleReport, ClockAdvance, DeadlockReport, Verdict};
pub use task::{BlockingReason, BubbleId, ChannelOp, StreamOp, TaskId, TaskState};
pub use telemetry::{init_telemetry, try_init_telemetry, TelemetryConfig};

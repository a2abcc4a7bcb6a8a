//! quiesce - deterministic concurrency testing
//!
//! Runs a test body and the tasks it spawns inside a *bubble*: an isolated
//! scheduler with a virtual clock.
//!
//! # Overview
//!
//! - Virtual time: the clock only moves when every task in the bubble is
//!   durably blocked, and then jumps straight to the next timer
//! - Deterministic scheduling: FIFO by default, seeded ChaCha20 shuffling
//!   with `BubbleConfig::seed`
//! - Leak detection: tasks still blocked when the test body returns fail the
//!   test with a `DeadlockReport`
//! - Bubble-aware collaborators: channels, cancellation tokens, pipes and a
//!   line reader, whose waits the bubble can see
//!
//! # Example
//!
//! ```rust
//! use quiesce::{pipe, Bubble, BubbleConfig, LineReader};
//! use futures::io::AsyncWriteExt;
//!
//! // The reader only stops at end of stream; closing the writer lets it exit.
//! Bubble::new(BubbleConfig::default())
//!     .run(|cx| async move {
//!         let (mut writer, reader) = pipe();
//!         cx.spawn_named("reader", async move {
//!             let mut lines = LineReader::new(reader);
//!             while lines.next_line().await.is_ok() {}
//!         })?;
//!
//!         writer.write_all(b"abc\n").await.ok();
//!         writer.close();
//!         Ok(())
//!     })
//!     .unwrap();
//! ```
//!
//! # TigerStyle
//!
//! - All scheduling decisions are deterministic for a given program and seed
//! - Always log the seed for reproducibility (`BubbleConfig::from_env`)
//! - Explicit limits on steps, virtual time, tasks and buffers

pub mod bubble;
pub mod clock;
pub mod context;
pub mod detector;
pub mod join;
mod registry;
pub mod rng;
pub mod stream;
pub mod sync;
mod task;
pub mod time;
mod tracker;

pub use bubble::{run, Bubble, BubbleHandle, BubblePhase};
pub use clock::VirtualClock;
pub use context::BubbleContext;
pub use detector::{decide, Decision, QuiescenceSnapshot};
pub use join::{JoinError, JoinHandle};
pub use rng::DeterministicRng;
pub use stream::{pipe, pipe_with_capacity, LineReader, PipeReader, PipeWriter};
pub use sync::{
    channel, CancellationToken, Receiver, SendError, Sender, TryRecvError, TrySendError,
    WaitForCancellation,
};
pub use time::{After, Elapsed, Sleep, Ticker, VirtualTime, YieldNow};

pub use quiesce_core::{
    BlockedTask, BlockingReason, BubbleConfig, BubbleId, BubbleReport, ChannelOp, ClockAdvance,
    DeadlockReport, Error, Result, SharedTimeProvider, StreamError, StreamOp, TaskId, TaskState,
    TimeProvider, UsageError, Verdict, WallClockTime,
};
pub use quiesce_core::{init_telemetry, try_init_telemetry, TelemetryConfig};

//! Synchronization primitives that report their waits to the bubble

mod cancel;
mod channel;

pub use cancel::{CancellationToken, WaitForCancellation};
pub use channel::{channel, Receiver, SendError, Sender, TryRecvError, TrySendError};

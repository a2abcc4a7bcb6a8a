//! Cancellation tokens
//!
//! Cancellation is an ordinary task action: `cancel()` wakes every task
//! waiting in `cancelled()`, and nothing else. Tasks that never look at the
//! token keep running, or keep blocking.

use crate::task::{current_bubble, register_wait};
use parking_lot::Mutex;
use quiesce_core::{BlockingReason, BubbleId, ChannelOp};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

struct TokenState {
    cancelled: bool,
    waiters: Vec<Waker>,
    children: Vec<Weak<TokenInner>>,
}

struct TokenInner {
    owner: Option<BubbleId>,
    state: Mutex<TokenState>,
}

impl TokenInner {
    fn new(owner: Option<BubbleId>, cancelled: bool) -> Arc<Self> {
        Arc::new(Self {
            owner,
            state: Mutex::new(TokenState {
                cancelled,
                waiters: Vec::new(),
                children: Vec::new(),
            }),
        })
    }
}

/// A cancellation signal shared by clones; fires at most once
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a token owned by the current bubble, if any
    pub fn new() -> Self {
        Self {
            inner: TokenInner::new(current_bubble(), false),
        }
    }

    /// Cancel this token and every child token
    ///
    /// Idempotent: only the first call wakes waiters.
    pub fn cancel(&self) {
        let mut pending = vec![self.inner.clone()];
        while let Some(node) = pending.pop() {
            let (waiters, children) = {
                let mut state = node.state.lock();
                if state.cancelled {
                    continue;
                }
                state.cancelled = true;
                (
                    std::mem::take(&mut state.waiters),
                    std::mem::take(&mut state.children),
                )
            };
            for waker in waiters {
                waker.wake();
            }
            pending.extend(children.iter().filter_map(Weak::upgrade));
        }
        tracing::trace!(owner = ?self.inner.owner, "token cancelled");
    }

    /// Whether `cancel` was called on this token or an ancestor
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Wait until the token is cancelled
    pub fn cancelled(&self) -> WaitForCancellation<'_> {
        WaitForCancellation { token: self }
    }

    /// Create a token cancelled together with this one
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child_token(&self) -> CancellationToken {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return Self {
                inner: TokenInner::new(self.inner.owner, true),
            };
        }

        let child = TokenInner::new(self.inner.owner, false);
        state.children.retain(|c| c.strong_count() > 0);
        state.children.push(Arc::downgrade(&child));
        Self { inner: child }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("owner", &self.inner.owner)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Future returned by `CancellationToken::cancelled`
#[derive(Debug)]
pub struct WaitForCancellation<'a> {
    token: &'a CancellationToken,
}

impl Future for WaitForCancellation<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let inner = &self.token.inner;
        let mut state = inner.state.lock();
        if state.cancelled {
            return Poll::Ready(());
        }
        if !state.waiters.iter().any(|w| w.will_wake(cx.waker())) {
            state.waiters.push(cx.waker().clone());
        }
        drop(state);

        register_wait(inner.owner, BlockingReason::Channel { op: ChannelOp::Cancelled });
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bubble;
    use quiesce_core::BubbleConfig;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();

        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());

        let sibling = parent.child_token();
        parent.cancel();
        assert!(sibling.is_cancelled());
        assert!(parent.child_token().is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_waiting_task() {
        Bubble::new(BubbleConfig::default())
            .run(|cx| async move {
                let token = CancellationToken::new();
                let waiter_token = token.child_token();
                let waiter = cx.spawn(async move {
                    waiter_token.cancelled().await;
                    "woken"
                })?;

                cx.sleep(Duration::from_millis(10)).await;
                assert!(!waiter.is_finished());
                token.cancel();
                assert_eq!(waiter.await.unwrap(), "woken");
                Ok(())
            })
            .unwrap();
    }
}

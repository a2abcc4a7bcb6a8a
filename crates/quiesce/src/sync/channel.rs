//! Bubble-aware multi-producer, single-consumer channel
//!
//! Waits on a channel created inside a bubble are durable: only another task
//! of the same bubble can complete them. Capacity 0 gives a rendezvous
//! channel where `send` completes once the receiver has taken the value.

use crate::task::{current_bubble, register_wait};
use futures::future;
use futures::Stream;
use parking_lot::Mutex;
use quiesce_core::{BlockingReason, BubbleId, ChannelOp, CHANNEL_CAPACITY_COUNT_MAX};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Create a channel holding up to `capacity` values (0 = rendezvous)
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(
        capacity <= CHANNEL_CAPACITY_COUNT_MAX,
        "channel capacity {} exceeds {}",
        capacity,
        CHANNEL_CAPACITY_COUNT_MAX
    );

    let chan = Arc::new(Chan {
        owner: current_bubble(),
        state: Mutex::new(State {
            queue: VecDeque::new(),
            capacity,
            closed: false,
            receiver_alive: true,
            sender_count: 1,
            next_ticket: 0,
            received: 0,
            recv_waker: None,
            send_wakers: Vec::new(),
        }),
    });
    (Sender { chan: chan.clone() }, Receiver { chan })
}

/// The receiver is gone or the channel was closed; the value is returned
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recover the value that could not be sent
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sending on a closed channel")
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Why `try_send` failed
pub enum TrySendError<T> {
    /// No room (or, for rendezvous, no receiver waiting)
    Full(T),
    /// The receiver is gone or the channel was closed
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that could not be sent
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Closed(value) => value,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "Full(..)"),
            TrySendError::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "channel is full"),
            TrySendError::Closed(_) => write!(f, "channel is closed"),
        }
    }
}

impl<T> std::error::Error for TrySendError<T> {}

/// Why `try_recv` returned nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing buffered yet
    Empty,
    /// Closed (or all senders dropped) and drained
    Disconnected,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "channel is empty"),
            TryRecvError::Disconnected => write!(f, "channel is closed"),
        }
    }
}

impl std::error::Error for TryRecvError {}

struct State<T> {
    /// Values with the ticket they were sent under
    queue: VecDeque<(u64, T)>,
    capacity: usize,
    closed: bool,
    receiver_alive: bool,
    sender_count: usize,
    next_ticket: u64,
    /// Every ticket below this has been received
    received: u64,
    recv_waker: Option<Waker>,
    send_wakers: Vec<Waker>,
}

impl<T> State<T> {
    fn is_disconnected(&self) -> bool {
        self.closed || self.sender_count == 0
    }

    fn take_send_wakers(&mut self) -> Vec<Waker> {
        std::mem::take(&mut self.send_wakers)
    }

    fn park_sender(&mut self, waker: &Waker) {
        if !self.send_wakers.iter().any(|w| w.will_wake(waker)) {
            self.send_wakers.push(waker.clone());
        }
    }

    fn push(&mut self, value: T) -> (u64, Option<Waker>) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back((ticket, value));
        (ticket, self.recv_waker.take())
    }
}

struct Chan<T> {
    owner: Option<BubbleId>,
    state: Mutex<State<T>>,
}

impl<T> Chan<T> {
    fn poll_send(
        &self,
        cx: &mut Context<'_>,
        value: &mut Option<T>,
        ticket: &mut Option<u64>,
    ) -> Poll<Result<(), SendError<T>>> {
        let mut state = self.state.lock();

        // Rendezvous: the value is queued, wait for the receiver to take it
        if let Some(mine) = *ticket {
            if state.received > mine {
                return Poll::Ready(Ok(()));
            }
            if !state.receiver_alive {
                if let Some(pos) = state.queue.iter().position(|(t, _)| *t == mine) {
                    if let Some((_, value)) = state.queue.remove(pos) {
                        return Poll::Ready(Err(SendError(value)));
                    }
                }
                return Poll::Ready(Ok(()));
            }
            state.park_sender(cx.waker());
            drop(state);
            register_wait(self.owner, BlockingReason::Channel { op: ChannelOp::Send });
            return Poll::Pending;
        }

        let Some(item) = value.take() else {
            return Poll::Ready(Ok(()));
        };
        if state.closed || !state.receiver_alive {
            return Poll::Ready(Err(SendError(item)));
        }
        if state.capacity > 0 && state.queue.len() >= state.capacity {
            *value = Some(item);
            state.park_sender(cx.waker());
            drop(state);
            register_wait(self.owner, BlockingReason::Channel { op: ChannelOp::Send });
            return Poll::Pending;
        }

        let (queued, receiver) = state.push(item);
        let rendezvous = state.capacity == 0;
        if rendezvous {
            *ticket = Some(queued);
            state.park_sender(cx.waker());
        }
        drop(state);

        if let Some(waker) = receiver {
            waker.wake();
        }
        if rendezvous {
            register_wait(self.owner, BlockingReason::Channel { op: ChannelOp::Send });
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut state = self.state.lock();
        if let Some((ticket, value)) = state.queue.pop_front() {
            state.received = ticket + 1;
            let senders = state.take_send_wakers();
            drop(state);
            for waker in senders {
                waker.wake();
            }
            return Poll::Ready(Some(value));
        }
        if state.is_disconnected() {
            return Poll::Ready(None);
        }

        state.recv_waker = Some(cx.waker().clone());
        drop(state);
        register_wait(self.owner, BlockingReason::Channel { op: ChannelOp::Recv });
        Poll::Pending
    }

    fn close(&self) {
        let (receiver, senders) = {
            let mut state = self.state.lock();
            state.closed = true;
            (state.recv_waker.take(), state.take_send_wakers())
        };
        if let Some(waker) = receiver {
            waker.wake();
        }
        for waker in senders {
            waker.wake();
        }
    }
}

/// Sending half; clone it for more producers
pub struct Sender<T> {
    chan: Arc<Chan<T>>,
}

impl<T> Sender<T> {
    /// Send a value, waiting for room (or, for rendezvous, for the receiver)
    ///
    /// Dropping a rendezvous send after it started waiting leaves the value
    /// queued for the receiver.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut value = Some(value);
        let mut ticket = None;
        future::poll_fn(|cx| self.chan.poll_send(cx, &mut value, &mut ticket)).await
    }

    /// Send without waiting
    ///
    /// A rendezvous channel accepts the value only if the receiver is
    /// currently waiting for one.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.chan.state.lock();
        if state.closed || !state.receiver_alive {
            return Err(TrySendError::Closed(value));
        }
        let room = if state.capacity == 0 {
            state.recv_waker.is_some() && state.queue.is_empty()
        } else {
            state.queue.len() < state.capacity
        };
        if !room {
            return Err(TrySendError::Full(value));
        }

        let (_, receiver) = state.push(value);
        drop(state);
        if let Some(waker) = receiver {
            waker.wake();
        }
        Ok(())
    }

    /// Close the channel; the receiver drains what is queued, then sees `None`
    pub fn close(&self) {
        self.chan.close();
    }

    /// Whether the channel is closed or the receiver is gone
    pub fn is_closed(&self) -> bool {
        let state = self.chan.state.lock();
        state.closed || !state.receiver_alive
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.chan.state.lock().sender_count += 1;
        Self {
            chan: self.chan.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let receiver = {
            let mut state = self.chan.state.lock();
            state.sender_count -= 1;
            if state.sender_count == 0 {
                state.recv_waker.take()
            } else {
                None
            }
        };
        if let Some(waker) = receiver {
            waker.wake();
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("owner", &self.chan.owner)
            .finish_non_exhaustive()
    }
}

/// Receiving half
pub struct Receiver<T> {
    chan: Arc<Chan<T>>,
}

impl<T> Receiver<T> {
    /// Receive the next value; `None` once closed and drained
    pub async fn recv(&mut self) -> Option<T> {
        future::poll_fn(|cx| self.chan.poll_recv(cx)).await
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        let mut state = self.chan.state.lock();
        match state.queue.pop_front() {
            Some((ticket, value)) => {
                state.received = ticket + 1;
                let senders = state.take_send_wakers();
                drop(state);
                for waker in senders {
                    waker.wake();
                }
                Ok(value)
            }
            None if state.is_disconnected() => Err(TryRecvError::Disconnected),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Refuse further sends; queued values can still be received
    pub fn close(&mut self) {
        self.chan.close();
    }
}

impl<T> Stream for Receiver<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.chan.poll_recv(cx)
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let senders = {
            let mut state = self.chan.state.lock();
            state.receiver_alive = false;
            state.recv_waker = None;
            state.take_send_wakers()
        };
        for waker in senders {
            waker.wake();
        }
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("owner", &self.chan.owner)
            .finish_non_exhaustive()
    }
}

//! Bounded, drop-oldest delivery queue for one viewer session.
//!
//! `tokio::sync::mpsc` can only reject the *newest* message when full.  A
//! chart viewer that fell behind wants the opposite: the latest readings,
//! with stale ones discarded.  This queue keeps at most `capacity` messages
//! and evicts from the front on overflow.
//!
//! # Concurrency
//!
//! Any number of producers may call [`SessionQueue::push`]; it takes a short
//! synchronous lock and never awaits, so the relay can fan out from any
//! context.  Exactly one consumer awaits [`SessionQueue::pop`].  Wake-ups go
//! through a [`Notify`]: `notify_one` stores a permit when the consumer is not
//! yet waiting, so a push that lands between "queue empty" and "start
//! waiting" is not lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::domain::{Message, SessionState};

/// What happened to a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended; nothing was evicted.
    Queued,
    /// Appended after evicting the oldest queued message.
    DroppedOldest,
    /// The session is closing or closed; the message was not queued.
    Rejected,
}

struct QueueInner {
    buf: VecDeque<Message>,
    state: SessionState,
}

pub struct SessionQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
    dropped: AtomicU64,
}

impl SessionQueue {
    /// Creates an `Active` queue holding at most `capacity` messages.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                buf: VecDeque::with_capacity(capacity.min(1024)),
                state: SessionState::Active,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends `message`, evicting the oldest one if the queue is full.
    pub fn push(&self, message: Message) -> PushOutcome {
        let mut inner = self.lock();
        if inner.state != SessionState::Active {
            return PushOutcome::Rejected;
        }

        let outcome = if inner.buf.len() >= self.capacity {
            inner.buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Queued
        };
        inner.buf.push_back(message);
        drop(inner);

        self.notify.notify_one();
        outcome
    }

    /// Waits for the next message in push order.
    ///
    /// Returns `None` once the queue is `Closed`, or once it is `Closing` and
    /// everything queued before the close has been handed out.
    ///
    /// Cancel safe: a message is removed from the queue only in the same poll
    /// that returns it.
    pub async fn pop(&self) -> Option<Message> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(message) = inner.buf.pop_front() {
                    return Some(message);
                }
                match inner.state {
                    SessionState::Active => {}
                    SessionState::Closing => {
                        inner.state = SessionState::Closed;
                        return None;
                    }
                    SessionState::Closed => return None,
                }
            }
            self.notify.notified().await;
        }
    }

    /// Closes the queue immediately, discarding anything still queued.
    ///
    /// Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Closed;
        inner.buf.clear();
        drop(inner);
        self.notify.notify_one();
    }

    /// Stops accepting messages but lets the consumer drain what is queued.
    ///
    /// No effect on a queue that is already closing or closed.
    pub fn begin_close(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Active {
            inner.state = SessionState::Closing;
        }
        drop(inner);
        self.notify.notify_one();
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted by the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // A panic while holding the lock cannot leave the deque half-updated, so
    // a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SessionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SessionQueue")
            .field("capacity", &self.capacity)
            .field("len", &inner.buf.len())
            .field("state", &inner.state)
            .field("dropped", &self.dropped())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

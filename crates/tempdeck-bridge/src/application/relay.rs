//! The relay core: fan-out of broker messages to every live viewer session.
//!
//! [`Relay`] owns the session registry exclusively.  The subscriber calls
//! [`Relay::publish`] once per broker message; each viewer endpoint calls
//! [`Relay::register`] on connect and drains its [`SessionHandle`].
//!
//! ```text
//!                          ┌──────────────── registry (Mutex) ───────────────┐
//! subscriber ─publish()──▶ │ SessionId ─▶ SessionQueue [m3 m4 m5] ─pop()─▶ ws │
//!                          │ SessionId ─▶ SessionQueue [m5]       ─pop()─▶ ws │
//!                          └──────────────────────────────────────────────────┘
//! ```
//!
//! # Locking discipline
//!
//! One `std::sync::Mutex` guards the registry.  `register`, `deregister`,
//! `shutdown` and the whole fan-out loop in `publish` run under it.  The loop
//! only performs non-blocking O(1) queue pushes, so the lock is held briefly,
//! and holding it across the loop gives three properties for free:
//!
//! - concurrent publishers are serialized, so every session sees the same
//!   relative order of the messages it receives;
//! - a session registered before `publish` starts always receives the
//!   message;
//! - a session removed by `deregister` can never be pushed to afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::session_queue::{PushOutcome, SessionQueue};
use crate::domain::{Message, SessionId, SessionState};

/// Reasons [`Relay::register`] refuses a new session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// [`Relay::shutdown`] has been called.
    #[error("relay is shut down")]
    ShutDown,

    /// The configured session limit is reached.
    #[error("session limit of {0} reached")]
    CapacityReached(usize),
}

/// Outcome of one [`Relay::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sessions the message was queued for (including those that overflowed).
    pub delivered: usize,
    /// Sessions that had to evict their oldest queued message to make room.
    pub overflowed: usize,
    /// Sessions found closed and removed from the registry.
    pub pruned: usize,
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub sessions: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct Registry {
    running: bool,
    sessions: HashMap<SessionId, Arc<SessionQueue>>,
}

struct RelayInner {
    queue_capacity: usize,
    max_sessions: Option<usize>,
    registry: Mutex<Registry>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl RelayInner {
    // Registry updates are single map operations; a panic elsewhere cannot
    // leave the map half-updated, so a poisoned lock is still usable.
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deregister(&self, id: &SessionId) -> bool {
        let removed = self.lock_registry().sessions.remove(id);
        match removed {
            Some(queue) => {
                queue.close();
                debug!(session = %id, dropped = queue.dropped(), "session deregistered");
                true
            }
            None => false,
        }
    }
}

/// Shared handle to the relay core.  Cloning is cheap; all clones share one
/// registry.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    /// Creates a relay whose sessions each buffer up to `queue_capacity`
    /// messages (minimum 1), with no limit on the number of sessions.
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_limits(queue_capacity, None)
    }

    /// Like [`Relay::new`], additionally refusing registrations beyond
    /// `max_sessions` concurrent sessions.
    pub fn with_limits(queue_capacity: usize, max_sessions: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                queue_capacity: queue_capacity.max(1),
                max_sessions,
                registry: Mutex::new(Registry {
                    running: true,
                    sessions: HashMap::new(),
                }),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Adds a new session to the registry.
    ///
    /// The session receives every message published after this call returns.
    ///
    /// # Errors
    ///
    /// [`RelayError::ShutDown`] after [`Relay::shutdown`];
    /// [`RelayError::CapacityReached`] when a session limit is configured and
    /// reached.
    pub fn register(&self) -> Result<SessionHandle, RelayError> {
        let mut registry = self.inner.lock_registry();
        if !registry.running {
            return Err(RelayError::ShutDown);
        }
        if let Some(max) = self.inner.max_sessions {
            if registry.sessions.len() >= max {
                return Err(RelayError::CapacityReached(max));
            }
        }

        let id = SessionId::new();
        let queue = Arc::new(SessionQueue::new(self.inner.queue_capacity));
        registry.sessions.insert(id, Arc::clone(&queue));
        let total = registry.sessions.len();
        drop(registry);

        debug!(session = %id, sessions = total, "session registered");
        Ok(SessionHandle {
            id,
            queue,
            relay: Arc::downgrade(&self.inner),
        })
    }

    /// Removes a session from the registry and discards its queue.
    ///
    /// Idempotent: returns `true` only for the call that actually removed it.
    pub fn deregister(&self, id: &SessionId) -> bool {
        self.inner.deregister(id)
    }

    /// Queues `message` for every session currently registered.
    ///
    /// Never blocks on viewer I/O and never fails because of one session: a
    /// full queue evicts its oldest message, and a closed queue is pruned
    /// from the registry.  After [`Relay::shutdown`] this is a no-op.
    pub fn publish(&self, message: Message) -> PublishReport {
        let mut report = PublishReport::default();
        let mut registry = self.inner.lock_registry();
        if !registry.running {
            return report;
        }

        let mut closed = Vec::new();
        for (id, queue) in &registry.sessions {
            match queue.push(message.clone()) {
                PushOutcome::Queued => report.delivered += 1,
                PushOutcome::DroppedOldest => {
                    report.delivered += 1;
                    report.overflowed += 1;
                }
                PushOutcome::Rejected => closed.push(*id),
            }
        }
        for id in &closed {
            registry.sessions.remove(id);
        }
        drop(registry);
        report.pruned = closed.len();

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.inner
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.inner
            .dropped
            .fetch_add(report.overflowed as u64, Ordering::Relaxed);

        if report.overflowed > 0 || report.pruned > 0 {
            debug!(
                bytes = message.len(),
                delivered = report.delivered,
                overflowed = report.overflowed,
                pruned = report.pruned,
                "published with slow or closed sessions"
            );
        }
        report
    }

    /// Stops accepting registrations and publishes.
    ///
    /// Every registered session moves to `Closing`: its consumer drains what
    /// is already queued and then sees end-of-stream.  Idempotent.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<SessionQueue>> = {
            let mut registry = self.inner.lock_registry();
            if !registry.running {
                return;
            }
            registry.running = false;
            registry.sessions.drain().map(|(_, queue)| queue).collect()
        };

        for queue in &sessions {
            queue.begin_close();
        }
        info!(sessions = sessions.len(), "relay shut down");
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_registry().running
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock_registry().sessions.len()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            sessions: self.session_count(),
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("queue_capacity", &self.inner.queue_capacity)
            .field("max_sessions", &self.inner.max_sessions)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Consumer side of one registered session.
///
/// Not `Clone`: each session has exactly one consumer.  Dropping the handle
/// deregisters the session, so an endpoint loop that exits for any reason
/// (including a panic) cannot leave a stale registry entry behind.
pub struct SessionHandle {
    id: SessionId,
    queue: Arc<SessionQueue>,
    relay: Weak<RelayInner>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Waits for the next message, in publish order.
    ///
    /// Returns `None` once the session is deregistered, or once the relay
    /// has shut down and the queue is drained.  Cancel safe.
    pub async fn recv(&mut self) -> Option<Message> {
        self.queue.pop().await
    }

    pub fn state(&self) -> SessionState {
        self.queue.state()
    }

    /// Messages this session lost to the drop-oldest overflow policy.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.upgrade() {
            relay.deregister(&self.id);
        }
        self.queue.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Viewer session identity and liveness.

use std::fmt;

use uuid::Uuid;

/// Unique identifier for one viewer connection.
///
/// Generated by the relay at registration.  Identifiers are random v4 UUIDs
/// and are never reused, so a reconnecting browser always gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Liveness of a session's delivery queue.
///
/// ```text
/// Active ──shutdown──▶ Closing ──drained──▶ Closed
///    └───────────deregister──────────────────▲
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered; receives every published message.
    Active,
    /// The relay is shutting down.  No new messages are accepted, but what
    /// is already queued may still be drained.
    Closing,
    /// Deregistered.  The queue is discarded and receives end immediately.
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

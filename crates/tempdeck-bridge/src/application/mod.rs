//! Application layer for tempdeck-bridge.
//!
//! Owns the fan-out logic: the session registry and the per-session delivery
//! queues.  Nothing here touches a socket; the infrastructure layer feeds
//! [`Relay::publish`] from the broker and drains [`SessionHandle`]s into
//! WebSockets.

pub mod relay;
pub mod session_queue;

pub use relay::{PublishReport, Relay, RelayError, RelayStats, SessionHandle};
pub use session_queue::{PushOutcome, SessionQueue};

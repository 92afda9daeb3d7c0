//! Domain layer for tempdeck-bridge.
//!
//! Pure types with no I/O, async runtime, or framework dependencies: the
//! relayed [`Message`], session identity and liveness, and the runtime
//! [`BridgeConfig`].

pub mod config;
pub mod message;
pub mod session;

pub use config::{BridgeConfig, ConfigError, ReconnectPolicy};
pub use message::Message;
pub use session::{SessionId, SessionState};

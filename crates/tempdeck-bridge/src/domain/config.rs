//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is built from CLI arguments in `main.rs` (flags with environment
//! variable fallbacks) or from [`BridgeConfig::default`] in tests.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads inside the domain) makes the bridge easy to start from tests with an
//! ephemeral HTTP port and a scripted broker.

use std::net::SocketAddr;
use std::time::Duration;

use tempdeck_core::domain::topic::{validate_topic_name, TopicError};
use thiserror::Error;

/// Reasons a [`BridgeConfig`] is rejected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("broker host must not be empty")]
    EmptyBrokerHost,

    #[error("client id must not be empty")]
    EmptyClientId,

    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("max sessions must be at least 1 when set")]
    ZeroMaxSessions,

    #[error("max packet size must be at least 1 byte")]
    ZeroMaxPacketSize,

    #[error("keep-alive must be between 1 and 65535 seconds, got {0:?}")]
    KeepAliveOutOfRange(Duration),

    #[error("reconnect backoff must be non-zero and initial <= max")]
    InvalidBackoff,
}

/// Bounded exponential backoff used after the broker connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.  `0` disables
    /// reconnection: losing the broker ends the process.
    pub max_attempts: u32,

    /// Delay before the first attempt.
    pub initial_backoff: Duration,

    /// Upper bound for the doubled delay.
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before reconnect attempt number `attempt` (1-based):
    /// `initial * 2^(attempt - 1)`, capped at `max_backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << shift)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// All runtime configuration for the relay.
///
/// Build this struct once at startup and share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use tempdeck_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.http_bind_addr.port(), 8081);
/// assert_eq!(cfg.topic, "tempdeck/espruino/18fe34da-fa4a");
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the HTTP server (viewer page, `/ws`, `/health`) binds to.
    pub http_bind_addr: SocketAddr,

    /// Broker hostname or IP.  Hostnames are resolved at connect time, so
    /// this is a string rather than a `SocketAddr`.
    pub broker_host: String,

    /// Broker TCP port (1883 for plain MQTT).
    pub broker_port: u16,

    /// The single topic name the relay subscribes to.
    pub topic: String,

    /// MQTT client identifier.  Brokers disconnect an older session that
    /// reuses the same id, so two relays must not share one.
    pub client_id: String,

    /// Per-session queue bound.  When a viewer falls this far behind, its
    /// oldest undelivered message is dropped.
    pub queue_capacity: usize,

    /// Optional cap on concurrently registered viewer sessions.
    pub max_sessions: Option<usize>,

    /// Largest broker packet accepted, fixed header included.  A larger
    /// declared length fails the connection before the body is buffered.
    pub max_packet_size: usize,

    /// MQTT keep-alive; a PINGREQ is sent this often.
    pub keep_alive: Duration,

    /// Bound on TCP connect, CONNACK and SUBACK waits.
    pub connect_timeout: Duration,

    pub reconnect: ReconnectPolicy,
}

impl BridgeConfig {
    /// `host:port` string passed to `TcpStream::connect`.
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    /// Checks the invariants the rest of the bridge relies on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_topic_name(&self.topic)?;
        if self.broker_host.trim().is_empty() {
            return Err(ConfigError::EmptyBrokerHost);
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.max_sessions == Some(0) {
            return Err(ConfigError::ZeroMaxSessions);
        }
        if self.max_packet_size == 0 {
            return Err(ConfigError::ZeroMaxPacketSize);
        }
        let keep_alive_secs = self.keep_alive.as_secs();
        if keep_alive_secs == 0 || keep_alive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::KeepAliveOutOfRange(self.keep_alive));
        }
        let r = &self.reconnect;
        if r.enabled()
            && (r.initial_backoff.is_zero() || r.initial_backoff > r.max_backoff)
        {
            return Err(ConfigError::InvalidBackoff);
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    /// Returns a config suitable for local development.
    ///
    /// | Field           | Default                              |
    /// |-----------------|--------------------------------------|
    /// | http_bind_addr  | `127.0.0.1:8081`                     |
    /// | broker          | `test.mosquitto.org:1883`            |
    /// | topic           | `tempdeck/espruino/18fe34da-fa4a`    |
    /// | client_id       | `tempdeck-client`                    |
    /// | queue_capacity  | 64                                   |
    /// | max_sessions    | unbounded                            |
    /// | max_packet_size | 256 KiB                              |
    /// | keep_alive      | 30 seconds                           |
    /// | connect_timeout | 10 seconds                           |
    fn default() -> Self {
        Self {
            http_bind_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            broker_host: "test.mosquitto.org".to_string(),
            broker_port: 1883,
            topic: "tempdeck/espruino/18fe34da-fa4a".to_string(),
            client_id: "tempdeck-client".to_string(),
            queue_capacity: 64,
            max_sessions: None,
            max_packet_size: 256 * 1024,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Broker subscription lifecycle and reconnect loop.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──SUBACK──▶ Subscribed
//!      ▲                          │                      │
//!      └──────────── error ───────┴──────── error ───────┘
//! ```
//!
//! The first connection is made by [`Subscription::connect`] so a failure can
//! be reported to the caller (and end the process).  After that,
//! [`Subscription::run`] owns the connection and reconnects with bounded
//! exponential backoff according to the configured [`ReconnectPolicy`].
//!
//! [`ReconnectPolicy`]: crate::domain::ReconnectPolicy

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tempdeck_core::protocol::PacketIdCounter;

use crate::application::Relay;
use crate::domain::BridgeConfig;
use crate::infrastructure::broker::{BrokerConnection, BrokerError};

/// Where the broker connection currently stands; shown on `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Subscribed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubscriptionState::Disconnected => "disconnected",
            SubscriptionState::Connecting => "connecting",
            SubscriptionState::Subscribed => "subscribed",
        })
    }
}

/// Owns the broker side of the bridge: connect, subscribe, read, reconnect.
pub struct Subscription {
    config: BridgeConfig,
    relay: Relay,
    packet_ids: PacketIdCounter,
    state_tx: watch::Sender<SubscriptionState>,
}

impl Subscription {
    /// Creates the subscription in the `Disconnected` state, along with a
    /// receiver that observes every state change.
    pub fn new(config: BridgeConfig, relay: Relay) -> (Self, watch::Receiver<SubscriptionState>) {
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Disconnected);
        let subscription = Self {
            config,
            relay,
            packet_ids: PacketIdCounter::new(),
            state_tx,
        };
        (subscription, state_rx)
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state_tx.borrow()
    }

    /// One connect-and-subscribe attempt, with state tracking.
    ///
    /// # Errors
    ///
    /// The [`BrokerError`] of the failed attempt; the state is left at
    /// `Disconnected`.
    pub async fn connect(&self) -> Result<BrokerConnection, BrokerError> {
        self.set_state(SubscriptionState::Connecting);
        match BrokerConnection::connect_and_subscribe(&self.config, &self.packet_ids).await {
            Ok(conn) => {
                self.set_state(SubscriptionState::Subscribed);
                Ok(conn)
            }
            Err(e) => {
                self.set_state(SubscriptionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Runs `first` and keeps the subscription alive until `cancel` fires.
    ///
    /// When the connection drops, reconnects after `initial * 2^(n-1)`
    /// (capped) for attempt `n`.  A successful resubscription resets `n`.
    ///
    /// # Errors
    ///
    /// The last [`BrokerError`] once reconnection is disabled or
    /// `max_attempts` consecutive attempts have failed.  Returns `Ok(())`
    /// when cancelled.
    pub async fn run(
        self,
        first: BrokerConnection,
        cancel: CancellationToken,
    ) -> Result<(), BrokerError> {
        let policy = self.config.reconnect.clone();
        let mut conn = first;

        loop {
            let lost = match conn.run(&self.relay, &cancel).await {
                Ok(()) => {
                    self.set_state(SubscriptionState::Disconnected);
                    return Ok(());
                }
                Err(e) => e,
            };
            self.set_state(SubscriptionState::Disconnected);

            if !policy.enabled() {
                error!(topic = %self.config.topic, "lost broker connection: {lost}");
                return Err(lost);
            }
            warn!(topic = %self.config.topic, "lost broker connection: {lost}; reconnecting");

            let mut attempt = 0u32;
            conn = loop {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                info!(attempt, max = policy.max_attempts, ?delay, "waiting before reconnect");

                let result = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    result = async {
                        tokio::time::sleep(delay).await;
                        self.connect().await
                    } => result,
                };

                match result {
                    Ok(conn) => {
                        info!(attempt, "broker connection restored");
                        break conn;
                    }
                    Err(e) if attempt >= policy.max_attempts => {
                        error!(attempt, "giving up on broker: {e}");
                        return Err(e);
                    }
                    Err(e) => warn!(attempt, "reconnect failed: {e}"),
                }
            };
        }
    }

    fn set_state(&self, state: SubscriptionState) {
        self.state_tx.send_replace(state);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

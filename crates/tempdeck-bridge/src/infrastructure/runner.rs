//! Wires the relay, the broker subscription and the HTTP server together.
//!
//! Startup order matters for the exit contract:
//!
//! 1. Bind the HTTP listener (failure is fatal).
//! 2. Connect and subscribe to the broker (failure is fatal).
//! 3. Spawn the HTTP server and the subscription supervisor.
//!
//! Shutdown runs in reverse: the subscription sends DISCONNECT, the relay
//! moves every session to `Closing` so viewers drain and receive a Close
//! frame, then the HTTP server stops accepting.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::Relay;
use crate::domain::BridgeConfig;
use crate::infrastructure::broker::BrokerConnection;
use crate::infrastructure::http_server::{self, AppState};
use crate::infrastructure::subscription::Subscription;

/// A started bridge.  Dropping it does not stop the background tasks; call
/// [`RunningBridge::shutdown`] or cancel the token.
pub struct RunningBridge {
    http_addr: SocketAddr,
    relay: Relay,
    cancel: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningBridge {
    /// Address the HTTP server actually bound (useful with port 0).
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Token that stops the bridge when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits until the bridge stops, either because the token was cancelled
    /// or because the broker connection was lost for good.
    ///
    /// # Errors
    ///
    /// The broker or server error that ended the bridge.
    pub async fn wait(self) -> anyhow::Result<()> {
        self.task.await.context("bridge supervisor task panicked")?
    }

    /// Cancels the bridge and waits for an orderly stop.
    ///
    /// # Errors
    ///
    /// As for [`RunningBridge::wait`].
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.wait().await
    }
}

/// Starts the bridge described by `config`.
///
/// Returns once the HTTP listener is bound and the broker subscription is
/// established; from then on everything runs on spawned tasks.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the HTTP listener
/// cannot be bound, or the first broker connection or subscription fails.
pub async fn start_bridge(config: BridgeConfig) -> anyhow::Result<RunningBridge> {
    config.validate().context("invalid configuration")?;

    let listener = TcpListener::bind(config.http_bind_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.http_bind_addr))?;
    let http_addr = listener
        .local_addr()
        .context("failed to read bound HTTP address")?;

    let relay = Relay::with_limits(config.queue_capacity, config.max_sessions);
    let broker = config.broker_address();
    let topic = config.topic.clone();

    let (subscription, broker_state) = Subscription::new(config, relay.clone());
    let first = subscription
        .connect()
        .await
        .with_context(|| format!("failed to subscribe to {topic:?} on {broker}"))?;

    let cancel = CancellationToken::new();
    let state = AppState::new(relay.clone(), &broker, &topic, broker_state);
    let server = tokio::spawn(http_server::serve(listener, state, cancel.clone()));

    let task = tokio::spawn(supervise(subscription, first, server, relay.clone(), cancel.clone()));

    info!(http = %http_addr, %broker, %topic, "bridge running");
    Ok(RunningBridge {
        http_addr,
        relay,
        cancel,
        task,
    })
}

async fn supervise(
    subscription: Subscription,
    first: BrokerConnection,
    server: JoinHandle<std::io::Result<()>>,
    relay: Relay,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let outcome = subscription.run(first, cancel.clone()).await;
    if let Err(e) = &outcome {
        error!("broker subscription ended: {e}");
    }

    relay.shutdown();
    cancel.cancel();

    server
        .await
        .context("HTTP server task panicked")?
        .context("HTTP server failed")?;
    info!("bridge stopped");

    outcome.context("lost broker connection")
}

//! Tempdeck bridge: entry point.
//!
//! Subscribes to `<topic-prefix>/<serial>` on an MQTT broker and serves a
//! live temperature chart at `http://<http-bind>:<http-port>/`.  Every
//! message the broker delivers is pushed to every open chart over WebSocket.
//!
//! # Usage
//!
//! ```text
//! tempdeck-bridge [OPTIONS]
//!
//! Options:
//!   -b, --broker <HOST>           MQTT broker host [default: test.mosquitto.org]
//!   -s, --serial <SERIAL>         Device serial number [default: 18fe34da-fa4a]
//!       --http-port <PORT>        Chart page / WebSocket port [default: 8081]
//!       ...
//! ```
//!
//! # Environment variable overrides
//!
//! Every flag can also be set with a `TEMPDECK_*` environment variable.  CLI
//! args take precedence when both are present.
//!
//! | Variable                      | Default               |
//! |-------------------------------|-----------------------|
//! | `TEMPDECK_BROKER`             | `test.mosquitto.org`  |
//! | `TEMPDECK_BROKER_PORT`        | `1883`                |
//! | `TEMPDECK_SERIAL`             | `18fe34da-fa4a`       |
//! | `TEMPDECK_TOPIC_PREFIX`       | `tempdeck/espruino`   |
//! | `TEMPDECK_CLIENT_ID`          | `tempdeck-client`     |
//! | `TEMPDECK_HTTP_BIND`          | `127.0.0.1`           |
//! | `TEMPDECK_HTTP_PORT`          | `8081`                |
//! | `TEMPDECK_QUEUE_CAPACITY`     | `64`                  |
//! | `TEMPDECK_MAX_SESSIONS`       | unbounded             |
//! | `TEMPDECK_MAX_PACKET_SIZE`    | `262144` (bytes)      |
//! | `TEMPDECK_KEEP_ALIVE`         | `30` (seconds)        |
//! | `TEMPDECK_CONNECT_TIMEOUT`    | `10` (seconds)        |
//! | `TEMPDECK_RECONNECT_ATTEMPTS` | `10` (0 disables)     |
//! | `TEMPDECK_RECONNECT_INITIAL`  | `1` (seconds)         |
//! | `TEMPDECK_RECONNECT_MAX`      | `30` (seconds)        |
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tempdeck_bridge::domain::{BridgeConfig, ReconnectPolicy};
use tempdeck_bridge::infrastructure::start_bridge;
use tempdeck_core::build_topic;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// MQTT to WebSocket relay for tempdeck temperature monitors.
#[derive(Debug, Parser)]
#[command(
    name = "tempdeck-bridge",
    about = "Relays an MQTT temperature feed to live browser charts",
    version
)]
struct Cli {
    /// MQTT broker hostname or IP address.
    #[arg(short = 'b', long, default_value = "test.mosquitto.org", env = "TEMPDECK_BROKER")]
    broker: String,

    /// MQTT broker TCP port.
    #[arg(long, default_value_t = 1883, env = "TEMPDECK_BROKER_PORT")]
    broker_port: u16,

    /// Serial number of the monitored board; the last topic segment.
    #[arg(short = 's', long, default_value = "18fe34da-fa4a", env = "TEMPDECK_SERIAL")]
    serial: String,

    /// Topic prefix; the subscription is `<prefix>/<serial>`.
    #[arg(long, default_value = "tempdeck/espruino", env = "TEMPDECK_TOPIC_PREFIX")]
    topic_prefix: String,

    /// MQTT client identifier.  Must be unique per broker.
    #[arg(long, default_value = "tempdeck-client", env = "TEMPDECK_CLIENT_ID")]
    client_id: String,

    /// IP address the chart page and WebSocket endpoint bind to.
    ///
    /// Use `0.0.0.0` to serve other machines on the LAN.
    #[arg(long, default_value = "127.0.0.1", env = "TEMPDECK_HTTP_BIND")]
    http_bind: String,

    /// TCP port for the chart page and WebSocket endpoint.
    #[arg(long, default_value_t = 8081, env = "TEMPDECK_HTTP_PORT")]
    http_port: u16,

    /// Messages buffered per viewer before the oldest is dropped.
    #[arg(long, default_value_t = 64, env = "TEMPDECK_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Maximum concurrent viewers.  Unbounded when unset.
    #[arg(long, env = "TEMPDECK_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Largest broker packet accepted, in bytes.
    #[arg(long, default_value_t = 256 * 1024, env = "TEMPDECK_MAX_PACKET_SIZE")]
    max_packet_size: usize,

    /// MQTT keep-alive interval in seconds.
    #[arg(long, default_value_t = 30, env = "TEMPDECK_KEEP_ALIVE")]
    keep_alive: u64,

    /// Timeout in seconds for the TCP connect, CONNACK and SUBACK.
    #[arg(long, default_value_t = 10, env = "TEMPDECK_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Consecutive reconnect attempts after losing the broker; 0 disables.
    #[arg(long, default_value_t = 10, env = "TEMPDECK_RECONNECT_ATTEMPTS")]
    reconnect_attempts: u32,

    /// Delay in seconds before the first reconnect attempt.
    #[arg(long, default_value_t = 1, env = "TEMPDECK_RECONNECT_INITIAL")]
    reconnect_initial: u64,

    /// Upper bound in seconds for the doubled reconnect delay.
    #[arg(long, default_value_t = 30, env = "TEMPDECK_RECONNECT_MAX")]
    reconnect_max: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a validated [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--http-bind` is not an IP address, the topic is
    /// not a valid MQTT topic name, or any value violates
    /// [`BridgeConfig::validate`].
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let http_ip: IpAddr = self
            .http_bind
            .parse()
            .with_context(|| format!("invalid HTTP bind address: '{}'", self.http_bind))?;
        let http_bind_addr = SocketAddr::new(http_ip, self.http_port);

        let topic = build_topic(&self.topic_prefix, &self.serial).with_context(|| {
            format!(
                "invalid topic from prefix {:?} and serial {:?}",
                self.topic_prefix, self.serial
            )
        })?;

        let config = BridgeConfig {
            http_bind_addr,
            broker_host: self.broker,
            broker_port: self.broker_port,
            topic,
            client_id: self.client_id,
            queue_capacity: self.queue_capacity,
            max_sessions: self.max_sessions,
            max_packet_size: self.max_packet_size,
            keep_alive: Duration::from_secs(self.keep_alive),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_attempts,
                initial_backoff: Duration::from_secs(self.reconnect_initial),
                max_backoff: Duration::from_secs(self.reconnect_max),
            },
        };
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_bridge_config()?;

    info!(
        "tempdeck bridge starting: broker={}, topic={}, http={}",
        config.broker_address(),
        config.topic,
        config.http_bind_addr
    );

    let bridge = start_bridge(config).await?;
    info!("open http://{}/ to view the chart", bridge.http_addr());

    // Ctrl+C cancels the token; the bridge then disconnects from the broker,
    // closes every viewer and stops the HTTP server.
    let cancel = bridge.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                cancel.cancel();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    bridge.wait().await?;
    info!("tempdeck bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

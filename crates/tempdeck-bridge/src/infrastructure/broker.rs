//! TCP connection to the MQTT broker.
//!
//! One [`BrokerConnection`] is one broker session: CONNECT, SUBSCRIBE to the
//! configured topic, then a read loop that hands every PUBLISH payload to the
//! relay.  Reconnecting is the caller's job (see `subscription`).
//!
//! # Binary streaming protocol
//!
//! TCP is a stream protocol: a single `read()` may return part of a packet or
//! several packets at once.  Incoming bytes accumulate in `recv_buf` and
//! [`tempdeck_core::decode_packet_bounded`] extracts complete packets from the
//! front until it reports `InsufficientData`.  A header declaring more than
//! `max_packet_size` bytes ends the session at once, so `recv_buf` never grows
//! past that bound plus one read chunk.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{interval_at, sleep_until, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tempdeck_core::protocol::{
    ConnectPacket, ConnectReturnCode, PacketIdCounter, PublishPacket, QoS, SubAckReturnCode,
    SubscribeFilter, SubscribePacket,
};
use tempdeck_core::{decode_packet_bounded, encode_packet, Packet, ProtocolError};

use crate::application::Relay;
use crate::domain::{BridgeConfig, Message};

const READ_CHUNK: usize = 4096;

/// Failures of a single broker session.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker sent a malformed packet: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("broker refused the connection: {0}")]
    ConnectionRefused(ConnectReturnCode),

    #[error("broker rejected the subscription to {0:?}")]
    SubscribeRejected(String),

    #[error("unexpected {0} packet during handshake")]
    UnexpectedPacket(&'static str),

    #[error("broker closed the connection")]
    ConnectionClosed,

    #[error("no packet from the broker within 1.5x the keep-alive interval")]
    KeepAliveTimeout,
}

/// An established, subscribed broker session.
pub struct BrokerConnection {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    recv_buf: Vec<u8>,
    /// PUBLISH packets that arrived between SUBSCRIBE and SUBACK.
    early: Vec<PublishPacket>,
    topic: String,
    keep_alive: Duration,
    max_packet_size: usize,
}

impl BrokerConnection {
    /// Opens a TCP connection, performs the CONNECT/CONNACK handshake and
    /// subscribes to `config.topic` at QoS 0.
    ///
    /// Each of the TCP connect, the CONNACK wait and the SUBACK wait is
    /// bounded by `config.connect_timeout`.
    ///
    /// # Errors
    ///
    /// Any [`BrokerError`]; in particular `ConnectionRefused` for a non-zero
    /// CONNACK code and `SubscribeRejected` for a `0x80` SUBACK.
    pub async fn connect_and_subscribe(
        config: &BridgeConfig,
        packet_ids: &PacketIdCounter,
    ) -> Result<Self, BrokerError> {
        let addr = config.broker_address();
        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BrokerError::Timeout("TCP connect"))??;
        stream.set_nodelay(true)?;
        debug!(broker = %addr, "TCP connection established");

        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            read_half,
            write_half,
            recv_buf: Vec::with_capacity(READ_CHUNK),
            early: Vec::new(),
            topic: config.topic.clone(),
            keep_alive: config.keep_alive,
            max_packet_size: config.max_packet_size,
        };

        // ── CONNECT / CONNACK ─────────────────────────────────────────────────
        let connect = Packet::Connect(ConnectPacket {
            client_id: config.client_id.clone(),
            keep_alive_secs: u16::try_from(config.keep_alive.as_secs()).unwrap_or(u16::MAX),
            clean_session: true,
        });
        write_packet(&mut conn.write_half, &connect).await?;

        let reply = timeout(config.connect_timeout, conn.read_packet())
            .await
            .map_err(|_| BrokerError::Timeout("CONNACK"))??;
        match reply {
            Packet::ConnAck(ack) if ack.return_code == ConnectReturnCode::Accepted => {}
            Packet::ConnAck(ack) => return Err(BrokerError::ConnectionRefused(ack.return_code)),
            other => return Err(BrokerError::UnexpectedPacket(other.name())),
        }

        // ── SUBSCRIBE / SUBACK ────────────────────────────────────────────────
        let packet_id = packet_ids.next();
        let subscribe = Packet::Subscribe(SubscribePacket {
            packet_id,
            filters: vec![SubscribeFilter {
                topic_filter: conn.topic.clone(),
                qos: QoS::AtMostOnce,
            }],
        });
        write_packet(&mut conn.write_half, &subscribe).await?;

        let deadline = Instant::now() + config.connect_timeout;
        loop {
            let packet = timeout_at(deadline, conn.read_packet())
                .await
                .map_err(|_| BrokerError::Timeout("SUBACK"))??;
            match packet {
                Packet::SubAck(ack) if ack.packet_id == packet_id => {
                    match ack.return_codes.first() {
                        Some(SubAckReturnCode::Granted(qos)) => {
                            info!(broker = %addr, topic = %conn.topic, ?qos, "subscribed");
                            break;
                        }
                        _ => return Err(BrokerError::SubscribeRejected(conn.topic.clone())),
                    }
                }
                // Retained messages may be sent before the SUBACK.
                Packet::Publish(publish) => conn.early.push(publish),
                other => debug!("ignoring {} while waiting for SUBACK", other.name()),
            }
        }

        Ok(conn)
    }

    /// Runs the read loop until the connection fails or `cancel` fires.
    ///
    /// Every PUBLISH is passed to [`Relay::publish`] exactly once, in arrival
    /// order.  A PINGREQ goes out every keep-alive interval; if nothing at all
    /// arrives for 1.5x that interval the connection is declared dead.
    ///
    /// Returns `Ok(())` only for a cancellation, after sending DISCONNECT.
    ///
    /// # Errors
    ///
    /// The [`BrokerError`] that ended the session.
    pub async fn run(self, relay: &Relay, cancel: &CancellationToken) -> Result<(), BrokerError> {
        // Destructure so the select! branches borrow disjoint locals.
        let BrokerConnection {
            mut read_half,
            mut write_half,
            mut recv_buf,
            early,
            topic,
            keep_alive,
            max_packet_size,
        } = self;

        for publish in early {
            relay_publish(publish, relay, &mut write_half).await?;
        }
        drain_buffer(&mut recv_buf, max_packet_size, relay, &mut write_half).await?;

        let dead_after = keep_alive + keep_alive / 2;
        let mut last_seen = Instant::now();
        let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut read_tmp = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Best effort: the broker may already be gone.
                    if let Err(e) = write_packet(&mut write_half, &Packet::Disconnect).await {
                        warn!(%topic, "failed to send DISCONNECT: {e}");
                    }
                    if let Err(e) = write_half.shutdown().await {
                        debug!("socket shutdown after DISCONNECT failed: {e}");
                    }
                    info!(%topic, "disconnected from broker");
                    return Ok(());
                }

                _ = sleep_until(last_seen + dead_after) => {
                    return Err(BrokerError::KeepAliveTimeout);
                }

                _ = ticker.tick() => {
                    write_packet(&mut write_half, &Packet::PingReq).await?;
                    debug!("sent PINGREQ");
                }

                read = read_half.read(&mut read_tmp) => {
                    let n = read?;
                    if n == 0 {
                        return Err(BrokerError::ConnectionClosed);
                    }
                    last_seen = Instant::now();
                    recv_buf.extend_from_slice(&read_tmp[..n]);
                    drain_buffer(&mut recv_buf, max_packet_size, relay, &mut write_half).await?;
                }
            }
        }
    }

    /// Reads until one complete packet is buffered and returns it.
    ///
    /// Only used during the handshake; the read loop in [`Self::run`] reads
    /// directly so it stays cancel safe inside `select!`.
    async fn read_packet(&mut self) -> Result<Packet, BrokerError> {
        let mut read_tmp = [0u8; 512];
        loop {
            match decode_packet_bounded(&self.recv_buf, self.max_packet_size) {
                Ok((packet, consumed)) => {
                    self.recv_buf.drain(..consumed);
                    return Ok(packet);
                }
                Err(ProtocolError::InsufficientData { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            let n = self.read_half.read(&mut read_tmp).await?;
            if n == 0 {
                return Err(BrokerError::ConnectionClosed);
            }
            self.recv_buf.extend_from_slice(&read_tmp[..n]);
        }
    }
}

/// Decodes and handles every complete packet at the front of `recv_buf`.
async fn drain_buffer(
    recv_buf: &mut Vec<u8>,
    max_packet_size: usize,
    relay: &Relay,
    write_half: &mut OwnedWriteHalf,
) -> Result<(), BrokerError> {
    loop {
        let (packet, consumed) = match decode_packet_bounded(recv_buf, max_packet_size) {
            Ok(decoded) => decoded,
            Err(ProtocolError::InsufficientData { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        recv_buf.drain(..consumed);

        match packet {
            Packet::Publish(publish) => relay_publish(publish, relay, write_half).await?,
            Packet::PingResp => debug!("received PINGRESP"),
            other => debug!("ignoring unexpected {} from broker", other.name()),
        }
    }
}

async fn relay_publish(
    publish: PublishPacket,
    relay: &Relay,
    write_half: &mut OwnedWriteHalf,
) -> Result<(), BrokerError> {
    debug!(
        topic = %publish.topic,
        bytes = publish.payload.len(),
        "received PUBLISH"
    );
    // The decoder already copied the payload out of the read buffer.
    let report = relay.publish(Message::new(publish.payload));
    debug!(delivered = report.delivered, "relayed");

    match (publish.qos, publish.packet_id) {
        (QoS::AtLeastOnce, Some(id)) => write_packet(write_half, &Packet::PubAck(id)).await?,
        (QoS::ExactlyOnce, _) => warn!("QoS 2 delivery is not acknowledged; broker may resend"),
        _ => {}
    }
    Ok(())
}

async fn write_packet(
    write_half: &mut OwnedWriteHalf,
    packet: &Packet,
) -> Result<(), BrokerError> {
    let bytes = encode_packet(packet)?;
    write_half.write_all(&bytes).await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

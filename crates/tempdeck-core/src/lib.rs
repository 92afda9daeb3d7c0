//! # tempdeck-core
//!
//! Shared library for the tempdeck relay containing the MQTT 3.1.1 packet
//! codec and the topic naming rules.
//!
//! It has no dependencies on sockets, async runtimes, or HTTP frameworks, so
//! the broker subscriber and the tests that play the broker can share it.
//!
//! - **`protocol`** – How packets travel over the broker's TCP stream.
//!   [`encode_packet`] turns a typed [`Packet`] into bytes and
//!   [`decode_packet`] parses one packet from the front of a buffer.
//!
//! - **`domain`** – The `<prefix>/<serial>` topic convention and the rules a
//!   topic name must satisfy.

pub mod domain;
pub mod protocol;

pub use domain::topic::{build_topic, validate_topic_name, TopicError};
pub use protocol::codec::{decode_packet, decode_packet_bounded, encode_packet, ProtocolError};
pub use protocol::packets::Packet;

//! Protocol module containing MQTT packet types and the binary codec.

pub mod codec;
pub mod packet_id;
pub mod packets;

pub use codec::{decode_packet, decode_packet_bounded, encode_packet, ProtocolError};
pub use packet_id::PacketIdCounter;
pub use packets::*;

//! Binary codec for MQTT 3.1.1 control packets.
//!
//! Wire format:
//! ```text
//! [type:4|flags:4][remaining_length:1..4][variable_header + payload:N]
//! ```
//! The remaining length is a base-128 varint (low 7 bits first, high bit =
//! "more bytes follow").  All multi-byte integers are big-endian; strings are
//! prefixed with a 2-byte length.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::packets::{
    ConnAckPacket, ConnectPacket, ConnectReturnCode, Packet, PacketType, PublishPacket, QoS,
    SubAckPacket, SubAckReturnCode, SubscribeFilter, SubscribePacket, UnsubscribePacket,
    MAX_REMAINING_LENGTH, PROTOCOL_LEVEL, PROTOCOL_NAME,
};

/// Errors that can occur during packet encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice does not yet hold a complete packet.  Read more bytes
    /// and try again.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The packet type nibble is reserved or not supported by this codec.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    /// The flags nibble does not match what the packet type requires.
    #[error("invalid flags 0b{flags:04b} for {packet_type:?}")]
    InvalidFlags { packet_type: PacketType, flags: u8 },

    /// The remaining-length varint runs past four bytes.
    #[error("malformed remaining length")]
    MalformedRemainingLength,

    /// A packet would exceed the largest encodable remaining length.
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),

    /// CONNECT carried a protocol name or level other than MQTT 3.1.1.
    #[error("unsupported protocol {name:?} level {level}")]
    UnsupportedProtocol { name: String, level: u8 },

    /// The body could not be parsed (field out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into a byte vector including the fixed header.
///
/// # Errors
///
/// Returns [`ProtocolError`] if a string exceeds 65535 bytes, a packet that
/// requires a non-zero packet id carries none, or the packet is too large.
///
/// # Examples
///
/// ```rust
/// use tempdeck_core::protocol::{decode_packet, encode_packet, Packet};
///
/// let bytes = encode_packet(&Packet::PingReq).unwrap();
/// assert_eq!(bytes, vec![0xC0, 0x00]);
/// let (decoded, consumed) = decode_packet(&bytes).unwrap();
/// assert_eq!(decoded, Packet::PingReq);
/// assert_eq!(consumed, 2);
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let (flags, body) = encode_body(packet)?;
    if body.len() > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::PacketTooLarge(body.len()));
    }

    let mut buf = Vec::with_capacity(1 + 4 + body.len());
    buf.push(((packet.packet_type() as u8) << 4) | flags);
    write_remaining_length(&mut buf, body.len());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decodes one [`Packet`] from the beginning of `bytes`.
///
/// Returns the decoded packet and the total number of bytes consumed, so the
/// caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when `bytes` holds only part of
/// a packet; any other variant means the stream is corrupt.
///
/// # Examples
///
/// ```rust
/// use tempdeck_core::protocol::{decode_packet, encode_packet, Packet, PublishPacket};
///
/// let original = Packet::Publish(PublishPacket::at_most_once("tempdeck/espruino/1", "21.1"));
/// let bytes = encode_packet(&original).unwrap();
/// let (decoded, n) = decode_packet(&bytes).unwrap();
/// assert_eq!(decoded, original);
/// assert_eq!(n, bytes.len());
/// ```
pub fn decode_packet(bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    decode_packet_bounded(bytes, usize::MAX)
}

/// Like [`decode_packet`], but rejects any packet whose total size (fixed
/// header included) exceeds `max_packet_size`.
///
/// The check runs as soon as the remaining length is known, so an oversized
/// packet fails before its body has been buffered.
///
/// # Errors
///
/// [`ProtocolError::PacketTooLarge`] for an oversized packet, otherwise as
/// for [`decode_packet`].
pub fn decode_packet_bounded(
    bytes: &[u8],
    max_packet_size: usize,
) -> Result<(Packet, usize), ProtocolError> {
    if bytes.len() < 2 {
        return Err(ProtocolError::InsufficientData {
            needed: 2,
            available: bytes.len(),
        });
    }

    let type_nibble = bytes[0] >> 4;
    let flags = bytes[0] & 0x0F;
    let packet_type =
        PacketType::try_from(type_nibble).map_err(|_| ProtocolError::UnknownPacketType(type_nibble))?;

    if let Some(expected) = packet_type.fixed_flags() {
        if flags != expected {
            return Err(ProtocolError::InvalidFlags { packet_type, flags });
        }
    }

    let (remaining, len_bytes) = read_remaining_length(bytes)?;
    let header_len = 1 + len_bytes;
    let total_needed = header_len + remaining;
    if total_needed > max_packet_size {
        return Err(ProtocolError::PacketTooLarge(total_needed));
    }
    if bytes.len() < total_needed {
        return Err(ProtocolError::InsufficientData {
            needed: total_needed,
            available: bytes.len(),
        });
    }

    let body = &bytes[header_len..total_needed];
    let packet = decode_body(packet_type, flags, body)?;
    Ok((packet, total_needed))
}

// ── Remaining length ──────────────────────────────────────────────────────────

fn write_remaining_length(buf: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Reads the varint that starts at `bytes[1]`.
///
/// Returns the decoded length and how many bytes the varint occupied.
fn read_remaining_length(bytes: &[u8]) -> Result<(usize, usize), ProtocolError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for i in 0..4 {
        let pos = 1 + i;
        let Some(&byte) = bytes.get(pos) else {
            return Err(ProtocolError::InsufficientData {
                needed: pos + 1,
                available: bytes.len(),
            });
        };
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        multiplier *= 128;
    }

    Err(ProtocolError::MalformedRemainingLength)
}

// ── Body encoding ─────────────────────────────────────────────────────────────

/// Returns the fixed-header flags nibble and the encoded body.
fn encode_body(packet: &Packet) -> Result<(u8, Vec<u8>), ProtocolError> {
    let mut buf = Vec::new();
    let flags = match packet {
        Packet::Connect(p) => {
            encode_connect(&mut buf, p)?;
            0
        }
        Packet::ConnAck(p) => {
            buf.push(u8::from(p.session_present));
            buf.push(p.return_code as u8);
            0
        }
        Packet::Publish(p) => encode_publish(&mut buf, p)?,
        Packet::PubAck(id) | Packet::UnsubAck(id) => {
            buf.extend_from_slice(&id.to_be_bytes());
            0
        }
        Packet::Subscribe(p) => {
            encode_subscribe(&mut buf, p)?;
            0b0010
        }
        Packet::SubAck(p) => {
            buf.extend_from_slice(&p.packet_id.to_be_bytes());
            buf.extend(p.return_codes.iter().map(|c| c.to_byte()));
            0
        }
        Packet::Unsubscribe(p) => {
            encode_unsubscribe(&mut buf, p)?;
            0b0010
        }
        Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0, // empty body
    };
    Ok((flags, buf))
}

fn encode_connect(buf: &mut Vec<u8>, p: &ConnectPacket) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, PROTOCOL_NAME)?;
    buf.push(PROTOCOL_LEVEL);
    // Only the clean-session bit; will and credential flags stay clear.
    buf.push(if p.clean_session { 0b0000_0010 } else { 0 });
    buf.extend_from_slice(&p.keep_alive_secs.to_be_bytes());
    write_length_prefixed_string(buf, &p.client_id)
}

fn encode_publish(buf: &mut Vec<u8>, p: &PublishPacket) -> Result<u8, ProtocolError> {
    write_length_prefixed_string(buf, &p.topic)?;
    if p.qos != QoS::AtMostOnce {
        let id = require_packet_id(p.packet_id, "PUBLISH")?;
        buf.extend_from_slice(&id.to_be_bytes());
    }
    buf.extend_from_slice(&p.payload);

    let mut flags = (p.qos as u8) << 1;
    if p.dup {
        flags |= 0b1000;
    }
    if p.retain {
        flags |= 0b0001;
    }
    Ok(flags)
}

fn encode_subscribe(buf: &mut Vec<u8>, p: &SubscribePacket) -> Result<(), ProtocolError> {
    require_packet_id(Some(p.packet_id), "SUBSCRIBE")?;
    if p.filters.is_empty() {
        return Err(ProtocolError::MalformedPayload(
            "SUBSCRIBE must carry at least one filter".to_string(),
        ));
    }
    buf.extend_from_slice(&p.packet_id.to_be_bytes());
    for filter in &p.filters {
        write_length_prefixed_string(buf, &filter.topic_filter)?;
        buf.push(filter.qos as u8);
    }
    Ok(())
}

fn encode_unsubscribe(buf: &mut Vec<u8>, p: &UnsubscribePacket) -> Result<(), ProtocolError> {
    require_packet_id(Some(p.packet_id), "UNSUBSCRIBE")?;
    if p.topic_filters.is_empty() {
        return Err(ProtocolError::MalformedPayload(
            "UNSUBSCRIBE must carry at least one filter".to_string(),
        ));
    }
    buf.extend_from_slice(&p.packet_id.to_be_bytes());
    for filter in &p.topic_filters {
        write_length_prefixed_string(buf, filter)?;
    }
    Ok(())
}

// ── Body decoding ─────────────────────────────────────────────────────────────

fn decode_body(packet_type: PacketType, flags: u8, body: &[u8]) -> Result<Packet, ProtocolError> {
    match packet_type {
        PacketType::Connect => decode_connect(body).map(Packet::Connect),
        PacketType::ConnAck => decode_connack(body).map(Packet::ConnAck),
        PacketType::Publish => decode_publish(flags, body).map(Packet::Publish),
        PacketType::PubAck => read_exact_u16(body, "PUBACK").map(Packet::PubAck),
        PacketType::Subscribe => decode_subscribe(body).map(Packet::Subscribe),
        PacketType::SubAck => decode_suback(body).map(Packet::SubAck),
        PacketType::Unsubscribe => decode_unsubscribe(body).map(Packet::Unsubscribe),
        PacketType::UnsubAck => read_exact_u16(body, "UNSUBACK").map(Packet::UnsubAck),
        PacketType::PingReq => require_empty(body, "PINGREQ").map(|()| Packet::PingReq),
        PacketType::PingResp => require_empty(body, "PINGRESP").map(|()| Packet::PingResp),
        PacketType::Disconnect => require_empty(body, "DISCONNECT").map(|()| Packet::Disconnect),
    }
}

fn decode_connect(p: &[u8]) -> Result<ConnectPacket, ProtocolError> {
    let (name, off) = read_length_prefixed_string(p, 0)?;
    require_len(p, off + 4, "CONNECT")?;
    let level = p[off];
    if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
        return Err(ProtocolError::UnsupportedProtocol { name, level });
    }

    let connect_flags = p[off + 1];
    if connect_flags & 0b0000_0001 != 0 {
        return Err(ProtocolError::MalformedPayload(
            "CONNECT reserved flag must be zero".to_string(),
        ));
    }
    if connect_flags & 0b1111_0100 != 0 {
        return Err(ProtocolError::MalformedPayload(
            "CONNECT will and credential fields are not supported".to_string(),
        ));
    }
    let clean_session = connect_flags & 0b0000_0010 != 0;
    let keep_alive_secs = u16::from_be_bytes([p[off + 2], p[off + 3]]);

    let (client_id, end) = read_length_prefixed_string(p, off + 4)?;
    if end != p.len() {
        return Err(ProtocolError::MalformedPayload(format!(
            "CONNECT has {} trailing bytes",
            p.len() - end
        )));
    }

    Ok(ConnectPacket {
        client_id,
        keep_alive_secs,
        clean_session,
    })
}

fn decode_connack(p: &[u8]) -> Result<ConnAckPacket, ProtocolError> {
    if p.len() != 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "CONNACK: expected 2 bytes, got {}",
            p.len()
        )));
    }
    let return_code = ConnectReturnCode::try_from(p[1])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown CONNACK code: {}", p[1])))?;
    Ok(ConnAckPacket {
        session_present: p[0] & 0x01 != 0,
        return_code,
    })
}

fn decode_publish(flags: u8, p: &[u8]) -> Result<PublishPacket, ProtocolError> {
    let qos_bits = (flags >> 1) & 0b11;
    let qos = QoS::try_from(qos_bits)
        .map_err(|_| ProtocolError::MalformedPayload("PUBLISH QoS 3 is reserved".to_string()))?;

    let (topic, mut off) = read_length_prefixed_string(p, 0)?;
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        let id = read_u16(p, off, "PUBLISH.packet_id")?;
        off += 2;
        Some(require_packet_id(Some(id), "PUBLISH")?)
    };

    Ok(PublishPacket {
        topic,
        qos,
        retain: flags & 0b0001 != 0,
        dup: flags & 0b1000 != 0,
        packet_id,
        // Copy out of the read buffer so the packet owns its payload.
        payload: Bytes::copy_from_slice(&p[off..]),
    })
}

fn decode_subscribe(p: &[u8]) -> Result<SubscribePacket, ProtocolError> {
    let packet_id = require_packet_id(Some(read_u16(p, 0, "SUBSCRIBE")?), "SUBSCRIBE")?;
    let mut filters = Vec::new();
    let mut off = 2;
    while off < p.len() {
        let (topic_filter, end) = read_length_prefixed_string(p, off)?;
        require_len(p, end + 1, "SUBSCRIBE.qos")?;
        let qos = QoS::try_from(p[end]).map_err(|_| {
            ProtocolError::MalformedPayload(format!("invalid requested QoS: {}", p[end]))
        })?;
        filters.push(SubscribeFilter { topic_filter, qos });
        off = end + 1;
    }
    if filters.is_empty() {
        return Err(ProtocolError::MalformedPayload(
            "SUBSCRIBE must carry at least one filter".to_string(),
        ));
    }
    Ok(SubscribePacket { packet_id, filters })
}

fn decode_suback(p: &[u8]) -> Result<SubAckPacket, ProtocolError> {
    let packet_id = read_u16(p, 0, "SUBACK")?;
    let return_codes = p[2..]
        .iter()
        .map(|&b| {
            SubAckReturnCode::try_from(b).map_err(|_| {
                ProtocolError::MalformedPayload(format!("invalid SUBACK return code: 0x{b:02X}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SubAckPacket {
        packet_id,
        return_codes,
    })
}

fn decode_unsubscribe(p: &[u8]) -> Result<UnsubscribePacket, ProtocolError> {
    let packet_id = require_packet_id(Some(read_u16(p, 0, "UNSUBSCRIBE")?), "UNSUBSCRIBE")?;
    let mut topic_filters = Vec::new();
    let mut off = 2;
    while off < p.len() {
        let (filter, end) = read_length_prefixed_string(p, off)?;
        topic_filters.push(filter);
        off = end;
    }
    if topic_filters.is_empty() {
        return Err(ProtocolError::MalformedPayload(
            "UNSUBSCRIBE must carry at least one filter".to_string(),
        ));
    }
    Ok(UnsubscribePacket {
        packet_id,
        topic_filters,
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn require_empty(buf: &[u8], context: &str) -> Result<(), ProtocolError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: expected empty body, got {} bytes",
            buf.len()
        )))
    }
}

fn require_packet_id(id: Option<u16>, context: &str) -> Result<u16, ProtocolError> {
    match id {
        Some(id) if id != 0 => Ok(id),
        _ => Err(ProtocolError::MalformedPayload(format!(
            "{context}: packet id must be non-zero"
        ))),
    }
}

fn read_u16(buf: &[u8], offset: usize, context: &str) -> Result<u16, ProtocolError> {
    require_len(buf, offset + 2, context)?;
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

fn read_exact_u16(buf: &[u8], context: &str) -> Result<u16, ProtocolError> {
    if buf.len() != 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "{context}: expected 2 bytes, got {}",
            buf.len()
        )));
    }
    read_u16(buf, 0, context)
}

fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!("string of {} bytes exceeds 65535", bytes.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_length_boundaries_use_minimal_bytes() {
        // Arrange: the four boundary values from MQTT 3.1.1 §2.2.3
        let cases = [
            (0usize, 1usize),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (2_097_151, 3),
            (2_097_152, 4),
            (MAX_REMAINING_LENGTH, 4),
        ];

        for (value, expected_len) in cases {
            // Act
            let mut buf = vec![0x30];
            write_remaining_length(&mut buf, value);
            let (decoded, used) = read_remaining_length(&buf).unwrap();

            // Assert
            assert_eq!(used, expected_len, "varint length for {value}");
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_five_byte_remaining_length_is_malformed() {
        let bytes = [0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert_eq!(
            decode_packet(&bytes),
            Err(ProtocolError::MalformedRemainingLength)
        );
    }

    #[test]
    fn test_pingreq_encodes_to_two_bytes() {
        assert_eq!(encode_packet(&Packet::PingReq).unwrap(), vec![0xC0, 0x00]);
        assert_eq!(encode_packet(&Packet::Disconnect).unwrap(), vec![0xE0, 0x00]);
    }

    #[test]
    fn test_connect_matches_reference_bytes() {
        // Arrange
        let packet = Packet::Connect(ConnectPacket {
            client_id: "ab".to_string(),
            keep_alive_secs: 60,
            clean_session: true,
        });

        // Act
        let bytes = encode_packet(&packet).unwrap();

        // Assert: hand-assembled from MQTT 3.1.1 §3.1
        assert_eq!(
            bytes,
            vec![
                0x10, 14, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // level
                0x02, // clean session
                0x00, 0x3C, // keep alive
                0x00, 0x02, b'a', b'b', // client id
            ]
        );
    }

    #[test]
    fn test_subscribe_header_flags_are_0010() {
        let packet = Packet::Subscribe(SubscribePacket {
            packet_id: 1,
            filters: vec![SubscribeFilter {
                topic_filter: "t".to_string(),
                qos: QoS::AtMostOnce,
            }],
        });
        let bytes = encode_packet(&packet).unwrap();
        assert_eq!(bytes[0], 0x82);
    }

    #[test]
    fn test_subscribe_with_wrong_flags_is_rejected() {
        // SUBSCRIBE (type 8) with flags 0000 instead of 0010
        let bytes = [0x80, 0x06, 0x00, 0x01, 0x00, 0x01, b't', 0x00];
        assert!(matches!(
            decode_packet(&bytes),
            Err(ProtocolError::InvalidFlags {
                packet_type: PacketType::Subscribe,
                flags: 0
            })
        ));
    }

    #[test]
    fn test_publish_qos0_has_no_packet_id_on_wire() {
        // Arrange
        let packet = Packet::Publish(PublishPacket::at_most_once("a", "hi"));

        // Act
        let bytes = encode_packet(&packet).unwrap();

        // Assert: header, topic "a", then payload directly
        assert_eq!(bytes, vec![0x30, 5, 0x00, 0x01, b'a', b'h', b'i']);
    }

    #[test]
    fn test_publish_qos1_without_packet_id_fails_to_encode() {
        let mut p = PublishPacket::at_most_once("a", "hi");
        p.qos = QoS::AtLeastOnce;
        assert!(encode_packet(&Packet::Publish(p)).is_err());
    }

    #[test]
    fn test_publish_flags_decode_retain_dup_and_qos() {
        // PUBLISH, dup + QoS1 + retain = 0b1011, topic "a", id 7, payload "x"
        let bytes = [0x3B, 6, 0x00, 0x01, b'a', 0x00, 0x07, b'x'];
        let (packet, used) = decode_packet(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        let Packet::Publish(p) = packet else {
            panic!("expected PUBLISH");
        };
        assert!(p.dup);
        assert!(p.retain);
        assert_eq!(p.qos, QoS::AtLeastOnce);
        assert_eq!(p.packet_id, Some(7));
        assert_eq!(&p.payload[..], b"x");
    }

    #[test]
    fn test_publish_qos3_is_malformed() {
        let bytes = [0x36, 3, 0x00, 0x01, b'a'];
        assert!(matches!(
            decode_packet(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_publish_with_empty_payload_decodes() {
        let bytes = [0x30, 3, 0x00, 0x01, b'a'];
        let (packet, _) = decode_packet(&bytes).unwrap();
        assert_eq!(packet, Packet::Publish(PublishPacket::at_most_once("a", "")));
    }

    #[test]
    fn test_partial_body_returns_insufficient_data() {
        // Arrange: only the first 4 bytes of a 7-byte PUBLISH
        let bytes = encode_packet(&Packet::Publish(PublishPacket::at_most_once("a", "hi"))).unwrap();

        // Act
        let result = decode_packet(&bytes[..4]);

        // Assert: the decoder asks for more, it does not fail
        assert_eq!(
            result,
            Err(ProtocolError::InsufficientData {
                needed: 7,
                available: 4
            })
        );
    }

    #[test]
    fn test_partial_remaining_length_returns_insufficient_data() {
        // Continuation bit set but the second varint byte has not arrived.
        let result = decode_packet(&[0x30, 0x80]);
        assert!(matches!(result, Err(ProtocolError::InsufficientData { .. })));
    }

    #[test]
    fn test_reserved_packet_type_is_unknown() {
        assert_eq!(
            decode_packet(&[0x00, 0x00]),
            Err(ProtocolError::UnknownPacketType(0))
        );
        assert_eq!(
            decode_packet(&[0x50, 0x02, 0x00, 0x01]),
            Err(ProtocolError::UnknownPacketType(5))
        );
    }

    #[test]
    fn test_connect_with_wrong_protocol_level_is_unsupported() {
        let mut bytes = encode_packet(&Packet::Connect(ConnectPacket {
            client_id: "c".to_string(),
            keep_alive_secs: 10,
            clean_session: true,
        }))
        .unwrap();
        bytes[8] = 0x03; // MQTT 3.1 level
        assert!(matches!(
            decode_packet(&bytes),
            Err(ProtocolError::UnsupportedProtocol { level: 3, .. })
        ));
    }

    #[test]
    fn test_connack_with_unknown_code_is_malformed() {
        assert!(matches!(
            decode_packet(&[0x20, 0x02, 0x00, 0x09]),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_suback_failure_code_decodes() {
        let (packet, _) = decode_packet(&[0x90, 0x03, 0x00, 0x05, 0x80]).unwrap();
        assert_eq!(
            packet,
            Packet::SubAck(SubAckPacket {
                packet_id: 5,
                return_codes: vec![SubAckReturnCode::Failure],
            })
        );
    }

    #[test]
    fn test_pingresp_with_body_is_malformed() {
        assert!(matches!(
            decode_packet(&[0xD0, 0x01, 0x00]),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_overlong_topic_fails_to_encode() {
        let topic = "x".repeat(70_000);
        let result = encode_packet(&Packet::Publish(PublishPacket::at_most_once(topic, "")));
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_unsubscribe_and_unsuback_survive_encode_decode() {
        // Arrange
        let unsubscribe = Packet::Unsubscribe(UnsubscribePacket {
            packet_id: 9,
            topic_filters: vec!["tempdeck/espruino/a".to_string(), "b".to_string()],
        });
        let unsuback = Packet::UnsubAck(9);

        // Act
        let unsub_bytes = encode_packet(&unsubscribe).unwrap();
        let ack_bytes = encode_packet(&unsuback).unwrap();

        // Assert
        assert_eq!(unsub_bytes[0], 0xA2);
        assert_eq!(ack_bytes, vec![0xB0, 0x02, 0x00, 0x09]);
        assert_eq!(decode_packet(&unsub_bytes).unwrap(), (unsubscribe, unsub_bytes.len()));
        assert_eq!(decode_packet(&ack_bytes).unwrap(), (unsuback, 4));
    }

    #[test]
    fn test_unsubscribe_without_filters_is_rejected() {
        let empty = Packet::Unsubscribe(UnsubscribePacket {
            packet_id: 1,
            topic_filters: Vec::new(),
        });
        assert!(matches!(
            encode_packet(&empty),
            Err(ProtocolError::MalformedPayload(_))
        ));
        // Packet id only, no filters on the wire.
        assert!(matches!(
            decode_packet(&[0xA2, 0x02, 0x00, 0x01]),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_unsubscribe_with_packet_id_zero_is_rejected() {
        let zero = Packet::Unsubscribe(UnsubscribePacket {
            packet_id: 0,
            topic_filters: vec!["t".to_string()],
        });
        assert!(matches!(
            encode_packet(&zero),
            Err(ProtocolError::MalformedPayload(_))
        ));
        assert!(matches!(
            decode_packet(&[0xA2, 0x05, 0x00, 0x00, 0x00, 0x01, b't']),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_unsuback_with_wrong_length_is_rejected() {
        assert!(matches!(
            decode_packet(&[0xB0, 0x03, 0x00, 0x01, 0x00]),
            Err(ProtocolError::MalformedPayload(_))
        ));
        assert!(matches!(
            decode_packet(&[0xB0, 0x01, 0x00]),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_bounded_decode_rejects_oversized_packet_from_header_alone() {
        // Arrange: a PUBLISH header declaring 16_384 body bytes, none sent yet
        let header = [0x30, 0x80, 0x80, 0x01];

        // Act
        let result = decode_packet_bounded(&header, 1024);

        // Assert: fails immediately instead of asking for more data
        assert_eq!(result, Err(ProtocolError::PacketTooLarge(4 + 16_384)));
    }

    #[test]
    fn test_bounded_decode_accepts_packet_at_the_limit() {
        let bytes = encode_packet(&Packet::Publish(PublishPacket::at_most_once("a", "hi"))).unwrap();
        let (packet, used) = decode_packet_bounded(&bytes, bytes.len()).unwrap();
        assert_eq!(used, bytes.len());
        assert!(matches!(packet, Packet::Publish(_)));
        assert_eq!(
            decode_packet_bounded(&bytes, bytes.len() - 1),
            Err(ProtocolError::PacketTooLarge(bytes.len()))
        );
    }

    #[test]
    fn test_two_packets_in_one_buffer_decode_independently() {
        // Arrange: simulates TCP coalescing two sends into one recv
        let first = Packet::Publish(PublishPacket::at_most_once("t", "1"));
        let second = Packet::PingResp;
        let mut buf = encode_packet(&first).unwrap();
        buf.extend_from_slice(&encode_packet(&second).unwrap());

        // Act
        let (decoded1, used1) = decode_packet(&buf).unwrap();
        let (decoded2, used2) = decode_packet(&buf[used1..]).unwrap();

        // Assert
        assert_eq!(decoded1, first);
        assert_eq!(decoded2, second);
        assert_eq!(used1 + used2, buf.len());
    }
}

//! Integration tests for the tempdeck-core codec.
//!
//! These tests drive the public API the way the broker subscriber does: bytes
//! arrive from TCP in arbitrary chunks, are appended to a buffer, and
//! `decode_packet` is called until it reports `InsufficientData`.

use tempdeck_core::protocol::{
    decode_packet, encode_packet, ConnAckPacket, ConnectPacket, ConnectReturnCode, Packet,
    PacketIdCounter, ProtocolError, PublishPacket, QoS, SubAckPacket, SubAckReturnCode,
    SubscribeFilter, SubscribePacket,
};
use tempdeck_core::build_topic;

/// Every packet of a short subscriber session, in wire order.
fn session_transcript() -> Vec<Packet> {
    let topic = build_topic("tempdeck/espruino", "18fe34da-fa4a").expect("valid topic");
    let ids = PacketIdCounter::new();
    let sub_id = ids.next();

    vec![
        Packet::Connect(ConnectPacket {
            client_id: "tempdeck-client".to_string(),
            keep_alive_secs: 30,
            clean_session: true,
        }),
        Packet::ConnAck(ConnAckPacket {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        }),
        Packet::Subscribe(SubscribePacket {
            packet_id: sub_id,
            filters: vec![SubscribeFilter {
                topic_filter: topic.clone(),
                qos: QoS::AtMostOnce,
            }],
        }),
        Packet::SubAck(SubAckPacket {
            packet_id: sub_id,
            return_codes: vec![SubAckReturnCode::Granted(QoS::AtMostOnce)],
        }),
        Packet::Publish(PublishPacket::at_most_once(
            topic.clone(),
            r#"{"currentTemp":21.1,"targetTemp":20}"#,
        )),
        Packet::Publish(PublishPacket::at_most_once(
            topic,
            r#"{"currentTemp":21.3,"targetTemp":20}"#,
        )),
        Packet::PingReq,
        Packet::PingResp,
        Packet::Disconnect,
    ]
}

/// Feeds `wire` to the decoder in `chunk`-sized reads, returning every packet
/// in the order it was completed.
fn reassemble(wire: &[u8], chunk: usize) -> Vec<Packet> {
    let mut buf = Vec::new();
    let mut out = Vec::new();
    for piece in wire.chunks(chunk) {
        buf.extend_from_slice(piece);
        loop {
            match decode_packet(&buf) {
                Ok((packet, consumed)) => {
                    buf.drain(..consumed);
                    out.push(packet);
                }
                Err(ProtocolError::InsufficientData { .. }) => break,
                Err(e) => panic!("unexpected decode error at chunk size {chunk}: {e}"),
            }
        }
    }
    assert!(buf.is_empty(), "no bytes may be left over");
    out
}

#[test]
fn test_session_transcript_survives_any_chunking() {
    // Arrange
    let packets = session_transcript();
    let wire: Vec<u8> = packets
        .iter()
        .flat_map(|p| encode_packet(p).expect("encode must succeed"))
        .collect();

    // Act / Assert: byte-at-a-time, odd sizes, and everything at once
    for chunk in [1, 2, 3, 7, 64, wire.len()] {
        assert_eq!(reassemble(&wire, chunk), packets, "chunk size {chunk}");
    }
}

#[test]
fn test_publish_payload_is_preserved_byte_for_byte() {
    // Arrange: payload with non-UTF-8 bytes; the codec must not interpret it
    let payload: Vec<u8> = vec![0x00, 0xFF, 0xC3, 0x28, b'{', b'}'];
    let packet = Packet::Publish(PublishPacket::at_most_once("t", payload.clone()));

    // Act
    let bytes = encode_packet(&packet).unwrap();
    let (decoded, _) = decode_packet(&bytes).unwrap();

    // Assert
    let Packet::Publish(p) = decoded else {
        panic!("expected PUBLISH");
    };
    assert_eq!(p.payload.as_ref(), payload.as_slice());
}

#[test]
fn test_large_publish_uses_three_byte_remaining_length() {
    // Arrange: 20 000-byte body needs a 3-byte varint (16 384..=2 097 151)
    let payload = vec![b'7'; 20_000];
    let packet = Packet::Publish(PublishPacket::at_most_once("tempdeck/x", payload));

    // Act
    let bytes = encode_packet(&packet).unwrap();

    // Assert
    assert_eq!(bytes[1] & 0x80, 0x80);
    assert_eq!(bytes[2] & 0x80, 0x80);
    assert_eq!(bytes[3] & 0x80, 0x00);
    assert_eq!(reassemble(&bytes, 1000), vec![packet]);
}

#[test]
fn test_corrupt_byte_mid_stream_is_reported_not_skipped() {
    // Arrange: a valid PINGRESP followed by a reserved packet type
    let mut wire = encode_packet(&Packet::PingResp).unwrap();
    wire.extend_from_slice(&[0xF0, 0x00]);

    // Act
    let (first, used) = decode_packet(&wire).unwrap();
    let second = decode_packet(&wire[used..]);

    // Assert
    assert_eq!(first, Packet::PingResp);
    assert_eq!(second, Err(ProtocolError::UnknownPacketType(15)));
}

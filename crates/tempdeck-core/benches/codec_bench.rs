//! Criterion benchmarks for the MQTT packet codec.
//!
//! The subscriber decodes every PUBLISH on the broker read task, so decode
//! latency sits directly in front of the relay fan-out.
//!
//! Run with:
//! ```bash
//! cargo bench --package tempdeck-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempdeck_core::protocol::{decode_packet, encode_packet, Packet, PublishPacket};

fn make_publish(payload_len: usize) -> Packet {
    Packet::Publish(PublishPacket::at_most_once(
        "tempdeck/espruino/18fe34da-fa4a",
        vec![b'x'; payload_len],
    ))
}

fn bench_decode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_publish");
    for size in [38usize, 1024, 64 * 1024] {
        let bytes = encode_packet(&make_publish(size)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| decode_packet(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn bench_encode_publish(c: &mut Criterion) {
    let packet = make_publish(38);
    c.bench_function("encode_publish_38", |b| {
        b.iter(|| encode_packet(black_box(&packet)).unwrap())
    });
}

criterion_group!(benches, bench_decode_publish, bench_encode_publish);
criterion_main!(benches);

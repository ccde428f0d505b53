//! Codec benchmarks for huddle-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use huddle_protocol::{codec, Frame, MessageId, RoomId, UserId};

fn chat_frame(content_len: usize) -> Frame {
    Frame::ReceiveMessage {
        id: MessageId::generate(),
        room_id: RoomId::generate(),
        sender_id: UserId::generate(),
        content: "x".repeat(content_len),
        sent_at: 1_700_000_000_000,
        display_name: Some("Alice".to_string()),
    }
}

fn bench_encode(c: &mut Criterion) {
    let frame = chat_frame(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("msgpack_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode_json(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = chat_frame(64);
    let encoded = codec::encode(&frame).unwrap();
    let text = codec::encode_json(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::decode_json(black_box(&text), codec::MAX_FRAME_SIZE))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = chat_frame(1024);

    c.bench_function("roundtrip_1KB", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_roundtrip);
criterion_main!(benches);

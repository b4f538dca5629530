//! Codec benchmarks for roomhub-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use roomhub_protocol::{codec, WireMessage};

fn bench_encode(c: &mut Criterion) {
    let message = WireMessage::chat("room", "alice", "x".repeat(64));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("chat_64B", |b| b.iter(|| codec::encode(black_box(&message))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let message = WireMessage::chat("room", "alice", "x".repeat(64));
    let encoded = codec::encode(&message).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("chat_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let batch: Vec<WireMessage> = (0..32)
        .map(|i| WireMessage::chat("room", "alice", format!("message {i}")))
        .collect();

    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("encode_32", |b| {
        b.iter(|| codec::encode_batch(black_box(&batch)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_batch);
criterion_main!(benches);

//! Broadcast fan-out benchmarks for roomhub.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use roomhub_core::{Connection, Hub, Message, OutboundQueue};
use std::sync::Arc;

fn populated_hub(members: usize) -> (Hub, String, Vec<OutboundQueue>) {
    let hub = Hub::new();
    let room = hub.create_room("bench", "user:0", false);
    let mut queues = Vec::with_capacity(members);

    for i in 0..members {
        let user = format!("user:{i}");
        let (conn, queue) = Connection::new(user.clone(), user.clone(), 1024);
        hub.register_connection(Arc::clone(&conn));
        hub.join_room(room.id(), &user);
        queues.push(queue);
    }

    (hub, room.id().to_string(), queues)
}

/// Benchmark one broadcast to rooms of growing size.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for members in [1usize, 10, 100, 1000] {
        let (hub, room_id, mut queues) = populated_hub(members);
        let mut drained = Vec::new();

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                let report = hub.broadcast(Message::chat(room_id.as_str(), "user:0", "hello"));
                for queue in &mut queues {
                    drained.clear();
                    queue.drain_ready(&mut drained, usize::MAX);
                }
                black_box(report)
            });
        });
    }

    group.finish();
}

/// Benchmark join/leave churn on a single room.
fn bench_membership(c: &mut Criterion) {
    let (hub, room_id, _queues) = populated_hub(100);

    c.bench_function("join_leave", |b| {
        b.iter(|| {
            hub.leave_room(&room_id, "user:42");
            black_box(hub.join_room(&room_id, "user:42"))
        });
    });
}

criterion_group!(benches, bench_broadcast, bench_membership);
criterion_main!(benches);

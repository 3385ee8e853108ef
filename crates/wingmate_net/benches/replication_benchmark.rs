//! # Replication Benchmark
//!
//! Hot paths of a lobby tick:
//! - Frame encode/decode of a full snapshot frame
//! - Registry tick with many owned entities
//! - Replica interpolation sampling
//! - A whole lobby tick on the loopback network
//!
//! Run with: `cargo bench --package wingmate_net`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use wingmate_net::lobby::PeerId;
use wingmate_net::protocol::{decode_frame, encode_message, FrameEncoder, Message, SnapshotRecord};
use wingmate_net::registry::{EntityId, EntityRegistry, InterpolationBuffer, Sample};
use wingmate_net::{EntityKind, InitialState, LoopbackNetwork, Session, SessionConfig};
use wingmate_shared::{Team, Transform, Vec3};

fn snapshot(serial: u32) -> Message {
    let f = serial as f32;
    Message::EntitySnapshot(SnapshotRecord {
        id: EntityId::new(PeerId(1), serial),
        seq: serial,
        timestamp_ms: 1_000,
        transform: Transform::at(Vec3::new(f, 0.0, -f)),
        velocity: Some(Vec3::new(1.0, 0.0, 0.0)),
        payload: Vec::new(),
    })
}

/// Packs snapshots until the frame would split.
fn full_frame() -> Vec<u8> {
    let mut encoder = FrameEncoder::new();
    let mut serial = 0;
    while let Some(encoded) = encode_message(&snapshot(serial)) {
        if !encoder.fits(&encoded) {
            break;
        }
        encoder.push_encoded(&encoded, false);
        serial += 1;
    }
    encoder.finish()
}

fn bench_frame_encode(c: &mut Criterion) {
    c.bench_function("frame_encode_full", |b| {
        b.iter(|| black_box(full_frame()));
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let frame = full_frame();
    c.bench_function("frame_decode_full", |b| {
        b.iter(|| black_box(decode_frame(black_box(&frame))));
    });
}

fn bench_registry_tick(c: &mut Criterion) {
    let settings = SessionConfig::default().replica_settings();
    let mut group = c.benchmark_group("registry_tick");

    for count in [16_usize, 128, 1024] {
        let mut registry = EntityRegistry::new(PeerId(1), settings);
        for i in 0..count {
            let state = InitialState::at(Transform::at(Vec3::new(i as f32, 0.0, 0.0)));
            registry.spawn(EntityKind::Enemy, state, 0, 0).expect("spawn");
        }
        let mut now = 0;
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                now += 16;
                black_box(registry.tick(now))
            });
        });
    }

    group.finish();
}

fn bench_interpolation_sample(c: &mut Criterion) {
    let mut buffer = InterpolationBuffer::new(32, 100, 250);
    for i in 0..32_u64 {
        buffer.push(Sample {
            timestamp_ms: i * 16,
            received_ms: i * 16 + 40,
            transform: Transform::at(Vec3::new(i as f32, 0.0, 0.0)),
            velocity: Some(Vec3::new(60.0, 0.0, 0.0)),
        });
    }
    let newest = 31 * 16 + 40;

    c.bench_function("interpolation_sample", |b| {
        let mut offset = 0;
        b.iter(|| {
            offset = (offset + 7) % 400;
            black_box(buffer.sample(black_box(newest + offset)))
        });
    });
}

fn bench_lobby_tick(c: &mut Criterion) {
    let net = LoopbackNetwork::perfect();
    let mut peers = Vec::new();
    let mut host = Session::host(SessionConfig::named("Host", Team::Red), net.endpoint(1024), 0)
        .expect("host");
    let lobby = host.lobby_id().expect("lobby");

    let mut now = 0;
    for name in ["Bo", "Cy", "Di"] {
        let mut pending = Session::begin_join(SessionConfig::named(name, Team::Blue), net.endpoint(1024), lobby, now)
            .expect("join");
        let guest = loop {
            now += 16;
            host.tick(now);
            match pending.poll(now).expect("join accepted") {
                wingmate_net::JoinProgress::Waiting(next) => pending = next,
                wingmate_net::JoinProgress::Joined(session) => break session,
            }
        };
        peers.push(guest);
    }
    for peer in &mut peers {
        peer.report_scene_loaded();
    }
    for i in 0..8 {
        let state = InitialState::at(Transform::at(Vec3::new(i as f32, 0.0, 0.0)));
        host.spawn(EntityKind::Enemy, state).expect("spawn");
    }

    c.bench_function("lobby_tick_4_peers", |b| {
        b.iter(|| {
            now += 16;
            host.tick(now);
            for peer in &mut peers {
                peer.tick(now);
            }
        });
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_registry_tick,
    bench_interpolation_sample,
    bench_lobby_tick,
);
criterion_main!(benches);

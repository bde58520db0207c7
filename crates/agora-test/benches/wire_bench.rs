//! Benchmarks for the Agora wire codec

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use agora_core::{ActorId, Quat, SessionId, StrokeId, Target, Vec3};
use agora_wire::{Envelope, Message, Pose, PoseUpdate, Snapshot};

fn pose_envelope() -> Envelope {
    let pose = Pose::new(Vec3::new(1.0, 1.6, -2.0), Quat::from_euler(0.3, 0.1, 0.0));
    let update = PoseUpdate {
        owner: ActorId(3),
        seq: 4242,
        body: pose,
        head: pose,
    };
    Envelope::new(SessionId(1), ActorId(3), Target::Others, Message::Pose(update)).with_seq(4242)
}

fn bench_pose_encode(c: &mut Criterion) {
    let envelope = pose_envelope();
    c.bench_function("pose_encode", |b| {
        let mut buf = Vec::with_capacity(128);
        b.iter(|| {
            buf.clear();
            black_box(&envelope).write_to(&mut buf).unwrap();
        })
    });
}

fn bench_pose_decode(c: &mut Criterion) {
    let bytes = pose_envelope().encode().unwrap();
    c.bench_function("pose_decode", |b| {
        b.iter(|| Envelope::decode(black_box(&bytes)).unwrap())
    });
}

fn bench_stroke_continue_decode(c: &mut Criterion) {
    let message = Message::StrokeContinue {
        stroke: StrokeId(7),
        point: Vec3::new(0.02, 0.0, 0.0),
    };
    let bytes = Envelope::new(SessionId(1), ActorId(2), Target::Buffered, message)
        .with_seq(99)
        .encode()
        .unwrap();
    c.bench_function("stroke_continue_decode", |b| {
        b.iter(|| Envelope::decode(black_box(&bytes)).unwrap())
    });
}

fn bench_snapshot_roundtrip(c: &mut Criterion) {
    // A board of 16 strokes with 40 points each
    let mut log = Vec::new();
    let mut seq = 0;
    for stroke in 1..=16u64 {
        let mut push = |message: Message| {
            seq += 1;
            log.push(Envelope::new(SessionId(1), ActorId(2), Target::Buffered, message).with_seq(seq));
        };
        push(Message::StrokeBegin {
            stroke: StrokeId(stroke),
            color_index: 0,
            point: Vec3::ZERO,
        });
        for i in 0..40 {
            push(Message::StrokeContinue {
                stroke: StrokeId(stroke),
                point: Vec3::new(i as f32 * 0.01, 0.0, 0.0),
            });
        }
        push(Message::StrokeEnd {
            stroke: StrokeId(stroke),
        });
    }
    let snapshot = Snapshot {
        log,
        complete: true,
        ..Default::default()
    };
    let envelope = Envelope::new(
        SessionId(1),
        ActorId(1),
        Target::Single(ActorId(5)),
        Message::Snapshot(snapshot),
    );

    c.bench_function("snapshot_roundtrip", |b| {
        b.iter(|| {
            let bytes = black_box(&envelope).encode().unwrap();
            black_box(Envelope::decode(&bytes).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_pose_encode,
    bench_pose_decode,
    bench_stroke_continue_decode,
    bench_snapshot_roundtrip
);
criterion_main!(benches);

//! Benchmarks for frame encoding and decoding
//!
//! Run with: cargo bench --bench encoding
//!
//! Covers the per-command delta codecs and whole transmit/receive ticks with realistic
//! command streams.

use cmd_uplink::__internal::{
    read_batched_delta, read_classic_delta, write_batched_delta, write_classic_delta, BitReader,
    BitWriter, ByteReader,
};
use cmd_uplink::{
    Action, ButtonBits, Command, CommandReceiver, ConnectionState, KeyEvent, PeerProtocol,
    RecordingTransport, SessionBuilder, SourceId, Timestamp, TransmitConfig,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

/// Player standing still
fn idle_commands(count: usize) -> Vec<Command> {
    vec![
        Command {
            msec: 16,
            ..Command::BLANK
        };
        count
    ]
}

/// Player running and turning, firing every few frames
fn active_commands(count: usize) -> Vec<Command> {
    (0..count)
        .map(|i| Command {
            msec: 16,
            angles: [(i as i16).wrapping_mul(37), (i as i16).wrapping_mul(-211), 0],
            forward: 400.0,
            side: if i % 4 < 2 { 200.0 } else { -200.0 },
            up: 0.0,
            buttons: if i % 5 == 0 {
                ButtonBits::ATTACK | ButtonBits::ANY
            } else {
                ButtonBits::ANY
            },
            impulse: 0,
        })
        .collect()
}

fn bench_classic_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("Classic delta");

    for (name, commands) in [("idle", idle_commands(3)), ("active", active_commands(3))] {
        group.bench_with_input(BenchmarkId::new("encode", name), &commands, |b, commands| {
            let mut buf = Vec::with_capacity(64);
            b.iter(|| {
                buf.clear();
                let mut from = Command::BLANK;
                for cmd in commands {
                    write_classic_delta(&mut buf, &from, black_box(cmd));
                    from = *cmd;
                }
                buf.len()
            });
        });

        let mut encoded = Vec::new();
        let mut from = Command::BLANK;
        for cmd in &commands {
            write_classic_delta(&mut encoded, &from, cmd);
            from = *cmd;
        }
        group.bench_with_input(BenchmarkId::new("decode", name), &encoded, |b, encoded| {
            b.iter(|| {
                let mut reader = ByteReader::new(black_box(encoded));
                let mut from = Command::BLANK;
                for _ in 0..3 {
                    from = read_classic_delta(&mut reader, &from).unwrap_or(Command::BLANK);
                }
                from
            });
        });
    }

    group.finish();
}

fn bench_batched_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("Batched delta");

    for count in [1, 4, 16, 31] {
        let commands = active_commands(count);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("encode", count), &commands, |b, commands| {
            let mut buf = Vec::with_capacity(256);
            b.iter(|| {
                buf.clear();
                let mut writer = BitWriter::new(&mut buf);
                let mut from = Command::BLANK;
                for cmd in commands {
                    write_batched_delta(&mut writer, &from, black_box(cmd));
                    from = *cmd;
                }
                writer.flush()
            });
        });

        let mut encoded = Vec::new();
        let mut writer = BitWriter::new(&mut encoded);
        let mut from = Command::BLANK;
        for cmd in &commands {
            write_batched_delta(&mut writer, &from, cmd);
            from = *cmd;
        }
        writer.flush();
        group.bench_with_input(BenchmarkId::new("decode", count), &encoded, |b, encoded| {
            b.iter(|| {
                let mut reader = BitReader::new(black_box(encoded));
                let mut from = Command::BLANK;
                for _ in 0..count {
                    from = read_batched_delta(&mut reader, &from).unwrap_or(Command::BLANK);
                }
                from
            });
        });
    }

    group.finish();
}

fn bench_session_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("Session tick");

    for (name, protocol, window) in [
        ("legacy", PeerProtocol::Legacy, 0u8),
        ("batched_w1", PeerProtocol::Batching, 1),
        ("batched_w3", PeerProtocol::Batching, 3),
    ] {
        group.bench_function(BenchmarkId::new("run_frame", name), |b| {
            let config = TransmitConfig {
                max_sends_per_second: 0,
                redundancy_window: window,
                ..TransmitConfig::default()
            };
            let Ok(mut session) = SessionBuilder::new()
                .with_transmit_config(config)
                .with_peer_protocol(protocol)
                .start_session(RecordingTransport::new())
            else {
                return;
            };
            session.connect();
            session.set_connection_state(ConnectionState::Active);
            let _ = session.key_down(Action::Forward, KeyEvent::new(SourceId::new(1)), Timestamp::ZERO);
            let mut receiver = CommandReceiver::new(protocol);

            let mut now = 0u64;
            b.iter(|| {
                now += 16;
                session.pointer_motion(3, -1);
                let outcome = session.run_frame(16, Timestamp::from_millis(now));
                let delivered = session.transport_mut().deliver_to(&mut receiver);
                black_box((outcome, delivered))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_classic_delta,
    bench_batched_delta,
    bench_session_tick
);
criterion_main!(benches);

//! Network resilience integration tests using ChaosTransport.
//!
//! These tests validate that the command stream survives adverse conditions:
//! - Scripted loss bursts up to the redundancy window (batched frames)
//! - Up to two consecutive losses (single frames)
//! - Random loss, where everything the receiver gets must still be in order

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{active_session, every_frame, run_tagged_frames};
use cmd_uplink::{
    ChaosConfig, ChaosTransport, CommandReceiver, PeerProtocol, RecordingTransport, Sequence,
    SessionBuilder, UplinkSession,
};

/// Number of frames per run. Every loss period used below divides `FRAMES - 1`, so the
/// final send always arrives.
const FRAMES: u8 = 121;

type Lossy = ChaosTransport<RecordingTransport>;

/// Drops `run` consecutive sends out of every `run + 2`, starting with sequence 1.
fn periodic_drops(run: u32) -> Vec<Sequence> {
    (0..u32::from(FRAMES))
        .filter(|seq| run > 0 && (1..=run).contains(&(seq % (run + 2))))
        .map(Sequence::new)
        .collect()
}

fn lossy_session(
    protocol: PeerProtocol,
    window: u8,
    chaos: ChaosConfig,
) -> UplinkSession<Lossy> {
    active_session(
        SessionBuilder::new()
            .with_transmit_config(every_frame(window))
            .with_peer_protocol(protocol),
        ChaosTransport::new(RecordingTransport::new(), chaos),
    )
}

fn delivered_impulses(
    session: &mut UplinkSession<Lossy>,
    protocol: PeerProtocol,
) -> (Vec<u8>, CommandReceiver) {
    let mut receiver = CommandReceiver::new(protocol);
    let commands = session
        .transport_mut()
        .inner_mut()
        .deliver_to(&mut receiver)
        .unwrap();
    (commands.iter().map(|c| c.impulse).collect(), receiver)
}

#[test]
fn batched_recovers_bursts_up_to_the_window() {
    for window in 0..=3u8 {
        let drops = periodic_drops(u32::from(window));
        let chaos = ChaosConfig::builder().drop_sequences(drops.clone()).build();
        let mut session = lossy_session(PeerProtocol::Batching, window, chaos);

        let generated = run_tagged_frames(&mut session, 1000, FRAMES);
        assert_eq!(
            session.transport().stats().frames_dropped_scripted,
            drops.len() as u64
        );

        let (delivered, receiver) = delivered_impulses(&mut session, PeerProtocol::Batching);
        assert_eq!(delivered, generated, "window {window}");
        assert_eq!(receiver.total_dropped(), drops.len() as u64);
    }
}

#[test]
fn batched_loses_commands_past_the_window() {
    for window in 0..=2u8 {
        // one more consecutive loss than the window covers
        let drops = periodic_drops(u32::from(window) + 1);
        let chaos = ChaosConfig::builder().drop_sequences(drops).build();
        let mut session = lossy_session(PeerProtocol::Batching, window, chaos);

        let generated = run_tagged_frames(&mut session, 1000, FRAMES);
        let (delivered, _) = delivered_impulses(&mut session, PeerProtocol::Batching);

        assert!(delivered.len() < generated.len(), "window {window}");
        assert!(delivered.windows(2).all(|w| w[0] < w[1]), "window {window}");
    }
}

#[test]
fn single_frames_recover_two_consecutive_losses() {
    for protocol in [PeerProtocol::Legacy, PeerProtocol::Compact] {
        let chaos = ChaosConfig::builder()
            .drop_sequences(periodic_drops(2))
            .build();
        let mut session = lossy_session(protocol, 1, chaos);

        let generated = run_tagged_frames(&mut session, 1000, FRAMES);
        let (delivered, _) = delivered_impulses(&mut session, protocol);
        assert_eq!(delivered, generated, "protocol {protocol:?}");
    }
}

#[test]
fn single_frames_lose_the_oldest_of_three_consecutive_losses() {
    // sequences 1..=3 are lost; commands 2..=4 went out under them
    let chaos = ChaosConfig::builder()
        .drop_sequences((1..=3).map(Sequence::new))
        .build();
    let mut session = lossy_session(PeerProtocol::Compact, 1, chaos);

    run_tagged_frames(&mut session, 1000, 6);
    let (delivered, _) = delivered_impulses(&mut session, PeerProtocol::Compact);
    assert_eq!(delivered, vec![1, 3, 4, 5, 6]);
}

#[test]
fn random_loss_keeps_order_and_bounds_gaps() {
    let chaos = ChaosConfig::builder()
        .packet_loss_rate(0.3)
        .seed(7)
        .build();
    let mut session = lossy_session(PeerProtocol::Batching, 3, chaos);

    let generated = run_tagged_frames(&mut session, 1000, FRAMES);
    let dropped = session.transport().stats().frames_dropped_random;
    assert!(dropped > 0);

    let (delivered, receiver) = delivered_impulses(&mut session, PeerProtocol::Batching);
    assert!(delivered.windows(2).all(|w| w[0] < w[1]));
    assert!(delivered.iter().all(|tag| generated.contains(tag)));
    // trailing losses are invisible to the receiver
    assert!(receiver.total_dropped() <= dropped);
}

#[test]
fn duplicated_frames_are_ignored() {
    let chaos = ChaosConfig::builder().duplication_rate(1.0).seed(1).build();
    let mut session = lossy_session(PeerProtocol::Batching, 1, chaos);

    let generated = run_tagged_frames(&mut session, 1000, 20);
    assert_eq!(session.transport().stats().frames_duplicated, 20);

    let (delivered, receiver) = delivered_impulses(&mut session, PeerProtocol::Batching);
    assert_eq!(delivered, generated);
    assert_eq!(receiver.frames_received(), 20);
}

//! Property-based tests for button tracking, the wire codecs and the transmit/receive pair.
//!
//! These tests use proptest to verify invariants hold under random inputs,
//! leveraging the exposed __internal module for direct codec testing.
//!
//! # Invariants Tested
//!
//! ## Buttons
//! - At most two sources hold a button; a button is down iff a source holds it
//! - Held fractions stay within [0, 1]
//!
//! ## Codecs
//! - A chain of batched deltas decodes to the commands that were written
//! - Arbitrary payloads never panic the receiver, and a rejected payload leaves it untouched
//!
//! ## Stream
//! - Any loss pattern whose bursts fit the redundancy window delivers every command once, in order
//! - `min_send_interval` never exceeds 100ms and is always `100 / n` for a whole `n`

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{active_session, every_frame, run_tagged_frames};
use cmd_uplink::__internal::{read_batched_delta, write_batched_delta, BitReader, BitWriter};
use cmd_uplink::{
    min_send_interval, ButtonBits, ChaosConfig, ChaosTransport, Command, CommandReceiver,
    KeyEvent, LogicalButton, PeerProtocol, RecordingTransport, Release, Sequence,
    SessionBuilder, SourceId, Timestamp,
};
use proptest::prelude::*;

// ============================================================================
// Property Test Strategies
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum ButtonOp {
    Press(u32),
    Release(u32),
    Force,
    ClearFrame,
}

fn button_op_strategy() -> impl Strategy<Value = ButtonOp> {
    prop_oneof![
        4 => (0u32..5).prop_map(ButtonOp::Press),
        4 => (0u32..5).prop_map(ButtonOp::Release),
        1 => Just(ButtonOp::Force),
        1 => Just(ButtonOp::ClearFrame),
    ]
}

/// Commands as the assembler produces them: whole-number moves within the axis limit.
fn command_strategy() -> impl Strategy<Value = Command> {
    (
        any::<u8>(),
        any::<[i16; 3]>(),
        (-400i16..=400, -400i16..=400, -400i16..=400),
        any::<u8>(),
        any::<u8>(),
    )
        .prop_map(|(msec, angles, (forward, side, up), buttons, impulse)| Command {
            msec,
            angles,
            forward: f32::from(forward),
            side: f32::from(side),
            up: f32::from(up),
            buttons: ButtonBits::from_bits(buttons),
            impulse,
        })
}

/// A loss pattern over `frames` sends whose bursts never exceed `max_burst`.
/// The final send always arrives.
fn bounded_loss_strategy(frames: usize, max_burst: usize) -> impl Strategy<Value = Vec<bool>> {
    proptest::collection::vec(any::<bool>(), frames).prop_map(move |mut lost| {
        let mut run = 0;
        for slot in &mut lost {
            if *slot && run < max_burst {
                run += 1;
            } else {
                *slot = false;
                run = 0;
            }
        }
        if let Some(last) = lost.last_mut() {
            *last = false;
        }
        lost
    })
}

// ============================================================================
// Button Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_button_sources_bounded(ops in proptest::collection::vec(button_op_strategy(), 1..60)) {
        let mut button = LogicalButton::new();
        let mut now = 1000u64;
        for op in ops {
            now += 3;
            let ts = Timestamp::from_millis(now);
            match op {
                ButtonOp::Press(id) => {
                    let _ = button.press(KeyEvent::new(SourceId::new(id)).at(ts), ts);
                },
                ButtonOp::Release(id) => {
                    let _ = button.release(Release::Source(KeyEvent::new(SourceId::new(id)).at(ts)), ts);
                },
                ButtonOp::Force => {
                    let _ = button.release(Release::Forced, ts);
                },
                ButtonOp::ClearFrame => button.clear_frame(ts),
            }

            let held = button.sources().count();
            prop_assert!(held <= 2);
            prop_assert_eq!(button.is_down(), held > 0);
        }
    }

    #[test]
    fn prop_fraction_in_unit_range(
        ops in proptest::collection::vec(button_op_strategy(), 1..40),
        frame_ms in 0u64..300,
        probe in 0u64..500,
    ) {
        let mut button = LogicalButton::new();
        let mut now = 1000u64;
        for op in ops {
            now += 7;
            let ts = Timestamp::from_millis(now);
            match op {
                ButtonOp::Press(id) => {
                    let _ = button.press(KeyEvent::new(SourceId::new(id)), ts);
                },
                ButtonOp::Release(id) => {
                    let _ = button.release(Release::Source(KeyEvent::new(SourceId::new(id))), ts);
                },
                ButtonOp::Force => {
                    let _ = button.release(Release::Forced, ts);
                },
                ButtonOp::ClearFrame => button.clear_frame(ts),
            }
        }
        let fraction = button.fraction_down(frame_ms, Timestamp::from_millis(now + probe));
        prop_assert!((0.0..=1.0).contains(&fraction), "fraction {}", fraction);
    }
}

// ============================================================================
// Codec Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_batched_delta_chain_decodes(commands in proptest::collection::vec(command_strategy(), 1..20)) {
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        let mut from = Command::BLANK;
        for cmd in &commands {
            write_batched_delta(&mut writer, &from, cmd);
            from = *cmd;
        }
        writer.flush();

        let mut reader = BitReader::new(&buf);
        let mut from = Command::BLANK;
        for expected in &commands {
            let decoded = read_batched_delta(&mut reader, &from).unwrap();
            prop_assert_eq!(&decoded, expected);
            from = decoded;
        }
    }

    #[test]
    fn prop_receiver_survives_garbage(
        payload in proptest::collection::vec(any::<u8>(), 0..96),
        sequence in 0u32..1000,
        protocol in prop_oneof![
            Just(PeerProtocol::Legacy),
            Just(PeerProtocol::Compact),
            Just(PeerProtocol::Batching),
        ],
    ) {
        let mut receiver = CommandReceiver::new(protocol);
        let before = receiver.expected_sequence();
        match receiver.receive(Sequence::new(sequence), &payload) {
            Ok(_) => prop_assert_eq!(receiver.expected_sequence(), Sequence::new(sequence).next()),
            Err(_) => {
                prop_assert_eq!(receiver.expected_sequence(), before);
                prop_assert_eq!(receiver.frames_received(), 0);
            },
        }
    }
}

// ============================================================================
// Stream Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_bounded_loss_is_fully_recovered(
        window in 0u8..=3,
        lost in bounded_loss_strategy(60, 3),
    ) {
        let drops: Vec<Sequence> = lost
            .iter()
            .enumerate()
            .scan(0usize, |run, (seq, &is_lost)| {
                *run = if is_lost { *run + 1 } else { 0 };
                Some((seq, is_lost && *run <= usize::from(window)))
            })
            .filter(|&(_, drop)| drop)
            .map(|(seq, _)| Sequence::new(seq as u32))
            .collect();

        let chaos = ChaosConfig::builder().drop_sequences(drops).build();
        let mut session = active_session(
            SessionBuilder::new()
                .with_transmit_config(every_frame(window))
                .with_peer_protocol(PeerProtocol::Batching),
            ChaosTransport::new(RecordingTransport::new(), chaos),
        );
        let generated = run_tagged_frames(&mut session, 1000, 60);

        let mut receiver = CommandReceiver::new(PeerProtocol::Batching);
        let delivered: Vec<u8> = session
            .transport_mut()
            .inner_mut()
            .deliver_to(&mut receiver)
            .unwrap()
            .iter()
            .map(|c| c.impulse)
            .collect();
        prop_assert_eq!(delivered, generated);
    }

    #[test]
    fn prop_send_interval_snaps_to_tenth_fractions(rate in 0u32..5000) {
        let interval = min_send_interval(rate);
        prop_assert!(interval <= 100);
        if interval > 0 {
            prop_assert_eq!(100 / (100 / interval), interval);
        }
    }
}

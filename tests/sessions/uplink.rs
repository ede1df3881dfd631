//! End-to-end tests: input events through the session, decoded by a receiver.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use std::sync::Arc;

use crate::common::{active_session, at, every_frame, run_tagged_frames, FRAME_MS};
use cmd_uplink::telemetry::{
    CollectingObserver, CompositeObserver, ViolationKind, ViolationObserver, ViolationSeverity,
};
use cmd_uplink::{assert_no_violations, assert_violation};
use cmd_uplink::{
    Action, ButtonBits, CommandReceiver, InputFocus, KeyEvent, MoveConfig, PeerProtocol,
    PressOutcome, RecordingTransport, Release, ReleaseOutcome, SessionBuilder, SourceId,
    TransmitConfig, TransmitOutcome,
};

fn walking() -> SessionBuilder {
    SessionBuilder::new().with_move_config(MoveConfig::walk_by_default())
}

fn key(id: u32) -> KeyEvent {
    KeyEvent::new(SourceId::new(id))
}

// ============================================================================
// Held fractions
// ============================================================================

#[test]
fn key_held_for_whole_frame_moves_at_full_speed() {
    let mut session = active_session(walking(), RecordingTransport::new());
    session
        .key_down(Action::Forward, key(1).at(at(1000)), at(1000))
        .unwrap();

    session.update(100, at(1100));
    let number = session.finalize_command(at(1100)).unwrap();

    let cmd = session.history().command(number);
    assert_eq!(cmd.msec, 100);
    assert_eq!(cmd.forward, 200.0);
    assert!(cmd.buttons.contains(ButtonBits::ANY));
}

#[test]
fn key_held_for_half_a_frame_moves_at_half_speed() {
    let mut session = active_session(walking(), RecordingTransport::new());
    session
        .key_down(Action::Forward, key(1).at(at(1050)), at(1050))
        .unwrap();

    session.update(100, at(1100));
    let number = session.finalize_command(at(1100)).unwrap();
    assert_eq!(session.history().command(number).forward, 100.0);
}

#[test]
fn tap_inside_a_frame_still_counts() {
    let mut session = active_session(walking(), RecordingTransport::new());
    session
        .key_down(Action::Back, key(1).at(at(1010)), at(1010))
        .unwrap();
    session
        .key_up(Action::Back, Release::Source(key(1).at(at(1035))), at(1035))
        .unwrap();

    session.update(50, at(1050));
    let number = session.finalize_command(at(1050)).unwrap();
    assert_eq!(session.history().command(number).forward, -100.0);

    // the next frame starts clean
    session.update(50, at(1100));
    let number = session.finalize_command(at(1100)).unwrap();
    assert_eq!(session.history().command(number).forward, 0.0);
}

#[test]
fn running_doubles_and_clamps() {
    let mut session = active_session(SessionBuilder::new(), RecordingTransport::new());
    session
        .key_down(Action::Forward, key(1).at(at(1000)), at(1000))
        .unwrap();
    session
        .key_down(Action::MoveRight, key(2).at(at(1000)), at(1000))
        .unwrap();

    session.update(50, at(1050));
    let number = session.finalize_command(at(1050)).unwrap();
    let cmd = session.history().command(number);
    assert_eq!(cmd.forward, 400.0);
    assert_eq!(cmd.side, 400.0);
}

// ============================================================================
// Source tracking
// ============================================================================

#[test]
fn two_sources_hold_one_action() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = active_session(
        walking().with_violation_observer(observer.clone()),
        RecordingTransport::new(),
    );

    assert_eq!(
        session.key_down(Action::Forward, key(5), at(10)).unwrap(),
        PressOutcome::Pressed
    );
    assert_eq!(
        session.key_down(Action::Forward, key(7), at(11)).unwrap(),
        PressOutcome::StillDown
    );
    assert_eq!(
        session.key_down(Action::Forward, key(9), at(12)).unwrap(),
        PressOutcome::Rejected
    );
    assert_eq!(observer.violations_of_kind(ViolationKind::InputTracking).len(), 1);

    assert_eq!(
        session
            .key_up(Action::Forward, Release::Source(key(5)), at(20))
            .unwrap(),
        ReleaseOutcome::StillHeld
    );
    assert!(session.actions().is_down(Action::Forward));
    assert_eq!(
        session
            .key_up(Action::Forward, Release::Source(key(7)), at(30))
            .unwrap(),
        ReleaseOutcome::Released
    );
    assert!(!session.actions().is_down(Action::Forward));
}

#[test]
fn forced_release_unsticks() {
    let mut session = active_session(walking(), RecordingTransport::new());
    session.key_down(Action::Attack, key(1), at(10)).unwrap();
    session.key_down(Action::Attack, key(2), at(10)).unwrap();
    assert_eq!(
        session.key_up(Action::Attack, Release::Forced, at(20)).unwrap(),
        ReleaseOutcome::Forced
    );
    assert!(!session.actions().any_down());
}

#[test]
fn release_all_clears_every_action() {
    let mut session = active_session(walking(), RecordingTransport::new());
    session.key_down(Action::Forward, key(1), at(10)).unwrap();
    session.key_down(Action::Left, key(2), at(10)).unwrap();
    session.release_all(at(20));
    assert!(!session.actions().any_down());
}

// ============================================================================
// Buttons and impulses on the wire
// ============================================================================

#[test]
fn attack_tap_survives_to_the_receiver() {
    let mut session = active_session(
        walking()
            .with_transmit_config(every_frame(1))
            .with_peer_protocol(PeerProtocol::Batching),
        RecordingTransport::new(),
    );
    let mut receiver = CommandReceiver::new(PeerProtocol::Batching);

    // pressed and released between two frames
    session.key_down(Action::Attack, key(1), at(1005)).unwrap();
    session
        .key_up(Action::Attack, Release::Source(key(1)), at(1008))
        .unwrap();
    session.impulse(7);
    session.run_frame(FRAME_MS, at(1016)).unwrap();
    session.run_frame(FRAME_MS, at(1032)).unwrap();

    let commands = session.transport_mut().deliver_to(&mut receiver).unwrap();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].buttons.contains(ButtonBits::ATTACK));
    assert_eq!(commands[0].impulse, 7);
    assert!(!commands[1].buttons.contains(ButtonBits::ATTACK));
    assert_eq!(commands[1].impulse, 0);
}

#[test]
fn decoded_commands_match_history() {
    for protocol in [PeerProtocol::Legacy, PeerProtocol::Compact, PeerProtocol::Batching] {
        let first = Arc::new(CollectingObserver::new());
        let second = Arc::new(CollectingObserver::new());
        let observers: Vec<Arc<dyn ViolationObserver>> = vec![first.clone(), second.clone()];
        let mut session = active_session(
            walking()
                .with_transmit_config(every_frame(2))
                .with_peer_protocol(protocol)
                .with_violation_observer(Arc::new(CompositeObserver::from_observers(observers))),
            RecordingTransport::new(),
        );
        let mut receiver = CommandReceiver::new(protocol);

        session.key_down(Action::Forward, key(1), at(1000)).unwrap();
        session.pointer_motion(12, -4);
        run_tagged_frames(&mut session, 1000, 10);

        let commands = session.transport_mut().deliver_to(&mut receiver).unwrap();
        let expected: Vec<_> = (1..=10)
            .map(|n| session.history().command(cmd_uplink::CommandNumber::new(n)))
            .collect();
        assert_eq!(commands, expected, "protocol {protocol:?}");
        assert_no_violations!(first);
        assert_no_violations!(second, format!("protocol {protocol:?}"));
    }
}

// ============================================================================
// Rate limiting and instant send
// ============================================================================

#[test]
fn batched_sends_respect_rate_limit() {
    let config = TransmitConfig {
        max_sends_per_second: 45,
        ..TransmitConfig::default()
    };
    let mut session = active_session(
        walking()
            .with_transmit_config(config)
            .with_peer_protocol(PeerProtocol::Batching),
        RecordingTransport::new(),
    );

    let mut sent_at = Vec::new();
    for t in (1000..=1100).step_by(5) {
        let outcome = session.run_frame(5, at(t)).unwrap();
        if outcome.reached_transport() {
            sent_at.push(t);
        } else {
            assert_eq!(outcome, TransmitOutcome::Throttled);
        }
    }
    assert_eq!(sent_at, vec![1000, 1025, 1050, 1075, 1100]);

    // throttled commands ride along with the next send
    let mut receiver = CommandReceiver::new(PeerProtocol::Batching);
    let commands = session.transport_mut().deliver_to(&mut receiver).unwrap();
    assert_eq!(commands.len(), 21);
}

#[test]
fn instant_send_bypasses_rate_limit() {
    let mut session = active_session(
        walking().with_peer_protocol(PeerProtocol::Batching),
        RecordingTransport::new(),
    );

    assert!(session.run_frame(FRAME_MS, at(1000)).unwrap().reached_transport());
    assert_eq!(
        session.run_frame(FRAME_MS, at(1016)).unwrap(),
        TransmitOutcome::Throttled
    );

    session.key_down(Action::Attack, key(1), at(1020)).unwrap();
    let outcome = session.run_frame(FRAME_MS, at(1032)).unwrap();
    assert!(matches!(outcome, TransmitOutcome::Sent { commands: 3, .. }));

    // the request is consumed
    assert_eq!(
        session.run_frame(FRAME_MS, at(1048)).unwrap(),
        TransmitOutcome::Throttled
    );
}

#[test]
fn instant_send_can_be_disabled() {
    let config = TransmitConfig {
        instant_send: false,
        ..TransmitConfig::default()
    };
    let mut session = active_session(
        walking()
            .with_transmit_config(config)
            .with_peer_protocol(PeerProtocol::Batching),
        RecordingTransport::new(),
    );
    session.run_frame(FRAME_MS, at(1000)).unwrap();
    session.key_down(Action::Attack, key(1), at(1010)).unwrap();
    assert_eq!(
        session.run_frame(FRAME_MS, at(1016)).unwrap(),
        TransmitOutcome::Throttled
    );
}

// ============================================================================
// Batch overflow
// ============================================================================

fn queue_commands(session: &mut cmd_uplink::UplinkSession<RecordingTransport>, count: u64) {
    for i in 1..=count {
        let now = at(1000 + i);
        session.update(1, now);
        session.finalize_command(now);
    }
}

#[test]
fn thirty_two_pending_commands_overflow_the_batch() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = active_session(
        walking()
            .with_peer_protocol(PeerProtocol::Batching)
            .with_violation_observer(observer.clone()),
        RecordingTransport::new(),
    );
    assert!(session.run_frame(FRAME_MS, at(1000)).unwrap().reached_transport());

    queue_commands(&mut session, 32);
    let outcome = session.transmit(at(2000)).unwrap();
    assert!(matches!(outcome, TransmitOutcome::Overflow { .. }));
    assert!(session.transport().last_frame().unwrap().is_empty());

    assert_violation!(observer, ViolationKind::Encoding);
    let violations = observer.violations_of_kind(ViolationKind::Encoding);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, ViolationSeverity::Error);

    // the oversized slot is repeated once more, then it falls out of the window
    assert!(matches!(
        session.run_frame(FRAME_MS, at(2100)).unwrap(),
        TransmitOutcome::Overflow { .. }
    ));
    assert!(matches!(
        session.run_frame(FRAME_MS, at(2200)).unwrap(),
        TransmitOutcome::Sent { commands: 2, .. }
    ));
}

#[test]
fn backlog_longer_than_history_is_never_sent_blank() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = active_session(
        walking()
            .with_peer_protocol(PeerProtocol::Batching)
            .with_history_capacity(8)
            .with_violation_observer(observer.clone()),
        RecordingTransport::new(),
    );
    assert!(session.run_frame(FRAME_MS, at(1000)).unwrap().reached_transport());

    // throttled long enough for the ring to wrap under the pending commands
    queue_commands(&mut session, 20);
    let outcome = session.transmit(at(2000)).unwrap();
    assert!(matches!(outcome, TransmitOutcome::Overflow { .. }));
    assert_violation!(observer, ViolationKind::Encoding);

    for i in 1..=3 {
        session.run_frame(FRAME_MS, at(2000 + i * 100)).unwrap();
    }
    let mut receiver = CommandReceiver::new(PeerProtocol::Batching);
    let commands = session.transport_mut().deliver_to(&mut receiver).unwrap();
    assert!(!commands.is_empty());
    assert!(commands.iter().all(|c| c.msec != 0));
}

#[test]
fn thirty_one_pending_commands_fit() {
    let mut session = active_session(
        walking().with_peer_protocol(PeerProtocol::Batching),
        RecordingTransport::new(),
    );
    session.run_frame(FRAME_MS, at(1000)).unwrap();

    queue_commands(&mut session, 31);
    let outcome = session.transmit(at(2000)).unwrap();
    // 31 new commands plus the one repeated from the previous send
    assert!(matches!(outcome, TransmitOutcome::Sent { commands: 32, .. }));
}

// ============================================================================
// Pointer input
// ============================================================================

#[test]
fn pointer_turns_the_view_only_with_game_focus() {
    let mut session = active_session(walking(), RecordingTransport::new());

    session.set_focus(InputFocus::Console);
    session.pointer_motion(50, 0);
    session.update(FRAME_MS, at(1000));
    assert_eq!(session.assembler().view_angles()[1], 0.0);

    session.set_focus(InputFocus::Game);
    session.pointer_motion(50, 0);
    session.update(FRAME_MS, at(1016));
    assert!(session.assembler().view_angles()[1] < 0.0);
}

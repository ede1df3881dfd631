//! Connection lifecycle: keepalives, pausing, fatal conditions and link statistics.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use std::sync::Arc;

use crate::common::{active_session, at, every_frame, FRAME_MS};
use cmd_uplink::telemetry::{CollectingObserver, ViolationKind, ViolationSeverity};
use cmd_uplink::{
    Action, CommandNumber, ConnectionState, KeyEvent, RecordingTransport, Sequence,
    SessionBuilder, SourceId, TransmitOutcome, UplinkError,
};

#[test]
fn nothing_goes_out_while_disconnected_or_connecting() {
    let mut session = SessionBuilder::new()
        .start_session(RecordingTransport::new())
        .unwrap();
    assert_eq!(session.run_frame(FRAME_MS, at(5000)).unwrap(), TransmitOutcome::Idle);

    session.connect();
    assert_eq!(session.run_frame(FRAME_MS, at(9000)).unwrap(), TransmitOutcome::Idle);
    assert!(session.transport().frames().is_empty());
}

#[test]
fn connected_sends_keepalives_after_a_quiet_second() {
    let mut session = SessionBuilder::new()
        .start_session(RecordingTransport::new())
        .unwrap();
    session.connect();
    session.set_connection_state(ConnectionState::Connected);

    assert_eq!(session.transmit(at(1000)).unwrap(), TransmitOutcome::Idle);
    assert_eq!(
        session.transmit(at(1001)).unwrap(),
        TransmitOutcome::KeepAlive {
            sequence: Sequence::ZERO
        }
    );
    assert_eq!(session.transmit(at(1500)).unwrap(), TransmitOutcome::Idle);
    assert!(matches!(
        session.transmit(at(2002)).unwrap(),
        TransmitOutcome::KeepAlive { .. }
    ));
    assert!(session.transport().frames().iter().all(|f| f.is_empty()));
    // no commands are generated before the session goes active
    assert_eq!(session.history().latest(), CommandNumber::ZERO);
}

#[test]
fn pending_reliable_data_goes_out_immediately() {
    let mut session = SessionBuilder::new()
        .start_session(RecordingTransport::new())
        .unwrap();
    session.connect();
    session.set_connection_state(ConnectionState::Connected);
    session.transport_mut().set_pending_reliable(true);

    assert!(matches!(
        session.transmit(at(10)).unwrap(),
        TransmitOutcome::KeepAlive { .. }
    ));
}

#[test]
fn paused_session_only_keeps_alive() {
    let mut session = active_session(
        SessionBuilder::new().with_transmit_config(every_frame(1)),
        RecordingTransport::new(),
    );
    session.run_frame(FRAME_MS, at(1000)).unwrap();
    let latest = session.history().latest();

    session.set_paused(true);
    session
        .key_down(Action::Forward, KeyEvent::new(SourceId::new(1)), at(1010))
        .unwrap();
    assert_eq!(session.run_frame(FRAME_MS, at(1016)).unwrap(), TransmitOutcome::Idle);
    assert_eq!(session.history().latest(), latest);
    assert!(matches!(
        session.run_frame(FRAME_MS, at(2500)).unwrap(),
        TransmitOutcome::KeepAlive { .. }
    ));

    session.set_paused(false);
    assert!(matches!(
        session.run_frame(FRAME_MS, at(2516)).unwrap(),
        TransmitOutcome::Sent { .. }
    ));
}

#[test]
fn reliable_overflow_tears_the_connection_down() {
    let observer = Arc::new(CollectingObserver::new());
    let mut session = active_session(
        SessionBuilder::new().with_violation_observer(observer.clone()),
        RecordingTransport::new(),
    );
    session.run_frame(FRAME_MS, at(1000)).unwrap();
    session.transport_mut().set_reliable_overflowed(true);

    let err = session.run_frame(FRAME_MS, at(1100)).unwrap_err();
    assert_eq!(err, UplinkError::ReliableOverflow);
    assert!(err.is_fatal());
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(session.transport().reliable_clears(), 1);

    let critical: Vec<_> = observer
        .violations_of_kind(ViolationKind::Transmission)
        .into_iter()
        .filter(|v| v.severity == ViolationSeverity::Critical)
        .collect();
    assert_eq!(critical.len(), 1);

    // reconnecting starts a fresh stream
    session.connect();
    session.set_connection_state(ConnectionState::Active);
    let outcome = session.run_frame(FRAME_MS, at(2000)).unwrap();
    assert_eq!(outcome.sequence(), Some(Sequence::ZERO));
}

#[test]
fn acknowledgments_drive_ping_and_loss() {
    let mut session = active_session(
        SessionBuilder::new().with_transmit_config(every_frame(1)),
        RecordingTransport::new(),
    );
    for i in 0..4u64 {
        session.run_frame(FRAME_MS, at(1000 + i * 20)).unwrap();
    }

    // sends 0 and 2 arrive; 1 is lost, 3 is still in flight
    assert!(session.on_acknowledge(Sequence::new(0), at(1050)));
    assert!(session.on_acknowledge(Sequence::new(2), at(1100)));

    let stats = session.stats(at(1120));
    assert_eq!(stats.sends_in_window, 4);
    assert_eq!(stats.acks_in_window, 2);
    assert_eq!(stats.last_ping_ms, Some(60));
    assert_eq!(stats.avg_ping_ms, Some(55));
    assert_eq!(stats.oldest_unacked_ms, Some(100));
    assert_eq!(stats.loss_ratio, 0.5);
    assert_eq!(stats.outgoing_sequence, Sequence::new(4));
    assert_eq!(stats.latest_command, CommandNumber::new(4));
}

#[test]
fn acknowledging_an_overwritten_send_is_ignored() {
    let mut session = active_session(
        SessionBuilder::new()
            .with_transmit_config(every_frame(0))
            .with_history_capacity(8),
        RecordingTransport::new(),
    );
    for i in 0..10u64 {
        session.run_frame(FRAME_MS, at(1000 + i * 20)).unwrap();
    }
    // slot of send 1 now holds send 9
    assert!(!session.on_acknowledge(Sequence::new(1), at(1300)));
    assert!(session.on_acknowledge(Sequence::new(9), at(1300)));
}

#[test]
fn demo_playback_suppresses_generation_and_sending() {
    let mut session = active_session(SessionBuilder::new(), RecordingTransport::new());
    session.set_demo_playback(true);
    session
        .key_down(Action::Attack, KeyEvent::new(SourceId::new(1)), at(990))
        .unwrap();
    assert!(!session.transmitter().send_now_requested());
    assert_eq!(session.run_frame(FRAME_MS, at(1000)).unwrap(), TransmitOutcome::Idle);
    assert!(session.transport().frames().is_empty());

    session.set_demo_playback(false);
    assert!(session.run_frame(FRAME_MS, at(1016)).unwrap().reached_transport());
}

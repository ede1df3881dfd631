//! Integration tests for configuration structs.
//!
//! These tests verify that:
//! 1. All config structs have consistent APIs (Default, Copy, Clone, serde)
//! 2. Sessions work correctly with default and preset configs
//! 3. Invalid configs are rejected when the session starts
//! 4. Runtime config changes apply from the next tick

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

use common::{active_session, at, FRAME_MS};
use cmd_uplink::{
    AnalogConfig, MoveConfig, PeerProtocol, PointerConfig, RecordingTransport, SessionBuilder,
    TransmitConfig, TransmitOutcome, UplinkError,
};
use web_time::Duration;

// ============================================================================
// TransmitConfig Tests
// ============================================================================

#[test]
fn test_transmit_config_default() {
    let config = TransmitConfig::default();

    assert!(!config.no_delta);
    assert_eq!(config.max_sends_per_second, 30);
    assert_eq!(config.redundancy_window, 1);
    assert!(config.batching_enabled);
    assert!(!config.packet_drop_simulation);
    assert!(config.instant_send);
    assert_eq!(config.keepalive_interval, Duration::from_millis(1000));
    assert_eq!(TransmitConfig::new(), config);
}

#[test]
fn test_transmit_presets_start_sessions() {
    for config in [
        TransmitConfig::lan(),
        TransmitConfig::lossy(),
        TransmitConfig::low_bandwidth(),
        TransmitConfig::unthrottled(),
    ] {
        let session = SessionBuilder::new()
            .with_transmit_config(config)
            .start_session(RecordingTransport::new())
            .unwrap();
        assert_eq!(*session.transmit_config(), config);
    }
}

#[test]
fn test_transmit_config_is_copy() {
    let a = TransmitConfig::lossy();
    let b = a;
    assert_eq!(a, b);
}

#[test]
fn test_transmit_config_json_round_trip() {
    let config = TransmitConfig {
        no_delta: true,
        redundancy_window: 3,
        ..TransmitConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: TransmitConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_invalid_transmit_configs_rejected() {
    let too_wide = TransmitConfig {
        redundancy_window: 4,
        ..TransmitConfig::default()
    };
    let no_keepalive = TransmitConfig {
        keepalive_interval: Duration::ZERO,
        ..TransmitConfig::default()
    };
    for config in [too_wide, no_keepalive] {
        let result = SessionBuilder::new()
            .with_transmit_config(config)
            .start_session(RecordingTransport::new());
        assert!(matches!(result, Err(UplinkError::InvalidRequest { .. })));
    }
}

#[test]
fn test_runtime_rate_change_applies_next_tick() {
    let mut session = active_session(
        SessionBuilder::new().with_peer_protocol(PeerProtocol::Batching),
        RecordingTransport::new(),
    );
    assert!(session.run_frame(FRAME_MS, at(1000)).unwrap().reached_transport());
    assert_eq!(
        session.run_frame(FRAME_MS, at(1016)).unwrap(),
        TransmitOutcome::Throttled
    );

    session.transmit_config_mut().max_sends_per_second = 0;
    assert!(session.run_frame(FRAME_MS, at(1020)).unwrap().reached_transport());
}

#[test]
fn test_runtime_batching_toggle_falls_back_to_single() {
    let mut session = active_session(
        SessionBuilder::new().with_peer_protocol(PeerProtocol::Batching),
        RecordingTransport::new(),
    );
    session.transmit_config_mut().batching_enabled = false;
    let outcome = session.run_frame(FRAME_MS, at(1000)).unwrap();
    assert!(matches!(outcome, TransmitOutcome::Sent { commands: 3, .. }));
}

// ============================================================================
// Input Config Tests
// ============================================================================

#[test]
fn test_move_config_presets() {
    assert!(MoveConfig::default().run_by_default);
    assert!(!MoveConfig::walk_by_default().run_by_default);
    assert!(MoveConfig::walk_by_default().validate().is_ok());
}

#[test]
fn test_invalid_input_configs_rejected() {
    let move_config = MoveConfig {
        forward_speed: f32::NAN,
        ..MoveConfig::default()
    };
    let pointer_config = PointerConfig {
        sensitivity: -1.0,
        ..PointerConfig::default()
    };
    let analog_config = AnalogConfig {
        look_scale: f32::INFINITY,
        ..AnalogConfig::default()
    };

    assert!(SessionBuilder::new()
        .with_move_config(move_config)
        .start_session(RecordingTransport::new())
        .is_err());
    assert!(SessionBuilder::new()
        .with_pointer_config(pointer_config)
        .start_session(RecordingTransport::new())
        .is_err());
    assert!(SessionBuilder::new()
        .with_analog_config(analog_config)
        .start_session(RecordingTransport::new())
        .is_err());
}

#[test]
fn test_pointer_scale_applies_to_session() {
    let inverted = PointerConfig {
        yaw_scale: -0.022,
        ..PointerConfig::default()
    };
    let mut session = active_session(
        SessionBuilder::new().with_pointer_config(inverted),
        RecordingTransport::new(),
    );
    session.pointer_motion(10, 0);
    session.update(FRAME_MS, at(1000));
    assert!(session.assembler().view_angles()[1] > 0.0);
}

#[test]
fn test_input_configs_json_round_trip() {
    let pointer = PointerConfig {
        autosens_fov: Some(110.0),
        ..PointerConfig::default()
    };
    let json = serde_json::to_string(&pointer).unwrap();
    assert_eq!(serde_json::from_str::<PointerConfig>(&json).unwrap(), pointer);

    let analog = AnalogConfig {
        invert_y: true,
        ..AnalogConfig::default()
    };
    let json = serde_json::to_string(&analog).unwrap();
    assert_eq!(serde_json::from_str::<AnalogConfig>(&json).unwrap(), analog);
}

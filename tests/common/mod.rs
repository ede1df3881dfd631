//! Common test infrastructure shared across integration tests.
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{active_session, at};
//! ```

// Each integration crate only uses a subset of these helpers.
#![allow(dead_code)]

use cmd_uplink::{
    ConnectionState, SessionBuilder, Timestamp, TransmitConfig, Transport, UplinkSession,
};

/// Frame length used by most tests, in milliseconds.
pub const FRAME_MS: u32 = 16;

/// Shorthand for a timestamp.
pub fn at(ms: u64) -> Timestamp {
    Timestamp::from_millis(ms)
}

/// Starts a session on `transport` and moves it straight to `Active`.
pub fn active_session<T: Transport>(
    builder: SessionBuilder,
    transport: T,
) -> UplinkSession<T> {
    let mut session = builder.start_session(transport).unwrap();
    session.connect();
    session.set_connection_state(ConnectionState::Active);
    session
}

/// A transmit config that sends every frame, with the given redundancy window.
pub fn every_frame(window: u8) -> TransmitConfig {
    TransmitConfig {
        max_sends_per_second: 0,
        redundancy_window: window,
        ..TransmitConfig::default()
    }
}

/// Runs `frames` frames of `FRAME_MS`, tagging frame `i` (1-based) with impulse `i`.
///
/// Returns the impulses in generation order.
pub fn run_tagged_frames<T: Transport>(
    session: &mut UplinkSession<T>,
    start_ms: u64,
    frames: u8,
) -> Vec<u8> {
    let mut tags = Vec::with_capacity(frames as usize);
    for i in 1..=frames {
        let now = at(start_ms + u64::from(i) * u64::from(FRAME_MS));
        session.impulse(i);
        session.run_frame(FRAME_MS, now).unwrap();
        tags.push(i);
    }
    tags
}

//! Fuzz target for session input handling.
//!
//! Feeds arbitrary sequences of input, lifecycle and tick events to an `UplinkSession`.
//!
//! # Safety Properties Tested
//! - No panics on any event order
//! - Every frame the session emits decodes cleanly

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use cmd_uplink::{
    Action, CommandReceiver, ConnectionState, InputFocus, KeyEvent, PeerProtocol,
    RecordingTransport, Release, SessionBuilder, SourceId, Timestamp, TransmitConfig,
};

#[derive(Debug, Arbitrary)]
enum Event {
    KeyDown { action: u8, source: u8 },
    KeyUp { action: u8, source: u8 },
    ForceRelease { action: u8 },
    Pointer { dx: i16, dy: i16 },
    Impulse(u8),
    Focus(u8),
    Paused(bool),
    Connection(u8),
    Frame { msec: u16 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    rate: u16,
    window: u8,
    batching: bool,
    events: Vec<Event>,
}

fuzz_target!(|input: Input| {
    let config = TransmitConfig {
        max_sends_per_second: u32::from(input.rate % 1001),
        redundancy_window: input.window % 4,
        ..TransmitConfig::default()
    };
    let protocol = if input.batching {
        PeerProtocol::Batching
    } else {
        PeerProtocol::Legacy
    };
    let Ok(mut session) = SessionBuilder::new()
        .with_transmit_config(config)
        .with_peer_protocol(protocol)
        .start_session(RecordingTransport::new())
    else {
        return;
    };
    session.connect();
    let mut receiver = CommandReceiver::new(protocol);

    let action = |index: u8| Action::ALL[usize::from(index) % Action::COUNT];
    let mut now = 0u64;
    for event in input.events.iter().take(512) {
        let ts = Timestamp::from_millis(now);
        match *event {
            Event::KeyDown { action: a, source } => {
                let _ = session.key_down(action(a), KeyEvent::new(SourceId::new(source.into())), ts);
            },
            Event::KeyUp { action: a, source } => {
                let release = Release::Source(KeyEvent::new(SourceId::new(source.into())));
                let _ = session.key_up(action(a), release, ts);
            },
            Event::ForceRelease { action: a } => {
                let _ = session.key_up(action(a), Release::Forced, ts);
            },
            Event::Pointer { dx, dy } => session.pointer_motion(dx.into(), dy.into()),
            Event::Impulse(impulse) => session.impulse(impulse),
            Event::Focus(f) => session.set_focus(match f % 3 {
                0 => InputFocus::Game,
                1 => InputFocus::Menu,
                _ => InputFocus::Console,
            }),
            Event::Paused(paused) => session.set_paused(paused),
            Event::Connection(c) => {
                let state = match c % 4 {
                    0 => ConnectionState::Disconnected,
                    1 => ConnectionState::Connecting,
                    2 => ConnectionState::Connected,
                    _ => ConnectionState::Active,
                };
                if state == ConnectionState::Connecting {
                    session.connect();
                    receiver.reset();
                } else {
                    session.set_connection_state(state);
                }
            },
            Event::Frame { msec } => {
                now += u64::from(msec);
                let _ = session.run_frame(u32::from(msec), Timestamp::from_millis(now));
                assert!(session.transport_mut().deliver_to(&mut receiver).is_ok());
            },
        }
    }
});

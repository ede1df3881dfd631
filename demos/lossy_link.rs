//! # Lossy Link Walkthrough
//!
//! Drives an [`UplinkSession`] through a few seconds of play over a link that drops a
//! fifth of all frames, then decodes everything that arrived and compares it against
//! the command history.
//!
//! ## What to look for
//!
//! 1. With a redundancy window of 2, isolated losses cost nothing
//! 2. Instant-send actions (attack) leave immediately, ignoring the send rate
//! 3. The link statistics fed by acknowledgments
//!
//! Run with: `cargo run --example lossy_link`

// Allow example-specific patterns
#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use cmd_uplink::prelude::*;
use cmd_uplink::CommandReceiver;

const FRAME_MS: u32 = 16;
const FRAMES: u64 = 240;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // configure logging: output uplink logs to standard out
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .finish(),
    )?;

    let chaos = ChaosConfig::builder()
        .packet_loss_rate(0.2)
        .seed(42)
        .build();
    let mut session = SessionBuilder::new()
        .with_transmit_config(TransmitConfig {
            redundancy_window: 2,
            ..TransmitConfig::default()
        })
        .with_peer_protocol(PeerProtocol::Batching)
        .start_session(ChaosTransport::new(RecordingTransport::new(), chaos))?;

    session.connect();
    session.set_connection_state(ConnectionState::Active);

    let keyboard = SourceId::new(17);
    let mouse = SourceId::new(200);
    let mut start = 1000;
    let mut sent = 0u32;
    for frame in 0..FRAMES {
        let now = Timestamp::from_millis(start);

        // walk forward for the first second, strafe for the next, fire every half second
        match frame {
            0 => {
                session.key_down(Action::Forward, KeyEvent::new(keyboard).at(now), now)?;
            },
            60 => {
                session.key_up(Action::Forward, Release::Source(KeyEvent::new(keyboard).at(now)), now)?;
                session.key_down(Action::MoveRight, KeyEvent::new(keyboard).at(now), now)?;
            },
            120 => {
                session.key_up(Action::MoveRight, Release::Source(KeyEvent::new(keyboard)), now)?;
            },
            _ => {},
        }
        if frame % 30 == 0 {
            session.key_down(Action::Attack, KeyEvent::new(mouse).at(now), now)?;
        } else if frame % 30 == 2 {
            session.key_up(Action::Attack, Release::Source(KeyEvent::new(mouse)), now)?;
        }
        session.pointer_motion(3, 0);

        let outcome = session.run_frame(FRAME_MS, now)?;
        if let Some(sequence) = outcome.sequence() {
            sent += 1;
            // the server acknowledges each send 50ms later; close enough for a demo
            session.on_acknowledge(sequence, Timestamp::from_millis(start + 50));
        }
        start += u64::from(FRAME_MS);
    }

    let end = Timestamp::from_millis(start);
    let stats = session.stats(end);
    let chaos_stats = *session.transport().stats();

    let mut receiver = CommandReceiver::new(PeerProtocol::Batching);
    let delivered = session
        .transport_mut()
        .inner_mut()
        .deliver_to(&mut receiver)?;

    let latest = session.history().latest();
    let newest_intact = delivered.last() == Some(&session.history().command(latest));

    println!("frames sent:        {}", sent);
    println!("frames dropped:     {}", chaos_stats.frames_dropped_random);
    println!("commands generated: {}", latest.as_u32());
    println!("commands delivered: {}", delivered.len());
    println!("newest intact:      {}", newest_intact);
    println!("gaps at receiver:   {}", receiver.total_dropped());
    println!("link: {}", stats);

    Ok(())
}

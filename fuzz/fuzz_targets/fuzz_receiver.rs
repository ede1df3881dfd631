//! Fuzz target for frame decoding.
//!
//! This target tests that arbitrary bytes cannot crash the command receiver.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - A rejected frame leaves the receiver's expected sequence unchanged
//! - Never more commands out than a frame can carry

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use cmd_uplink::__internal::{MAX_PACKET_FRAMES, MAX_PACKET_USERCMDS};
use cmd_uplink::{CommandReceiver, PeerProtocol, Sequence};

#[derive(Debug, Arbitrary)]
struct Frame {
    sequence: u16,
    payload: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
struct Input {
    protocol: u8,
    frames: Vec<Frame>,
}

fuzz_target!(|input: Input| {
    let protocol = match input.protocol % 3 {
        0 => PeerProtocol::Legacy,
        1 => PeerProtocol::Compact,
        _ => PeerProtocol::Batching,
    };
    let mut receiver = CommandReceiver::new(protocol);

    for frame in input.frames.iter().take(64) {
        let before = receiver.expected_sequence();
        match receiver.receive(Sequence::new(u32::from(frame.sequence)), &frame.payload) {
            Ok(Some(batch)) => {
                assert!(batch.commands.len() <= MAX_PACKET_FRAMES * MAX_PACKET_USERCMDS as usize);
            },
            Ok(None) => {},
            Err(_) => assert_eq!(receiver.expected_sequence(), before),
        }
    }
});

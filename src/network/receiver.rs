//! Reference decoder for the remote end of the uplink.
//!
//! [`CommandReceiver`] models what a server does with incoming frames: it tracks the
//! sequence, works out how many sends were lost, and recovers as many of the lost
//! commands as the frame carries. Tests, benches and the fuzz target use it to check
//! what the transmitter wrote.

use smallvec::SmallVec;
use tracing::trace;

use crate::checksum::sequence_checksum;
use crate::command::Command;
use crate::network::bits::BitReader;
use crate::network::codec::{
    read_batched_delta, read_classic_delta, ByteReader, CodecError, CLC_MOVE, CLC_MOVE_BATCHED,
    CLC_MOVE_NODELTA, COUNT_BITS, MAX_PACKET_FRAMES, SVCMD_BITS, SVCMD_MASK,
};
use crate::{PeerProtocol, Sequence, ServerFrame};

/// Commands recovered from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedBatch {
    /// Sequence of the frame.
    pub sequence: Sequence,
    /// Sends lost between the previous frame and this one.
    pub dropped: u32,
    /// Server frame the client acknowledged.
    pub server_frame: ServerFrame,
    /// Light level byte of the newest command.
    pub light_level: u8,
    /// Commands not seen before, oldest first.
    pub commands: Vec<Command>,
}

/// Decodes incoming frames for one connection.
#[derive(Debug, Clone)]
pub struct CommandReceiver {
    protocol: PeerProtocol,
    expected: Sequence,
    frames: u64,
    dropped: u64,
    commands: u64,
}

impl CommandReceiver {
    /// Creates a receiver expecting sequence 0 next.
    #[must_use]
    pub fn new(protocol: PeerProtocol) -> Self {
        Self {
            protocol,
            expected: Sequence::ZERO,
            frames: 0,
            dropped: 0,
            commands: 0,
        }
    }

    /// Wire capability the receiver was created for.
    #[must_use]
    pub const fn protocol(&self) -> PeerProtocol {
        self.protocol
    }

    /// Sequence the receiver expects next.
    #[must_use]
    pub const fn expected_sequence(&self) -> Sequence {
        self.expected
    }

    /// Frames accepted so far, keepalives included.
    #[must_use]
    pub const fn frames_received(&self) -> u64 {
        self.frames
    }

    /// Sends detected as lost so far.
    #[must_use]
    pub const fn total_dropped(&self) -> u64 {
        self.dropped
    }

    /// Commands recovered so far.
    #[must_use]
    pub const fn commands_recovered(&self) -> u64 {
        self.commands
    }

    /// Forgets the connection.
    pub fn reset(&mut self) {
        *self = Self::new(self.protocol);
    }

    /// Decodes one frame.
    ///
    /// Returns `Ok(None)` for keepalives and for frames older than the newest one seen.
    /// A frame that fails to decode leaves the receiver untouched.
    pub fn receive(
        &mut self,
        sequence: Sequence,
        payload: &[u8],
    ) -> Result<Option<ReceivedBatch>, CodecError> {
        if sequence < self.expected {
            trace!("Ignoring stale frame {} (expected {})", sequence, self.expected);
            return Ok(None);
        }
        let dropped = sequence - self.expected;

        let batch = match payload.first() {
            None => None,
            Some(&header) => {
                let opcode = header & SVCMD_MASK;
                let window = u32::from(header >> SVCMD_BITS);
                match opcode {
                    CLC_MOVE if window == 0 => Some(self.decode_single(sequence, dropped, payload)?),
                    CLC_MOVE_NODELTA | CLC_MOVE_BATCHED => {
                        Some(Self::decode_batched(sequence, dropped, opcode, window, payload)?)
                    },
                    _ => return Err(CodecError::UnknownOpcode { opcode: header }),
                }
            },
        };

        self.expected = sequence.next();
        self.frames += 1;
        self.dropped += u64::from(dropped);
        if let Some(batch) = &batch {
            self.commands += batch.commands.len() as u64;
        }
        Ok(batch)
    }

    fn decode_single(
        &self,
        sequence: Sequence,
        dropped: u32,
        payload: &[u8],
    ) -> Result<ReceivedBatch, CodecError> {
        let mut reader = ByteReader::new(payload);
        reader.read_u8()?;

        if self.protocol.uses_checksum() {
            let actual = reader.read_u8()?;
            let expected = sequence_checksum(reader.rest(), sequence);
            if actual != expected {
                return Err(CodecError::ChecksumMismatch { expected, actual });
            }
        }

        let server_frame = ServerFrame::new(reader.read_i32()?);
        let mut triple = [Command::BLANK; 3];
        let mut from = Command::BLANK;
        let mut light_level = 0;
        for slot in &mut triple {
            *slot = read_classic_delta(&mut reader, &from)?;
            light_level = reader.read_u8()?;
            from = *slot;
        }
        reader.finish()?;

        let recovered = dropped.min(2) as usize + 1;
        let commands = triple.iter().skip(3 - recovered).copied().collect();
        Ok(ReceivedBatch {
            sequence,
            dropped,
            server_frame,
            light_level,
            commands,
        })
    }

    fn decode_batched(
        sequence: Sequence,
        dropped: u32,
        opcode: u8,
        window: u32,
        payload: &[u8],
    ) -> Result<ReceivedBatch, CodecError> {
        if window as usize >= MAX_PACKET_FRAMES {
            return Err(CodecError::UnknownOpcode {
                opcode: payload.first().copied().unwrap_or(opcode),
            });
        }

        let mut reader = ByteReader::new(payload);
        reader.read_u8()?;
        let server_frame = if opcode == CLC_MOVE_BATCHED {
            ServerFrame::new(reader.read_i32()?)
        } else {
            ServerFrame::NULL
        };
        let light_level = reader.read_u8()?;

        let body = reader.rest();
        let mut bits = BitReader::new(body);
        let mut groups: SmallVec<[Vec<Command>; MAX_PACKET_FRAMES]> = SmallVec::new();
        let mut from = Command::BLANK;
        for _ in 0..=window {
            let count = bits.read_bits(COUNT_BITS)?;
            let mut group = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let cmd = read_batched_delta(&mut bits, &from)?;
                group.push(cmd);
                from = cmd;
            }
            groups.push(group);
        }
        let consumed = bits.bytes_consumed();
        if consumed != body.len() {
            return Err(CodecError::TrailingBytes {
                count: body.len() - consumed,
            });
        }

        // Every group has to be decoded since deltas chain across them, but only the
        // groups covering lost sends plus the newest one are new to us.
        let keep = dropped.min(window) as usize + 1;
        let commands = groups
            .iter()
            .skip(groups.len() - keep)
            .flatten()
            .copied()
            .collect();
        Ok(ReceivedBatch {
            sequence,
            dropped,
            server_frame,
            light_level,
            commands,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::history::CommandHistory;
    use crate::network::loopback::RecordingTransport;
    use crate::network::transmitter::{TransmitContext, Transmitter};
    use crate::sessions::config::TransmitConfig;
    use crate::{ConnectionState, Timestamp};

    fn numbered(n: u8) -> Command {
        Command {
            msec: n,
            angles: [i16::from(n), 0, -i16::from(n)],
            forward: f32::from(n),
            ..Command::BLANK
        }
    }

    struct Rig {
        tx: Transmitter,
        history: CommandHistory,
        transport: RecordingTransport,
        ctx: TransmitContext,
        now: u64,
    }

    impl Rig {
        fn new(protocol: PeerProtocol, window: u8) -> Self {
            let config = TransmitConfig {
                redundancy_window: window,
                ..TransmitConfig::unthrottled()
            };
            Self {
                tx: Transmitter::new(config, None),
                history: CommandHistory::new(),
                transport: RecordingTransport::new(),
                ctx: TransmitContext {
                    connection: ConnectionState::Active,
                    protocol,
                    ..TransmitContext::default()
                },
                now: 1000,
            }
        }

        fn push_and_send(&mut self, cmd: Command) {
            self.history.push(cmd);
            self.now += 16;
            self.tx
                .transmit(
                    &self.ctx,
                    &mut self.history,
                    &mut self.transport,
                    Timestamp::from_millis(self.now),
                )
                .unwrap();
        }
    }

    #[test]
    fn single_mode_recovers_up_to_two_lost() {
        let mut rig = Rig::new(PeerProtocol::Legacy, 0);
        for n in 1..=4 {
            rig.push_and_send(numbered(n));
        }
        let frames = rig.transport.take_frames();
        let mut rx = CommandReceiver::new(PeerProtocol::Legacy);

        let first = rx
            .receive(frames[0].sequence, &frames[0].payload)
            .unwrap()
            .unwrap();
        assert_eq!(first.commands, vec![numbered(1)]);

        // frames 1 and 2 lost
        let last = rx
            .receive(frames[3].sequence, &frames[3].payload)
            .unwrap()
            .unwrap();
        assert_eq!(last.dropped, 2);
        assert_eq!(last.commands, vec![numbered(2), numbered(3), numbered(4)]);
        assert_eq!(rx.total_dropped(), 2);
        assert_eq!(rx.commands_recovered(), 4);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut rig = Rig::new(PeerProtocol::Legacy, 0);
        rig.push_and_send(numbered(1));
        let mut frame = rig.transport.take_frames().remove(0);
        let last = frame.payload.len() - 1;
        frame.payload[last] ^= 0x55;

        let mut rx = CommandReceiver::new(PeerProtocol::Legacy);
        let result = rx.receive(frame.sequence, &frame.payload);
        assert!(matches!(result, Err(CodecError::ChecksumMismatch { .. })));
        assert_eq!(rx.expected_sequence(), Sequence::ZERO);
    }

    #[test]
    fn checksum_is_keyed_by_sequence() {
        let mut rig = Rig::new(PeerProtocol::Legacy, 0);
        rig.push_and_send(numbered(1));
        let frame = rig.transport.take_frames().remove(0);

        let mut rx = CommandReceiver::new(PeerProtocol::Legacy);
        let result = rx.receive(Sequence::new(5), &frame.payload);
        assert!(matches!(result, Err(CodecError::ChecksumMismatch { .. })));
    }

    #[test]
    fn batched_window_fills_gap() {
        let mut rig = Rig::new(PeerProtocol::Batching, 2);
        for n in 1..=5 {
            rig.push_and_send(numbered(n));
        }
        let frames = rig.transport.take_frames();
        let mut rx = CommandReceiver::new(PeerProtocol::Batching);

        let mut got = Vec::new();
        for index in [0, 1, 4] {
            let batch = rx
                .receive(frames[index].sequence, &frames[index].payload)
                .unwrap()
                .unwrap();
            got.extend(batch.commands);
        }
        assert_eq!(got, (1..=5).map(numbered).collect::<Vec<_>>());
    }

    #[test]
    fn stale_and_duplicate_frames_ignored() {
        let mut rig = Rig::new(PeerProtocol::Batching, 1);
        rig.push_and_send(numbered(1));
        rig.push_and_send(numbered(2));
        let frames = rig.transport.take_frames();
        let mut rx = CommandReceiver::new(PeerProtocol::Batching);

        assert!(rx
            .receive(frames[1].sequence, &frames[1].payload)
            .unwrap()
            .is_some());
        assert_eq!(
            rx.receive(frames[1].sequence, &frames[1].payload).unwrap(),
            None
        );
        assert_eq!(
            rx.receive(frames[0].sequence, &frames[0].payload).unwrap(),
            None
        );
        assert_eq!(rx.frames_received(), 1);
    }

    #[test]
    fn keepalive_advances_sequence() {
        let mut rx = CommandReceiver::new(PeerProtocol::Batching);
        assert_eq!(rx.receive(Sequence::new(3), &[]).unwrap(), None);
        assert_eq!(rx.expected_sequence(), Sequence::new(4));
        assert_eq!(rx.total_dropped(), 3);
    }

    #[test]
    fn unknown_opcode_and_truncation() {
        let mut rx = CommandReceiver::new(PeerProtocol::Compact);
        assert_eq!(
            rx.receive(Sequence::ZERO, &[0x07]),
            Err(CodecError::UnknownOpcode { opcode: 0x07 })
        );
        assert!(matches!(
            rx.receive(Sequence::ZERO, &[CLC_MOVE, 0xFF]),
            Err(CodecError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            rx.receive(Sequence::ZERO, &[CLC_MOVE_NODELTA | (3 << 5), 0]),
            Err(CodecError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut rig = Rig::new(PeerProtocol::Batching, 0);
        rig.push_and_send(numbered(1));
        let mut frame = rig.transport.take_frames().remove(0);
        frame.payload.push(0);

        let mut rx = CommandReceiver::new(PeerProtocol::Batching);
        assert_eq!(
            rx.receive(frame.sequence, &frame.payload),
            Err(CodecError::TrailingBytes { count: 1 })
        );
    }
}

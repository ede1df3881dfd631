//! Wire codecs for outgoing commands.
//!
//! Two delta formats exist, one per transmit mode:
//!
//! - **classic** (single-command frames): a flags byte, then each changed field as whole
//!   bytes, then the frame time.
//! - **enhanced** (batched frames): one changed bit per field followed by the field bits,
//!   packed LSB-first with [`BitWriter`].
//!
//! Both encode a command against a reference; the first command of a frame is encoded
//! against [`Command::BLANK`].
//!
//! # Examples
//!
//! ```
//! use cmd_uplink::__internal::{read_classic_delta, write_classic_delta, ByteReader};
//! use cmd_uplink::Command;
//!
//! let cmd = Command { msec: 16, forward: 200.0, ..Command::BLANK };
//! let mut buf = Vec::new();
//! write_classic_delta(&mut buf, &Command::BLANK, &cmd);
//! // flags, forward (2 bytes), msec
//! assert_eq!(buf.len(), 4);
//!
//! let mut reader = ByteReader::new(&buf);
//! assert_eq!(read_classic_delta(&mut reader, &Command::BLANK)?, cmd);
//! # Ok::<(), cmd_uplink::__internal::CodecError>(())
//! ```

use std::fmt;

use crate::command::{ButtonBits, Command};
use crate::network::bits::{BitReader, BitWriter};

/// Opcode of a single-command frame.
pub const CLC_MOVE: u8 = 2;
/// Opcode of a batched frame without a server frame number.
pub const CLC_MOVE_NODELTA: u8 = 10;
/// Opcode of a batched frame followed by a server frame number.
pub const CLC_MOVE_BATCHED: u8 = 11;

/// Bits of the batched header byte holding the opcode; the redundancy window sits above.
pub const SVCMD_BITS: u32 = 5;
/// Mask selecting the opcode from a batched header byte.
pub const SVCMD_MASK: u8 = (1 << SVCMD_BITS) - 1;

/// Sends one batched frame can describe: the newest plus up to three redundant ones.
pub const MAX_PACKET_FRAMES: usize = 4;
/// Upper bound (exclusive) on commands per batched slot, limited by the 5-bit count.
pub const MAX_PACKET_USERCMDS: u32 = 32;
/// Width of the per-slot command count.
pub const COUNT_BITS: u32 = 5;

/// Classic delta flag: pitch changed.
pub const CM_ANGLE1: u8 = 0x01;
/// Classic delta flag: yaw changed.
pub const CM_ANGLE2: u8 = 0x02;
/// Classic delta flag: roll changed.
pub const CM_ANGLE3: u8 = 0x04;
/// Classic delta flag: forward move changed.
pub const CM_FORWARD: u8 = 0x08;
/// Classic delta flag: side move changed.
pub const CM_SIDE: u8 = 0x10;
/// Classic delta flag: up move changed.
pub const CM_UP: u8 = 0x20;
/// Classic delta flag: buttons changed.
pub const CM_BUTTONS: u8 = 0x40;
/// Classic delta flag: impulse changed.
pub const CM_IMPULSE: u8 = 0x80;

const ANGLE_FLAGS: [u8; 3] = [CM_ANGLE1, CM_ANGLE2, CM_ANGLE3];
const MOVE_FLAGS: [u8; 3] = [CM_FORWARD, CM_SIDE, CM_UP];

/// Errors raised while decoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecError {
    /// The input ended in the middle of a field.
    UnexpectedEnd {
        /// Bits the field still needed.
        needed_bits: usize,
    },
    /// The frame started with an opcode this codec does not know.
    UnknownOpcode {
        /// The opcode byte.
        opcode: u8,
    },
    /// A legacy frame's checksum byte does not match its body.
    ChecksumMismatch {
        /// Checksum computed over the body.
        expected: u8,
        /// Checksum byte found in the frame.
        actual: u8,
    },
    /// Whole bytes were left over after the last command.
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd { needed_bits } => {
                write!(f, "input ended with {} more bits expected", needed_bits)
            },
            Self::UnknownOpcode { opcode } => write!(f, "unknown opcode {}", opcode),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: computed 0x{:02x}, frame has 0x{:02x}",
                expected, actual
            ),
            Self::TrailingBytes { count } => {
                write!(f, "{} unread bytes after the last command", count)
            },
        }
    }
}

impl std::error::Error for CodecError {}

/// Little-endian byte cursor over a received frame.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Reads from the start of `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .and_then(|slice| <[u8; N]>::try_from(slice).ok())
            .ok_or(CodecError::UnexpectedEnd {
                needed_bits: (N - self.remaining().min(N)) * 8,
            })?;
        self.pos += N;
        Ok(bytes)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    /// Reads a little-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.take::<2>()?))
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take::<4>()?))
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The unread tail.
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    /// Fails if any byte is left unread.
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(CodecError::TrailingBytes { count }),
        }
    }
}

/// Appends the classic delta of `to` against `from`.
pub fn write_classic_delta(buf: &mut Vec<u8>, from: &Command, to: &Command) {
    let mut flags = 0u8;
    for (i, flag) in ANGLE_FLAGS.iter().enumerate() {
        if to.angles[i] != from.angles[i] {
            flags |= flag;
        }
    }
    let from_move = from.move_shorts();
    let to_move = to.move_shorts();
    for (i, flag) in MOVE_FLAGS.iter().enumerate() {
        if to_move[i] != from_move[i] {
            flags |= flag;
        }
    }
    if to.buttons != from.buttons {
        flags |= CM_BUTTONS;
    }
    if to.impulse != from.impulse {
        flags |= CM_IMPULSE;
    }

    buf.push(flags);
    for (i, flag) in ANGLE_FLAGS.iter().enumerate() {
        if flags & flag != 0 {
            buf.extend_from_slice(&to.angles[i].to_le_bytes());
        }
    }
    for (i, flag) in MOVE_FLAGS.iter().enumerate() {
        if flags & flag != 0 {
            buf.extend_from_slice(&to_move[i].to_le_bytes());
        }
    }
    if flags & CM_BUTTONS != 0 {
        buf.push(to.buttons.bits());
    }
    if flags & CM_IMPULSE != 0 {
        buf.push(to.impulse);
    }
    buf.push(to.msec);
}

/// Reads one classic delta against `from`.
pub fn read_classic_delta(
    reader: &mut ByteReader<'_>,
    from: &Command,
) -> Result<Command, CodecError> {
    let flags = reader.read_u8()?;
    let mut cmd = *from;

    for (i, flag) in ANGLE_FLAGS.iter().enumerate() {
        if flags & flag != 0 {
            cmd.angles[i] = reader.read_i16()?;
        }
    }
    if flags & CM_FORWARD != 0 {
        cmd.forward = f32::from(reader.read_i16()?);
    }
    if flags & CM_SIDE != 0 {
        cmd.side = f32::from(reader.read_i16()?);
    }
    if flags & CM_UP != 0 {
        cmd.up = f32::from(reader.read_i16()?);
    }
    if flags & CM_BUTTONS != 0 {
        cmd.buttons = ButtonBits::from_bits(reader.read_u8()?);
    }
    if flags & CM_IMPULSE != 0 {
        cmd.impulse = reader.read_u8()?;
    }
    cmd.msec = reader.read_u8()?;
    Ok(cmd)
}

fn write_short_field(writer: &mut BitWriter<'_>, from: i16, to: i16) {
    if from == to {
        writer.write_bool(false);
    } else {
        writer.write_bool(true);
        writer.write_bits(u32::from(to as u16), 16);
    }
}

fn write_byte_field(writer: &mut BitWriter<'_>, from: u8, to: u8) {
    if from == to {
        writer.write_bool(false);
    } else {
        writer.write_bool(true);
        writer.write_bits(u32::from(to), 8);
    }
}

fn read_short_field(reader: &mut BitReader<'_>, current: i16) -> Result<i16, CodecError> {
    if reader.read_bool()? {
        Ok(reader.read_bits(16)? as u16 as i16)
    } else {
        Ok(current)
    }
}

fn read_byte_field(reader: &mut BitReader<'_>, current: u8) -> Result<u8, CodecError> {
    if reader.read_bool()? {
        Ok(reader.read_bits(8)? as u8)
    } else {
        Ok(current)
    }
}

/// Writes the enhanced (bit-packed) delta of `to` against `from`.
///
/// Returns the number of bits written.
pub fn write_batched_delta(writer: &mut BitWriter<'_>, from: &Command, to: &Command) -> usize {
    let start = writer.bits_written();
    for i in 0..3 {
        write_short_field(writer, from.angles[i], to.angles[i]);
    }
    let from_move = from.move_shorts();
    let to_move = to.move_shorts();
    for i in 0..3 {
        write_short_field(writer, from_move[i], to_move[i]);
    }
    write_byte_field(writer, from.buttons.bits(), to.buttons.bits());
    write_byte_field(writer, from.impulse, to.impulse);
    writer.write_bits(u32::from(to.msec), 8);
    writer.bits_written() - start
}

/// Reads one enhanced delta against `from`.
pub fn read_batched_delta(reader: &mut BitReader<'_>, from: &Command) -> Result<Command, CodecError> {
    let mut cmd = *from;
    for angle in &mut cmd.angles {
        *angle = read_short_field(reader, *angle)?;
    }
    let [forward, side, up] = from.move_shorts();
    cmd.forward = f32::from(read_short_field(reader, forward)?);
    cmd.side = f32::from(read_short_field(reader, side)?);
    cmd.up = f32::from(read_short_field(reader, up)?);
    cmd.buttons = ButtonBits::from_bits(read_byte_field(reader, from.buttons.bits())?);
    cmd.impulse = read_byte_field(reader, from.impulse)?;
    cmd.msec = reader.read_bits(8)? as u8;
    Ok(cmd)
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
mod tests {
    use super::*;

    fn sample() -> Command {
        Command {
            msec: 16,
            angles: [-300, 16384, 0],
            forward: 400.0,
            side: -200.0,
            up: 0.0,
            buttons: ButtonBits::ATTACK | ButtonBits::ANY,
            impulse: 0,
        }
    }

    #[test]
    fn classic_blank_to_blank_is_flags_and_msec() {
        let mut buf = Vec::new();
        write_classic_delta(&mut buf, &Command::BLANK, &Command::BLANK);
        assert_eq!(buf, vec![0, 0]);
    }

    #[test]
    fn classic_layout() {
        let mut buf = Vec::new();
        write_classic_delta(&mut buf, &Command::BLANK, &sample());
        let flags = CM_ANGLE1 | CM_ANGLE2 | CM_FORWARD | CM_SIDE | CM_BUTTONS;
        let mut expected = vec![flags];
        expected.extend_from_slice(&(-300i16).to_le_bytes());
        expected.extend_from_slice(&16384i16.to_le_bytes());
        expected.extend_from_slice(&400i16.to_le_bytes());
        expected.extend_from_slice(&(-200i16).to_le_bytes());
        expected.push(129);
        expected.push(16);
        assert_eq!(buf, expected);
    }

    #[test]
    fn classic_delta_only_sends_changes() {
        let base = sample();
        let next = Command {
            impulse: 4,
            ..base
        };
        let mut buf = Vec::new();
        write_classic_delta(&mut buf, &base, &next);
        assert_eq!(buf, vec![CM_IMPULSE, 4, 16]);

        let mut reader = ByteReader::new(&buf);
        assert_eq!(read_classic_delta(&mut reader, &base).unwrap(), next);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn classic_truncated_input() {
        let mut buf = Vec::new();
        write_classic_delta(&mut buf, &Command::BLANK, &sample());
        buf.truncate(3);
        let mut reader = ByteReader::new(&buf);
        assert!(matches!(
            read_classic_delta(&mut reader, &Command::BLANK),
            Err(CodecError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn batched_unchanged_command_is_sixteen_bits() {
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        let bits = write_batched_delta(&mut writer, &sample(), &sample());
        // eight changed bits plus the msec byte
        assert_eq!(bits, 8 + 8);
        writer.flush();
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn batched_chain_decodes() {
        let first = sample();
        let second = Command {
            angles: [-310, 16390, 0],
            buttons: ButtonBits::NONE,
            ..first
        };

        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        write_batched_delta(&mut writer, &Command::BLANK, &first);
        write_batched_delta(&mut writer, &first, &second);
        writer.flush();

        let mut reader = BitReader::new(&buf);
        let a = read_batched_delta(&mut reader, &Command::BLANK).unwrap();
        let b = read_batched_delta(&mut reader, &a).unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
        assert!(reader.remaining_bits() < 8);
    }

    #[test]
    fn byte_reader_reports_missing_bits() {
        let data = [1u8, 2];
        let mut reader = ByteReader::new(&data);
        assert_eq!(
            reader.read_i32(),
            Err(CodecError::UnexpectedEnd { needed_bits: 16 })
        );
        assert_eq!(reader.read_i16().unwrap(), 0x0201);
        assert_eq!(reader.finish(), Ok(()));
    }

    #[test]
    fn trailing_bytes_are_reported() {
        let data = [1u8, 2, 3];
        let mut reader = ByteReader::new(&data);
        reader.read_u8().unwrap();
        assert_eq!(reader.finish(), Err(CodecError::TrailingBytes { count: 2 }));
        assert_eq!(reader.rest(), &[2, 3]);
    }

    #[test]
    fn error_display() {
        let err = CodecError::ChecksumMismatch {
            expected: 0x1f,
            actual: 0x20,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: computed 0x1f, frame has 0x20"
        );
    }
}

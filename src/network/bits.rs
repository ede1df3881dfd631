use crate::network::codec::CodecError;

/// Appends LSB-first bit fields to a byte buffer.
///
/// Bytes already in the buffer are left alone; bits start at the next byte. Call
/// [`BitWriter::flush`] to pad the last partial byte with zeros.
#[derive(Debug)]
pub struct BitWriter<'a> {
    buf: &'a mut Vec<u8>,
    acc: u64,
    pending: u32,
    written: usize,
}

impl<'a> BitWriter<'a> {
    /// Starts writing bits after the current end of `buf`.
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self {
            buf,
            acc: 0,
            pending: 0,
            written: 0,
        }
    }

    /// Writes the low `bits` bits of `value`. `bits` must be at most 32.
    pub fn write_bits(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
        self.acc |= u64::from(value & mask) << self.pending;
        self.pending += bits;
        self.written += bits as usize;
        while self.pending >= 8 {
            self.buf.push(self.acc as u8);
            self.acc >>= 8;
            self.pending -= 8;
        }
    }

    /// Writes one bit.
    pub fn write_bool(&mut self, bit: bool) {
        self.write_bits(u32::from(bit), 1);
    }

    /// Number of bits written so far.
    #[must_use]
    pub const fn bits_written(&self) -> usize {
        self.written
    }

    /// Pads to a byte boundary and returns the number of bits written.
    pub fn flush(mut self) -> usize {
        if self.pending > 0 {
            self.buf.push(self.acc as u8);
            self.acc = 0;
            self.pending = 0;
        }
        self.written
    }
}

/// Reads LSB-first bit fields written by [`BitWriter`].
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    /// Reads bits from the start of `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Reads `bits` bits (at most 32) as an unsigned value.
    pub fn read_bits(&mut self, bits: u32) -> Result<u32, CodecError> {
        debug_assert!(bits <= 32);
        if self.remaining_bits() < bits as usize {
            return Err(CodecError::UnexpectedEnd {
                needed_bits: bits as usize,
            });
        }

        let mut value = 0u32;
        let mut filled = 0u32;
        while filled < bits {
            let byte = self.data.get(self.bit_pos / 8).copied().unwrap_or(0);
            let offset = (self.bit_pos % 8) as u32;
            let take = (8 - offset).min(bits - filled);
            let chunk = (u32::from(byte) >> offset) & ((1u32 << take) - 1);
            value |= chunk << filled;
            filled += take;
            self.bit_pos += take as usize;
        }
        Ok(value)
    }

    /// Reads one bit.
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Bits left in the input, padding included.
    #[must_use]
    pub const fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    /// Whole bytes consumed, counting a partially read byte as consumed.
    #[must_use]
    pub const fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
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

    #[test]
    fn lsb_first_layout() {
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(0b101, 3);
        writer.write_bits(0b11, 2);
        assert_eq!(writer.flush(), 5);
        assert_eq!(buf, vec![0b0001_1101]);
    }

    #[test]
    fn fields_cross_byte_boundaries() {
        let mut buf = vec![0xAA];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(3, 5);
        writer.write_bits(0xBEEF, 16);
        writer.write_bool(true);
        writer.flush();
        assert_eq!(buf[0], 0xAA);
        assert_eq!(buf.len(), 1 + 3);

        let mut reader = BitReader::new(&buf[1..]);
        assert_eq!(reader.read_bits(5).unwrap(), 3);
        assert_eq!(reader.read_bits(16).unwrap(), 0xBEEF);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.remaining_bits(), 2);
        assert_eq!(reader.bytes_consumed(), 3);
    }

    #[test]
    fn value_is_masked_to_width() {
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(0xFF, 4);
        writer.flush();
        assert_eq!(buf, vec![0x0F]);
    }

    #[test]
    fn full_width_fields() {
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(1, 1);
        writer.write_bits(u32::MAX, 32);
        writer.flush();
        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bits(1).unwrap(), 1);
        assert_eq!(reader.read_bits(32).unwrap(), u32::MAX);
    }

    #[test]
    fn reading_past_end_fails() {
        let data = [0x01];
        let mut reader = BitReader::new(&data);
        assert!(reader.read_bits(6).is_ok());
        assert_eq!(
            reader.read_bits(3),
            Err(CodecError::UnexpectedEnd { needed_bits: 3 })
        );
    }
}

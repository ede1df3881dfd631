//! Sequence-keyed checksum for legacy single-command frames.
//!
//! Legacy peers expect one checksum byte right after the `CLC_MOVE` opcode. It covers the
//! rest of the frame and is keyed by the outgoing sequence, so a frame replayed under a
//! different sequence fails verification.
//!
//! ```
//! use cmd_uplink::checksum::sequence_checksum;
//! use cmd_uplink::Sequence;
//!
//! let body = [0xff, 0xff, 0xff, 0xff, 0x00, 0x10];
//! let a = sequence_checksum(&body, Sequence::new(1));
//! assert_eq!(a, sequence_checksum(&body, Sequence::new(1)));
//! ```

use crate::Sequence;

/// Only this many leading body bytes are hashed.
pub const MAX_CHECKSUM_BODY: usize = 60;

/// Multiplier spreading the sequence over the key bytes.
const SEQUENCE_KEY_MULTIPLIER: u32 = 0x9E37_79B9;

const CRC16_INIT: u16 = 0xFFFF;
const CRC16_POLY: u16 = 0x1021;

/// CRC-16/CCITT-FALSE over `bytes`, continuing from `crc`.
#[must_use]
pub fn crc16_update(mut crc: u16, bytes: &[u8]) -> u16 {
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC-16/CCITT-FALSE of `bytes`.
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    crc16_update(CRC16_INIT, bytes)
}

/// Computes the one-byte checksum of a legacy frame body under `sequence`.
///
/// At most [`MAX_CHECKSUM_BODY`] bytes of `body` are covered, followed by four key bytes
/// derived from the sequence. The CRC is folded with the byte sum of the covered input.
#[must_use]
pub fn sequence_checksum(body: &[u8], sequence: Sequence) -> u8 {
    let covered = body.get(..MAX_CHECKSUM_BODY).unwrap_or(body);
    let key = sequence
        .as_u32()
        .wrapping_mul(SEQUENCE_KEY_MULTIPLIER)
        .to_le_bytes();

    let crc = crc16_update(crc16(covered), &key);
    let byte_sum = covered
        .iter()
        .chain(key.iter())
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));

    ((crc ^ byte_sum) & 0xff) as u8
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
    fn crc16_check_value() {
        // standard CRC-16/CCITT-FALSE check input
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn crc16_empty_is_init() {
        assert_eq!(crc16(&[]), CRC16_INIT);
    }

    #[test]
    fn crc16_update_is_incremental() {
        let whole = crc16(b"hello world");
        let split = crc16_update(crc16(b"hello "), b"world");
        assert_eq!(whole, split);
    }

    #[test]
    fn checksum_depends_on_sequence() {
        let body = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let distinct: std::collections::BTreeSet<u8> = (0..64)
            .map(|s| sequence_checksum(&body, Sequence::new(s)))
            .collect();
        assert!(distinct.len() > 16);
    }

    #[test]
    fn checksum_depends_on_body() {
        let seq = Sequence::new(12);
        let distinct: std::collections::BTreeSet<u8> = (0..64u8)
            .map(|b| sequence_checksum(&[0x10, b, 0x30], seq))
            .collect();
        assert!(distinct.len() > 16);
    }

    #[test]
    fn checksum_ignores_bytes_past_limit() {
        let seq = Sequence::new(3);
        let mut long = vec![0xAB; MAX_CHECKSUM_BODY];
        let base = sequence_checksum(&long, seq);
        long.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(sequence_checksum(&long, seq), base);
    }

    #[test]
    fn checksum_of_empty_body_is_defined() {
        let _ = sequence_checksum(&[], Sequence::ZERO);
        let _ = sequence_checksum(&[], Sequence::new(u32::MAX));
    }
}

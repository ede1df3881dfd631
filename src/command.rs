//! The per-frame outgoing command.

use serde::{Deserialize, Serialize};

/// Button bits carried in a [`Command`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ButtonBits(u8);

impl ButtonBits {
    /// No buttons.
    pub const NONE: ButtonBits = ButtonBits(0);
    /// Attack was held or pressed during the frame.
    pub const ATTACK: ButtonBits = ButtonBits(1);
    /// Use was held or pressed during the frame.
    pub const USE: ButtonBits = ButtonBits(2);
    /// Some tracked action was held or pressed while the game had focus.
    pub const ANY: ButtonBits = ButtonBits(128);

    /// Wraps raw bits as received from the wire.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        ButtonBits(bits)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: ButtonBits) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    #[inline]
    pub fn insert(&mut self, other: ButtonBits) {
        self.0 |= other.0;
    }

    /// Returns `true` if no bit is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for ButtonBits {
    type Output = ButtonBits;

    fn bitor(self, rhs: Self) -> Self::Output {
        ButtonBits(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ButtonBits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One frame of finalized movement, look and button intent.
///
/// Once finalized and stored in [`CommandHistory`](crate::CommandHistory), a command is
/// only ever copied out, never changed. Move components are whole numbers so they survive
/// the 16-bit wire fields unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Command {
    /// Frame duration in milliseconds.
    pub msec: u8,
    /// Pitch, yaw and roll as 16-bit angles.
    pub angles: [i16; 3],
    /// Forward speed.
    pub forward: f32,
    /// Strafe speed, positive to the right.
    pub side: f32,
    /// Vertical speed.
    pub up: f32,
    /// Buttons.
    pub buttons: ButtonBits,
    /// Impulse (weapon select and the like), 0 for none.
    pub impulse: u8,
}

impl Command {
    /// The reference every delta chain starts from.
    pub const BLANK: Command = Command {
        msec: 0,
        angles: [0; 3],
        forward: 0.0,
        side: 0.0,
        up: 0.0,
        buttons: ButtonBits::NONE,
        impulse: 0,
    };

    /// Move components in wire form.
    #[must_use]
    pub fn move_shorts(&self) -> [i16; 3] {
        [
            move_to_short(self.forward),
            move_to_short(self.side),
            move_to_short(self.up),
        ]
    }
}

/// Saturating conversion of a move component to its 16-bit wire value.
#[inline]
#[must_use]
pub fn move_to_short(value: f32) -> i16 {
    // float-to-int `as` saturates and maps NaN to 0
    value as i16
}

/// Converts degrees to a 16-bit angle, wrapping.
///
/// ```
/// use cmd_uplink::{angle_to_short, short_to_angle};
///
/// assert_eq!(angle_to_short(90.0), 16384);
/// assert_eq!(angle_to_short(-90.0), -16384);
/// assert_eq!(short_to_angle(16384), 90.0);
/// ```
#[inline]
#[must_use]
pub fn angle_to_short(degrees: f32) -> i16 {
    ((degrees * 65536.0 / 360.0) as i32 & 0xFFFF) as u16 as i16
}

/// Converts a 16-bit angle to degrees in `[-180, 180)`.
#[inline]
#[must_use]
pub fn short_to_angle(short: i16) -> f32 {
    f32::from(short) * (360.0 / 65536.0)
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

    #[test]
    fn button_bits_ops() {
        let mut bits = ButtonBits::ATTACK | ButtonBits::ANY;
        assert!(bits.contains(ButtonBits::ATTACK));
        assert!(!bits.contains(ButtonBits::USE));
        bits.insert(ButtonBits::USE);
        assert_eq!(bits.bits(), 131);
        assert!(ButtonBits::default().is_empty());
    }

    #[test]
    fn angle_wraps_past_half_turn() {
        assert_eq!(angle_to_short(180.0), i16::MIN);
        assert_eq!(angle_to_short(360.0), 0);
        assert_eq!(angle_to_short(450.0), 16384);
    }

    #[test]
    fn angle_round_trip_on_grid() {
        for short in [i16::MIN, -1, 0, 1, 100, i16::MAX] {
            assert_eq!(angle_to_short(short_to_angle(short)), short);
        }
    }

    #[test]
    fn move_to_short_saturates() {
        assert_eq!(move_to_short(1e9), i16::MAX);
        assert_eq!(move_to_short(-1e9), i16::MIN);
        assert_eq!(move_to_short(f32::NAN), 0);
        assert_eq!(move_to_short(-200.9), -200);
    }

    #[test]
    fn blank_is_default() {
        assert_eq!(Command::BLANK, Command::default());
        assert_eq!(Command::BLANK.move_shorts(), [0, 0, 0]);
    }
}

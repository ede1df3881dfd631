//! Configuration types for uplink sessions.
//!
//! This module contains configuration structs that control how commands are
//! built from input and how they are put on the wire.
//!
//! # Overview
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `TransmitConfig` | Send rate, redundancy, keepalive | `lan()`, `lossy()`, `low_bandwidth()` |
//! | `MoveConfig` | Movement and turn speeds, look modes | `walk_by_default()` |
//! | `PointerConfig` | Mouse sensitivity and axis scales | |
//! | `AnalogConfig` | Gamepad stick scales | |
//!
//! # Example
//!
//! ```
//! use cmd_uplink::{MoveConfig, SessionBuilder, TransmitConfig};
//!
//! // Use presets for common scenarios
//! let builder = SessionBuilder::new()
//!     .with_transmit_config(TransmitConfig::lossy())
//!     .with_move_config(MoveConfig::walk_by_default());
//! ```

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::network::codec::MAX_PACKET_FRAMES;
use crate::{InvalidRequestKind, UplinkError};

/// Configuration for outgoing command frames.
///
/// Read by the transmitter on every tick, so changes made through
/// [`UplinkSession::transmit_config_mut`](crate::UplinkSession::transmit_config_mut)
/// apply from the next [`transmit`](crate::UplinkSession::transmit).
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. To ensure your
/// code continues to compile, always use the `..Default::default()` or
/// `..TransmitConfig::default()` pattern when constructing instances.
///
/// # Example
///
/// ```
/// use cmd_uplink::TransmitConfig;
///
/// // Repeat each command in the next two sends as well
/// let config = TransmitConfig {
///     redundancy_window: 2,
///     ..TransmitConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[must_use = "TransmitConfig has no effect unless passed to SessionBuilder::with_transmit_config()"]
pub struct TransmitConfig {
    /// Always send the "no frame" sentinel, asking the server for full updates.
    ///
    /// Default: `false`
    pub no_delta: bool,

    /// Upper bound on sends per second. `0` disables the limit; anything else is
    /// raised to at least 10.
    ///
    /// Default: 30
    pub max_sends_per_second: u32,

    /// How many earlier sends each batched frame repeats. Accepted range is 0 to 3.
    ///
    /// Default: 1
    pub redundancy_window: u8,

    /// Use batched frames when the peer supports them.
    ///
    /// Default: `true`
    pub batching_enabled: bool,

    /// Deliberately skip single-command sends the rate limiter would hold back, to
    /// exercise loss handling. Never skips once more than two commands are waiting.
    ///
    /// Default: `false`
    pub packet_drop_simulation: bool,

    /// Let instant-send actions (attack, use) bypass the rate limiter.
    ///
    /// Default: `true`
    pub instant_send: bool,

    /// Time without a send after which a keepalive goes out while not in game.
    ///
    /// Default: 1000ms
    pub keepalive_interval: Duration,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            no_delta: false,
            max_sends_per_second: 30,
            redundancy_window: 1,
            batching_enabled: true,
            packet_drop_simulation: false,
            instant_send: true,
            keepalive_interval: Duration::from_millis(1000),
        }
    }
}

impl TransmitConfig {
    /// Creates a new `TransmitConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration preset for local network / LAN play.
    ///
    /// Sends every frame and skips redundancy, since loss is rare.
    pub fn lan() -> Self {
        Self {
            max_sends_per_second: 0,
            redundancy_window: 0,
            ..Self::default()
        }
    }

    /// Configuration preset for lossy networks (5-15% packet loss).
    ///
    /// Uses the widest redundancy window, so three consecutive sends can be lost
    /// without losing a command.
    pub fn lossy() -> Self {
        Self {
            redundancy_window: 3,
            ..Self::default()
        }
    }

    /// Configuration preset for constrained uplinks.
    ///
    /// Sends at the minimum rate. Each frame then carries more commands, which the
    /// batched format packs well.
    pub fn low_bandwidth() -> Self {
        Self {
            max_sends_per_second: 10,
            redundancy_window: 1,
            ..Self::default()
        }
    }

    /// No rate limit at all. Mostly useful in tests.
    pub fn unthrottled() -> Self {
        Self {
            max_sends_per_second: 0,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::InvalidRequest` if:
    /// - `redundancy_window` is greater than 3
    /// - `max_sends_per_second` is greater than 1000
    /// - `keepalive_interval` is outside 10ms to 60000ms
    pub fn validate(&self) -> Result<(), UplinkError> {
        let max_window = MAX_PACKET_FRAMES as u64 - 1;
        if u64::from(self.redundancy_window) > max_window {
            return Err(InvalidRequestKind::ConfigValueOutOfRange {
                field: "redundancy_window",
                min: 0,
                max: max_window,
                actual: u64::from(self.redundancy_window),
            }
            .into());
        }

        if self.max_sends_per_second > 1000 {
            return Err(InvalidRequestKind::ConfigValueOutOfRange {
                field: "max_sends_per_second",
                min: 0,
                max: 1000,
                actual: u64::from(self.max_sends_per_second),
            }
            .into());
        }

        if self.keepalive_interval < Duration::from_millis(10)
            || self.keepalive_interval > Duration::from_millis(60000)
        {
            return Err(InvalidRequestKind::DurationConfigOutOfRange {
                field: "keepalive_interval",
                min_ms: 10,
                max_ms: 60000,
                actual_ms: self.keepalive_interval.as_millis() as u64,
            }
            .into());
        }

        Ok(())
    }
}

fn check_float(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), UplinkError> {
    if !value.is_finite() || value < min || value > max {
        return Err(InvalidRequestKind::FloatConfigOutOfRange {
            field,
            min,
            max,
            actual: value,
        }
        .into());
    }
    Ok(())
}

/// Movement speeds and look modes.
///
/// Speeds are in world units per second at full press; turn speeds in degrees per
/// second.
///
/// # Example
///
/// ```
/// use cmd_uplink::MoveConfig;
///
/// let config = MoveConfig {
///     yaw_speed: 180.0,
///     ..MoveConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use = "MoveConfig has no effect unless passed to SessionBuilder::with_move_config()"]
pub struct MoveConfig {
    /// Default: 200
    pub forward_speed: f32,
    /// Default: 200
    pub side_speed: f32,
    /// Default: 200
    pub up_speed: f32,
    /// Keyboard turn speed. Default: 140
    pub yaw_speed: f32,
    /// Keyboard look speed. Default: 150
    pub pitch_speed: f32,
    /// Turn speed multiplier while Speed is held. Default: 1.5
    pub fast_turn_rate: f32,
    /// Run unless Speed is held (Speed then walks). Default: `true`
    pub run_by_default: bool,
    /// Vertical pointer motion always looks. Default: `true`
    pub freelook: bool,
    /// Recenter the view when mouse-look is released. Default: `false`
    pub lookspring: bool,
    /// Horizontal pointer motion strafes instead of turning. Default: `false`
    pub lookstrafe: bool,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            forward_speed: 200.0,
            side_speed: 200.0,
            up_speed: 200.0,
            yaw_speed: 140.0,
            pitch_speed: 150.0,
            fast_turn_rate: 1.5,
            run_by_default: true,
            freelook: true,
            lookspring: false,
            lookstrafe: false,
        }
    }
}

impl MoveConfig {
    /// Creates a new `MoveConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk unless Speed is held.
    pub fn walk_by_default() -> Self {
        Self {
            run_by_default: false,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::InvalidRequest` if a speed is negative, above 10000 or not
    /// finite, or if `fast_turn_rate` is outside 0 to 10.
    pub fn validate(&self) -> Result<(), UplinkError> {
        check_float("forward_speed", self.forward_speed, 0.0, 10000.0)?;
        check_float("side_speed", self.side_speed, 0.0, 10000.0)?;
        check_float("up_speed", self.up_speed, 0.0, 10000.0)?;
        check_float("yaw_speed", self.yaw_speed, 0.0, 10000.0)?;
        check_float("pitch_speed", self.pitch_speed, 0.0, 10000.0)?;
        check_float("fast_turn_rate", self.fast_turn_rate, 0.0, 10.0)?;
        Ok(())
    }
}

/// Pointer (mouse) settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use = "PointerConfig has no effect unless passed to SessionBuilder::with_pointer_config()"]
pub struct PointerConfig {
    /// Base multiplier on raw counts. Default: 3
    pub sensitivity: f32,
    /// Extra multiplier per count of motion, clamped to 0..=1 when applied. Default: 0
    pub accel: f32,
    /// Average each frame's motion with the previous frame's. Default: `false`
    pub filter: bool,
    /// Degrees of yaw per scaled count. Default: 0.022
    pub yaw_scale: f32,
    /// Degrees of pitch per scaled count. Default: 0.022
    pub pitch_scale: f32,
    /// Forward move per scaled count when not looking. Default: 1
    pub forward_scale: f32,
    /// Side move per scaled count when strafing. Default: 1
    pub side_scale: f32,
    /// Scale motion by the current field of view relative to this one. Only values in
    /// (90, 179] are honoured; others behave like 90. Default: `None`
    pub autosens_fov: Option<f32>,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            sensitivity: 3.0,
            accel: 0.0,
            filter: false,
            yaw_scale: 0.022,
            pitch_scale: 0.022,
            forward_scale: 1.0,
            side_scale: 1.0,
            autosens_fov: None,
        }
    }
}

impl PointerConfig {
    /// Creates a new `PointerConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::InvalidRequest` for non-finite values, a sensitivity outside
    /// 0 to 100, or a scale outside -100 to 100 (negative scales invert an axis).
    pub fn validate(&self) -> Result<(), UplinkError> {
        check_float("sensitivity", self.sensitivity, 0.0, 100.0)?;
        check_float("accel", self.accel, 0.0, 1.0)?;
        check_float("yaw_scale", self.yaw_scale, -100.0, 100.0)?;
        check_float("pitch_scale", self.pitch_scale, -100.0, 100.0)?;
        check_float("forward_scale", self.forward_scale, -100.0, 100.0)?;
        check_float("side_scale", self.side_scale, -100.0, 100.0)?;
        if let Some(fov) = self.autosens_fov {
            check_float("autosens_fov", fov, 0.0, 360.0)?;
        }
        Ok(())
    }
}

/// Analog stick settings. Axis values reaching the session are already dead-zoned and
/// normalized to -1..=1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use = "AnalogConfig has no effect unless passed to SessionBuilder::with_analog_config()"]
pub struct AnalogConfig {
    /// Multiplier on the move stick. Default: 1
    pub move_scale: f32,
    /// Look stick counts per second at full deflection. Default: 1800
    pub look_scale: f32,
    /// Invert the vertical look axis. Default: `false`
    pub invert_y: bool,
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self {
            move_scale: 1.0,
            look_scale: 1800.0,
            invert_y: false,
        }
    }
}

impl AnalogConfig {
    /// Creates a new `AnalogConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::InvalidRequest` if `move_scale` is outside 0 to 10 or
    /// `look_scale` is outside 0 to 100000.
    pub fn validate(&self) -> Result<(), UplinkError> {
        check_float("move_scale", self.move_scale, 0.0, 10.0)?;
        check_float("look_scale", self.look_scale, 0.0, 100_000.0)?;
        Ok(())
    }
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

    // ========================================================================
    // TransmitConfig Tests
    // ========================================================================

    #[test]
    fn test_transmit_config_defaults() {
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
    fn test_transmit_presets_validate() {
        for config in [
            TransmitConfig::default(),
            TransmitConfig::lan(),
            TransmitConfig::lossy(),
            TransmitConfig::low_bandwidth(),
            TransmitConfig::unthrottled(),
        ] {
            assert!(config.validate().is_ok(), "{config:?}");
        }
        assert_eq!(TransmitConfig::lossy().redundancy_window, 3);
        assert_eq!(TransmitConfig::lan().max_sends_per_second, 0);
    }

    #[test]
    fn test_transmit_window_out_of_range() {
        let config = TransmitConfig {
            redundancy_window: 4,
            ..TransmitConfig::default()
        };
        match config.validate() {
            Err(UplinkError::InvalidRequest { info }) => {
                assert!(info.contains("redundancy_window"));
            },
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_transmit_keepalive_bounds() {
        let too_short = TransmitConfig {
            keepalive_interval: Duration::from_millis(5),
            ..TransmitConfig::default()
        };
        assert!(too_short.validate().is_err());
        let too_long = TransmitConfig {
            keepalive_interval: Duration::from_secs(120),
            ..TransmitConfig::default()
        };
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_transmit_rate_bound() {
        let config = TransmitConfig {
            max_sends_per_second: 5000,
            ..TransmitConfig::default()
        };
        assert!(config.validate().is_err());
    }

    // ========================================================================
    // Input Config Tests
    // ========================================================================

    #[test]
    fn test_move_config_defaults() {
        let config = MoveConfig::default();
        assert_eq!(config.forward_speed, 200.0);
        assert_eq!(config.yaw_speed, 140.0);
        assert_eq!(config.pitch_speed, 150.0);
        assert_eq!(config.fast_turn_rate, 1.5);
        assert!(config.run_by_default);
        assert!(!MoveConfig::walk_by_default().run_by_default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_move_config_rejects_nan() {
        let config = MoveConfig {
            side_speed: f32::NAN,
            ..MoveConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pointer_config_defaults() {
        let config = PointerConfig::default();
        assert_eq!(config.sensitivity, 3.0);
        assert_eq!(config.yaw_scale, 0.022);
        assert_eq!(config.autosens_fov, None);
        assert!(config.validate().is_ok());

        let inverted = PointerConfig {
            pitch_scale: -0.022,
            ..PointerConfig::default()
        };
        assert!(inverted.validate().is_ok());
    }

    #[test]
    fn test_analog_config_defaults() {
        let config = AnalogConfig::default();
        assert_eq!(config.look_scale, 1800.0);
        assert!(!config.invert_y);
        assert!(config.validate().is_ok());
        let bad = AnalogConfig {
            move_scale: -1.0,
            ..AnalogConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = TransmitConfig::lossy();
        let json = serde_json::to_string(&config).unwrap();
        let back: TransmitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}

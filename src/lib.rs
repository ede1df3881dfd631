//! # cmd-uplink
//!
//! cmd-uplink turns per-frame player input into a compact, loss-tolerant command stream
//! for a remote simulation authority reachable over an unreliable channel.
//!
//! The pipeline has four stages, each owned by one [`UplinkSession`]:
//!
//! 1. [`ActionSet`] tracks logical buttons (each held by up to two physical sources) and
//!    reports how much of a frame each one was held for.
//! 2. [`MoveAssembler`] integrates view angles and builds a movement vector, producing an
//!    immutable [`Command`] once per frame.
//! 3. [`CommandHistory`] keeps recent commands and per-send timing in fixed rings.
//! 4. [`Transmitter`] decides when to send and writes either the last three commands
//!    (single mode) or a redundant trailing window of sends (batched mode) to your
//!    [`Transport`].
//!
//! Nothing here blocks or spawns threads. Drive the session from your frame loop:
//!
//! ```
//! use cmd_uplink::{
//!     Action, ConnectionState, KeyEvent, RecordingTransport, SessionBuilder, SourceId, Timestamp,
//! };
//!
//! let mut session = SessionBuilder::new().start_session(RecordingTransport::new())?;
//! session.connect();
//! session.set_connection_state(ConnectionState::Active);
//!
//! let now = Timestamp::from_millis(1_000);
//! session.key_down(Action::Forward, KeyEvent::new(SourceId::new(17)), now)?;
//! session.update(16, now);
//! session.finalize_command(now);
//! session.transmit(now)?;
//!
//! assert_eq!(session.transport().frames().len(), 1);
//! # Ok::<(), cmd_uplink::UplinkError>(())
//! ```

#![forbid(unsafe_code)] // let us try
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use assembler::{AnalogState, FrameContext, MoveAssembler, MoveVector, MAX_AXIS_SPEED};
pub use buttons::{
    Action, ActionSet, EdgeState, KeyEvent, LogicalButton, PressOutcome, Release, ReleaseOutcome,
    SourceId,
};
pub use command::{angle_to_short, short_to_angle, ButtonBits, Command};
pub use error::{InvalidRequestKind, UplinkError};
pub use history::{CommandHistory, HistoryEntry, CMD_BACKUP};
pub use network::chaos_transport::{ChaosConfig, ChaosConfigBuilder, ChaosStats, ChaosTransport};
pub use network::loopback::{OutgoingFrame, RecordingTransport};
pub use network::network_stats::UplinkStats;
pub use network::receiver::{CommandReceiver, ReceivedBatch};
pub use network::transmitter::{
    min_send_interval, TransmitContext, TransmitOutcome, Transmitter, TransmitterState,
};
pub use sessions::builder::SessionBuilder;
pub use sessions::config::{AnalogConfig, MoveConfig, PointerConfig, TransmitConfig};
pub use sessions::uplink_session::UplinkSession;

pub mod assembler;
pub mod buttons;
/// Sequence-keyed checksum used by legacy single-command frames.
pub mod checksum;
pub mod command;
#[doc(hidden)]
pub mod error;
pub mod history;
pub mod prelude;
/// Internal random number generator module based on PCG32.
///
/// Drives the loss decisions in [`ChaosTransport`] so fault-injection runs are reproducible.
pub mod rng;
pub mod telemetry;
#[doc(hidden)]
pub mod sessions {
    #[doc(hidden)]
    pub mod builder;
    pub mod config;
    #[doc(hidden)]
    pub mod uplink_session;
}
#[doc(hidden)]
pub mod network {
    /// LSB-first bit packing for the batched wire format.
    pub mod bits;
    pub mod chaos_transport;
    /// Command delta codecs for both wire modes.
    pub mod codec;
    pub mod loopback;
    #[doc(hidden)]
    pub mod network_stats;
    pub mod receiver;
    pub mod transmitter;
}

/// Internal module exposing implementation details for testing, fuzzing, and benchmarking.
///
/// # ⚠️ WARNING: No Stability Guarantees
///
/// **This module is NOT part of the public API.** Everything here is subject to change
/// without notice and exists only so fuzz targets, property tests and benches can drive
/// the wire codecs directly.
#[doc(hidden)]
pub mod __internal {
    pub use crate::checksum::sequence_checksum;
    pub use crate::network::bits::{BitReader, BitWriter};
    pub use crate::network::codec::{
        read_batched_delta, read_classic_delta, write_batched_delta, write_classic_delta,
        ByteReader, CodecError, CLC_MOVE, CLC_MOVE_BATCHED, CLC_MOVE_NODELTA, MAX_PACKET_FRAMES,
        MAX_PACKET_USERCMDS, SVCMD_BITS,
    };
}

// #############
// # CONSTANTS #
// #############

/// Wire value of "no server frame received yet".
pub const NULL_SERVER_FRAME: i32 = -1;

/// Largest outgoing sequence the transport can carry. The top bit is reserved for the
/// transport's reliable flag.
pub const MAX_OUTGOING_SEQUENCE: u32 = 0x7FFF_FFFF;

/// A point on the session's millisecond clock.
///
/// The clock has no fixed epoch; only differences matter. Use [`MonotonicClock`] for a
/// real clock, or construct timestamps directly in tests.
///
/// # Examples
///
/// ```
/// use cmd_uplink::Timestamp;
///
/// let down = Timestamp::from_millis(1_000);
/// let up = down + 100;
/// assert_eq!(up.millis_since(down), 100);
/// assert_eq!(down.millis_since(up), 0);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Creates a timestamp from a millisecond count.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Returns the underlying millisecond count.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, or 0 if `earlier` is later.
    #[inline]
    #[must_use]
    pub const fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns this timestamp moved `millis` into the past, stopping at [`Timestamp::ZERO`].
    #[inline]
    #[must_use]
    pub const fn saturating_sub_millis(self, millis: u64) -> Self {
        Timestamp(self.0.saturating_sub(millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl std::ops::Add<u64> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs))
    }
}

impl std::ops::AddAssign<u64> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self.0.saturating_add(rhs);
    }
}

/// Monotonic wall clock producing [`Timestamp`]s relative to its creation.
///
/// Uses `web_time::Instant`, so it also works on `wasm32` targets.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: web_time::Instant,
}

impl MonotonicClock {
    /// Starts a clock at [`Timestamp::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: web_time::Instant::now(),
        }
    }

    /// Milliseconds since the clock was created.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_millis();
        Timestamp(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Number assigned to each finalized [`Command`], strictly increasing from 1.
///
/// `CommandNumber::ZERO` means "no command yet". Arithmetic wraps, which keeps ring
/// indexing valid for any power-of-two ring size.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct CommandNumber(u32);

impl CommandNumber {
    /// The number before the first command.
    pub const ZERO: CommandNumber = CommandNumber(0);

    /// Creates a command number.
    #[inline]
    #[must_use]
    pub const fn new(number: u32) -> Self {
        CommandNumber(number)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The number following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        CommandNumber(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for CommandNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Sub<CommandNumber> for CommandNumber {
    type Output = u32;

    /// Number of commands generated between `rhs` and `self`.
    #[inline]
    fn sub(self, rhs: CommandNumber) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl std::ops::Sub<u32> for CommandNumber {
    type Output = CommandNumber;

    #[inline]
    fn sub(self, rhs: u32) -> Self::Output {
        CommandNumber(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::Add<u32> for CommandNumber {
    type Output = CommandNumber;

    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        CommandNumber(self.0.wrapping_add(rhs))
    }
}

/// Per-send counter used for acknowledgment, checksumming and drop detection.
///
/// # Examples
///
/// ```
/// use cmd_uplink::Sequence;
///
/// let seq = Sequence::new(41);
/// assert_eq!(seq.next().as_u32(), 42);
/// assert_eq!(Sequence::new(0) - 1, Sequence::new(u32::MAX));
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Sequence(u32);

impl Sequence {
    /// The first outgoing sequence of a connection.
    pub const ZERO: Sequence = Sequence(0);

    /// Creates a sequence number.
    #[inline]
    #[must_use]
    pub const fn new(sequence: u32) -> Self {
        Sequence(sequence)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The sequence following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Sequence(self.0.wrapping_add(1))
    }

    /// Returns `true` if this sequence can no longer be sent.
    #[inline]
    #[must_use]
    pub const fn is_exhausted(self) -> bool {
        self.0 > MAX_OUTGOING_SEQUENCE
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Sub<u32> for Sequence {
    type Output = Sequence;

    #[inline]
    fn sub(self, rhs: u32) -> Self::Output {
        Sequence(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::Add<u32> for Sequence {
    type Output = Sequence;

    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Sequence(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Sub<Sequence> for Sequence {
    type Output = u32;

    #[inline]
    fn sub(self, rhs: Sequence) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

/// Last server frame the client has fully received, echoed back so the server can
/// delta-compress its next update.
///
/// [`ServerFrame::NULL`] is written as all-ones on the wire and asks for a full update.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ServerFrame(i32);

impl ServerFrame {
    /// No frame received.
    pub const NULL: ServerFrame = ServerFrame(NULL_SERVER_FRAME);

    /// Creates a server frame number. Negative values are treated as [`ServerFrame::NULL`].
    #[inline]
    #[must_use]
    pub const fn new(frame: i32) -> Self {
        if frame < 0 {
            Self::NULL
        } else {
            ServerFrame(frame)
        }
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this is a real frame number.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for ServerFrame {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "NULL_SERVER_FRAME")
        }
    }
}

/// Connection progress as seen by the uplink.
///
/// Commands are only transmitted once the connection is [`ConnectionState::Active`];
/// below [`ConnectionState::Connected`] nothing is sent at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ConnectionState {
    /// Not talking to a server.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected but not yet in game. Only keepalives are sent.
    Connected,
    /// In game. Commands are generated and sent.
    Active,
}

/// Where input is currently routed.
///
/// Pointer and analog motion only steer the view while the game has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputFocus {
    /// Input drives the player.
    #[default]
    Game,
    /// A menu is open.
    Menu,
    /// The console is open.
    Console,
}

/// Wire capability negotiated with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum PeerProtocol {
    /// Single-command frames with a sequence-keyed checksum byte.
    #[default]
    Legacy,
    /// Single-command frames without the checksum byte.
    Compact,
    /// Peer accepts batched frames. Falls back to [`PeerProtocol::Compact`] framing when
    /// batching is disabled locally.
    Batching,
}

impl PeerProtocol {
    /// Returns `true` if single-command frames for this peer carry a checksum byte.
    #[inline]
    #[must_use]
    pub const fn uses_checksum(self) -> bool {
        matches!(self, Self::Legacy)
    }
}

/// This [`Transport`] trait is used to hand encoded frames to your network channel.
///
/// Frames should be delivered in an UDP-like fashion: unordered and unreliable. The
/// transport may also carry a reliable stream of its own; the uplink only needs to know
/// whether data is queued on it and whether it overflowed.
#[cfg(feature = "sync-send")]
pub trait Transport: Send + Sync {
    /// Sends one encoded frame under the given sequence number. An empty payload is a keepalive.
    fn send(&mut self, sequence: Sequence, payload: &[u8]);

    /// Returns `true` if reliable data is queued or awaiting acknowledgment.
    fn has_pending_reliable(&self) -> bool {
        false
    }

    /// Returns `true` if the reliable buffer overflowed.
    fn reliable_overflowed(&self) -> bool {
        false
    }

    /// Discards queued reliable data after an overflow.
    fn clear_reliable(&mut self) {}
}

/// This [`Transport`] trait is used to hand encoded frames to your network channel.
///
/// Frames should be delivered in an UDP-like fashion: unordered and unreliable. The
/// transport may also carry a reliable stream of its own; the uplink only needs to know
/// whether data is queued on it and whether it overflowed.
#[cfg(not(feature = "sync-send"))]
pub trait Transport {
    /// Sends one encoded frame under the given sequence number. An empty payload is a keepalive.
    fn send(&mut self, sequence: Sequence, payload: &[u8]);

    /// Returns `true` if reliable data is queued or awaiting acknowledgment.
    fn has_pending_reliable(&self) -> bool {
        false
    }

    /// Returns `true` if the reliable buffer overflowed.
    fn reliable_overflowed(&self) -> bool {
        false
    }

    /// Discards queued reliable data after an overflow.
    fn clear_reliable(&mut self) {}
}

// ###################
// # UNIT TESTS      #
// ###################

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    // ==========================================
    // Timestamp Tests
    // ==========================================

    #[test]
    fn timestamp_millis_since_saturates() {
        let a = Timestamp::from_millis(50);
        let b = Timestamp::from_millis(80);
        assert_eq!(b.millis_since(a), 30);
        assert_eq!(a.millis_since(b), 0);
    }

    #[test]
    fn timestamp_sub_millis_stops_at_zero() {
        assert_eq!(
            Timestamp::from_millis(40).saturating_sub_millis(100),
            Timestamp::ZERO
        );
        assert_eq!(
            Timestamp::from_millis(1000).saturating_sub_millis(100),
            Timestamp::from_millis(900)
        );
    }

    #[test]
    fn timestamp_display() {
        assert_eq!(Timestamp::from_millis(12).to_string(), "12ms");
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    // ==========================================
    // CommandNumber / Sequence Tests
    // ==========================================

    #[test]
    fn command_number_difference_counts_commands() {
        let base = CommandNumber::new(10);
        let later = base + 5;
        assert_eq!(later - base, 5);
        assert_eq!(later.next(), CommandNumber::new(16));
    }

    #[test]
    fn command_number_wraps_below_zero() {
        let n = CommandNumber::new(1) - 2;
        assert_eq!(n.as_u32(), u32::MAX);
        // ring slots stay consistent across the wrap
        assert_eq!(n.as_u32() as usize & 127, 127);
    }

    #[test]
    fn sequence_exhaustion_boundary() {
        assert!(!Sequence::new(MAX_OUTGOING_SEQUENCE).is_exhausted());
        assert!(Sequence::new(MAX_OUTGOING_SEQUENCE).next().is_exhausted());
    }

    #[test]
    fn sequence_gap() {
        assert_eq!(Sequence::new(9) - Sequence::new(5), 4);
    }

    // ==========================================
    // ServerFrame Tests
    // ==========================================

    #[test]
    fn server_frame_negative_is_null() {
        assert_eq!(ServerFrame::new(-7), ServerFrame::NULL);
        assert!(!ServerFrame::NULL.is_valid());
        assert!(ServerFrame::new(0).is_valid());
        assert_eq!(ServerFrame::default(), ServerFrame::NULL);
    }

    #[test]
    fn server_frame_display() {
        assert_eq!(ServerFrame::new(42).to_string(), "42");
        assert_eq!(ServerFrame::NULL.to_string(), "NULL_SERVER_FRAME");
    }

    // ==========================================
    // Enum Tests
    // ==========================================

    #[test]
    fn connection_state_ordering() {
        assert!(ConnectionState::Disconnected < ConnectionState::Connecting);
        assert!(ConnectionState::Connecting < ConnectionState::Connected);
        assert!(ConnectionState::Connected < ConnectionState::Active);
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn only_legacy_peers_use_checksum() {
        assert!(PeerProtocol::Legacy.uses_checksum());
        assert!(!PeerProtocol::Compact.uses_checksum());
        assert!(!PeerProtocol::Batching.uses_checksum());
    }

    #[test]
    fn transport_defaults_report_nothing_pending() {
        struct Null;
        impl Transport for Null {
            fn send(&mut self, _sequence: Sequence, _payload: &[u8]) {}
        }
        let mut t = Null;
        assert!(!t.has_pending_reliable());
        assert!(!t.reliable_overflowed());
        t.clear_reliable();
        t.send(Sequence::ZERO, &[]);
    }
}

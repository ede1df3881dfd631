//! Decides when to send and writes outgoing command frames.
//!
//! A [`Transmitter`] runs once per tick. Depending on the peer it writes either a
//! single-command frame (the last three commands, classic deltas) or a batched frame
//! that repeats the commands of the last `W` sends so any one delivered frame fills the
//! gap left by lost ones.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use crate::checksum::sequence_checksum;
use crate::command::Command;
use crate::error::UplinkError;
use crate::history::CommandHistory;
use crate::network::bits::BitWriter;
use crate::network::codec::{
    write_batched_delta, write_classic_delta, CLC_MOVE, CLC_MOVE_BATCHED, CLC_MOVE_NODELTA,
    COUNT_BITS, MAX_PACKET_FRAMES, MAX_PACKET_USERCMDS, SVCMD_BITS,
};
use crate::sessions::config::TransmitConfig;
use crate::telemetry::{
    report_to_observer, UplinkViolation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::{
    CommandNumber, ConnectionState, PeerProtocol, Sequence, ServerFrame, Timestamp, Transport,
    NULL_SERVER_FRAME,
};

/// Smallest send rate the limiter honours, in sends per second.
const MIN_SEND_RATE: u32 = 10;

/// Once this many commands pile up past the last real send, drop simulation gives up.
const DROP_SIMULATION_MAX_BACKLOG: u32 = 2;

/// Minimum milliseconds between sends for a given `max_sends_per_second`.
///
/// Rates below 10 are raised to 10. The interval is then snapped to `100 / n` for a
/// whole `n`, which keeps sends in step with 10 Hz servers.
///
/// # Examples
///
/// ```
/// use cmd_uplink::min_send_interval;
///
/// assert_eq!(min_send_interval(30), 33);
/// assert_eq!(min_send_interval(45), 25);
/// assert_eq!(min_send_interval(1), 100);
/// ```
#[must_use]
pub fn min_send_interval(rate: u32) -> u64 {
    let rate = rate.max(MIN_SEND_RATE);
    let mut interval = 1000 / rate;
    if interval != 0 {
        interval = 100 / (100 / interval);
    }
    u64::from(interval)
}

/// Per-connection transmit bookkeeping.
///
/// Reset on connect and disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransmitterState {
    /// Sequence the next send will use.
    pub sequence: Sequence,
    /// Latest command at the last transmit attempt, simulated drops included.
    pub last_transmit_command: CommandNumber,
    /// Latest command at the last send that actually went out.
    pub last_transmit_command_real: CommandNumber,
    /// When the last send actually went out.
    pub last_transmit_time: Timestamp,
}

impl TransmitterState {
    /// Restores the state of a fresh connection.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What the session knows about the connection this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransmitContext {
    /// Connection progress.
    pub connection: ConnectionState,
    /// Game paused by the server.
    pub paused: bool,
    /// Playing back a recording; nothing is sent.
    pub demo_playback: bool,
    /// Wire capability of the peer.
    pub protocol: PeerProtocol,
    /// Last valid server frame, echoed for delta compression.
    pub server_frame: ServerFrame,
    /// Light level byte appended to each command.
    pub light_level: u8,
}

/// Result of one [`Transmitter::transmit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "TransmitOutcome tells whether anything was sent"]
pub enum TransmitOutcome {
    /// Nothing to do this tick.
    Idle,
    /// A command is pending but the rate limiter held it back.
    Throttled,
    /// A command frame went out.
    Sent {
        /// Sequence of the frame.
        sequence: Sequence,
        /// Payload size in bytes.
        bytes: usize,
        /// Number of commands encoded in the frame, repeats included.
        commands: u32,
    },
    /// The send was recorded and its sequence consumed, but nothing went out.
    SimulatedDrop {
        /// The consumed sequence.
        sequence: Sequence,
    },
    /// An empty keepalive frame went out.
    KeepAlive {
        /// Sequence of the frame.
        sequence: Sequence,
    },
    /// A batched slot held too many commands. An empty frame went out instead.
    Overflow {
        /// Sequence of the frame.
        sequence: Sequence,
    },
}

impl TransmitOutcome {
    /// Sequence consumed by this outcome, if any.
    #[must_use]
    pub const fn sequence(&self) -> Option<Sequence> {
        match self {
            Self::Idle | Self::Throttled => None,
            Self::Sent { sequence, .. }
            | Self::SimulatedDrop { sequence }
            | Self::KeepAlive { sequence }
            | Self::Overflow { sequence } => Some(*sequence),
        }
    }

    /// Returns `true` if a frame was handed to the transport.
    #[must_use]
    pub const fn reached_transport(&self) -> bool {
        matches!(
            self,
            Self::Sent { .. } | Self::KeepAlive { .. } | Self::Overflow { .. }
        )
    }
}

/// Owns the outgoing sequence and encodes command frames.
pub struct Transmitter {
    state: TransmitterState,
    config: TransmitConfig,
    send_now: bool,
    buffer: Vec<u8>,
    observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            state,
            config,
            send_now,
            buffer,
            observer,
        } = self;

        f.debug_struct("Transmitter")
            .field("state", state)
            .field("config", config)
            .field("send_now", send_now)
            .field("buffer_len", &buffer.len())
            .field("has_observer", &observer.is_some())
            .finish()
    }
}

impl Transmitter {
    /// Creates a transmitter for a fresh connection.
    #[must_use]
    pub fn new(config: TransmitConfig, observer: Option<Arc<dyn ViolationObserver>>) -> Self {
        Self {
            state: TransmitterState::default(),
            config,
            send_now: false,
            buffer: Vec::with_capacity(256),
            observer,
        }
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> &TransmitConfig {
        &self.config
    }

    /// Mutable configuration. Changes apply from the next tick.
    pub fn config_mut(&mut self) -> &mut TransmitConfig {
        &mut self.config
    }

    /// Connection bookkeeping.
    #[must_use]
    pub const fn state(&self) -> &TransmitterState {
        &self.state
    }

    /// Sends on the next tick regardless of the rate limit.
    pub fn request_send_now(&mut self) {
        self.send_now = true;
    }

    /// Returns `true` if an instant send is pending.
    #[must_use]
    pub const fn send_now_requested(&self) -> bool {
        self.send_now
    }

    /// Restores the state of a fresh connection.
    pub fn reset(&mut self) {
        self.state.reset();
        self.send_now = false;
        self.buffer.clear();
    }

    /// Effective redundancy window.
    #[must_use]
    pub fn window(&self) -> u32 {
        u32::from(self.config.redundancy_window).min(MAX_PACKET_FRAMES as u32 - 1)
    }

    /// Returns `true` if the rate limiter lets a frame out at `now`.
    pub fn ready_to_send<T: Transport + ?Sized>(&self, transport: &T, now: Timestamp) -> bool {
        if self.send_now || transport.has_pending_reliable() {
            return true;
        }
        let rate = self.config.max_sends_per_second;
        if rate == 0 {
            return true;
        }
        now.millis_since(self.state.last_transmit_time) >= min_send_interval(rate)
    }

    /// Rate gate for single-command frames.
    ///
    /// Without drop simulation every attempt goes out. With it, attempts the limiter
    /// would hold back are dropped, until more than two commands have piled up.
    pub fn ready_to_send_with_drop_simulation<T: Transport + ?Sized>(
        &self,
        latest: CommandNumber,
        transport: &T,
        now: Timestamp,
    ) -> bool {
        if !self.config.packet_drop_simulation {
            return true;
        }
        if latest - self.state.last_transmit_command_real > DROP_SIMULATION_MAX_BACKLOG {
            return true;
        }
        self.ready_to_send(transport, now)
    }

    /// Runs one tick.
    ///
    /// # Errors
    /// [`UplinkError::SequenceExhausted`] and [`UplinkError::ReliableOverflow`] are fatal;
    /// the caller must tear the connection down.
    pub fn transmit<T: Transport + ?Sized>(
        &mut self,
        ctx: &TransmitContext,
        history: &mut CommandHistory,
        transport: &mut T,
        now: Timestamp,
    ) -> Result<TransmitOutcome, UplinkError> {
        if ctx.connection < ConnectionState::Connected || ctx.demo_playback {
            return Ok(TransmitOutcome::Idle);
        }

        if ctx.connection != ConnectionState::Active || ctx.paused {
            self.check_reliable(transport)?;
            let keepalive_ms = self.config.keepalive_interval.as_millis() as u64;
            let outcome = if transport.has_pending_reliable()
                || now.millis_since(self.state.last_transmit_time) > keepalive_ms
            {
                self.send_keepalive(history, transport, now)
            } else {
                TransmitOutcome::Idle
            };
            self.send_now = false;
            return Ok(outcome);
        }

        if self.state.last_transmit_command == history.latest() {
            return Ok(TransmitOutcome::Idle);
        }

        self.check_reliable(transport)?;
        let outcome = if ctx.protocol == PeerProtocol::Batching && self.config.batching_enabled {
            self.send_batched(ctx, history, transport, now)
        } else {
            self.send_single(ctx, history, transport, now)
        };
        self.send_now = false;
        Ok(outcome)
    }

    fn check_reliable<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<(), UplinkError> {
        if self.state.sequence.is_exhausted() {
            self.buffer.clear();
            return Err(UplinkError::SequenceExhausted {
                sequence: self.state.sequence,
            });
        }
        if transport.reliable_overflowed() {
            transport.clear_reliable();
            self.buffer.clear();
            return Err(UplinkError::ReliableOverflow);
        }
        Ok(())
    }

    fn delta_frame(&self, ctx: &TransmitContext) -> i32 {
        if self.config.no_delta || !ctx.server_frame.is_valid() {
            NULL_SERVER_FRAME
        } else {
            ctx.server_frame.as_i32()
        }
    }

    /// Hands the buffer to the transport under the current sequence and advances it.
    fn flush_to<T: Transport + ?Sized>(&mut self, transport: &mut T) -> (Sequence, usize) {
        let sequence = self.state.sequence;
        transport.send(sequence, &self.buffer);
        let bytes = self.buffer.len();
        self.buffer.clear();
        self.state.sequence = sequence.next();
        (sequence, bytes)
    }

    fn send_keepalive<T: Transport + ?Sized>(
        &mut self,
        history: &mut CommandHistory,
        transport: &mut T,
        now: Timestamp,
    ) -> TransmitOutcome {
        let latest = history.latest();
        history.record_send(self.state.sequence, latest, now);
        self.state.last_transmit_time = now;
        self.state.last_transmit_command = latest;
        self.state.last_transmit_command_real = latest;

        self.buffer.clear();
        let (sequence, _) = self.flush_to(transport);
        trace!("Sent keepalive {}", sequence);
        TransmitOutcome::KeepAlive { sequence }
    }

    fn send_single<T: Transport + ?Sized>(
        &mut self,
        ctx: &TransmitContext,
        history: &mut CommandHistory,
        transport: &mut T,
        now: Timestamp,
    ) -> TransmitOutcome {
        let latest = history.latest();
        let sequence = self.state.sequence;
        history.record_send(sequence, latest, now);
        self.state.last_transmit_command = latest;

        if !self.ready_to_send_with_drop_simulation(latest, transport, now) {
            trace!("Simulated drop of {} (command {})", sequence, latest);
            self.state.sequence = sequence.next();
            return TransmitOutcome::SimulatedDrop { sequence };
        }

        self.state.last_transmit_time = now;
        self.state.last_transmit_command_real = latest;

        let frame = self.delta_frame(ctx);
        self.buffer.clear();
        self.buffer.push(CLC_MOVE);
        let checksum_index = ctx.protocol.uses_checksum().then(|| {
            self.buffer.push(0);
            self.buffer.len() - 1
        });
        self.buffer.extend_from_slice(&frame.to_le_bytes());

        let mut from = Command::BLANK;
        for number in [latest - 2, latest - 1, latest] {
            let cmd = history.command(number);
            write_classic_delta(&mut self.buffer, &from, &cmd);
            self.buffer.push(ctx.light_level);
            from = cmd;
        }

        if let Some(index) = checksum_index {
            let checksum = self
                .buffer
                .get(index + 1..)
                .map_or(0, |body| sequence_checksum(body, sequence));
            if let Some(slot) = self.buffer.get_mut(index) {
                *slot = checksum;
            }
        }

        let (sequence, bytes) = self.flush_to(transport);
        trace!("Sent {} bytes under {} (command {})", bytes, sequence, latest);
        TransmitOutcome::Sent {
            sequence,
            bytes,
            commands: 3,
        }
    }

    fn send_batched<T: Transport + ?Sized>(
        &mut self,
        ctx: &TransmitContext,
        history: &mut CommandHistory,
        transport: &mut T,
        now: Timestamp,
    ) -> TransmitOutcome {
        if !self.ready_to_send(transport, now) {
            trace!("Throttled at {}", now);
            return TransmitOutcome::Throttled;
        }

        let latest = history.latest();
        let sequence = self.state.sequence;
        history.record_send(sequence, latest, now);
        self.state.last_transmit_time = now;
        self.state.last_transmit_command = latest;
        self.state.last_transmit_command_real = latest;

        let window = self.window();
        let mut groups: SmallVec<[(CommandNumber, u32); MAX_PACKET_FRAMES]> = SmallVec::new();
        for offset in (0..=window).rev() {
            let slot = sequence - offset;
            let old = history.sent_command(slot - 1);
            let new = history.sent_command(slot);
            let count = new - old;
            let problem = if count >= MAX_PACKET_USERCMDS {
                Some(format!(
                    "{} commands in one batched slot, limit is {}",
                    count,
                    MAX_PACKET_USERCMDS - 1
                ))
            } else if count > 0 && !history.contains(old + 1) {
                Some(format!(
                    "command {} of batched slot already overwritten (history holds {})",
                    old + 1,
                    history.capacity()
                ))
            } else {
                None
            };
            if let Some(message) = problem {
                let violation = UplinkViolation::new(
                    ViolationSeverity::Error,
                    ViolationKind::Encoding,
                    message,
                    concat!(file!(), ":", line!()),
                )
                .with_sequence(slot)
                .with_command(new);
                report_to_observer(self.observer.as_ref(), &violation);

                self.buffer.clear();
                let (sequence, _) = self.flush_to(transport);
                return TransmitOutcome::Overflow { sequence };
            }
            groups.push((old, count));
        }

        self.buffer.clear();
        let window_bits = (window << SVCMD_BITS) as u8;
        let frame = self.delta_frame(ctx);
        if frame == NULL_SERVER_FRAME {
            self.buffer.push(CLC_MOVE_NODELTA | window_bits);
        } else {
            self.buffer.push(CLC_MOVE_BATCHED | window_bits);
            self.buffer.extend_from_slice(&frame.to_le_bytes());
        }
        self.buffer.push(ctx.light_level);

        let mut total = 0u32;
        let mut writer = BitWriter::new(&mut self.buffer);
        let mut from = Command::BLANK;
        for (old, count) in groups {
            writer.write_bits(count, COUNT_BITS);
            for j in 1..=count {
                let cmd = history.command(old + j);
                write_batched_delta(&mut writer, &from, &cmd);
                from = cmd;
            }
            total += count;
        }
        writer.flush();

        let (sequence, bytes) = self.flush_to(transport);
        trace!(
            "Sent {} bytes under {} ({} commands, window {})",
            bytes,
            sequence,
            total,
            window
        );
        TransmitOutcome::Sent {
            sequence,
            bytes,
            commands: total,
        }
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
    use crate::network::loopback::RecordingTransport;
    use crate::telemetry::CollectingObserver;

    fn active(protocol: PeerProtocol) -> TransmitContext {
        TransmitContext {
            connection: ConnectionState::Active,
            protocol,
            ..TransmitContext::default()
        }
    }

    fn cmd(msec: u8) -> Command {
        Command {
            msec,
            forward: 200.0,
            ..Command::BLANK
        }
    }

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn min_send_interval_two_step_division() {
        assert_eq!(min_send_interval(30), 33);
        assert_eq!(min_send_interval(45), 25);
        assert_eq!(min_send_interval(0), 100);
        assert_eq!(min_send_interval(10), 100);
        assert_eq!(min_send_interval(60), 16);
        assert_eq!(min_send_interval(1000), 1);
        assert_eq!(min_send_interval(2000), 0);
    }

    #[test]
    fn idle_below_connected_and_in_demo() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        history.push(cmd(16));

        let ctx = TransmitContext {
            connection: ConnectionState::Connecting,
            ..TransmitContext::default()
        };
        let outcome = tx.transmit(&ctx, &mut history, &mut transport, at(5000));
        assert_eq!(outcome, Ok(TransmitOutcome::Idle));

        let ctx = TransmitContext {
            demo_playback: true,
            ..active(PeerProtocol::Legacy)
        };
        let outcome = tx.transmit(&ctx, &mut history, &mut transport, at(5000));
        assert_eq!(outcome, Ok(TransmitOutcome::Idle));
        assert!(transport.frames().is_empty());
    }

    #[test]
    fn keepalive_after_interval_when_not_active() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        let ctx = TransmitContext {
            connection: ConnectionState::Connected,
            ..TransmitContext::default()
        };

        assert_eq!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1000)),
            Ok(TransmitOutcome::Idle)
        );
        assert_eq!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1001)),
            Ok(TransmitOutcome::KeepAlive {
                sequence: Sequence::ZERO
            })
        );
        assert_eq!(transport.frames().len(), 1);
        assert!(transport.frames()[0].payload.is_empty());
        assert_eq!(tx.state().last_transmit_time, at(1001));
        assert!(history.entry(Sequence::ZERO).is_some());
    }

    #[test]
    fn pending_reliable_forces_keepalive_while_paused() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        transport.set_pending_reliable(true);
        tx.request_send_now();
        let ctx = TransmitContext {
            paused: true,
            ..active(PeerProtocol::Legacy)
        };

        let outcome = tx.transmit(&ctx, &mut history, &mut transport, at(10));
        assert!(matches!(outcome, Ok(TransmitOutcome::KeepAlive { .. })));
        assert!(!tx.send_now_requested());
    }

    #[test]
    fn idle_without_new_command() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        let outcome = tx.transmit(&active(PeerProtocol::Legacy), &mut history, &mut transport, at(1000));
        assert_eq!(outcome, Ok(TransmitOutcome::Idle));
    }

    #[test]
    fn legacy_single_frame_layout() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        history.push(cmd(16));

        let ctx = TransmitContext {
            light_level: 7,
            ..active(PeerProtocol::Legacy)
        };
        let outcome = tx
            .transmit(&ctx, &mut history, &mut transport, at(1000))
            .unwrap();
        let payload = &transport.frames()[0].payload;
        assert_eq!(
            outcome,
            TransmitOutcome::Sent {
                sequence: Sequence::ZERO,
                bytes: payload.len(),
                commands: 3
            }
        );
        assert_eq!(payload[0], CLC_MOVE);
        assert_eq!(payload[1], sequence_checksum(&payload[2..], Sequence::ZERO));
        assert_eq!(&payload[2..6], &(-1i32).to_le_bytes());
        // blank, blank, then the new command; each followed by the light level
        assert_eq!(&payload[6..9], &[0, 0, 7]);
        assert_eq!(&payload[9..12], &[0, 0, 7]);
        assert_eq!(*payload.last().unwrap(), 7);
        assert_eq!(tx.state().sequence, Sequence::new(1));
        assert_eq!(tx.state().last_transmit_command_real, CommandNumber::new(1));
    }

    #[test]
    fn compact_single_frame_has_no_checksum() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        history.push(cmd(16));

        let ctx = TransmitContext {
            server_frame: ServerFrame::new(321),
            ..active(PeerProtocol::Compact)
        };
        tx.transmit(&ctx, &mut history, &mut transport, at(1000))
            .unwrap();
        let payload = &transport.frames()[0].payload;
        assert_eq!(payload[0], CLC_MOVE);
        assert_eq!(&payload[1..5], &321i32.to_le_bytes());
    }

    #[test]
    fn no_delta_forces_null_frame() {
        let config = TransmitConfig {
            no_delta: true,
            ..TransmitConfig::default()
        };
        let mut tx = Transmitter::new(config, None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        history.push(cmd(16));

        let ctx = TransmitContext {
            server_frame: ServerFrame::new(321),
            ..active(PeerProtocol::Compact)
        };
        tx.transmit(&ctx, &mut history, &mut transport, at(1000))
            .unwrap();
        assert_eq!(&transport.frames()[0].payload[1..5], &(-1i32).to_le_bytes());
    }

    #[test]
    fn batched_header_carries_window() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        history.push(cmd(16));

        tx.transmit(&active(PeerProtocol::Batching), &mut history, &mut transport, at(1000))
            .unwrap();
        assert_eq!(transport.frames()[0].payload[0], CLC_MOVE_NODELTA | (1 << 5));

        history.push(cmd(16));
        let ctx = TransmitContext {
            server_frame: ServerFrame::new(9),
            ..active(PeerProtocol::Batching)
        };
        tx.transmit(&ctx, &mut history, &mut transport, at(1100))
            .unwrap();
        let payload = &transport.frames()[1].payload;
        assert_eq!(payload[0], CLC_MOVE_BATCHED | (1 << 5));
        assert_eq!(&payload[1..5], &9i32.to_le_bytes());
    }

    #[test]
    fn batched_rate_limit_and_send_now() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        let ctx = active(PeerProtocol::Batching);

        history.push(cmd(16));
        assert!(matches!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1000)),
            Ok(TransmitOutcome::Sent { .. })
        ));

        history.push(cmd(16));
        assert_eq!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1010)),
            Ok(TransmitOutcome::Throttled)
        );

        tx.request_send_now();
        assert!(matches!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1011)),
            Ok(TransmitOutcome::Sent { .. })
        ));
        assert!(!tx.send_now_requested());

        history.push(cmd(16));
        assert!(matches!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1044)),
            Ok(TransmitOutcome::Sent { .. })
        ));
    }

    #[test]
    fn batched_repeats_previous_slot() {
        let mut tx = Transmitter::new(TransmitConfig::unthrottled(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        let ctx = active(PeerProtocol::Batching);

        history.push(cmd(10));
        history.push(cmd(11));
        let first = tx
            .transmit(&ctx, &mut history, &mut transport, at(1000))
            .unwrap();
        assert!(matches!(first, TransmitOutcome::Sent { commands: 2, .. }));

        history.push(cmd(12));
        let second = tx
            .transmit(&ctx, &mut history, &mut transport, at(1001))
            .unwrap();
        // window 1: the two commands of the previous send plus the new one
        assert!(matches!(second, TransmitOutcome::Sent { commands: 3, .. }));
    }

    #[test]
    fn batched_overflow_sends_empty_frame() {
        let observer = Arc::new(CollectingObserver::new());
        let mut tx = Transmitter::new(
            TransmitConfig::default(),
            Some(observer.clone() as Arc<dyn ViolationObserver>),
        );
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        for _ in 0..32 {
            history.push(cmd(1));
        }

        let outcome = tx
            .transmit(&active(PeerProtocol::Batching), &mut history, &mut transport, at(1000))
            .unwrap();
        assert_eq!(
            outcome,
            TransmitOutcome::Overflow {
                sequence: Sequence::ZERO
            }
        );
        assert!(transport.frames()[0].payload.is_empty());
        assert!(observer.has_violation(ViolationKind::Encoding));
        assert!(observer.has_severity(ViolationSeverity::Error));
        assert_eq!(
            history.sent_command(Sequence::ZERO),
            CommandNumber::new(32)
        );
        assert_eq!(tx.state().sequence, Sequence::new(1));
    }

    #[test]
    fn batched_slot_past_history_is_not_encoded() {
        let observer = Arc::new(CollectingObserver::new());
        let mut tx = Transmitter::new(
            TransmitConfig::unthrottled(),
            Some(observer.clone() as Arc<dyn ViolationObserver>),
        );
        let mut history = CommandHistory::with_capacity(8).unwrap();
        let mut transport = RecordingTransport::new();
        for msec in 1..=20 {
            history.push(cmd(msec));
        }

        let outcome = tx
            .transmit(&active(PeerProtocol::Batching), &mut history, &mut transport, at(1000))
            .unwrap();
        assert_eq!(
            outcome,
            TransmitOutcome::Overflow {
                sequence: Sequence::ZERO
            }
        );
        assert!(transport.frames()[0].payload.is_empty());
        assert!(observer.has_violation(ViolationKind::Encoding));

        // the stale slot repeats once more, then sends resume
        let mut receiver = crate::network::receiver::CommandReceiver::new(PeerProtocol::Batching);
        for msec in 21..=24 {
            history.push(cmd(msec));
            let outcome = tx
                .transmit(&active(PeerProtocol::Batching), &mut history, &mut transport, at(1000))
                .unwrap();
            assert!(outcome.reached_transport());
        }
        let decoded = transport.deliver_to(&mut receiver).unwrap();
        assert!(decoded.iter().all(|c| c.msec != 0));
    }

    #[test]
    fn batched_thirty_one_commands_fit() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        for _ in 0..31 {
            history.push(cmd(1));
        }
        let outcome = tx
            .transmit(&active(PeerProtocol::Batching), &mut history, &mut transport, at(1000))
            .unwrap();
        assert!(matches!(outcome, TransmitOutcome::Sent { commands: 31, .. }));
    }

    #[test]
    fn batching_disabled_falls_back_to_single() {
        let config = TransmitConfig {
            batching_enabled: false,
            ..TransmitConfig::default()
        };
        let mut tx = Transmitter::new(config, None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        history.push(cmd(1));
        tx.transmit(&active(PeerProtocol::Batching), &mut history, &mut transport, at(1000))
            .unwrap();
        assert_eq!(transport.frames()[0].payload[0], CLC_MOVE);
    }

    #[test]
    fn drop_simulation_gives_up_after_backlog() {
        let config = TransmitConfig {
            packet_drop_simulation: true,
            ..TransmitConfig::default()
        };
        let mut tx = Transmitter::new(config, None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        let ctx = active(PeerProtocol::Compact);

        history.push(cmd(1));
        assert!(matches!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1000)),
            Ok(TransmitOutcome::Sent { .. })
        ));
        history.push(cmd(1));
        assert_eq!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1010)),
            Ok(TransmitOutcome::SimulatedDrop {
                sequence: Sequence::new(1)
            })
        );
        history.push(cmd(1));
        assert!(matches!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1011)),
            Ok(TransmitOutcome::SimulatedDrop { .. })
        ));
        history.push(cmd(1));
        assert!(matches!(
            tx.transmit(&ctx, &mut history, &mut transport, at(1012)),
            Ok(TransmitOutcome::Sent {
                sequence: Sequence(3),
                ..
            })
        ));
        assert_eq!(transport.frames().len(), 2);
        assert!(history.entry(Sequence::new(1)).is_some());
    }

    #[test]
    fn sequence_exhaustion_is_fatal() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        tx.state.sequence = Sequence::new(crate::MAX_OUTGOING_SEQUENCE).next();
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        history.push(cmd(1));

        let result = tx.transmit(&active(PeerProtocol::Legacy), &mut history, &mut transport, at(1000));
        assert!(matches!(result, Err(UplinkError::SequenceExhausted { .. })));
        assert!(transport.frames().is_empty());
    }

    #[test]
    fn reliable_overflow_is_fatal_and_clears() {
        let mut tx = Transmitter::new(TransmitConfig::default(), None);
        let mut history = CommandHistory::new();
        let mut transport = RecordingTransport::new();
        transport.set_reliable_overflowed(true);
        history.push(cmd(1));

        let result = tx.transmit(&active(PeerProtocol::Legacy), &mut history, &mut transport, at(1000));
        assert_eq!(result, Err(UplinkError::ReliableOverflow));
        assert_eq!(transport.reliable_clears(), 1);
        assert!(!transport.reliable_overflowed());
    }

    #[test]
    fn window_is_clamped() {
        let config = TransmitConfig {
            redundancy_window: 9,
            ..TransmitConfig::default()
        };
        let tx = Transmitter::new(config, None);
        assert_eq!(tx.window(), 3);
    }

    #[test]
    fn outcome_sequence_accessor() {
        assert_eq!(TransmitOutcome::Idle.sequence(), None);
        let sent = TransmitOutcome::Sent {
            sequence: Sequence::new(4),
            bytes: 3,
            commands: 1,
        };
        assert_eq!(sent.sequence(), Some(Sequence::new(4)));
        assert!(sent.reached_transport());
        assert!(!TransmitOutcome::SimulatedDrop {
            sequence: Sequence::new(1)
        }
        .reached_transport());
    }
}

//! Fixed-size rings of generated commands and send attempts.
//!
//! Both rings are indexed by number modulo [`CMD_BACKUP`], so old entries are simply
//! overwritten as the connection runs. The send ring is what the batched encoder walks to
//! find out which commands each recent send covered.

use crate::command::Command;
use crate::error::{InvalidRequestKind, UplinkError};
use crate::network::codec::MAX_PACKET_FRAMES;
use crate::network::network_stats::UplinkStats;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{CommandNumber, Sequence, Timestamp};

/// Default ring capacity.
pub const CMD_BACKUP: usize = 128;

/// One send attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    /// Sequence the attempt went out under.
    pub sequence: Sequence,
    /// Latest command number at the time of the attempt.
    pub command: CommandNumber,
    /// When the attempt was made.
    pub sent: Timestamp,
    /// When it was acknowledged, if it was.
    pub received: Option<Timestamp>,
}

/// Recent commands and send attempts.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    commands: Vec<Command>,
    sends: Vec<Option<HistoryEntry>>,
    latest: CommandNumber,
    mask: usize,
}

impl CommandHistory {
    /// Creates a history with [`CMD_BACKUP`] slots per ring.
    #[must_use]
    pub fn new() -> Self {
        Self::allocate(CMD_BACKUP)
    }

    /// Creates a history with `capacity` slots per ring.
    ///
    /// # Errors
    /// `capacity` must be a power of two holding at least a full redundancy window plus
    /// its base slot.
    pub fn with_capacity(capacity: usize) -> Result<Self, UplinkError> {
        let min = MAX_PACKET_FRAMES + 1;
        if capacity < min || !capacity.is_power_of_two() {
            return Err(InvalidRequestKind::HistoryCapacityInvalid { capacity, min }.into());
        }
        Ok(Self::allocate(capacity))
    }

    fn allocate(capacity: usize) -> Self {
        Self {
            commands: vec![Command::BLANK; capacity],
            sends: vec![None; capacity],
            latest: CommandNumber::ZERO,
            mask: capacity - 1,
        }
    }

    /// Slots per ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn slot(&self, number: u32) -> usize {
        number as usize & self.mask
    }

    /// Number of the newest command, [`CommandNumber::ZERO`] before the first.
    #[must_use]
    pub const fn latest(&self) -> CommandNumber {
        self.latest
    }

    /// Stores `command` under the next number and returns that number.
    pub fn push(&mut self, command: Command) -> CommandNumber {
        self.latest = self.latest.next();
        let slot = self.slot(self.latest.as_u32());
        self.commands[slot] = command;
        crate::debug_check_invariants!(self);
        self.latest
    }

    /// Returns `true` if `number` can still be read back.
    #[must_use]
    pub fn contains(&self, number: CommandNumber) -> bool {
        let age = self.latest - number;
        (age as usize) < self.capacity() && age < self.latest.as_u32()
    }

    /// The command stored under `number`.
    ///
    /// Numbers before the first command read as [`Command::BLANK`], as does anything that
    /// has already been overwritten.
    #[must_use]
    pub fn command(&self, number: CommandNumber) -> Command {
        if self.contains(number) {
            self.commands[self.slot(number.as_u32())]
        } else {
            Command::BLANK
        }
    }

    /// Archives a send attempt, replacing whatever the slot held.
    pub fn record_send(&mut self, sequence: Sequence, command: CommandNumber, now: Timestamp) {
        let slot = self.slot(sequence.as_u32());
        self.sends[slot] = Some(HistoryEntry {
            sequence,
            command,
            sent: now,
            received: None,
        });
    }

    /// Marks `sequence` as acknowledged.
    ///
    /// Returns `false` if the slot has moved on or the send was already acknowledged.
    pub fn record_receive(&mut self, sequence: Sequence, now: Timestamp) -> bool {
        let slot = self.slot(sequence.as_u32());
        match &mut self.sends[slot] {
            Some(entry) if entry.sequence == sequence && entry.received.is_none() => {
                entry.received = Some(now);
                true
            },
            _ => false,
        }
    }

    /// The send recorded under `sequence`, if its slot still holds it.
    #[must_use]
    pub fn entry(&self, sequence: Sequence) -> Option<&HistoryEntry> {
        self.sends
            .get(self.slot(sequence.as_u32()))
            .and_then(Option::as_ref)
            .filter(|entry| entry.sequence == sequence)
    }

    /// Latest command number at the time of the send under `sequence`.
    ///
    /// Sequences that were never recorded on this connection cover nothing.
    #[must_use]
    pub fn sent_command(&self, sequence: Sequence) -> CommandNumber {
        self.entry(sequence)
            .map_or(CommandNumber::ZERO, |entry| entry.command)
    }

    /// Ping and loss over the sends up to (not including) `outgoing`.
    #[must_use]
    pub fn stats(&self, outgoing: Sequence, now: Timestamp) -> UplinkStats {
        let window = (outgoing.as_u32() as usize).min(self.capacity()) as u32;
        let mut sent = 0u32;
        let mut acked = 0u32;
        let mut total_ping = 0u64;
        let mut last_ping = None;
        let mut last_acked_seq = None;

        for back in 1..=window {
            let sequence = outgoing - back;
            let Some(entry) = self.entry(sequence) else {
                continue;
            };
            sent += 1;
            if let Some(received) = entry.received {
                acked += 1;
                let ping = received.millis_since(entry.sent);
                total_ping += ping;
                if last_acked_seq.map_or(true, |seq| sequence > seq) {
                    last_acked_seq = Some(sequence);
                    last_ping = Some(ping);
                }
            }
        }

        let oldest_unacked = (1..=window)
            .map(|back| outgoing - back)
            .filter_map(|sequence| self.entry(sequence))
            .filter(|entry| entry.received.is_none())
            .map(|entry| now.millis_since(entry.sent))
            .max();

        UplinkStats {
            sends_in_window: sent,
            acks_in_window: acked,
            avg_ping_ms: if acked > 0 {
                Some(total_ping / u64::from(acked))
            } else {
                None
            },
            last_ping_ms: last_ping,
            oldest_unacked_ms: oldest_unacked,
            loss_ratio: if sent > 0 {
                f64::from(sent - acked) / f64::from(sent)
            } else {
                0.0
            },
            latest_command: self.latest,
            outgoing_sequence: outgoing,
        }
    }

    /// Restores the state of a fresh connection.
    pub fn reset(&mut self) {
        self.commands.fill(Command::BLANK);
        self.sends.fill(None);
        self.latest = CommandNumber::ZERO;
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantChecker for CommandHistory {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let capacity = self.capacity();
        if !capacity.is_power_of_two() || capacity < MAX_PACKET_FRAMES + 1 {
            return Err(InvariantViolation::new(
                "CommandHistory",
                "capacity must be a power of two above the redundancy window",
            )
            .with_details(format!("capacity={}", capacity)));
        }
        if self.commands.len() != capacity || self.sends.len() != capacity {
            return Err(InvariantViolation::new(
                "CommandHistory",
                "ring lengths must match capacity",
            )
            .with_details(format!(
                "commands={}, sends={}, capacity={}",
                self.commands.len(),
                self.sends.len(),
                capacity
            )));
        }
        for (slot, entry) in self.sends.iter().enumerate() {
            let Some(entry) = entry else {
                continue;
            };
            if self.slot(entry.sequence.as_u32()) != slot {
                return Err(InvariantViolation::new(
                    "CommandHistory",
                    "send entry stored in the wrong slot",
                )
                .with_details(format!("slot={}, sequence={}", slot, entry.sequence)));
            }
            if entry.received.is_some_and(|received| received < entry.sent) {
                return Err(InvariantViolation::new(
                    "CommandHistory",
                    "acknowledged before it was sent",
                )
                .with_details(format!("sequence={}", entry.sequence)));
            }
        }
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

    fn cmd(msec: u8) -> Command {
        Command {
            msec,
            ..Command::BLANK
        }
    }

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn push_numbers_from_one() {
        let mut history = CommandHistory::new();
        assert_eq!(history.latest(), CommandNumber::ZERO);
        assert_eq!(history.push(cmd(1)), CommandNumber::new(1));
        assert_eq!(history.push(cmd(2)), CommandNumber::new(2));
        assert_eq!(history.command(CommandNumber::new(1)).msec, 1);
        assert_eq!(history.command(CommandNumber::new(2)).msec, 2);
    }

    #[test]
    fn numbers_before_first_read_blank() {
        let mut history = CommandHistory::new();
        history.push(cmd(9));
        assert_eq!(history.command(CommandNumber::ZERO), Command::BLANK);
        assert_eq!(history.command(CommandNumber::ZERO - 1), Command::BLANK);
        assert_eq!(history.command(CommandNumber::new(5)), Command::BLANK);
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut history = CommandHistory::with_capacity(8).unwrap();
        for i in 1..=10u8 {
            history.push(cmd(i));
        }
        assert!(!history.contains(CommandNumber::new(2)));
        assert!(history.contains(CommandNumber::new(3)));
        assert_eq!(history.command(CommandNumber::new(3)).msec, 3);
        assert_eq!(history.command(CommandNumber::new(2)), Command::BLANK);
    }

    #[test]
    fn capacity_validation() {
        assert!(CommandHistory::with_capacity(4).is_err());
        assert!(CommandHistory::with_capacity(12).is_err());
        assert!(CommandHistory::with_capacity(0).is_err());
        assert_eq!(CommandHistory::with_capacity(16).unwrap().capacity(), 16);
    }

    #[test]
    fn receive_matches_sequence_once() {
        let mut history = CommandHistory::new();
        history.record_send(Sequence::new(3), CommandNumber::new(7), t(100));
        assert!(history.record_receive(Sequence::new(3), t(140)));
        assert!(!history.record_receive(Sequence::new(3), t(150)));
        assert!(!history.record_receive(Sequence::new(3 + 128), t(150)));
        assert_eq!(history.entry(Sequence::new(3)).unwrap().received, Some(t(140)));
    }

    #[test]
    fn reused_slot_hides_old_entry() {
        let mut history = CommandHistory::with_capacity(8).unwrap();
        history.record_send(Sequence::new(1), CommandNumber::new(1), t(10));
        history.record_send(Sequence::new(9), CommandNumber::new(4), t(20));
        assert!(history.entry(Sequence::new(1)).is_none());
        assert_eq!(history.sent_command(Sequence::new(9)), CommandNumber::new(4));
        assert_eq!(history.sent_command(Sequence::new(1)), CommandNumber::ZERO);
    }

    #[test]
    fn stats_report_ping_and_loss() {
        let mut history = CommandHistory::new();
        for seq in 0..4u32 {
            history.record_send(Sequence::new(seq), CommandNumber::new(seq), t(u64::from(seq) * 10));
        }
        history.record_receive(Sequence::new(0), t(50));
        history.record_receive(Sequence::new(2), t(80));

        let stats = history.stats(Sequence::new(4), t(100));
        assert_eq!(stats.sends_in_window, 4);
        assert_eq!(stats.acks_in_window, 2);
        assert_eq!(stats.avg_ping_ms, Some(55));
        assert_eq!(stats.last_ping_ms, Some(60));
        assert_eq!(stats.loss_ratio, 0.5);
        assert_eq!(stats.oldest_unacked_ms, Some(90));
    }

    #[test]
    fn reset_clears_everything() {
        let mut history = CommandHistory::new();
        history.push(cmd(3));
        history.record_send(Sequence::new(0), CommandNumber::new(1), t(5));
        history.reset();
        assert_eq!(history.latest(), CommandNumber::ZERO);
        assert_eq!(history.command(CommandNumber::new(1)), Command::BLANK);
        assert!(history.entry(Sequence::new(0)).is_none());
        assert!(!history.record_receive(Sequence::new(0), t(9)));
        assert!(history.check_invariants().is_ok());
    }
}

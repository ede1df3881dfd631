use crate::{CommandNumber, Sequence};

/// The `UplinkStats` struct summarizes the recent send window of a session.
///
/// Only sends still inside [`CommandHistory`](crate::CommandHistory) are counted, so the
/// figures describe roughly the last `CMD_BACKUP` sends.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[must_use = "UplinkStats should be inspected or used after being queried"]
pub struct UplinkStats {
    /// Sends (including keepalives and simulated drops) recorded in the window.
    pub sends_in_window: u32,
    /// How many of those were acknowledged.
    pub acks_in_window: u32,
    /// Average round trip of acknowledged sends, in milliseconds.
    pub avg_ping_ms: Option<u64>,
    /// Round trip of the newest acknowledged send, in milliseconds.
    pub last_ping_ms: Option<u64>,
    /// Age of the oldest send still waiting for an acknowledgment, in milliseconds.
    pub oldest_unacked_ms: Option<u64>,
    /// Fraction of sends in the window without an acknowledgment, in `[0, 1]`.
    ///
    /// Sends that are simply still in flight count as lost until acknowledged.
    pub loss_ratio: f64,
    /// Newest command number generated.
    pub latest_command: CommandNumber,
    /// Next outgoing sequence.
    pub outgoing_sequence: Sequence,
}

impl UplinkStats {
    /// Creates a new `UplinkStats` instance with default values.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for UplinkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            sends_in_window,
            acks_in_window,
            avg_ping_ms,
            last_ping_ms,
            oldest_unacked_ms,
            loss_ratio,
            latest_command,
            outgoing_sequence,
        } = self;

        write!(
            f,
            "UplinkStats {{ seq: {}, cmd: {}, acked: {}/{}, loss: {:.1}%",
            outgoing_sequence,
            latest_command,
            acks_in_window,
            sends_in_window,
            loss_ratio * 100.0
        )?;

        write!(f, ", ping: ")?;
        match (avg_ping_ms, last_ping_ms) {
            (Some(avg), Some(last)) => write!(f, "{}ms (last {}ms)", avg, last)?,
            (Some(avg), None) => write!(f, "{}ms", avg)?,
            _ => write!(f, "None")?,
        }

        if let Some(oldest) = oldest_unacked_ms {
            write!(f, ", oldest_unacked: {}ms", oldest)?;
        }

        write!(f, " }}")
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
    fn test_uplink_stats_default() {
        let stats = UplinkStats::new();
        assert_eq!(stats.sends_in_window, 0);
        assert_eq!(stats.avg_ping_ms, None);
        assert_eq!(stats.latest_command, CommandNumber::ZERO);
    }

    #[test]
    fn test_display_without_pings() {
        let display = UplinkStats::default().to_string();
        assert_eq!(
            display,
            "UplinkStats { seq: 0, cmd: 0, acked: 0/0, loss: 0.0%, ping: None }"
        );
    }

    #[test]
    fn test_display_with_pings() {
        let stats = UplinkStats {
            sends_in_window: 4,
            acks_in_window: 3,
            avg_ping_ms: Some(48),
            last_ping_ms: Some(52),
            oldest_unacked_ms: Some(120),
            loss_ratio: 0.25,
            latest_command: CommandNumber::new(90),
            outgoing_sequence: Sequence::new(4),
        };
        let display = stats.to_string();
        assert!(display.contains("acked: 3/4"));
        assert!(display.contains("loss: 25.0%"));
        assert!(display.contains("48ms (last 52ms)"));
        assert!(display.contains("oldest_unacked: 120ms"));
    }
}

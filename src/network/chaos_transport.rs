//! A configurable transport wrapper for network fault injection testing.
//!
//! [`ChaosTransport`] wraps any [`Transport`] and loses or duplicates outgoing frames
//! before they reach it. The uplink's redundancy window exists to survive exactly this,
//! so the wrapper is how tests and soak runs check that commands still get through.
//!
//! # Example
//!
//! ```rust
//! use cmd_uplink::{ChaosConfig, ChaosTransport, RecordingTransport, Sequence, Transport};
//!
//! let config = ChaosConfig::builder()
//!     .packet_loss_rate(0.25)
//!     .drop_sequence(Sequence::new(0))
//!     .seed(42) // deterministic for testing
//!     .build();
//!
//! let mut transport = ChaosTransport::new(RecordingTransport::new(), config);
//! transport.send(Sequence::new(0), &[2]);
//! assert!(transport.inner().frames().is_empty());
//! ```
//!
//! # Features
//!
//! - **Packet Loss**: independent drop rate per frame
//! - **Burst Loss**: runs of consecutive drops
//! - **Scripted Drops**: exact sequences to lose
//! - **Duplication**: frames delivered twice
//! - **Deterministic**: seeded [`Pcg32`] for reproducible scenarios

use std::collections::BTreeSet;

use tracing::trace;

use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::{Sequence, Transport};

/// Configuration for network chaos simulation.
///
/// Use [`ChaosConfig::builder()`] for a fluent configuration API.
/// All rates default to 0.0 (no effect).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaosConfig {
    /// Probability of dropping a frame (0.0 - 1.0, default: 0.0)
    pub send_loss_rate: f64,

    /// Probability of duplicating a frame (0.0 - 1.0, default: 0.0)
    pub duplication_rate: f64,

    /// Probability of starting a burst loss event (0.0 - 1.0, default: 0.0)
    /// When triggered, drops `burst_loss_length` consecutive frames
    pub burst_loss_probability: f64,

    /// Number of consecutive frames to drop during a burst loss event (default: 0)
    pub burst_loss_length: usize,

    /// Sequences that are always dropped, whatever the rates say.
    pub drop_sequences: BTreeSet<Sequence>,

    /// Random seed for deterministic behavior (default: clock-derived)
    pub seed: Option<u64>,
}

impl ChaosConfig {
    /// Creates a new builder for fluent configuration.
    pub fn builder() -> ChaosConfigBuilder {
        ChaosConfigBuilder::new()
    }

    /// Creates a config with no chaos (passthrough mode).
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Creates a config simulating packet loss.
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            send_loss_rate: loss_rate.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Creates a config simulating typical poor network conditions.
    pub fn poor_network() -> Self {
        Self {
            send_loss_rate: 0.05,
            duplication_rate: 0.01,
            ..Default::default()
        }
    }

    /// Creates a config simulating very bad network conditions.
    pub fn terrible_network() -> Self {
        Self {
            send_loss_rate: 0.15,
            duplication_rate: 0.02,
            burst_loss_probability: 0.05,
            burst_loss_length: 3,
            ..Default::default()
        }
    }
}

/// Builder for [`ChaosConfig`].
#[derive(Debug, Clone, Default)]
pub struct ChaosConfigBuilder {
    config: ChaosConfig,
}

impl ChaosConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the frame loss rate.
    pub fn packet_loss_rate(mut self, rate: f64) -> Self {
        self.config.send_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the frame duplication rate.
    pub fn duplication_rate(mut self, rate: f64) -> Self {
        self.config.duplication_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets burst loss parameters.
    ///
    /// When a burst is triggered (with `probability`), `length` consecutive
    /// frames will be dropped.
    pub fn burst_loss(mut self, probability: f64, length: usize) -> Self {
        self.config.burst_loss_probability = probability.clamp(0.0, 1.0);
        self.config.burst_loss_length = length;
        self
    }

    /// Always drops the frame sent under `sequence`.
    pub fn drop_sequence(mut self, sequence: Sequence) -> Self {
        self.config.drop_sequences.insert(sequence);
        self
    }

    /// Always drops the frames sent under each of `sequences`.
    pub fn drop_sequences(mut self, sequences: impl IntoIterator<Item = Sequence>) -> Self {
        self.config.drop_sequences.extend(sequences);
        self
    }

    /// Sets the random seed for deterministic behavior.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ChaosConfig {
        self.config
    }
}

/// Statistics about chaos transport behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosStats {
    /// Total frames handed to the wrapper
    pub frames_sent: u64,
    /// Frames dropped by the random loss rate
    pub frames_dropped_random: u64,
    /// Frames dropped because their sequence was scripted
    pub frames_dropped_scripted: u64,
    /// Frames duplicated
    pub frames_duplicated: u64,
    /// Number of burst loss events triggered
    pub burst_loss_events: u64,
    /// Frames dropped due to burst loss
    pub frames_dropped_burst: u64,
}

impl ChaosStats {
    /// Frames that never reached the inner transport.
    #[must_use]
    pub const fn frames_dropped(&self) -> u64 {
        self.frames_dropped_random + self.frames_dropped_scripted + self.frames_dropped_burst
    }
}

/// A transport wrapper that injects configurable network chaos.
///
/// # Thread Safety
///
/// When the `sync-send` feature is enabled, `ChaosTransport` is `Send + Sync`
/// whenever the inner transport is.
#[derive(Debug, Clone)]
pub struct ChaosTransport<T: Transport> {
    inner: T,
    config: ChaosConfig,
    rng: Pcg32,

    /// Remaining frames to drop in current burst loss event
    burst_loss_remaining: usize,

    /// Statistics tracking
    stats: ChaosStats,
}

impl<T: Transport> ChaosTransport<T> {
    /// Creates a new chaos transport wrapping the given inner transport.
    pub fn new(inner: T, config: ChaosConfig) -> Self {
        let seed = config.seed.unwrap_or_else(clock_seed);
        Self {
            inner,
            config,
            rng: Pcg32::seed_from_u64(seed),
            burst_loss_remaining: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Returns a reference to the inner transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Returns a mutable reference to the inner transport.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consumes the chaos transport and returns the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Returns the current chaos configuration.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Updates the chaos configuration.
    pub fn set_config(&mut self, config: ChaosConfig) {
        self.config = config;
    }

    /// Returns statistics about chaos behavior.
    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    /// Resets statistics counters.
    pub fn reset_stats(&mut self) {
        self.stats = ChaosStats::default();
    }

    /// Determines if an event with the given probability fires.
    fn roll(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            false
        } else {
            self.rng.gen_bool(rate)
        }
    }

    /// Determines if a frame should be dropped due to burst loss.
    /// Returns true if the frame should be dropped.
    fn should_drop_burst(&mut self) -> bool {
        // If we're in a burst, continue dropping
        if self.burst_loss_remaining > 0 {
            self.burst_loss_remaining -= 1;
            self.stats.frames_dropped_burst += 1;
            return true;
        }

        // Check if we should start a new burst
        if self.config.burst_loss_length > 0 && self.roll(self.config.burst_loss_probability) {
            self.stats.burst_loss_events += 1;
            // Drop this frame and set up remaining burst
            self.burst_loss_remaining = self.config.burst_loss_length.saturating_sub(1);
            self.stats.frames_dropped_burst += 1;
            return true;
        }

        false
    }
}

/// Seed for configs that did not pin one.
fn clock_seed() -> u64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64)
}

impl<T: Transport> Transport for ChaosTransport<T> {
    fn send(&mut self, sequence: Sequence, payload: &[u8]) {
        self.stats.frames_sent += 1;

        if self.config.drop_sequences.contains(&sequence) {
            self.stats.frames_dropped_scripted += 1;
            trace!("Dropping scripted frame {}", sequence);
            return;
        }

        // Check for burst loss first (takes priority)
        if self.should_drop_burst() {
            return;
        }

        if self.roll(self.config.send_loss_rate) {
            self.stats.frames_dropped_random += 1;
            trace!("Dropping frame {}", sequence);
            return;
        }

        self.inner.send(sequence, payload);

        if self.roll(self.config.duplication_rate) {
            self.stats.frames_duplicated += 1;
            self.inner.send(sequence, payload);
        }
    }

    fn has_pending_reliable(&self) -> bool {
        self.inner.has_pending_reliable()
    }

    fn reliable_overflowed(&self) -> bool {
        self.inner.reliable_overflowed()
    }

    fn clear_reliable(&mut self) {
        self.inner.clear_reliable();
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

    fn chaos(config: ChaosConfig) -> ChaosTransport<RecordingTransport> {
        ChaosTransport::new(RecordingTransport::new(), config)
    }

    fn send_many(transport: &mut ChaosTransport<RecordingTransport>, count: u32) {
        for seq in 0..count {
            transport.send(Sequence::new(seq), &[2, seq as u8]);
        }
    }

    #[test]
    fn test_passthrough_mode() {
        let mut transport = chaos(ChaosConfig::passthrough());
        send_many(&mut transport, 20);
        assert_eq!(transport.inner().frames().len(), 20);
        assert_eq!(transport.stats().frames_dropped(), 0);
    }

    #[test]
    fn test_packet_loss_100_percent() {
        let mut transport = chaos(ChaosConfig::lossy(1.0));
        send_many(&mut transport, 10);
        assert!(transport.inner().frames().is_empty());
        assert_eq!(transport.stats().frames_dropped_random, 10);
    }

    #[test]
    fn test_packet_loss_partial() {
        let config = ChaosConfig::builder()
            .packet_loss_rate(0.5)
            .seed(42)
            .build();
        let mut transport = chaos(config);
        send_many(&mut transport, 1000);
        let delivered = transport.inner().frames().len();
        assert!(
            (350..=650).contains(&delivered),
            "expected roughly half delivered, got {}",
            delivered
        );
    }

    #[test]
    fn test_scripted_drops() {
        let config = ChaosConfig::builder()
            .drop_sequences([Sequence::new(1), Sequence::new(2)])
            .seed(1)
            .build();
        let mut transport = chaos(config);
        send_many(&mut transport, 4);
        let delivered: Vec<_> = transport
            .inner()
            .frames()
            .iter()
            .map(|frame| frame.sequence.as_u32())
            .collect();
        assert_eq!(delivered, vec![0, 3]);
        assert_eq!(transport.stats().frames_dropped_scripted, 2);
    }

    #[test]
    fn test_duplication() {
        let config = ChaosConfig::builder()
            .duplication_rate(1.0)
            .seed(3)
            .build();
        let mut transport = chaos(config);
        send_many(&mut transport, 5);
        assert_eq!(transport.inner().frames().len(), 10);
        assert_eq!(transport.stats().frames_duplicated, 5);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let config = ChaosConfig::builder()
            .packet_loss_rate(0.3)
            .seed(12345)
            .build();
        let mut a = chaos(config.clone());
        let mut b = chaos(config);
        send_many(&mut a, 200);
        send_many(&mut b, 200);
        assert_eq!(a.inner().frames(), b.inner().frames());
    }

    #[test]
    fn test_loss_rate_clamping() {
        let config = ChaosConfig::builder()
            .packet_loss_rate(1.5)
            .duplication_rate(-0.5)
            .build();
        assert!((config.send_loss_rate - 1.0).abs() < f64::EPSILON);
        assert!(config.duplication_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_burst_loss_drops_consecutive_packets() {
        let config = ChaosConfig::builder()
            .burst_loss(1.0, 3)
            .seed(7)
            .build();
        let mut transport = chaos(config);
        send_many(&mut transport, 6);
        assert!(transport.inner().frames().is_empty());
        assert_eq!(transport.stats().burst_loss_events, 2);
        assert_eq!(transport.stats().frames_dropped_burst, 6);
    }

    #[test]
    fn test_reliable_flags_forwarded() {
        let mut transport = chaos(ChaosConfig::passthrough());
        transport.inner_mut().set_pending_reliable(true);
        assert!(transport.has_pending_reliable());
        transport.inner_mut().set_reliable_overflowed(true);
        assert!(transport.reliable_overflowed());
        transport.clear_reliable();
        assert_eq!(transport.inner().reliable_clears(), 1);
        transport.reset_stats();
        assert_eq!(*transport.stats(), ChaosStats::default());
    }
}

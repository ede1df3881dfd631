//! In-memory [`Transport`] that records every frame handed to it.

use crate::command::Command;
use crate::network::codec::CodecError;
use crate::network::receiver::CommandReceiver;
use crate::{Sequence, Transport};

/// One frame handed to a [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    /// Sequence the frame was sent under.
    pub sequence: Sequence,
    /// Encoded payload. Empty for keepalives.
    pub payload: Vec<u8>,
}

impl OutgoingFrame {
    /// Returns `true` for keepalive (and overflow) frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A [`Transport`] that keeps frames in memory instead of sending them.
///
/// The reliable-channel flags are plain settable booleans, so tests can drive the
/// keepalive and overflow paths.
///
/// # Examples
///
/// ```
/// use cmd_uplink::{RecordingTransport, Sequence, Transport};
///
/// let mut transport = RecordingTransport::new();
/// transport.send(Sequence::new(0), &[2, 0]);
/// assert_eq!(transport.frames().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    frames: Vec<OutgoingFrame>,
    pending_reliable: bool,
    reliable_overflowed: bool,
    reliable_clears: usize,
}

impl RecordingTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames recorded so far, oldest first.
    #[must_use]
    pub fn frames(&self) -> &[OutgoingFrame] {
        &self.frames
    }

    /// The newest frame, if any.
    #[must_use]
    pub fn last_frame(&self) -> Option<&OutgoingFrame> {
        self.frames.last()
    }

    /// Removes and returns all recorded frames.
    pub fn take_frames(&mut self) -> Vec<OutgoingFrame> {
        std::mem::take(&mut self.frames)
    }

    /// Sets whether reliable data is reported as pending.
    pub fn set_pending_reliable(&mut self, pending: bool) {
        self.pending_reliable = pending;
    }

    /// Sets whether the reliable buffer is reported as overflowed.
    pub fn set_reliable_overflowed(&mut self, overflowed: bool) {
        self.reliable_overflowed = overflowed;
    }

    /// How many times [`Transport::clear_reliable`] was called.
    #[must_use]
    pub const fn reliable_clears(&self) -> usize {
        self.reliable_clears
    }

    /// Feeds every recorded frame to `receiver` in order, draining the transport.
    ///
    /// Returns the commands the receiver recovered, oldest first.
    pub fn deliver_to(&mut self, receiver: &mut CommandReceiver) -> Result<Vec<Command>, CodecError> {
        let mut commands = Vec::new();
        for frame in self.take_frames() {
            if let Some(batch) = receiver.receive(frame.sequence, &frame.payload)? {
                commands.extend(batch.commands);
            }
        }
        Ok(commands)
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, sequence: Sequence, payload: &[u8]) {
        self.frames.push(OutgoingFrame {
            sequence,
            payload: payload.to_vec(),
        });
    }

    fn has_pending_reliable(&self) -> bool {
        self.pending_reliable
    }

    fn reliable_overflowed(&self) -> bool {
        self.reliable_overflowed
    }

    fn clear_reliable(&mut self) {
        self.pending_reliable = false;
        self.reliable_overflowed = false;
        self.reliable_clears += 1;
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
    use crate::PeerProtocol;

    #[test]
    fn records_in_order() {
        let mut transport = RecordingTransport::new();
        transport.send(Sequence::new(0), &[]);
        transport.send(Sequence::new(1), &[1, 2]);
        assert_eq!(transport.frames().len(), 2);
        assert!(transport.frames()[0].is_empty());
        assert_eq!(transport.last_frame().unwrap().payload, vec![1, 2]);
        assert_eq!(transport.take_frames().len(), 2);
        assert!(transport.frames().is_empty());
    }

    #[test]
    fn clear_reliable_resets_flags() {
        let mut transport = RecordingTransport::new();
        transport.set_pending_reliable(true);
        transport.set_reliable_overflowed(true);
        transport.clear_reliable();
        assert!(!transport.has_pending_reliable());
        assert!(!transport.reliable_overflowed());
        assert_eq!(transport.reliable_clears(), 1);
    }

    #[test]
    fn deliver_skips_keepalives() {
        let mut transport = RecordingTransport::new();
        transport.send(Sequence::new(0), &[]);
        transport.send(Sequence::new(1), &[]);
        let mut receiver = CommandReceiver::new(PeerProtocol::Batching);
        assert!(transport.deliver_to(&mut receiver).unwrap().is_empty());
        assert_eq!(receiver.expected_sequence(), Sequence::new(2));
    }
}

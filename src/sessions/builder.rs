use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    assembler::MoveAssembler,
    buttons::{Action, ActionSet},
    error::InvalidRequestKind,
    history::{CommandHistory, CMD_BACKUP},
    sessions::config::{AnalogConfig, MoveConfig, PointerConfig, TransmitConfig},
    telemetry::ViolationObserver,
    PeerProtocol, Transport, UplinkError, UplinkSession,
};

/// Actions that request an immediate send when pressed.
///
/// Firing and using are the inputs where a frame of extra latency is most noticeable.
const DEFAULT_INSTANT_SEND_ACTIONS: [Action; 2] = [Action::Attack, Action::Use];
/// Wire capability assumed until the server says otherwise.
const DEFAULT_PEER_PROTOCOL: PeerProtocol = PeerProtocol::Legacy;
const DEFAULT_HISTORY_CAPACITY: usize = CMD_BACKUP;

/// The [`SessionBuilder`] builds an [`UplinkSession`].
///
/// After setting all appropriate values, use [`SessionBuilder::start_session`] to consume
/// the builder and hand it the transport.
///
/// # Examples
///
/// ```
/// use cmd_uplink::{PeerProtocol, RecordingTransport, SessionBuilder, TransmitConfig};
///
/// let session = SessionBuilder::new()
///     .with_transmit_config(TransmitConfig::lossy())
///     .with_peer_protocol(PeerProtocol::Batching)
///     .start_session(RecordingTransport::new())?;
/// assert_eq!(session.peer_protocol(), PeerProtocol::Batching);
/// # Ok::<(), cmd_uplink::UplinkError>(())
/// ```
#[must_use = "SessionBuilder must be consumed by calling start_session"]
pub struct SessionBuilder {
    /// Configuration for send pacing and frame layout.
    transmit_config: TransmitConfig,
    /// Configuration for keyboard movement and turning.
    move_config: MoveConfig,
    /// Configuration for pointer (mouse) input.
    pointer_config: PointerConfig,
    /// Configuration for analog sticks.
    analog_config: AnalogConfig,
    tracked_actions: SmallVec<[Action; Action::COUNT]>,
    instant_send_actions: SmallVec<[Action; 4]>,
    peer_protocol: PeerProtocol,
    history_capacity: usize,
    /// Optional observer for violations.
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        // The compiler will error if a new field is added but not handled here.
        let Self {
            transmit_config,
            move_config,
            pointer_config,
            analog_config,
            tracked_actions,
            instant_send_actions,
            peer_protocol,
            history_capacity,
            violation_observer,
        } = self;

        f.debug_struct("SessionBuilder")
            .field("transmit_config", transmit_config)
            .field("move_config", move_config)
            .field("pointer_config", pointer_config)
            .field("analog_config", analog_config)
            .field("tracked_actions", tracked_actions)
            .field("instant_send_actions", instant_send_actions)
            .field("peer_protocol", peer_protocol)
            .field("history_capacity", history_capacity)
            .field("has_violation_observer", &violation_observer.is_some())
            .finish()
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Construct a new builder with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            transmit_config: TransmitConfig::default(),
            move_config: MoveConfig::default(),
            pointer_config: PointerConfig::default(),
            analog_config: AnalogConfig::default(),
            tracked_actions: Action::ALL.into_iter().collect(),
            instant_send_actions: DEFAULT_INSTANT_SEND_ACTIONS.into_iter().collect(),
            peer_protocol: DEFAULT_PEER_PROTOCOL,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            violation_observer: None,
        }
    }

    /// Sets send pacing and frame layout.
    ///
    /// # Example
    ///
    /// ```
    /// use cmd_uplink::{SessionBuilder, TransmitConfig};
    ///
    /// let builder = SessionBuilder::new().with_transmit_config(TransmitConfig::lan());
    /// ```
    pub fn with_transmit_config(mut self, transmit_config: TransmitConfig) -> Self {
        self.transmit_config = transmit_config;
        self
    }

    /// Sets keyboard movement and turning tuning.
    pub fn with_move_config(mut self, move_config: MoveConfig) -> Self {
        self.move_config = move_config;
        self
    }

    /// Sets pointer tuning.
    pub fn with_pointer_config(mut self, pointer_config: PointerConfig) -> Self {
        self.pointer_config = pointer_config;
        self
    }

    /// Sets analog stick tuning.
    pub fn with_analog_config(mut self, analog_config: AnalogConfig) -> Self {
        self.analog_config = analog_config;
        self
    }

    /// Restricts the session to the given actions. Input for any other action is rejected.
    ///
    /// # Errors
    /// Returns [`InvalidRequest`] if `actions` is empty.
    ///
    /// [`InvalidRequest`]: UplinkError::InvalidRequest
    pub fn with_tracked_actions(
        mut self,
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<Self, UplinkError> {
        let mut tracked: SmallVec<[Action; Action::COUNT]> = actions.into_iter().collect();
        tracked.sort_unstable();
        tracked.dedup();
        if tracked.is_empty() {
            return Err(InvalidRequestKind::NoTrackedActions.into());
        }
        self.tracked_actions = tracked;
        Ok(self)
    }

    /// Sets which actions request an immediate send when pressed. Default is attack and use.
    ///
    /// Has no effect unless [`TransmitConfig::instant_send`] is on.
    pub fn with_instant_send_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.instant_send_actions = actions.into_iter().collect();
        self
    }

    /// Sets the wire capability of the peer. Default is [`PeerProtocol::Legacy`].
    pub fn with_peer_protocol(mut self, protocol: PeerProtocol) -> Self {
        self.peer_protocol = protocol;
        self
    }

    /// Sets the number of commands and sends kept for redundancy and ping.
    /// Must be a power of two. Checked when the session starts.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets a custom observer for violations.
    ///
    /// Rejected key presses, batch overflows and fatal transport conditions are reported
    /// to this observer. If no observer is set, violations are logged via `tracing`.
    ///
    /// # Example
    ///
    /// ```
    /// use cmd_uplink::{SessionBuilder, telemetry::CollectingObserver};
    /// use std::sync::Arc;
    ///
    /// let observer = Arc::new(CollectingObserver::new());
    /// let builder = SessionBuilder::new().with_violation_observer(observer.clone());
    /// ```
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Consumes the builder to construct an [`UplinkSession`] on top of `transport`.
    ///
    /// The session starts [`Disconnected`](crate::ConnectionState::Disconnected).
    ///
    /// # Errors
    /// Returns [`InvalidRequest`] if any config fails validation or the history capacity
    /// is not a power of two large enough for the redundancy window.
    ///
    /// [`InvalidRequest`]: UplinkError::InvalidRequest
    pub fn start_session<T: Transport>(self, transport: T) -> Result<UplinkSession<T>, UplinkError> {
        self.transmit_config.validate()?;
        self.move_config.validate()?;
        self.pointer_config.validate()?;
        self.analog_config.validate()?;
        let history = CommandHistory::with_capacity(self.history_capacity)?;

        let assembler = MoveAssembler::new(self.move_config, self.pointer_config, self.analog_config);
        Ok(UplinkSession::new(
            transport,
            ActionSet::new(self.tracked_actions),
            self.instant_send_actions,
            assembler,
            history,
            self.transmit_config,
            self.peer_protocol,
            self.violation_observer,
        ))
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
    use crate::{KeyEvent, SourceId, Timestamp};

    #[test]
    fn defaults() {
        let builder = SessionBuilder::new();
        assert_eq!(builder.tracked_actions.len(), Action::COUNT);
        assert_eq!(builder.instant_send_actions.as_slice(), &DEFAULT_INSTANT_SEND_ACTIONS);
        assert_eq!(builder.peer_protocol, PeerProtocol::Legacy);
        assert_eq!(builder.history_capacity, CMD_BACKUP);
    }

    #[test]
    fn empty_tracked_actions_rejected() {
        let result = SessionBuilder::new().with_tracked_actions(Vec::new());
        assert!(matches!(result, Err(UplinkError::InvalidRequest { .. })));
    }

    #[test]
    fn tracked_actions_limit_input() {
        let mut session = SessionBuilder::new()
            .with_tracked_actions([Action::Forward, Action::Forward, Action::Back])
            .unwrap()
            .start_session(RecordingTransport::new())
            .unwrap();
        let now = Timestamp::from_millis(5);
        assert!(session
            .key_down(Action::Forward, KeyEvent::new(SourceId::new(1)), now)
            .is_ok());
        assert!(session
            .key_down(Action::MoveUp, KeyEvent::new(SourceId::new(1)), now)
            .is_err());
        assert_eq!(session.actions().tracked().count(), 2);
    }

    #[test]
    fn invalid_transmit_config_rejected() {
        let mut config = TransmitConfig::default();
        config.redundancy_window = 4;
        let result = SessionBuilder::new()
            .with_transmit_config(config)
            .start_session(RecordingTransport::new());
        assert!(matches!(result, Err(UplinkError::InvalidRequest { .. })));
    }

    #[test]
    fn invalid_history_capacity_rejected() {
        for capacity in [0, 4, 100] {
            let result = SessionBuilder::new()
                .with_history_capacity(capacity)
                .start_session(RecordingTransport::new());
            assert!(
                matches!(result, Err(UplinkError::InvalidRequest { .. })),
                "capacity {capacity} accepted"
            );
        }
        assert!(SessionBuilder::new()
            .with_history_capacity(64)
            .start_session(RecordingTransport::new())
            .is_ok());
    }

    #[test]
    fn debug_hides_observer() {
        let builder = SessionBuilder::new()
            .with_violation_observer(Arc::new(crate::telemetry::CollectingObserver::new()));
        let debug = format!("{builder:?}");
        assert!(debug.contains("has_violation_observer: true"));
        assert!(debug.contains("peer_protocol: Legacy"));
    }
}

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::assembler::{AnalogState, FrameContext, MoveAssembler};
use crate::buttons::{Action, ActionSet, KeyEvent, PressOutcome, Release, ReleaseOutcome};
use crate::error::UplinkError;
use crate::history::CommandHistory;
use crate::network::network_stats::UplinkStats;
use crate::network::transmitter::{TransmitContext, TransmitOutcome, Transmitter};
use crate::sessions::config::TransmitConfig;
use crate::telemetry::{
    report_to_observer, UplinkViolation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::{
    report_violation_to, CommandNumber, ConnectionState, InputFocus, PeerProtocol, Sequence,
    ServerFrame, Timestamp, Transport,
};

/// One client's input-to-network pipeline.
///
/// An [`UplinkSession`] owns the tracked buttons, the move assembler, the command history,
/// the transmitter and the transport. Drive it from your frame loop:
///
/// 1. forward input events as they arrive ([`key_down`], [`key_up`], [`pointer_motion`], ...)
/// 2. [`update`] with the elapsed frame time
/// 3. [`finalize_command`] once per frame
/// 4. [`transmit`] once per frame
///
/// [`run_frame`] does steps 2 to 4 in one call.
///
/// [`key_down`]: Self::key_down
/// [`key_up`]: Self::key_up
/// [`pointer_motion`]: Self::pointer_motion
/// [`update`]: Self::update
/// [`finalize_command`]: Self::finalize_command
/// [`transmit`]: Self::transmit
/// [`run_frame`]: Self::run_frame
pub struct UplinkSession<T: Transport> {
    transport: T,
    actions: ActionSet,
    instant_send_actions: SmallVec<[Action; 4]>,
    assembler: MoveAssembler,
    history: CommandHistory,
    transmitter: Transmitter,
    connection: ConnectionState,
    paused: bool,
    demo_playback: bool,
    focus: InputFocus,
    protocol: PeerProtocol,
    server_frame: ServerFrame,
    light_level: u8,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for UplinkSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            transport,
            actions,
            instant_send_actions,
            assembler,
            history,
            transmitter,
            connection,
            paused,
            demo_playback,
            focus,
            protocol,
            server_frame,
            light_level,
            violation_observer,
        } = self;

        f.debug_struct("UplinkSession")
            .field("transport", transport)
            .field("actions", actions)
            .field("instant_send_actions", instant_send_actions)
            .field("assembler", assembler)
            .field("latest_command", &history.latest())
            .field("transmitter", transmitter)
            .field("connection", connection)
            .field("paused", paused)
            .field("demo_playback", demo_playback)
            .field("focus", focus)
            .field("protocol", protocol)
            .field("server_frame", server_frame)
            .field("light_level", light_level)
            .field("has_violation_observer", &violation_observer.is_some())
            .finish()
    }
}

impl<T: Transport> UplinkSession<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: T,
        actions: ActionSet,
        instant_send_actions: SmallVec<[Action; 4]>,
        assembler: MoveAssembler,
        history: CommandHistory,
        transmit_config: TransmitConfig,
        protocol: PeerProtocol,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
    ) -> Self {
        Self {
            transport,
            actions,
            instant_send_actions,
            assembler,
            history,
            transmitter: Transmitter::new(transmit_config, violation_observer.clone()),
            connection: ConnectionState::Disconnected,
            paused: false,
            demo_playback: false,
            focus: InputFocus::Game,
            protocol,
            server_frame: ServerFrame::NULL,
            light_level: 0,
            violation_observer,
        }
    }

    // ==========================================
    // Connection lifecycle
    // ==========================================

    /// Starts a new connection: sequence, history and server frame start over.
    pub fn connect(&mut self) {
        debug!("Connecting; resetting transmit state and history");
        self.transmitter.reset();
        self.history.reset();
        self.server_frame = ServerFrame::NULL;
        self.connection = ConnectionState::Connecting;
    }

    /// Drops the connection and clears all per-connection state.
    pub fn disconnect(&mut self) {
        debug!(
            "Disconnecting at sequence {}",
            self.transmitter.state().sequence
        );
        self.transmitter.reset();
        self.history.reset();
        self.assembler.reset();
        self.server_frame = ServerFrame::NULL;
        self.paused = false;
        self.connection = ConnectionState::Disconnected;
    }

    /// Moves the connection to `state`. Moving to [`ConnectionState::Disconnected`] is the
    /// same as [`disconnect`](Self::disconnect).
    pub fn set_connection_state(&mut self, state: ConnectionState) {
        if state == ConnectionState::Disconnected {
            self.disconnect();
            return;
        }
        if state != self.connection {
            debug!("Connection state {:?} -> {:?}", self.connection, state);
        }
        self.connection = state;
    }

    /// Current connection state.
    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Marks the game as paused by the server. Only keepalives are sent while paused.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Marks a recording as playing back. Nothing is generated or sent meanwhile.
    pub fn set_demo_playback(&mut self, playing: bool) {
        self.demo_playback = playing;
    }

    /// Routes input to the game, a menu or the console.
    pub fn set_focus(&mut self, focus: InputFocus) {
        self.focus = focus;
    }

    /// Changes the wire capability negotiated with the peer.
    pub fn set_peer_protocol(&mut self, protocol: PeerProtocol) {
        self.protocol = protocol;
    }

    /// Wire capability negotiated with the peer.
    #[must_use]
    pub const fn peer_protocol(&self) -> PeerProtocol {
        self.protocol
    }

    // ==========================================
    // Input
    // ==========================================

    /// Feeds a down event for `action`.
    ///
    /// A third simultaneous source is rejected and reported as an `InputTracking`
    /// warning; the two sources already holding the action keep it.
    ///
    /// # Errors
    /// Returns [`UplinkError::InvalidRequest`] if the session does not track `action`.
    pub fn key_down(
        &mut self,
        action: Action,
        event: KeyEvent,
        now: Timestamp,
    ) -> Result<PressOutcome, UplinkError> {
        let outcome = self.actions.press(action, event, now)?;

        if outcome == PressOutcome::Rejected {
            let held: Vec<String> = self
                .actions
                .get(action)
                .map(|button| button.sources().map(|s| s.to_string()).collect())
                .unwrap_or_default();
            let violation = UplinkViolation::new(
                ViolationSeverity::Warning,
                ViolationKind::InputTracking,
                format!(
                    "three keys held down for {}; ignoring source {}",
                    action, event.source
                ),
                concat!(file!(), ":", line!()),
            )
            .with_context("held_by", held.join(","));
            report_to_observer(self.violation_observer.as_ref(), &violation);
        }

        if self.instant_send_actions.contains(&action)
            && self.transmitter.config().instant_send
            && self.connection == ConnectionState::Active
            && !self.demo_playback
        {
            self.transmitter.request_send_now();
        }
        Ok(outcome)
    }

    /// Feeds an up event (or a forced release) for `action`.
    ///
    /// # Errors
    /// Returns [`UplinkError::InvalidRequest`] if the session does not track `action`.
    pub fn key_up(
        &mut self,
        action: Action,
        release: Release,
        now: Timestamp,
    ) -> Result<ReleaseOutcome, UplinkError> {
        self.actions.release(action, release, now)
    }

    /// Force-releases every tracked action, e.g. when the window loses focus.
    pub fn release_all(&mut self, now: Timestamp) {
        self.actions.release_all(now);
    }

    /// Accumulates raw pointer counts for the current frame.
    pub fn pointer_motion(&mut self, dx: i32, dy: i32) {
        self.assembler.pointer_motion(dx, dy);
    }

    /// Replaces the analog stick state.
    pub fn set_analog(&mut self, state: AnalogState) {
        self.assembler.set_analog(state);
    }

    /// Queues an impulse for the next command.
    pub fn impulse(&mut self, impulse: u8) {
        self.assembler.impulse(impulse);
    }

    /// Starts or stops mouse-look.
    pub fn set_mouse_look(&mut self, looking: bool) {
        self.assembler.set_mouse_look(looking);
    }

    /// Levels the view against the server's baseline pitch.
    pub fn center_view(&mut self) {
        self.assembler.center_view();
    }

    // ==========================================
    // Server state
    // ==========================================

    /// Sets the pitch the server adds to the view, as a 16-bit angle.
    pub fn set_baseline_pitch(&mut self, short: i16) {
        self.assembler.set_baseline_pitch(short);
    }

    /// Sets the light level byte appended to each command.
    pub fn set_light_level(&mut self, level: u8) {
        self.light_level = level;
    }

    /// Records the newest complete server frame for delta compression.
    pub fn set_server_frame(&mut self, frame: ServerFrame) {
        self.server_frame = frame;
    }

    /// Sets the current horizontal and vertical field of view, in degrees.
    pub fn set_view_fov(&mut self, fov_x: f32, fov_y: f32) {
        self.assembler.set_view_fov(fov_x, fov_y);
    }

    // ==========================================
    // Frame driver
    // ==========================================

    fn frame_context(&self) -> FrameContext {
        FrameContext {
            connection: self.connection,
            paused: self.paused,
            focus: self.focus,
        }
    }

    fn transmit_context(&self) -> TransmitContext {
        TransmitContext {
            connection: self.connection,
            paused: self.paused,
            demo_playback: self.demo_playback,
            protocol: self.protocol,
            server_frame: self.server_frame,
            light_level: self.light_level,
        }
    }

    /// Advances the pending command by `msec` milliseconds of input.
    pub fn update(&mut self, msec: u32, now: Timestamp) {
        let ctx = self.frame_context();
        self.assembler.update(&self.actions, msec, &ctx, now);
    }

    /// Closes the current frame's command and stores it in the history.
    ///
    /// Returns the new command's number, or `None` if no command was generated (not in
    /// game, paused, or playing back a recording).
    pub fn finalize_command(&mut self, now: Timestamp) -> Option<CommandNumber> {
        let ctx = self.frame_context();
        let command = self.assembler.finalize(&mut self.actions, &ctx, now)?;
        if self.demo_playback {
            return None;
        }
        Some(self.history.push(command))
    }

    /// Sends whatever this tick calls for.
    ///
    /// # Errors
    /// [`UplinkError::SequenceExhausted`] and [`UplinkError::ReliableOverflow`] are fatal:
    /// the session reports a critical violation and disconnects before returning them.
    pub fn transmit(&mut self, now: Timestamp) -> Result<TransmitOutcome, UplinkError> {
        let ctx = self.transmit_context();
        let result = self
            .transmitter
            .transmit(&ctx, &mut self.history, &mut self.transport, now);

        if let Err(err) = &result {
            if err.is_fatal() {
                report_violation_to!(
                    &self.violation_observer,
                    ViolationSeverity::Critical,
                    ViolationKind::Transmission,
                    "fatal transmit error: {}",
                    err
                );
                self.disconnect();
            }
        }
        result
    }

    /// Runs [`update`](Self::update), [`finalize_command`](Self::finalize_command) and
    /// [`transmit`](Self::transmit) for one frame.
    ///
    /// # Errors
    /// Same as [`transmit`](Self::transmit).
    pub fn run_frame(&mut self, msec: u32, now: Timestamp) -> Result<TransmitOutcome, UplinkError> {
        self.update(msec, now);
        self.finalize_command(now);
        self.transmit(now)
    }

    /// Records the server's acknowledgment of `sequence`.
    ///
    /// Returns `false` if the send is too old to be tracked or was already acknowledged.
    pub fn on_acknowledge(&mut self, sequence: Sequence, now: Timestamp) -> bool {
        self.history.record_receive(sequence, now)
    }

    /// Ping and loss over the recent send window.
    pub fn stats(&self, now: Timestamp) -> UplinkStats {
        self.history.stats(self.transmitter.state().sequence, now)
    }

    // ==========================================
    // Accessors
    // ==========================================

    /// The transport frames are handed to.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Current transmit configuration.
    #[must_use]
    pub const fn transmit_config(&self) -> &TransmitConfig {
        self.transmitter.config()
    }

    /// Mutable transmit configuration. Changes apply from the next [`transmit`](Self::transmit).
    pub fn transmit_config_mut(&mut self) -> &mut TransmitConfig {
        self.transmitter.config_mut()
    }

    /// The transmitter, for inspecting sequence and timing state.
    #[must_use]
    pub const fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    /// Generated commands and send records.
    #[must_use]
    pub const fn history(&self) -> &CommandHistory {
        &self.history
    }

    /// Tracked buttons.
    #[must_use]
    pub const fn actions(&self) -> &ActionSet {
        &self.actions
    }

    /// The move assembler, for view angles and the predicted move.
    #[must_use]
    pub const fn assembler(&self) -> &MoveAssembler {
        &self.assembler
    }

    /// Mutable access to the move assembler, e.g. to retune its configs.
    pub fn assembler_mut(&mut self) -> &mut MoveAssembler {
        &mut self.assembler
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
    use crate::buttons::SourceId;
    use crate::network::loopback::RecordingTransport;
    use crate::sessions::builder::SessionBuilder;
    use crate::telemetry::CollectingObserver;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn active_session() -> UplinkSession<RecordingTransport> {
        let mut session = SessionBuilder::new()
            .start_session(RecordingTransport::new())
            .unwrap();
        session.connect();
        session.set_connection_state(ConnectionState::Active);
        session
    }

    #[test]
    fn new_session_is_disconnected() {
        let session = SessionBuilder::new()
            .start_session(RecordingTransport::new())
            .unwrap();
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.history().latest(), CommandNumber::ZERO);
    }

    #[test]
    fn no_commands_before_active() {
        let mut session = SessionBuilder::new()
            .start_session(RecordingTransport::new())
            .unwrap();
        session.connect();
        session.update(16, at(100));
        assert_eq!(session.finalize_command(at(100)), None);
    }

    #[test]
    fn third_source_reported() {
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::new()
            .with_violation_observer(observer.clone())
            .start_session(RecordingTransport::new())
            .unwrap();
        for id in [5, 7, 9] {
            session
                .key_down(Action::Forward, KeyEvent::new(SourceId::new(id)), at(10))
                .unwrap();
        }
        let violations = observer.violations_of_kind(ViolationKind::InputTracking);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, ViolationSeverity::Warning);
        assert_eq!(
            violations[0].context.get("held_by").map(String::as_str),
            Some("5,7")
        );
    }

    #[test]
    fn instant_send_only_when_active() {
        let mut session = SessionBuilder::new()
            .start_session(RecordingTransport::new())
            .unwrap();
        session
            .key_down(Action::Attack, KeyEvent::new(SourceId::new(1)), at(0))
            .unwrap();
        assert!(!session.transmitter().send_now_requested());

        let mut session = active_session();
        session
            .key_down(Action::Forward, KeyEvent::new(SourceId::new(1)), at(0))
            .unwrap();
        assert!(!session.transmitter().send_now_requested());
        session
            .key_down(Action::Attack, KeyEvent::new(SourceId::new(2)), at(0))
            .unwrap();
        assert!(session.transmitter().send_now_requested());
    }

    #[test]
    fn fatal_error_disconnects() {
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::new()
            .with_violation_observer(observer.clone())
            .start_session(RecordingTransport::new())
            .unwrap();
        session.connect();
        session.set_connection_state(ConnectionState::Active);
        session.transport_mut().set_reliable_overflowed(true);

        session.update(16, at(1000));
        session.finalize_command(at(1000));
        let result = session.transmit(at(1000));
        assert_eq!(result, Err(UplinkError::ReliableOverflow));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.history().latest(), CommandNumber::ZERO);
        assert!(observer.has_severity(ViolationSeverity::Critical));
    }

    #[test]
    fn acknowledge_feeds_stats() {
        let mut session = active_session();
        session.run_frame(16, at(1000)).unwrap();
        assert!(session.on_acknowledge(Sequence::ZERO, at(1040)));
        assert!(!session.on_acknowledge(Sequence::ZERO, at(1050)));

        let stats = session.stats(at(1050));
        assert_eq!(stats.acks_in_window, 1);
        assert_eq!(stats.last_ping_ms, Some(40));
        assert_eq!(stats.outgoing_sequence, Sequence::new(1));
    }

    #[test]
    fn demo_playback_generates_nothing() {
        let mut session = active_session();
        session.set_demo_playback(true);
        assert_eq!(session.run_frame(16, at(1000)), Ok(TransmitOutcome::Idle));
        assert_eq!(session.history().latest(), CommandNumber::ZERO);
        assert!(session.transport().frames().is_empty());
    }

    #[test]
    fn connect_resets_sequence() {
        let mut session = active_session();
        session.run_frame(16, at(1000)).unwrap();
        assert_eq!(session.transmitter().state().sequence, Sequence::new(1));
        session.connect();
        assert_eq!(session.transmitter().state().sequence, Sequence::ZERO);
        assert_eq!(session.connection_state(), ConnectionState::Connecting);
    }
}

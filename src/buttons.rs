//! Hold-state tracking for logical actions.
//!
//! Each [`LogicalButton`] can be held by up to two physical sources at once (say, a key
//! and a mouse button bound to the same action). Edges and held time are kept per frame so
//! the assembler can weight movement by how long a button was actually down.
//!
//! # Example
//!
//! ```
//! use cmd_uplink::{KeyEvent, LogicalButton, PressOutcome, Release, SourceId, Timestamp};
//!
//! let mut button = LogicalButton::new();
//! let down = KeyEvent::new(SourceId::new(5)).at(Timestamp::from_millis(1_000));
//! assert_eq!(button.press(down, Timestamp::from_millis(1_000)), PressOutcome::Pressed);
//!
//! let up = KeyEvent::new(SourceId::new(5)).at(Timestamp::from_millis(1_100));
//! button.release(Release::Source(up), Timestamp::from_millis(1_100));
//!
//! // held for the whole 100 ms frame
//! assert_eq!(button.fraction_down(100, Timestamp::from_millis(1_100)), 1.0);
//! ```

use tracing::trace;

use crate::error::{InvalidRequestKind, UplinkError};
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::Timestamp;

/// Down-time assumed for a press without a timestamp, relative to `now`.
pub const PRESS_WITHOUT_TIMESTAMP_MS: u64 = 100;

/// Held time credited for a release without a usable timestamp.
pub const RELEASE_FALLBACK_MS: u64 = 10;

/// Identifies one physical input (a key code, a mouse button, a pad button).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct SourceId(u32);

impl SourceId {
    /// Creates a source identifier.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        SourceId(id)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A discrete down or up event from one source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    /// The physical source.
    pub source: SourceId,
    /// When the event happened, if the input layer knows.
    pub timestamp: Option<Timestamp>,
}

impl KeyEvent {
    /// Creates an event without a timestamp.
    #[must_use]
    pub const fn new(source: SourceId) -> Self {
        Self {
            source,
            timestamp: None,
        }
    }

    /// Attaches the time the event happened.
    #[must_use]
    pub const fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// How a button is released.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Release {
    /// One source let go.
    Source(KeyEvent),
    /// Drop every source and all state, used to unstick a button.
    Forced,
}

/// Level and edges of a button within the current frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct EdgeState {
    /// At least one source is holding the button.
    pub level: bool,
    /// The button went down during this frame.
    pub rose: bool,
    /// The button went up during this frame.
    pub fell: bool,
}

/// Result of [`LogicalButton::press`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PressOutcome {
    /// The source was already holding the button.
    Repeat,
    /// Two other sources already hold the button; the press was ignored.
    Rejected,
    /// Another source already holds the button; this one now holds it too.
    StillDown,
    /// The button went down.
    Pressed,
}

/// Result of [`LogicalButton::release`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ReleaseOutcome {
    /// All sources and state were dropped.
    Forced,
    /// The other source still holds the button.
    StillHeld,
    /// The button was not down.
    Stray,
    /// The button went up.
    Released,
}

/// Hold state of one logical action.
///
/// Invariant: `edges().level` is true iff at least one source slot is occupied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogicalButton {
    sources: [Option<SourceId>; 2],
    edges: EdgeState,
    down_time: Timestamp,
    accumulated_ms: u64,
}

impl LogicalButton {
    /// Creates a released button.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a down event.
    pub fn press(&mut self, event: KeyEvent, now: Timestamp) -> PressOutcome {
        let source = Some(event.source);
        if self.sources.contains(&source) {
            return PressOutcome::Repeat;
        }

        match self.sources.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = source,
            None => {
                trace!("Two sources already down, rejecting {}", event.source);
                return PressOutcome::Rejected;
            },
        }

        if self.edges.level {
            return PressOutcome::StillDown;
        }

        self.down_time = event
            .timestamp
            .unwrap_or_else(|| now.saturating_sub_millis(PRESS_WITHOUT_TIMESTAMP_MS));
        self.edges.level = true;
        self.edges.rose = true;
        PressOutcome::Pressed
    }

    /// Handles an up event.
    pub fn release(&mut self, release: Release, _now: Timestamp) -> ReleaseOutcome {
        let event = match release {
            Release::Forced => {
                self.sources = [None, None];
                self.edges = EdgeState::default();
                return ReleaseOutcome::Forced;
            },
            Release::Source(event) => event,
        };

        if let Some(slot) = self
            .sources
            .iter_mut()
            .find(|slot| **slot == Some(event.source))
        {
            *slot = None;
        }

        if self.sources.iter().any(Option::is_some) {
            return ReleaseOutcome::StillHeld;
        }
        if !self.edges.level {
            trace!("Stray release from {}", event.source);
            return ReleaseOutcome::Stray;
        }

        self.accumulated_ms += match event.timestamp {
            Some(up) if up > self.down_time => up.millis_since(self.down_time),
            _ => RELEASE_FALLBACK_MS,
        };
        self.edges.level = false;
        self.edges.fell = true;
        ReleaseOutcome::Released
    }

    /// Fraction of a `frame_ms` frame this button was held, in `[0, 1]`.
    ///
    /// A zero-length frame reports the live level.
    #[must_use]
    pub fn fraction_down(&self, frame_ms: u64, now: Timestamp) -> f32 {
        let mut ms = self.accumulated_ms;
        if self.edges.level && now > self.down_time {
            ms += now.millis_since(self.down_time);
        }

        if frame_ms == 0 {
            return if self.edges.level { 1.0 } else { 0.0 };
        }

        (ms as f64 / frame_ms as f64).clamp(0.0, 1.0) as f32
    }

    /// Starts a new frame: drops held time and edges, keeps the level.
    pub fn clear_frame(&mut self, now: Timestamp) {
        self.accumulated_ms = 0;
        self.edges.rose = false;
        self.edges.fell = false;
        if self.edges.level {
            self.down_time = now;
        }
    }

    /// Level and edges for this frame.
    #[must_use]
    pub const fn edges(&self) -> EdgeState {
        self.edges
    }

    /// Returns `true` while any source holds the button.
    #[must_use]
    pub const fn is_down(&self) -> bool {
        self.edges.level
    }

    /// Returns `true` if the button is down now or went down this frame.
    #[must_use]
    pub const fn is_down_or_rose(&self) -> bool {
        self.edges.level || self.edges.rose
    }

    /// Sources currently holding the button.
    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.iter().flatten().copied()
    }

    /// Held time completed within this frame, not counting a hold still in progress.
    #[must_use]
    pub const fn accumulated_ms(&self) -> u64 {
        self.accumulated_ms
    }

    /// When the current hold started (or the frame began, for a carried-over hold).
    #[must_use]
    pub const fn down_time(&self) -> Timestamp {
        self.down_time
    }
}

impl InvariantChecker for LogicalButton {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let occupied = self.sources.iter().filter(|s| s.is_some()).count();
        if self.edges.level != (occupied > 0) {
            return Err(InvariantViolation::new(
                "LogicalButton",
                "level must be set iff a source slot is occupied",
            )
            .with_details(format!("level={}, occupied={}", self.edges.level, occupied)));
        }
        if let [Some(a), Some(b)] = self.sources {
            if a == b {
                return Err(InvariantViolation::new(
                    "LogicalButton",
                    "a source may occupy only one slot",
                )
                .with_details(format!("source={}", a)));
            }
        }
        Ok(())
    }
}

/// Logical actions a player can hold.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Action {
    /// Move forward, or pitch down while keyboard look is held.
    Forward,
    /// Move back, or pitch up while keyboard look is held.
    Back,
    /// Strafe left.
    MoveLeft,
    /// Strafe right.
    MoveRight,
    /// Turn left, or strafe left while Strafe is held.
    Left,
    /// Turn right, or strafe right while Strafe is held.
    Right,
    /// Pitch up.
    LookUp,
    /// Pitch down.
    LookDown,
    /// Jump / swim up.
    MoveUp,
    /// Crouch / swim down.
    MoveDown,
    /// Turns Left/Right and pointer yaw into strafing.
    Strafe,
    /// Toggles running and fast turning.
    Speed,
    /// Reinterprets Forward/Back as pitch.
    KeyboardLook,
    /// Fire.
    Attack,
    /// Use an item.
    Use,
}

impl Action {
    /// Number of actions.
    pub const COUNT: usize = 15;

    /// Every action, in declaration order.
    pub const ALL: [Action; Action::COUNT] = [
        Action::Forward,
        Action::Back,
        Action::MoveLeft,
        Action::MoveRight,
        Action::Left,
        Action::Right,
        Action::LookUp,
        Action::LookDown,
        Action::MoveUp,
        Action::MoveDown,
        Action::Strafe,
        Action::Speed,
        Action::KeyboardLook,
        Action::Attack,
        Action::Use,
    ];

    /// Returns a stable name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Back => "back",
            Self::MoveLeft => "moveleft",
            Self::MoveRight => "moveright",
            Self::Left => "left",
            Self::Right => "right",
            Self::LookUp => "lookup",
            Self::LookDown => "lookdown",
            Self::MoveUp => "moveup",
            Self::MoveDown => "movedown",
            Self::Strafe => "strafe",
            Self::Speed => "speed",
            Self::KeyboardLook => "klook",
            Self::Attack => "attack",
            Self::Use => "use",
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tracked actions of one session, each with its [`LogicalButton`].
///
/// Untracked actions read as released; events for them are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSet {
    buttons: [Option<LogicalButton>; Action::COUNT],
}

impl ActionSet {
    /// Tracks exactly the given actions.
    #[must_use]
    pub fn new(tracked: impl IntoIterator<Item = Action>) -> Self {
        let mut buttons: [Option<LogicalButton>; Action::COUNT] = Default::default();
        for action in tracked {
            if let Some(slot) = buttons.get_mut(action.index()) {
                *slot = Some(LogicalButton::new());
            }
        }
        Self { buttons }
    }

    /// Tracks every [`Action`].
    #[must_use]
    pub fn all() -> Self {
        Self::new(Action::ALL)
    }

    /// Returns `true` if `action` is tracked.
    #[must_use]
    pub fn is_tracked(&self, action: Action) -> bool {
        self.get(action).is_some()
    }

    /// Tracked actions in declaration order.
    pub fn tracked(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ALL
            .into_iter()
            .filter(move |action| self.is_tracked(*action))
    }

    /// The button for `action`, if tracked.
    #[must_use]
    pub fn get(&self, action: Action) -> Option<&LogicalButton> {
        self.buttons.get(action.index()).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, action: Action) -> Result<&mut LogicalButton, UplinkError> {
        self.buttons
            .get_mut(action.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                InvalidRequestKind::UntrackedAction {
                    action: action.as_str(),
                }
                .into()
            })
    }

    /// Routes a down event to the button for `action`.
    ///
    /// # Errors
    /// Returns [`UplinkError::InvalidRequest`] if `action` is not tracked.
    pub fn press(
        &mut self,
        action: Action,
        event: KeyEvent,
        now: Timestamp,
    ) -> Result<PressOutcome, UplinkError> {
        let button = self.get_mut(action)?;
        let outcome = button.press(event, now);
        crate::debug_check_invariants!(button, action);
        Ok(outcome)
    }

    /// Routes an up event to the button for `action`.
    ///
    /// # Errors
    /// Returns [`UplinkError::InvalidRequest`] if `action` is not tracked.
    pub fn release(
        &mut self,
        action: Action,
        release: Release,
        now: Timestamp,
    ) -> Result<ReleaseOutcome, UplinkError> {
        let button = self.get_mut(action)?;
        let outcome = button.release(release, now);
        crate::debug_check_invariants!(button, action);
        Ok(outcome)
    }

    /// Held fraction of `action` over `frame_ms`; 0 for untracked actions.
    #[must_use]
    pub fn fraction(&self, action: Action, frame_ms: u64, now: Timestamp) -> f32 {
        self.get(action)
            .map_or(0.0, |button| button.fraction_down(frame_ms, now))
    }

    /// Returns `true` if `action` is tracked and currently held.
    #[must_use]
    pub fn is_down(&self, action: Action) -> bool {
        self.get(action).is_some_and(LogicalButton::is_down)
    }

    /// Returns `true` if `action` is held or went down this frame.
    #[must_use]
    pub fn is_down_or_rose(&self, action: Action) -> bool {
        self.get(action).is_some_and(LogicalButton::is_down_or_rose)
    }

    /// Any tracked action is held or went down this frame.
    #[must_use]
    pub fn any_down(&self) -> bool {
        self.buttons
            .iter()
            .flatten()
            .any(LogicalButton::is_down_or_rose)
    }

    /// Any tracked action is held.
    #[must_use]
    pub fn any_active(&self) -> bool {
        self.buttons.iter().flatten().any(LogicalButton::is_down)
    }

    /// Starts a new frame on every tracked button.
    pub fn clear_frame(&mut self, now: Timestamp) {
        for button in self.buttons.iter_mut().flatten() {
            button.clear_frame(now);
        }
    }

    /// Force-releases every tracked button.
    pub fn release_all(&mut self, now: Timestamp) {
        for button in self.buttons.iter_mut().flatten() {
            button.release(Release::Forced, now);
        }
    }
}

impl Default for ActionSet {
    fn default() -> Self {
        Self::all()
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

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn ev(source: u32) -> KeyEvent {
        KeyEvent::new(SourceId::new(source))
    }

    #[test]
    fn press_then_repeat() {
        let mut b = LogicalButton::new();
        assert_eq!(b.press(ev(1).at(t(10)), t(10)), PressOutcome::Pressed);
        assert_eq!(b.press(ev(1).at(t(20)), t(20)), PressOutcome::Repeat);
        assert!(b.edges().rose);
        assert_eq!(b.down_time(), t(10));
    }

    #[test]
    fn third_source_is_rejected_and_existing_kept() {
        let mut b = LogicalButton::new();
        assert_eq!(b.press(ev(5), t(0)), PressOutcome::Pressed);
        assert_eq!(b.press(ev(7), t(0)), PressOutcome::StillDown);
        assert_eq!(b.press(ev(9), t(0)), PressOutcome::Rejected);
        let held: Vec<_> = b.sources().collect();
        assert_eq!(held, vec![SourceId::new(5), SourceId::new(7)]);
        assert!(b.check_invariants().is_ok());
    }

    #[test]
    fn press_without_timestamp_backdates() {
        let mut b = LogicalButton::new();
        b.press(ev(1), t(1_000));
        assert_eq!(b.down_time(), t(900));

        let mut early = LogicalButton::new();
        early.press(ev(1), t(30));
        assert_eq!(early.down_time(), Timestamp::ZERO);
    }

    #[test]
    fn release_accumulates_held_time() {
        let mut b = LogicalButton::new();
        b.press(ev(1).at(t(1_000)), t(1_000));
        let outcome = b.release(Release::Source(ev(1).at(t(1_040))), t(1_040));
        assert_eq!(outcome, ReleaseOutcome::Released);
        assert_eq!(b.accumulated_ms(), 40);
        assert!(b.edges().fell);
        assert!(!b.is_down());
    }

    #[test]
    fn release_without_usable_timestamp_uses_fallback() {
        let mut b = LogicalButton::new();
        b.press(ev(1).at(t(500)), t(500));
        b.release(Release::Source(ev(1)), t(600));
        assert_eq!(b.accumulated_ms(), RELEASE_FALLBACK_MS);

        let mut c = LogicalButton::new();
        c.press(ev(1).at(t(500)), t(500));
        c.release(Release::Source(ev(1).at(t(400))), t(600));
        assert_eq!(c.accumulated_ms(), RELEASE_FALLBACK_MS);
    }

    #[test]
    fn release_with_other_source_holding() {
        let mut b = LogicalButton::new();
        b.press(ev(1), t(0));
        b.press(ev(2), t(0));
        assert_eq!(
            b.release(Release::Source(ev(1)), t(5)),
            ReleaseOutcome::StillHeld
        );
        assert!(b.is_down());
        assert_eq!(
            b.release(Release::Source(ev(2)), t(5)),
            ReleaseOutcome::Released
        );
    }

    #[test]
    fn stray_release_is_ignored() {
        let mut b = LogicalButton::new();
        assert_eq!(
            b.release(Release::Source(ev(3)), t(5)),
            ReleaseOutcome::Stray
        );
        assert_eq!(b, LogicalButton::new());
    }

    #[test]
    fn forced_release_clears_everything() {
        let mut b = LogicalButton::new();
        b.press(ev(1), t(100));
        b.press(ev(2), t(100));
        assert_eq!(b.release(Release::Forced, t(150)), ReleaseOutcome::Forced);
        assert_eq!(b.sources().count(), 0);
        assert_eq!(b.edges(), EdgeState::default());
        assert!(b.check_invariants().is_ok());
    }

    #[test]
    fn fraction_for_full_frame_hold() {
        let mut b = LogicalButton::new();
        b.press(ev(1).at(t(1_000)), t(1_000));
        b.release(Release::Source(ev(1).at(t(1_100))), t(1_100));
        assert_eq!(b.fraction_down(100, t(1_100)), 1.0);
    }

    #[test]
    fn fraction_counts_hold_in_progress() {
        let mut b = LogicalButton::new();
        b.press(ev(1).at(t(1_000)), t(1_000));
        assert_eq!(b.fraction_down(100, t(1_050)), 0.5);
        assert_eq!(b.fraction_down(100, t(1_500)), 1.0);
    }

    #[test]
    fn fraction_for_zero_frame_is_level() {
        let mut b = LogicalButton::new();
        assert_eq!(b.fraction_down(0, t(10)), 0.0);
        b.press(ev(1), t(10));
        assert_eq!(b.fraction_down(0, t(10)), 1.0);
    }

    #[test]
    fn clear_frame_rebases_held_button() {
        let mut b = LogicalButton::new();
        b.press(ev(1).at(t(0)), t(0));
        b.clear_frame(t(50));
        assert_eq!(b.accumulated_ms(), 0);
        assert!(!b.edges().rose);
        assert!(b.is_down());
        assert_eq!(b.down_time(), t(50));
        assert_eq!(b.fraction_down(0, t(50)), 1.0);
        assert_eq!(b.fraction_down(100, t(100)), 0.5);
    }

    #[test]
    fn action_set_rejects_untracked() {
        let mut set = ActionSet::new([Action::Forward]);
        assert!(set.press(Action::Forward, ev(1), t(0)).is_ok());
        let err = set.press(Action::Attack, ev(1), t(0)).unwrap_err();
        assert!(matches!(err, UplinkError::InvalidRequest { .. }));
        assert!(set.release(Action::Use, Release::Forced, t(0)).is_err());
        assert_eq!(set.fraction(Action::Attack, 10, t(0)), 0.0);
    }

    #[test]
    fn action_set_any_key_folds() {
        let mut set = ActionSet::all();
        assert!(!set.any_down());
        set.press(Action::Use, ev(1), t(0)).unwrap();
        set.release(Action::Use, Release::Source(ev(1)), t(5))
            .unwrap();
        assert!(set.any_down());
        assert!(!set.any_active());
        set.clear_frame(t(10));
        assert!(!set.any_down());
    }

    #[test]
    fn action_set_tracked_order() {
        let set = ActionSet::new([Action::Use, Action::Forward]);
        let tracked: Vec<_> = set.tracked().collect();
        assert_eq!(tracked, vec![Action::Forward, Action::Use]);
    }

    #[test]
    fn action_indices_match_all() {
        for (i, action) in Action::ALL.iter().enumerate() {
            assert_eq!(action.index(), i);
        }
    }
}

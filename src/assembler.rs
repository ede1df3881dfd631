//! Per-frame view angle integration and movement assembly.
//!
//! [`MoveAssembler::update`] runs every rendered frame and keeps a predicted move for local
//! use; [`MoveAssembler::finalize`] runs once per command frame and produces the
//! [`Command`] that goes into history.

use serde::{Deserialize, Serialize};

use crate::buttons::{Action, ActionSet};
use crate::command::{angle_to_short, short_to_angle, ButtonBits, Command};
use crate::sessions::config::{AnalogConfig, MoveConfig, PointerConfig};
use crate::{ConnectionState, InputFocus, Timestamp};

/// Per-axis speed limit applied to every assembled move.
pub const MAX_AXIS_SPEED: f32 = 400.0;

/// Pitch limit in degrees, either direction.
pub const MAX_PITCH: f32 = 89.0;

/// Pending frame time above which the frame is considered bogus.
pub const MAX_COMMAND_MSEC: u32 = 250;

/// Frame time substituted for a bogus one.
pub const FALLBACK_COMMAND_MSEC: u8 = 100;

/// Analog look step used when the frame time is unusable.
const FALLBACK_LOOK_DT: f32 = 0.016;

const PITCH: usize = 0;
const YAW: usize = 1;

/// A movement vector in player space.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveVector {
    /// Forward, negative for back.
    pub forward: f32,
    /// Right, negative for left.
    pub side: f32,
    /// Up, negative for down.
    pub up: f32,
}

impl MoveVector {
    /// The zero vector.
    pub const ZERO: MoveVector = MoveVector {
        forward: 0.0,
        side: 0.0,
        up: 0.0,
    };

    fn scaled(self, factor: f32) -> Self {
        Self {
            forward: self.forward * factor,
            side: self.side * factor,
            up: self.up * factor,
        }
    }

    fn trunc(self) -> Self {
        Self {
            forward: self.forward.trunc(),
            side: self.side.trunc(),
            up: self.up.trunc(),
        }
    }
}

/// Normalized analog stick state, already dead-zoned upstream.
///
/// Axes are in `[-1, 1]`; positive `move_y` pulls back.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalogState {
    /// Left stick, horizontal.
    pub move_x: f32,
    /// Left stick, vertical.
    pub move_y: f32,
    /// Right stick, horizontal.
    pub look_x: f32,
    /// Right stick, vertical.
    pub look_y: f32,
}

/// What the assembler needs to know about the session each frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FrameContext {
    /// Current connection state.
    pub connection: ConnectionState,
    /// The simulation is paused.
    pub paused: bool,
    /// Where input is routed.
    pub focus: InputFocus,
}

impl FrameContext {
    /// Returns `true` when finalized commands should be kept.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.connection == ConnectionState::Active && !self.paused
    }

    fn game_has_focus(&self) -> bool {
        self.focus == InputFocus::Game
    }
}

/// Vertical field of view for a horizontal one at the given aspect.
#[must_use]
pub fn calc_fov_y(fov_x: f32, width: f32, height: f32) -> f32 {
    if fov_x <= 0.0 || fov_x >= 180.0 {
        return 90.0;
    }
    let a = width / (fov_x / 360.0 * std::f32::consts::PI).tan();
    (height / a).atan() * 360.0 / std::f32::consts::PI
}

/// Integrates look input and builds commands.
#[derive(Debug, Clone)]
pub struct MoveAssembler {
    move_config: MoveConfig,
    pointer_config: PointerConfig,
    analog_config: AnalogConfig,
    view_angles: [f32; 3],
    baseline_pitch: i16,
    view_fov: (f32, f32),
    pending_msec: u32,
    pending_angles: [i16; 3],
    local_move: MoveVector,
    pointer_move: MoveVector,
    raw_pointer: (f32, f32),
    last_raw_pointer: (f32, f32),
    analog: AnalogState,
    impulse: u8,
    mouse_looking: bool,
}

impl MoveAssembler {
    /// Creates an assembler with the given tuning.
    #[must_use]
    pub fn new(
        move_config: MoveConfig,
        pointer_config: PointerConfig,
        analog_config: AnalogConfig,
    ) -> Self {
        Self {
            move_config,
            pointer_config,
            analog_config,
            view_angles: [0.0; 3],
            baseline_pitch: 0,
            view_fov: (90.0, calc_fov_y(90.0, 4.0, 3.0)),
            pending_msec: 0,
            pending_angles: [0; 3],
            local_move: MoveVector::ZERO,
            pointer_move: MoveVector::ZERO,
            raw_pointer: (0.0, 0.0),
            last_raw_pointer: (0.0, 0.0),
            analog: AnalogState::default(),
            impulse: 0,
            mouse_looking: false,
        }
    }

    /// Movement tuning.
    #[must_use]
    pub const fn move_config(&self) -> &MoveConfig {
        &self.move_config
    }

    /// Mutable movement tuning; changes apply from the next frame.
    pub fn move_config_mut(&mut self) -> &mut MoveConfig {
        &mut self.move_config
    }

    /// Pointer tuning.
    #[must_use]
    pub const fn pointer_config(&self) -> &PointerConfig {
        &self.pointer_config
    }

    /// Mutable pointer tuning.
    pub fn pointer_config_mut(&mut self) -> &mut PointerConfig {
        &mut self.pointer_config
    }

    /// Analog tuning.
    #[must_use]
    pub const fn analog_config(&self) -> &AnalogConfig {
        &self.analog_config
    }

    /// Mutable analog tuning.
    pub fn analog_config_mut(&mut self) -> &mut AnalogConfig {
        &mut self.analog_config
    }

    /// Local view angles in degrees: pitch, yaw, roll.
    #[must_use]
    pub const fn view_angles(&self) -> [f32; 3] {
        self.view_angles
    }

    /// Overrides the local view angles, e.g. after a teleport.
    pub fn set_view_angles(&mut self, angles: [f32; 3]) {
        self.view_angles = angles;
    }

    /// Server-acknowledged pitch offset as a 16-bit angle.
    #[must_use]
    pub const fn baseline_pitch(&self) -> i16 {
        self.baseline_pitch
    }

    /// Sets the server-acknowledged pitch offset.
    pub fn set_baseline_pitch(&mut self, short: i16) {
        self.baseline_pitch = short;
    }

    /// Sets the rendered field of view, used by pointer auto-sensitivity.
    pub fn set_view_fov(&mut self, fov_x: f32, fov_y: f32) {
        self.view_fov = (fov_x, fov_y);
    }

    /// Accumulates raw pointer motion for the next [`update`](Self::update).
    pub fn pointer_motion(&mut self, dx: i32, dy: i32) {
        self.raw_pointer.0 += dx as f32;
        self.raw_pointer.1 += dy as f32;
    }

    /// Replaces the analog stick state.
    pub fn set_analog(&mut self, state: AnalogState) {
        self.analog = state;
    }

    /// Sets the impulse for the next command.
    pub fn impulse(&mut self, impulse: u8) {
        self.impulse = impulse;
    }

    /// Turns mouse look on or off. Releasing it springs the view back to center when
    /// free look is off and look spring is on.
    pub fn set_mouse_look(&mut self, looking: bool) {
        self.mouse_looking = looking;
        if !looking && !self.move_config.freelook && self.move_config.lookspring {
            self.center_view();
        }
    }

    /// Returns `true` while mouse look is held.
    #[must_use]
    pub const fn is_mouse_looking(&self) -> bool {
        self.mouse_looking
    }

    /// Levels the view against the server baseline.
    pub fn center_view(&mut self) {
        self.view_angles[PITCH] = -short_to_angle(self.baseline_pitch);
    }

    /// Milliseconds accumulated for the pending command.
    #[must_use]
    pub const fn pending_msec(&self) -> u32 {
        self.pending_msec
    }

    /// Angles the pending command will carry.
    #[must_use]
    pub const fn pending_angles(&self) -> [i16; 3] {
        self.pending_angles
    }

    /// Predicted move from the last [`update`](Self::update).
    #[must_use]
    pub const fn local_move(&self) -> MoveVector {
        self.local_move
    }

    /// Pointer-driven move accumulated since the last command.
    #[must_use]
    pub const fn pointer_move(&self) -> MoveVector {
        self.pointer_move
    }

    fn fraction(&self, actions: &ActionSet, action: Action, now: Timestamp) -> f32 {
        actions.fraction(action, u64::from(self.pending_msec), now)
    }

    /// Turns and pitches the view from held buttons over `frame_ms`.
    pub fn adjust_angles(&mut self, actions: &ActionSet, frame_ms: u32, now: Timestamp) {
        let turbo = if actions.is_down(Action::Speed) {
            self.move_config.fast_turn_rate
        } else {
            1.0
        };
        let speed = frame_ms as f32 * turbo * 0.001;
        let yaw_step = speed * self.move_config.yaw_speed;
        let pitch_step = speed * self.move_config.pitch_speed;

        if !actions.is_down(Action::Strafe) {
            self.view_angles[YAW] -= yaw_step * self.fraction(actions, Action::Right, now);
            self.view_angles[YAW] += yaw_step * self.fraction(actions, Action::Left, now);
        }
        if actions.is_down(Action::KeyboardLook) {
            self.view_angles[PITCH] -= pitch_step * self.fraction(actions, Action::Forward, now);
            self.view_angles[PITCH] += pitch_step * self.fraction(actions, Action::Back, now);
        }

        self.view_angles[PITCH] -= pitch_step * self.fraction(actions, Action::LookUp, now);
        self.view_angles[PITCH] += pitch_step * self.fraction(actions, Action::LookDown, now);
    }

    /// Builds the intended move from held buttons and the analog stick.
    #[must_use]
    pub fn base_move(&self, actions: &ActionSet, ctx: &FrameContext, now: Timestamp) -> MoveVector {
        let cfg = &self.move_config;
        let mut mv = MoveVector::ZERO;
        let frac = |action| self.fraction(actions, action, now);

        if actions.is_down(Action::Strafe) {
            mv.side += cfg.side_speed * frac(Action::Right);
            mv.side -= cfg.side_speed * frac(Action::Left);
        }

        mv.side += cfg.side_speed * frac(Action::MoveRight);
        mv.side -= cfg.side_speed * frac(Action::MoveLeft);

        mv.up += cfg.up_speed * frac(Action::MoveUp);
        mv.up -= cfg.up_speed * frac(Action::MoveDown);

        if !actions.is_down(Action::KeyboardLook) {
            mv.forward += cfg.forward_speed * frac(Action::Forward);
            mv.forward -= cfg.forward_speed * frac(Action::Back);
        }

        if ctx.game_has_focus() {
            let scale = self.analog_config.move_scale;
            mv.side += cfg.side_speed * scale * self.analog.move_x;
            mv.forward += cfg.forward_speed * scale * -self.analog.move_y;
        }

        if actions.is_down(Action::Speed) ^ cfg.run_by_default {
            mv = mv.scaled(2.0);
        }
        mv
    }

    /// Clamps each axis to [`MAX_AXIS_SPEED`] independently.
    #[must_use]
    pub fn clamp_speed(mv: MoveVector) -> MoveVector {
        MoveVector {
            forward: mv.forward.clamp(-MAX_AXIS_SPEED, MAX_AXIS_SPEED),
            side: mv.side.clamp(-MAX_AXIS_SPEED, MAX_AXIS_SPEED),
            up: mv.up.clamp(-MAX_AXIS_SPEED, MAX_AXIS_SPEED),
        }
    }

    /// Keeps the absolute pitch (view plus baseline) within [`MAX_PITCH`].
    pub fn clamp_pitch(&mut self) {
        let baseline = short_to_angle(self.baseline_pitch);
        let mut angle = self.view_angles[PITCH] + baseline;
        angle = (angle + 180.0).rem_euclid(360.0) - 180.0;
        angle = angle.clamp(-MAX_PITCH, MAX_PITCH);
        self.view_angles[PITCH] = angle - baseline;
    }

    fn apply_pointer_motion(&mut self, mut mx: f32, mut my: f32, actions: &ActionSet) {
        if mx == 0.0 && my == 0.0 {
            return;
        }

        let pointer = &self.pointer_config;
        let accel = pointer.accel.clamp(0.0, 1.0);
        let speed = pointer.sensitivity + mx.hypot(my) * accel;
        mx *= speed;
        my *= speed;

        if let Some(fov) = pointer.autosens_fov {
            let fov = if fov > 90.0 && fov <= 179.0 { fov } else { 90.0 };
            mx *= self.view_fov.0 / fov;
            my *= self.view_fov.1 / calc_fov_y(fov, 4.0, 3.0);
        }

        let strafing = actions.is_down(Action::Strafe);
        let mv = &self.move_config;

        if strafing || (mv.lookstrafe && !self.mouse_looking) {
            self.pointer_move.side += pointer.side_scale * mx;
        } else {
            self.view_angles[YAW] -= pointer.yaw_scale * mx;
        }

        if (self.mouse_looking || mv.freelook) && !strafing {
            self.view_angles[PITCH] += pointer.pitch_scale * my;
        } else {
            self.pointer_move.forward -= pointer.forward_scale * my;
        }
    }

    fn pointer_frame(&mut self, actions: &ActionSet, ctx: &FrameContext) {
        let (dx, dy) = std::mem::take(&mut self.raw_pointer);
        if !ctx.game_has_focus() {
            return;
        }

        let (mx, my) = if self.pointer_config.filter {
            (
                (dx + self.last_raw_pointer.0) * 0.5,
                (dy + self.last_raw_pointer.1) * 0.5,
            )
        } else {
            (dx, dy)
        };
        self.last_raw_pointer = (dx, dy);

        self.apply_pointer_motion(mx, my, actions);
    }

    fn analog_look(&mut self, frame_ms: u32, actions: &ActionSet, ctx: &FrameContext) {
        if ctx.connection != ConnectionState::Active || !ctx.game_has_focus() {
            return;
        }

        let mut dt = frame_ms as f32 * 0.001;
        if dt <= 0.0 || dt > 0.25 {
            dt = FALLBACK_LOOK_DT;
        }

        let look_scale = self.analog_config.look_scale;
        let mut ry = self.analog.look_y;
        if self.analog_config.invert_y {
            ry = -ry;
        }
        let mx = self.analog.look_x * look_scale * dt;
        let my = ry * look_scale * dt;

        self.apply_pointer_motion(mx, my, actions);
    }

    /// Advances the pending command by `frame_ms` and refreshes the predicted move.
    ///
    /// Never produces a command.
    pub fn update(
        &mut self,
        actions: &ActionSet,
        frame_ms: u32,
        ctx: &FrameContext,
        now: Timestamp,
    ) {
        self.local_move = MoveVector::ZERO;
        if ctx.paused {
            return;
        }

        self.pending_msec = self.pending_msec.saturating_add(frame_ms);

        self.adjust_angles(actions, frame_ms, now);
        let mut mv = self.base_move(actions, ctx, now);

        self.pointer_frame(actions, ctx);
        self.analog_look(frame_ms, actions, ctx);

        mv.forward += self.pointer_move.forward;
        mv.side += self.pointer_move.side;
        self.local_move = Self::clamp_speed(mv);

        self.clamp_pitch();

        self.pending_angles = self.view_angles.map(angle_to_short);
    }

    /// Turns the pending state into a [`Command`] and starts a new frame.
    ///
    /// Returns `None` when the session is not active; per-frame state is cleared either way.
    pub fn finalize(
        &mut self,
        actions: &mut ActionSet,
        ctx: &FrameContext,
        now: Timestamp,
    ) -> Option<Command> {
        // key fractions below are weighted against the msec that goes on the wire
        if self.pending_msec > MAX_COMMAND_MSEC {
            self.pending_msec = u32::from(FALLBACK_COMMAND_MSEC);
        }
        let command = ctx.is_active().then(|| self.build_command(actions, ctx, now));
        self.clear_frame(actions, now);
        command
    }

    fn build_command(&self, actions: &ActionSet, ctx: &FrameContext, now: Timestamp) -> Command {
        let mut buttons = ButtonBits::NONE;
        if actions.is_down_or_rose(Action::Attack) {
            buttons |= ButtonBits::ATTACK;
        }
        if actions.is_down_or_rose(Action::Use) {
            buttons |= ButtonBits::USE;
        }
        if ctx.game_has_focus() && actions.any_down() {
            buttons |= ButtonBits::ANY;
        }

        let msec = self.pending_msec.min(MAX_COMMAND_MSEC) as u8;

        let mut mv = self.base_move(actions, ctx, now);
        mv.forward += self.pointer_move.forward;
        mv.side += self.pointer_move.side;
        let mv = Self::clamp_speed(mv).trunc();

        Command {
            msec,
            angles: self.pending_angles,
            forward: mv.forward,
            side: mv.side,
            up: mv.up,
            buttons,
            impulse: self.impulse,
        }
    }

    fn clear_frame(&mut self, actions: &mut ActionSet, now: Timestamp) {
        self.pending_msec = 0;
        self.pending_angles = [0; 3];
        self.pointer_move = MoveVector::ZERO;
        self.impulse = 0;
        actions.clear_frame(now);
    }

    /// Drops all per-connection view state.
    pub fn reset(&mut self) {
        self.view_angles = [0.0; 3];
        self.baseline_pitch = 0;
        self.pending_msec = 0;
        self.pending_angles = [0; 3];
        self.local_move = MoveVector::ZERO;
        self.pointer_move = MoveVector::ZERO;
        self.raw_pointer = (0.0, 0.0);
        self.last_raw_pointer = (0.0, 0.0);
        self.impulse = 0;
    }
}

impl Default for MoveAssembler {
    fn default() -> Self {
        Self::new(
            MoveConfig::default(),
            PointerConfig::default(),
            AnalogConfig::default(),
        )
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
    use crate::buttons::{KeyEvent, Release, SourceId};

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn active() -> FrameContext {
        FrameContext {
            connection: ConnectionState::Active,
            paused: false,
            focus: InputFocus::Game,
        }
    }

    fn hold(actions: &mut ActionSet, action: Action, at: u64) {
        actions
            .press(action, KeyEvent::new(SourceId::new(1)).at(t(at)), t(at))
            .unwrap();
    }

    fn walking() -> MoveAssembler {
        MoveAssembler::new(
            MoveConfig::walk_by_default(),
            PointerConfig::default(),
            AnalogConfig::default(),
        )
    }

    #[test]
    fn forward_held_whole_frame_walks_at_full_speed() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::Forward, 1_000);

        asm.update(&actions, 100, &active(), t(1_100));
        let cmd = asm.finalize(&mut actions, &active(), t(1_100)).unwrap();

        assert_eq!(cmd.msec, 100);
        assert_eq!(cmd.forward, 200.0);
        assert_eq!(cmd.side, 0.0);
        assert!(cmd.buttons.contains(ButtonBits::ANY));
    }

    #[test]
    fn run_by_default_doubles_and_speed_cancels() {
        let mut asm = MoveAssembler::default();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::Forward, 0);
        asm.update(&actions, 50, &active(), t(50));
        assert_eq!(asm.local_move().forward, 400.0);

        hold(&mut actions, Action::Speed, 50);
        asm.update(&actions, 50, &active(), t(100));
        assert_eq!(asm.local_move().forward, 200.0);
    }

    #[test]
    fn half_frame_hold_is_half_speed() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::MoveRight, 1_050);
        asm.update(&actions, 100, &active(), t(1_100));
        let cmd = asm.finalize(&mut actions, &active(), t(1_100)).unwrap();
        assert_eq!(cmd.side, 100.0);
    }

    #[test]
    fn strafe_turns_left_right_into_sidestep() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::Strafe, 0);
        hold(&mut actions, Action::Right, 0);
        asm.update(&actions, 100, &active(), t(100));
        assert_eq!(asm.view_angles()[YAW], 0.0);
        assert_eq!(asm.local_move().side, 200.0);
    }

    #[test]
    fn turning_uses_yaw_speed() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::Left, 0);
        asm.update(&actions, 100, &active(), t(100));
        // 0.1 s at 140 deg/s
        assert!((asm.view_angles()[YAW] - 14.0).abs() < 1e-4);
    }

    #[test]
    fn keyboard_look_pitches_instead_of_moving() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::KeyboardLook, 0);
        hold(&mut actions, Action::Forward, 0);
        asm.update(&actions, 100, &active(), t(100));
        assert_eq!(asm.local_move().forward, 0.0);
        assert!((asm.view_angles()[PITCH] + 15.0).abs() < 1e-4);
    }

    #[test]
    fn clamp_speed_is_per_axis() {
        let clamped = MoveAssembler::clamp_speed(MoveVector {
            forward: 900.0,
            side: -401.0,
            up: 12.0,
        });
        assert_eq!(clamped.forward, MAX_AXIS_SPEED);
        assert_eq!(clamped.side, -MAX_AXIS_SPEED);
        assert_eq!(clamped.up, 12.0);
    }

    #[test]
    fn clamp_pitch_respects_baseline() {
        let mut asm = walking();
        asm.set_baseline_pitch(angle_to_short(10.0));
        asm.set_view_angles([85.0, 0.0, 0.0]);
        asm.clamp_pitch();
        // baseline rounds to a 16-bit angle
        assert!((asm.view_angles()[PITCH] - 79.0).abs() < 1e-2);
    }

    #[test]
    fn clamp_pitch_wraps_before_clamping() {
        let mut asm = walking();
        asm.set_view_angles([350.0, 0.0, 0.0]);
        asm.clamp_pitch();
        assert!((asm.view_angles()[PITCH] + 10.0).abs() < 1e-3);

        asm.set_view_angles([-200.0, 0.0, 0.0]);
        asm.clamp_pitch();
        assert!((asm.view_angles()[PITCH] - 89.0).abs() < 1e-3);
    }

    #[test]
    fn unreasonable_frame_time_is_replaced() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        asm.update(&actions, 300, &active(), t(300));
        let cmd = asm.finalize(&mut actions, &active(), t(300)).unwrap();
        assert_eq!(cmd.msec, FALLBACK_COMMAND_MSEC);
    }

    #[test]
    fn replaced_frame_time_weights_keys_over_fallback() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::Forward, 200);

        asm.update(&actions, 300, &active(), t(300));
        let cmd = asm.finalize(&mut actions, &active(), t(300)).unwrap();

        // held for 100ms of a command that now claims 100ms
        assert_eq!(cmd.msec, FALLBACK_COMMAND_MSEC);
        assert_eq!(cmd.forward, 200.0);
    }

    #[test]
    fn attack_tap_within_frame_sets_button() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::Attack, 10);
        actions
            .release(
                Action::Attack,
                Release::Source(KeyEvent::new(SourceId::new(1)).at(t(20))),
                t(20),
            )
            .unwrap();
        asm.update(&actions, 16, &active(), t(30));
        let cmd = asm.finalize(&mut actions, &active(), t(30)).unwrap();
        assert!(cmd.buttons.contains(ButtonBits::ATTACK));
        assert!(!cmd.buttons.contains(ButtonBits::USE));

        asm.update(&actions, 16, &active(), t(46));
        let next = asm.finalize(&mut actions, &active(), t(46)).unwrap();
        assert!(next.buttons.is_empty());
    }

    #[test]
    fn any_bit_needs_game_focus() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        hold(&mut actions, Action::Use, 0);
        let menu = FrameContext {
            focus: InputFocus::Menu,
            ..active()
        };
        asm.update(&actions, 16, &menu, t(16));
        let cmd = asm.finalize(&mut actions, &menu, t(16)).unwrap();
        assert!(cmd.buttons.contains(ButtonBits::USE));
        assert!(!cmd.buttons.contains(ButtonBits::ANY));
    }

    #[test]
    fn inactive_finalize_only_clears() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        asm.impulse(7);
        asm.update(&actions, 16, &active(), t(16));
        let paused = FrameContext {
            paused: true,
            ..active()
        };
        assert!(asm.finalize(&mut actions, &paused, t(16)).is_none());
        assert_eq!(asm.pending_msec(), 0);

        asm.update(&actions, 16, &active(), t(32));
        let cmd = asm.finalize(&mut actions, &active(), t(32)).unwrap();
        assert_eq!(cmd.impulse, 0);
    }

    #[test]
    fn paused_update_does_not_accumulate() {
        let mut asm = walking();
        let actions = ActionSet::all();
        let paused = FrameContext {
            paused: true,
            ..active()
        };
        asm.update(&actions, 16, &paused, t(16));
        assert_eq!(asm.pending_msec(), 0);
    }

    #[test]
    fn move_is_truncated() {
        let mut asm = walking();
        let mut actions = ActionSet::all();
        // 1/3 of a 30 ms frame
        hold(&mut actions, Action::Forward, 20);
        asm.update(&actions, 30, &active(), t(30));
        let cmd = asm.finalize(&mut actions, &active(), t(30)).unwrap();
        assert_eq!(cmd.forward, 66.0);
    }

    #[test]
    fn pointer_yaw_and_pitch() {
        let mut asm = walking();
        let actions = ActionSet::all();
        asm.pointer_motion(10, -5);
        asm.update(&actions, 16, &active(), t(16));
        let [pitch, yaw, _] = asm.view_angles();
        // sensitivity 3, scale 0.022
        assert!((yaw + 0.66).abs() < 1e-4);
        assert!((pitch + 0.33).abs() < 1e-4);
    }

    #[test]
    fn pointer_ignored_without_focus() {
        let mut asm = walking();
        let actions = ActionSet::all();
        asm.pointer_motion(100, 100);
        let console = FrameContext {
            focus: InputFocus::Console,
            ..active()
        };
        asm.update(&actions, 16, &console, t(16));
        assert_eq!(asm.view_angles(), [0.0; 3]);

        // motion was consumed, not deferred
        asm.update(&actions, 16, &active(), t(32));
        assert_eq!(asm.view_angles(), [0.0; 3]);
    }

    #[test]
    fn pointer_without_freelook_moves_forward() {
        let mut asm = walking();
        asm.move_config_mut().freelook = false;
        let mut actions = ActionSet::all();
        asm.pointer_motion(0, -10);
        asm.update(&actions, 16, &active(), t(16));
        assert_eq!(asm.pointer_move().forward, 30.0);
        let cmd = asm.finalize(&mut actions, &active(), t(16)).unwrap();
        assert_eq!(cmd.forward, 30.0);
        assert_eq!(asm.pointer_move(), MoveVector::ZERO);
    }

    #[test]
    fn pointer_filter_averages_frames() {
        let mut asm = walking();
        asm.pointer_config_mut().filter = true;
        let actions = ActionSet::all();
        asm.pointer_motion(10, 0);
        asm.update(&actions, 16, &active(), t(16));
        // (10 + 0) / 2 * 3 * 0.022
        assert!((asm.view_angles()[YAW] + 0.33).abs() < 1e-4);
    }

    #[test]
    fn analog_move_and_look() {
        let mut asm = walking();
        let actions = ActionSet::all();
        asm.set_analog(AnalogState {
            move_x: 0.5,
            move_y: -1.0,
            look_x: 0.0,
            look_y: 0.0,
        });
        asm.update(&actions, 16, &active(), t(16));
        assert_eq!(asm.local_move().forward, 200.0);
        assert_eq!(asm.local_move().side, 100.0);
    }

    #[test]
    fn analog_look_uses_fallback_dt() {
        let mut asm = walking();
        let actions = ActionSet::all();
        asm.set_analog(AnalogState {
            look_x: 1.0,
            ..AnalogState::default()
        });
        asm.update(&actions, 0, &active(), t(0));
        // 1800 * 0.016 = 28.8 counts, * sensitivity 3 * 0.022
        let expected = -(28.8 * 3.0 * 0.022);
        assert!((asm.view_angles()[YAW] - expected).abs() < 1e-3);
    }

    #[test]
    fn mouse_look_release_springs_back() {
        let mut asm = walking();
        asm.move_config_mut().freelook = false;
        asm.move_config_mut().lookspring = true;
        asm.set_baseline_pitch(angle_to_short(-5.0));
        asm.set_view_angles([30.0, 0.0, 0.0]);
        asm.set_mouse_look(true);
        assert!(asm.is_mouse_looking());
        asm.set_mouse_look(false);
        assert!((asm.view_angles()[PITCH] - 5.0).abs() < 1e-2);
    }

    #[test]
    fn update_writes_pending_angles() {
        let mut asm = walking();
        let actions = ActionSet::all();
        asm.set_view_angles([0.0, 90.0, 0.0]);
        asm.update(&actions, 16, &active(), t(16));
        assert_eq!(asm.pending_angles(), [0, 16384, 0]);
    }

    #[test]
    fn calc_fov_y_for_4_3() {
        let fov_y = calc_fov_y(90.0, 4.0, 3.0);
        assert!((fov_y - 73.739_8).abs() < 1e-2);
    }
}

//! Per-frame assembly of [`ControllerState`] from raw action values.

use tracing::{debug, info};

use crate::aim::AimSmoother;
use crate::config::VrSettings;
use crate::coords::{host_yaw_pitch, runtime_to_host_orientation};
use crate::input::GamepadButtons;
use crate::types::{ControllerState, HandState, RawControllerInput, RawHandInput};

/// Grip values above this synthesize a shoulder press.
pub const GRIP_PRESS_THRESHOLD: f32 = 0.8;

const LEFT: usize = 0;
const RIGHT: usize = 1;

struct HandButtons {
    shoulder: GamepadButtons,
    thumb: GamepadButtons,
    primary: GamepadButtons,
    secondary: GamepadButtons,
}

const HAND_BUTTONS: [HandButtons; 2] = [
    HandButtons {
        shoulder: GamepadButtons::LEFT_SHOULDER,
        thumb: GamepadButtons::LEFT_THUMB,
        primary: GamepadButtons::X,
        secondary: GamepadButtons::Y,
    },
    HandButtons {
        shoulder: GamepadButtons::RIGHT_SHOULDER,
        thumb: GamepadButtons::RIGHT_THUMB,
        primary: GamepadButtons::A,
        secondary: GamepadButtons::B,
    },
];

/// Maps raw digital actions and grip values to gamepad bits.
pub fn map_buttons(raw: &RawControllerInput) -> GamepadButtons {
    let mut buttons = GamepadButtons::empty();
    for (hand, bits) in raw.hands.iter().zip(HAND_BUTTONS.iter()) {
        if !hand.active {
            continue;
        }
        buttons.set(bits.shoulder, hand.grip > GRIP_PRESS_THRESHOLD);
        buttons.set(bits.thumb, hand.thumbstick_click);
        buttons.set(bits.primary, hand.primary);
        buttons.set(bits.secondary, hand.secondary);
    }
    buttons.set(GamepadButtons::START, raw.menu);
    buttons
}

fn hand_state(raw: &RawHandInput) -> HandState {
    let aim_yaw_pitch = raw
        .aim
        .map(|pose| host_yaw_pitch(runtime_to_host_orientation(pose.orientation)))
        .unwrap_or_default();
    HandState {
        valid: raw.active && raw.aim.is_some(),
        trigger: raw.trigger,
        grip: raw.grip,
        thumbstick: raw.thumbstick,
        aim_yaw_pitch,
    }
}

/// Owns the decoupled-aim smoother and the recenter gesture edge detector.
///
/// Lives on the tracked-frame path only, so it is not shared between threads.
#[derive(Debug, Default)]
pub struct ActionFusion {
    aim: AimSmoother,
    recenter_held: bool,
}

impl ActionFusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aim(&self) -> &AimSmoother {
        &self.aim
    }

    pub fn fuse(&mut self, raw: &RawControllerInput, settings: &VrSettings) -> ControllerState {
        let hands = [hand_state(&raw.hands[LEFT]), hand_state(&raw.hands[RIGHT])];
        let buttons = map_buttons(raw);

        let both_clicked = raw.hands[LEFT].active
            && raw.hands[RIGHT].active
            && raw.hands[LEFT].thumbstick_click
            && raw.hands[RIGHT].thumbstick_click;
        let recenter = both_clicked && !self.recenter_held;
        self.recenter_held = both_clicked;

        let aim_stick = if settings.decoupled_aiming() {
            let right = &hands[RIGHT];
            if right.valid {
                if recenter {
                    info!("decoupled aim recentered");
                    self.aim.recenter(right.aim_yaw_pitch);
                } else if !self.aim.is_active() {
                    debug!("decoupled aim engaged");
                }
                Some(self.aim.update(right.aim_yaw_pitch, settings.aim_smoothing()))
            } else {
                None
            }
        } else {
            if self.aim.is_active() {
                debug!("decoupled aim disabled, dropping smoothing state");
            }
            self.aim.reset();
            None
        };

        ControllerState {
            hands,
            buttons,
            aim_stick,
        }
    }
}

//! Merging fused VR controller state into the host's gamepad record.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use bitflags::bitflags;

use crate::types::ControllerState;

bitflags! {
    /// Button bits laid out like an XInput gamepad's `wButtons`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GamepadButtons: u16 {
        const DPAD_UP = 0x0001;
        const DPAD_DOWN = 0x0002;
        const DPAD_LEFT = 0x0004;
        const DPAD_RIGHT = 0x0008;
        const START = 0x0010;
        const BACK = 0x0020;
        const LEFT_THUMB = 0x0040;
        const RIGHT_THUMB = 0x0080;
        const LEFT_SHOULDER = 0x0100;
        const RIGHT_SHOULDER = 0x0200;
        const A = 0x1000;
        const B = 0x2000;
        const X = 0x4000;
        const Y = 0x8000;
    }
}

impl Default for GamepadButtons {
    fn default() -> Self {
        Self::empty()
    }
}

/// Radial deadzone applied to VR thumbsticks before merging.
pub const STICK_DEADZONE: f32 = 0.15;

/// One polled gamepad record, XInput layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GamepadState {
    pub connected: bool,
    pub packet_number: u32,
    pub buttons: GamepadButtons,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

pub fn float_to_short(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

pub fn float_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * f32::from(u8::MAX)).round() as u8
}

/// Zeroes sticks inside the deadzone and rescales the rest to the full range.
pub fn apply_deadzone(stick: [f32; 2], deadzone: f32) -> [f32; 2] {
    let magnitude = (stick[0] * stick[0] + stick[1] * stick[1]).sqrt();
    if !magnitude.is_finite() || magnitude <= deadzone {
        return [0.0, 0.0];
    }
    let rescaled = ((magnitude - deadzone) / (1.0 - deadzone)).min(1.0);
    let scale = rescaled / magnitude;
    [stick[0] * scale, stick[1] * scale]
}

fn larger_axis(host: i16, vr: i16) -> i16 {
    if i32::from(vr).abs() > i32::from(host).abs() {
        vr
    } else {
        host
    }
}

fn larger_stick(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    let pick = |x: f32, y: f32| if y.abs() > x.abs() { y } else { x };
    [pick(a[0], b[0]), pick(a[1], b[1])]
}

/// Merges VR controller state into host gamepad polls.
///
/// Safe to call from any number of input-poll threads. The packet number it
/// reports advances whenever the fused button mask changes, on top of
/// whatever the physical pad reports.
#[derive(Debug, Default)]
pub struct GamepadFusion {
    last_mask: AtomicU16,
    sequence: AtomicU32,
}

impl GamepadFusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn fuse(&self, pad: &mut GamepadState, vr: &ControllerState) {
        pad.connected = true;
        pad.buttons |= vr.buttons;

        let left = apply_deadzone(vr.left().thumbstick, STICK_DEADZONE);
        let mut right = apply_deadzone(vr.right().thumbstick, STICK_DEADZONE);
        if let Some(aim) = vr.aim_stick {
            right = larger_stick(right, aim);
        }

        pad.thumb_lx = larger_axis(pad.thumb_lx, float_to_short(left[0]));
        pad.thumb_ly = larger_axis(pad.thumb_ly, float_to_short(left[1]));
        pad.thumb_rx = larger_axis(pad.thumb_rx, float_to_short(right[0]));
        pad.thumb_ry = larger_axis(pad.thumb_ry, float_to_short(right[1]));

        pad.left_trigger = pad.left_trigger.max(float_to_byte(vr.left().trigger));
        pad.right_trigger = pad.right_trigger.max(float_to_byte(vr.right().trigger));

        let mask = pad.buttons.bits();
        if self.last_mask.swap(mask, Ordering::AcqRel) != mask {
            self.sequence.fetch_add(1, Ordering::AcqRel);
        }
        pad.packet_number = pad.packet_number.wrapping_add(self.sequence());
    }
}

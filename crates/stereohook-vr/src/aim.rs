//! Decoupled-aim smoothing.
//!
//! The right controller's yaw/pitch is tracked relative to a base angle
//! captured on activation or recenter, exponentially smoothed, and mapped to
//! a virtual thumbstick deflection.

use std::f32::consts::{PI, TAU};

/// Relative angle (radians) that maps to full stick deflection.
pub const AIM_SENSITIVITY_RAD: f32 = PI / 6.0;

/// One exponential smoothing step: `current + (target - current) * (1 - factor)`.
pub fn smooth_step(current: f32, target: f32, factor: f32) -> f32 {
    current + (target - current) * (1.0 - factor)
}

/// Wraps an angle difference into `[-PI, PI]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped < -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AimSmoother {
    base: Option<[f32; 2]>,
    smoothed: [f32; 2],
}

impl AimSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.base.is_some()
    }

    pub fn base(&self) -> Option<[f32; 2]> {
        self.base
    }

    /// Smoothed yaw/pitch relative to the base angle.
    pub fn smoothed(&self) -> [f32; 2] {
        self.smoothed
    }

    /// Captures `yaw_pitch` as the new base and drops the smoothed trajectory.
    pub fn recenter(&mut self, yaw_pitch: [f32; 2]) {
        self.base = Some(yaw_pitch);
        self.smoothed = [0.0, 0.0];
    }

    pub fn reset(&mut self) {
        self.base = None;
        self.smoothed = [0.0, 0.0];
    }

    /// Feeds an absolute yaw/pitch and returns the virtual stick axes in `[-1, 1]`.
    ///
    /// The first sample after activation becomes the base angle.
    pub fn update(&mut self, yaw_pitch: [f32; 2], factor: f32) -> [f32; 2] {
        let base = *self.base.get_or_insert(yaw_pitch);
        let target = [
            wrap_angle(yaw_pitch[0] - base[0]),
            yaw_pitch[1] - base[1],
        ];
        self.smoothed = [
            smooth_step(self.smoothed[0], target[0], factor),
            smooth_step(self.smoothed[1], target[1], factor),
        ];
        self.stick()
    }

    pub fn stick(&self) -> [f32; 2] {
        [
            (self.smoothed[0] / AIM_SENSITIVITY_RAD).clamp(-1.0, 1.0),
            (self.smoothed[1] / AIM_SENSITIVITY_RAD).clamp(-1.0, 1.0),
        ]
    }
}

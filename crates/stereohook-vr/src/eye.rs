//! Alternate-eye rendering bookkeeping.
//!
//! The host renders one eye per present call, so eyes are assigned purely
//! from call order: even presents are left, odd presents are right.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::types::Pose;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn from_frame(frame: u64) -> Self {
        if frame % 2 == 0 {
            Eye::Left
        } else {
            Eye::Right
        }
    }

    /// Swapchain index; the left eye is always 0.
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    /// Horizontal offset from the head center for an IPD in meters.
    pub fn ipd_offset(self, ipd: f32) -> f32 {
        match self {
            Eye::Left => -ipd / 2.0,
            Eye::Right => ipd / 2.0,
        }
    }
}

/// Present-call counter. Only the render-thread callback advances it.
#[derive(Debug, Default)]
pub struct EyeCounter {
    frames: AtomicU64,
}

impl EyeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the next present slot, returning its index and eye.
    pub fn advance(&self) -> (u64, Eye) {
        let frame = self.frames.fetch_add(1, Ordering::AcqRel);
        (frame, Eye::from_frame(frame))
    }

    /// The eye the next present call will carry.
    pub fn upcoming(&self) -> Eye {
        Eye::from_frame(self.frames.load(Ordering::Acquire))
    }

    pub fn count(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

/// Scales a raw host-space position by the world scale, then offsets it
/// along the horizontal axis for `eye`.
pub fn eye_position(raw: [f32; 3], eye: Eye, ipd: f32, world_scale: f32) -> [f32; 3] {
    [
        raw[0] * world_scale + eye.ipd_offset(ipd),
        raw[1] * world_scale,
        raw[2] * world_scale,
    ]
}

/// Holds the head pose for the current stereo pair.
///
/// The left eye fetches and latches a pose; the right eye reuses it, so both
/// halves of a pair are offset from the same head position.
#[derive(Debug, Default)]
pub struct StereoPairCache {
    latched: Mutex<Option<Pose>>,
}

impl StereoPairCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pose_for(&self, eye: Eye, fetch: impl FnOnce() -> Option<Pose>) -> Option<Pose> {
        let mut guard = match self.latched.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match eye {
            Eye::Left => {
                if let Some(pose) = fetch() {
                    *guard = Some(pose);
                }
                *guard
            }
            Eye::Right => match *guard {
                Some(pose) => Some(pose),
                None => {
                    let pose = fetch();
                    *guard = pose;
                    pose
                }
            },
        }
    }

    pub fn clear(&self) {
        let mut guard = match self.latched.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }
}

/// Decides when a stereo pair is complete.
///
/// A right-eye submission completes the pair only if a left-eye submission
/// came before it; repeated left submissions just keep the pair open.
#[derive(Debug, Default)]
pub struct PairTracker {
    left_submitted: AtomicBool,
}

impl PairTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a submission and returns true when the frame should end.
    pub fn record(&self, eye: Eye) -> bool {
        match eye {
            Eye::Left => {
                self.left_submitted.store(true, Ordering::Release);
                false
            }
            Eye::Right => self.left_submitted.swap(false, Ordering::AcqRel),
        }
    }

    pub fn reset(&self) {
        self.left_submitted.store(false, Ordering::Release);
    }
}

use crate::input::GamepadButtons;

/// Position in meters plus a unit quaternion `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0; 3],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoseKind {
    Head,
    LeftHand,
    RightHand,
}

/// A pose sample together with the tracking validity reported for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPose {
    pub kind: PoseKind,
    pub pose: Pose,
    pub valid: bool,
}

/// Field of view half-angles in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

/// A located view in runtime space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageExtent {
    pub width: u32,
    pub height: u32,
}

/// Result of the runtime's frame-wait call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTiming {
    pub predicted_display_time_ns: i64,
    pub predicted_display_period_ns: i64,
    pub should_render: bool,
}

/// One eye's entry in the composited projection layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub extent: ImageExtent,
}

/// Camera transform handed to the host, already in host coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

/// Raw per-hand action values as read from the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawHandInput {
    pub active: bool,
    pub trigger: f32,
    pub grip: f32,
    pub thumbstick: [f32; 2],
    pub thumbstick_click: bool,
    pub primary: bool,
    pub secondary: bool,
    /// Aim pose in runtime space, `None` when the hand is not tracked.
    pub aim: Option<Pose>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawControllerInput {
    pub hands: [RawHandInput; 2],
    pub menu: bool,
}

/// Fused per-hand state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandState {
    pub valid: bool,
    pub trigger: f32,
    pub grip: f32,
    pub thumbstick: [f32; 2],
    /// Yaw/pitch of the hand's aim direction in radians, host convention.
    pub aim_yaw_pitch: [f32; 2],
}

/// Controller state published once per tracked frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    pub hands: [HandState; 2],
    pub buttons: GamepadButtons,
    /// Virtual right-stick deflection from decoupled aiming, when active.
    pub aim_stick: Option<[f32; 2]>,
}

impl ControllerState {
    pub fn any_valid(&self) -> bool {
        self.hands.iter().any(|h| h.valid)
    }

    pub fn left(&self) -> &HandState {
        &self.hands[0]
    }

    pub fn right(&self) -> &HandState {
        &self.hands[1]
    }
}

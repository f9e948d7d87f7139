//! Conversion between the headset runtime's space and the host's space.
//!
//! Runtime: X right, Y up, -Z forward. Host: X right, Y forward, Z up.
//! The axis map `(x, y, z) -> (x, -z, y)` is a proper rotation, so the
//! quaternion vector part maps the same way and `w` is untouched.

use glam::{Quat, Vec3};

use crate::types::Pose;

pub fn runtime_to_host_position(p: [f32; 3]) -> [f32; 3] {
    [p[0], -p[2], p[1]]
}

pub fn host_to_runtime_position(p: [f32; 3]) -> [f32; 3] {
    [p[0], p[2], -p[1]]
}

/// Quaternions are `[x, y, z, w]` on both sides.
pub fn runtime_to_host_orientation(q: [f32; 4]) -> [f32; 4] {
    [q[0], -q[2], q[1], q[3]]
}

pub fn host_to_runtime_orientation(q: [f32; 4]) -> [f32; 4] {
    [q[0], q[2], -q[1], q[3]]
}

pub fn runtime_to_host(pose: Pose) -> Pose {
    Pose {
        position: runtime_to_host_position(pose.position),
        orientation: runtime_to_host_orientation(pose.orientation),
    }
}

pub fn host_to_runtime(pose: Pose) -> Pose {
    Pose {
        position: host_to_runtime_position(pose.position),
        orientation: host_to_runtime_orientation(pose.orientation),
    }
}

/// Yaw and pitch in radians of a host-space orientation's forward (+Y) axis.
///
/// Yaw is positive toward +X, pitch positive toward +Z.
pub fn host_yaw_pitch(orientation: [f32; 4]) -> [f32; 2] {
    let q = Quat::from_array(orientation);
    let q = if q.length_squared() > f32::EPSILON {
        q.normalize()
    } else {
        Quat::IDENTITY
    };
    let forward = q * Vec3::Y;
    let yaw = forward.x.atan2(forward.y);
    let pitch = forward.z.clamp(-1.0, 1.0).asin();
    [yaw, pitch]
}

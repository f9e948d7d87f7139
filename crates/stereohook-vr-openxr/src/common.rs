//! Graphics-API independent OpenXR glue: type conversion, session state
//! mapping, reference space selection and controller actions.

use openxr as xr;
use stereohook_vr::{
    Fov, Pose, RawControllerInput, RawHandInput, SessionPhase, View, VrError, VrResult,
};
use tracing::{debug, warn};

pub const VIEW_COUNT: usize = 2;

pub const DXGI_FORMAT_R8G8B8A8_UNORM: u32 = 28;
pub const DXGI_FORMAT_R8G8B8A8_UNORM_SRGB: u32 = 29;
pub const DXGI_FORMAT_B8G8R8A8_UNORM: u32 = 87;
pub const DXGI_FORMAT_B8G8R8A8_UNORM_SRGB: u32 = 91;

pub fn runtime_err(context: &'static str) -> impl Fn(xr::sys::Result) -> VrError {
    move |e| VrError::Runtime(format!("OpenXR {context}: {e:?}"))
}

pub fn unavailable_err(context: &'static str) -> impl Fn(xr::sys::Result) -> VrError {
    move |e| VrError::Unavailable(format!("OpenXR {context}: {e:?}"))
}

pub fn config_err(context: &'static str) -> impl Fn(xr::sys::Result) -> VrError {
    move |e| VrError::Config(format!("OpenXR {context}: {e:?}"))
}

/// The runtime must report exactly one view per eye.
pub fn require_stereo(view_count: usize) -> VrResult<()> {
    if view_count == VIEW_COUNT {
        Ok(())
    } else {
        Err(VrError::Config(format!(
            "expected {VIEW_COUNT} stereo views, runtime reported {view_count}"
        )))
    }
}

pub fn map_session_state(state: xr::SessionState) -> Option<SessionPhase> {
    Some(match state {
        xr::SessionState::IDLE => SessionPhase::Idle,
        xr::SessionState::READY => SessionPhase::Ready,
        xr::SessionState::SYNCHRONIZED => SessionPhase::Synchronized,
        xr::SessionState::VISIBLE => SessionPhase::Visible,
        xr::SessionState::FOCUSED => SessionPhase::Focused,
        xr::SessionState::STOPPING => SessionPhase::Stopping,
        xr::SessionState::LOSS_PENDING => SessionPhase::LossPending,
        xr::SessionState::EXITING => SessionPhase::Exiting,
        _ => return None,
    })
}

pub fn to_pose(pose: xr::Posef) -> Pose {
    Pose {
        position: [pose.position.x, pose.position.y, pose.position.z],
        orientation: [
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ],
    }
}

pub fn to_xr_pose(pose: Pose) -> xr::Posef {
    xr::Posef {
        position: xr::Vector3f {
            x: pose.position[0],
            y: pose.position[1],
            z: pose.position[2],
        },
        orientation: xr::Quaternionf {
            x: pose.orientation[0],
            y: pose.orientation[1],
            z: pose.orientation[2],
            w: pose.orientation[3],
        },
    }
}

pub fn to_fov(fov: xr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

pub fn to_xr_fov(fov: Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

pub fn views_tracked(flags: xr::ViewStateFlags) -> bool {
    flags.contains(xr::ViewStateFlags::POSITION_VALID | xr::ViewStateFlags::ORIENTATION_VALID)
}

pub fn space_tracked(flags: xr::SpaceLocationFlags) -> bool {
    flags.contains(
        xr::SpaceLocationFlags::POSITION_VALID | xr::SpaceLocationFlags::ORIENTATION_VALID,
    )
}

/// Converts located views, failing when tracking is lost.
pub fn stereo_views(flags: xr::ViewStateFlags, views: &[xr::View]) -> VrResult<[View; 2]> {
    if !views_tracked(flags) {
        return Err(VrError::Runtime("views not tracked".into()));
    }
    match views {
        [left, right] => Ok([
            View {
                pose: to_pose(left.pose),
                fov: to_fov(left.fov),
            },
            View {
                pose: to_pose(right.pose),
                fov: to_fov(right.fov),
            },
        ]),
        other => Err(VrError::Runtime(format!(
            "runtime located {} views",
            other.len()
        ))),
    }
}

/// Room-scale space when the runtime has one, seated space otherwise.
pub fn create_reference_space<G: xr::Graphics>(
    session: &xr::Session<G>,
) -> VrResult<(xr::Space, xr::ReferenceSpaceType)> {
    match session.create_reference_space(xr::ReferenceSpaceType::STAGE, xr::Posef::IDENTITY) {
        Ok(space) => Ok((space, xr::ReferenceSpaceType::STAGE)),
        Err(err) => {
            warn!("STAGE reference space unavailable ({err:?}), falling back to LOCAL");
            let space = session
                .create_reference_space(xr::ReferenceSpaceType::LOCAL, xr::Posef::IDENTITY)
                .map_err(config_err("reference space"))?;
            Ok((space, xr::ReferenceSpaceType::LOCAL))
        }
    }
}

/// Swapchain format matching the host back buffer when the runtime offers
/// it, so the copy needs no conversion.
pub fn choose_swapchain_format(available: &[u32], host_format: u32) -> Option<u32> {
    if available.contains(&host_format) {
        return Some(host_format);
    }
    let preferred = [
        DXGI_FORMAT_R8G8B8A8_UNORM,
        DXGI_FORMAT_B8G8R8A8_UNORM,
        DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    ];
    preferred
        .iter()
        .copied()
        .find(|fmt| available.contains(fmt))
        .or_else(|| available.first().copied())
}

/// Copy rectangle covering the overlap of source and destination.
pub fn copy_extent(src: (u64, u32), dst: (u64, u32)) -> (u32, u32) {
    let width = src.0.min(dst.0).min(u64::from(u32::MAX)) as u32;
    (width, src.1.min(dst.1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Trigger,
    TriggerClick,
    Grip,
    GripClick,
    Thumbstick,
    ThumbstickClick,
    Primary,
    Secondary,
    Menu,
    Aim,
}

pub const INTERACTION_PROFILES: [&str; 5] = [
    "/interaction_profiles/khr/simple_controller",
    "/interaction_profiles/oculus/touch_controller",
    "/interaction_profiles/valve/index_controller",
    "/interaction_profiles/microsoft/motion_controller",
    "/interaction_profiles/htc/vive_controller",
];

/// Suggested bindings per interaction profile.
pub fn profile_bindings(profile: &str) -> &'static [(ActionKind, &'static str)] {
    use ActionKind::*;
    match profile {
        "/interaction_profiles/khr/simple_controller" => &[
            (TriggerClick, "/user/hand/left/input/select/click"),
            (TriggerClick, "/user/hand/right/input/select/click"),
            (Menu, "/user/hand/left/input/menu/click"),
            (Menu, "/user/hand/right/input/menu/click"),
            (Aim, "/user/hand/left/input/aim/pose"),
            (Aim, "/user/hand/right/input/aim/pose"),
        ],
        "/interaction_profiles/oculus/touch_controller" => &[
            (Trigger, "/user/hand/left/input/trigger/value"),
            (Trigger, "/user/hand/right/input/trigger/value"),
            (Grip, "/user/hand/left/input/squeeze/value"),
            (Grip, "/user/hand/right/input/squeeze/value"),
            (Thumbstick, "/user/hand/left/input/thumbstick"),
            (Thumbstick, "/user/hand/right/input/thumbstick"),
            (ThumbstickClick, "/user/hand/left/input/thumbstick/click"),
            (ThumbstickClick, "/user/hand/right/input/thumbstick/click"),
            (Primary, "/user/hand/left/input/x/click"),
            (Primary, "/user/hand/right/input/a/click"),
            (Secondary, "/user/hand/left/input/y/click"),
            (Secondary, "/user/hand/right/input/b/click"),
            (Menu, "/user/hand/left/input/menu/click"),
            (Aim, "/user/hand/left/input/aim/pose"),
            (Aim, "/user/hand/right/input/aim/pose"),
        ],
        "/interaction_profiles/valve/index_controller" => &[
            (Trigger, "/user/hand/left/input/trigger/value"),
            (Trigger, "/user/hand/right/input/trigger/value"),
            (Grip, "/user/hand/left/input/squeeze/value"),
            (Grip, "/user/hand/right/input/squeeze/value"),
            (Thumbstick, "/user/hand/left/input/thumbstick"),
            (Thumbstick, "/user/hand/right/input/thumbstick"),
            (ThumbstickClick, "/user/hand/left/input/thumbstick/click"),
            (ThumbstickClick, "/user/hand/right/input/thumbstick/click"),
            (Primary, "/user/hand/left/input/a/click"),
            (Primary, "/user/hand/right/input/a/click"),
            (Secondary, "/user/hand/left/input/b/click"),
            (Secondary, "/user/hand/right/input/b/click"),
            (Aim, "/user/hand/left/input/aim/pose"),
            (Aim, "/user/hand/right/input/aim/pose"),
        ],
        "/interaction_profiles/microsoft/motion_controller" => &[
            (Trigger, "/user/hand/left/input/trigger/value"),
            (Trigger, "/user/hand/right/input/trigger/value"),
            (GripClick, "/user/hand/left/input/squeeze/click"),
            (GripClick, "/user/hand/right/input/squeeze/click"),
            (Thumbstick, "/user/hand/left/input/thumbstick"),
            (Thumbstick, "/user/hand/right/input/thumbstick"),
            (ThumbstickClick, "/user/hand/left/input/thumbstick/click"),
            (ThumbstickClick, "/user/hand/right/input/thumbstick/click"),
            (Primary, "/user/hand/left/input/trackpad/click"),
            (Primary, "/user/hand/right/input/trackpad/click"),
            (Menu, "/user/hand/left/input/menu/click"),
            (Menu, "/user/hand/right/input/menu/click"),
            (Aim, "/user/hand/left/input/aim/pose"),
            (Aim, "/user/hand/right/input/aim/pose"),
        ],
        "/interaction_profiles/htc/vive_controller" => &[
            (Trigger, "/user/hand/left/input/trigger/value"),
            (Trigger, "/user/hand/right/input/trigger/value"),
            (GripClick, "/user/hand/left/input/squeeze/click"),
            (GripClick, "/user/hand/right/input/squeeze/click"),
            (Thumbstick, "/user/hand/left/input/trackpad"),
            (Thumbstick, "/user/hand/right/input/trackpad"),
            (ThumbstickClick, "/user/hand/left/input/trackpad/click"),
            (ThumbstickClick, "/user/hand/right/input/trackpad/click"),
            (Menu, "/user/hand/left/input/menu/click"),
            (Menu, "/user/hand/right/input/menu/click"),
            (Aim, "/user/hand/left/input/aim/pose"),
            (Aim, "/user/hand/right/input/aim/pose"),
        ],
        _ => &[],
    }
}

/// Action set with per-hand subaction paths.
///
/// The aim-pose spaces live in [`HandSpaces`] so the owner can destroy them
/// before the session while the action set outlives the session.
pub struct InputActions {
    action_set: xr::ActionSet,
    trigger: xr::Action<f32>,
    trigger_click: xr::Action<bool>,
    grip: xr::Action<f32>,
    grip_click: xr::Action<bool>,
    thumbstick: xr::Action<xr::Vector2f>,
    thumbstick_click: xr::Action<bool>,
    primary: xr::Action<bool>,
    secondary: xr::Action<bool>,
    menu: xr::Action<bool>,
    aim: xr::Action<xr::Posef>,
    hands: [xr::Path; 2],
}

impl InputActions {
    pub fn new<G: xr::Graphics>(
        instance: &xr::Instance,
        session: &xr::Session<G>,
    ) -> VrResult<Self> {
        let action_set = instance
            .create_action_set("stereohook", "Stereohook", 0)
            .map_err(runtime_err("action set"))?;

        let left = instance
            .string_to_path("/user/hand/left")
            .map_err(runtime_err("path left"))?;
        let right = instance
            .string_to_path("/user/hand/right")
            .map_err(runtime_err("path right"))?;
        let hands = [left, right];

        let trigger = action_set
            .create_action("trigger", "Trigger", &hands)
            .map_err(runtime_err("action trigger"))?;
        let trigger_click = action_set
            .create_action("trigger_click", "Trigger Click", &hands)
            .map_err(runtime_err("action trigger_click"))?;
        let grip = action_set
            .create_action("grip", "Grip", &hands)
            .map_err(runtime_err("action grip"))?;
        let grip_click = action_set
            .create_action("grip_click", "Grip Click", &hands)
            .map_err(runtime_err("action grip_click"))?;
        let thumbstick = action_set
            .create_action("thumbstick", "Thumbstick", &hands)
            .map_err(runtime_err("action thumbstick"))?;
        let thumbstick_click = action_set
            .create_action("thumbstick_click", "Thumbstick Click", &hands)
            .map_err(runtime_err("action thumbstick_click"))?;
        let primary = action_set
            .create_action("primary", "Primary", &hands)
            .map_err(runtime_err("action primary"))?;
        let secondary = action_set
            .create_action("secondary", "Secondary", &hands)
            .map_err(runtime_err("action secondary"))?;
        let menu = action_set
            .create_action("menu", "Menu", &hands)
            .map_err(runtime_err("action menu"))?;
        let aim = action_set
            .create_action::<xr::Posef>("aim", "Aim", &hands)
            .map_err(runtime_err("action aim"))?;

        let actions = Self {
            action_set,
            trigger,
            trigger_click,
            grip,
            grip_click,
            thumbstick,
            thumbstick_click,
            primary,
            secondary,
            menu,
            aim,
            hands,
        };
        actions.suggest_bindings(instance);

        session
            .attach_action_sets(&[&actions.action_set])
            .map_err(runtime_err("attach actions"))?;
        Ok(actions)
    }

    /// Creates one aim-pose space per hand.
    pub fn hand_spaces<G: xr::Graphics>(&self, session: &xr::Session<G>) -> VrResult<HandSpaces> {
        let [left, right] = self.hands;
        Ok(HandSpaces {
            aim: [
                self.aim
                    .create_space(session, left, xr::Posef::IDENTITY)
                    .map_err(runtime_err("left aim space"))?,
                self.aim
                    .create_space(session, right, xr::Posef::IDENTITY)
                    .map_err(runtime_err("right aim space"))?,
            ],
        })
    }

    fn suggest_bindings(&self, instance: &xr::Instance) {
        for profile in INTERACTION_PROFILES {
            let Ok(profile_path) = instance.string_to_path(profile) else {
                continue;
            };
            let mut bindings = Vec::new();
            for (kind, path) in profile_bindings(profile) {
                let Ok(path) = instance.string_to_path(path) else {
                    continue;
                };
                bindings.push(match kind {
                    ActionKind::Trigger => xr::Binding::new(&self.trigger, path),
                    ActionKind::TriggerClick => xr::Binding::new(&self.trigger_click, path),
                    ActionKind::Grip => xr::Binding::new(&self.grip, path),
                    ActionKind::GripClick => xr::Binding::new(&self.grip_click, path),
                    ActionKind::Thumbstick => xr::Binding::new(&self.thumbstick, path),
                    ActionKind::ThumbstickClick => xr::Binding::new(&self.thumbstick_click, path),
                    ActionKind::Primary => xr::Binding::new(&self.primary, path),
                    ActionKind::Secondary => xr::Binding::new(&self.secondary, path),
                    ActionKind::Menu => xr::Binding::new(&self.menu, path),
                    ActionKind::Aim => xr::Binding::new(&self.aim, path),
                });
            }
            if let Err(err) = instance.suggest_interaction_profile_bindings(profile_path, &bindings)
            {
                debug!("binding suggestion rejected for {profile}: {err:?}");
            }
        }
    }

    /// Syncs the action set and reads every per-hand value.
    pub fn poll<G: xr::Graphics>(&self, session: &xr::Session<G>) -> VrResult<RawControllerInput> {
        session
            .sync_actions(&[xr::ActiveActionSet::new(&self.action_set)])
            .map_err(runtime_err("sync actions"))?;

        let mut raw = RawControllerInput::default();
        for (hand, path) in raw.hands.iter_mut().zip(self.hands) {
            let trigger = self.trigger.state(session, path).ok();
            let trigger_click = self.trigger_click.state(session, path).ok();
            let grip = self.grip.state(session, path).ok();
            let grip_click = self.grip_click.state(session, path).ok();
            let stick = self.thumbstick.state(session, path).ok();
            let stick_click = self.thumbstick_click.state(session, path).ok();
            let primary = self.primary.state(session, path).ok();
            let secondary = self.secondary.state(session, path).ok();
            let menu = self.menu.state(session, path).ok();

            let is_active = |active: Option<bool>| active.unwrap_or(false);
            let active = is_active(trigger.as_ref().map(|s| s.is_active))
                || is_active(trigger_click.as_ref().map(|s| s.is_active))
                || is_active(grip.as_ref().map(|s| s.is_active))
                || is_active(grip_click.as_ref().map(|s| s.is_active))
                || is_active(stick.as_ref().map(|s| s.is_active))
                || is_active(primary.as_ref().map(|s| s.is_active));
            if !active {
                continue;
            }

            let pressed =
                |s: &Option<xr::ActionState<bool>>| s.as_ref().is_some_and(|s| s.current_state);
            let click_value =
                |s: &Option<xr::ActionState<bool>>| if pressed(s) { 1.0 } else { 0.0 };
            let stick = stick
                .as_ref()
                .map(|s| s.current_state)
                .unwrap_or(xr::Vector2f { x: 0.0, y: 0.0 });

            *hand = RawHandInput {
                active,
                trigger: trigger
                    .as_ref()
                    .map_or(0.0, |s| s.current_state)
                    .max(click_value(&trigger_click)),
                grip: grip
                    .as_ref()
                    .map_or(0.0, |s| s.current_state)
                    .max(click_value(&grip_click)),
                thumbstick: [stick.x, stick.y],
                thumbstick_click: pressed(&stick_click),
                primary: pressed(&primary),
                secondary: pressed(&secondary),
                aim: None,
            };
            raw.menu |= pressed(&menu);
        }
        Ok(raw)
    }

}

/// Per-hand aim-pose spaces created from [`InputActions`].
pub struct HandSpaces {
    aim: [xr::Space; 2],
}

impl HandSpaces {
    /// Aim poses relative to `base`, `None` for an untracked hand.
    pub fn locate(&self, base: &xr::Space, time: xr::Time) -> [Option<Pose>; 2] {
        self.aim.each_ref().map(|space| match space.locate(base, time) {
            Ok(location) if space_tracked(location.location_flags) => Some(to_pose(location.pose)),
            Ok(_) => None,
            Err(err) => {
                debug!("aim space locate failed: {err:?}");
                None
            }
        })
    }
}

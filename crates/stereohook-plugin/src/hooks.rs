//! Hook bodies, independent of the platform glue that calls them.
//!
//! Every body answers one question: what, if anything, to do before the
//! host's original function runs. The glue always calls the original
//! afterwards with unmodified arguments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stereohook_vr::{
    CameraPose, CaptureOnce, GamepadFusion, GamepadState, PresentOutcome, VrError, VrResult,
    VrSettings, VrSystem, XrBackend,
};
use tracing::{debug, error, info};

/// Time given to in-flight hook calls to observe the shutdown flag.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(50);

/// Fractional bits of the host's fixed-point world coordinates.
pub const FIXED_POINT_BITS: u32 = 17;

/// Converts meters to the host's fixed-point world coordinate.
pub fn to_fixed_point(value: f32) -> i32 {
    let scaled = value * (1u32 << FIXED_POINT_BITS) as f32;
    if scaled.is_nan() {
        0
    } else {
        scaled.clamp(i32::MIN as f32, i32::MAX as f32) as i32
    }
}

pub fn from_fixed_point(bits: i32) -> f32 {
    bits as f32 / (1u32 << FIXED_POINT_BITS) as f32
}

/// World transform block of a host camera component.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostTransform {
    pub position: [i32; 3],
    _pad: u32,
    /// i, j, k, r
    pub orientation: [f32; 4],
}

impl HostTransform {
    pub fn position_meters(&self) -> [f32; 3] {
        self.position.map(from_fixed_point)
    }
}

/// Overwrites the camera transform with the headset pose.
pub fn apply_camera_pose(transform: &mut HostTransform, pose: &CameraPose) {
    transform.position = pose.position.map(to_fixed_point);
    transform.orientation = pose.orientation;
}

/// Builds a backend once the host's graphics objects are known.
pub type Connect<B, G> = fn(&G, &'static VrSettings) -> VrResult<B>;

/// Process-wide plugin state shared by all hooks.
pub struct Plugin<B: XrBackend, G> {
    shutting_down: AtomicBool,
    capture_warned: AtomicBool,
    graphics: CaptureOnce<G>,
    engine: VrSystem<B>,
    gamepad: GamepadFusion,
    connect: Connect<B, G>,
}

impl<B: XrBackend, G> Plugin<B, G> {
    pub fn new(settings: &'static VrSettings, connect: Connect<B, G>) -> Self {
        Self {
            shutting_down: AtomicBool::new(false),
            capture_warned: AtomicBool::new(false),
            graphics: CaptureOnce::new(),
            engine: VrSystem::new(settings),
            gamepad: GamepadFusion::new(),
            connect,
        }
    }

    pub fn engine(&self) -> &VrSystem<B> {
        &self.engine
    }

    pub fn graphics(&self) -> &CaptureOnce<G> {
        &self.graphics
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn bypassed(&self) -> bool {
        self.is_shutting_down() || !self.engine.settings().vr_enabled()
    }

    /// Present hook body.
    ///
    /// `capture` runs at most once per process, under the capture lock, to
    /// obtain the host's graphics objects. `back_buffer` yields the image
    /// being presented.
    pub fn present<C, I>(&self, capture: C, back_buffer: I) -> PresentOutcome
    where
        C: FnOnce() -> stereohook_common::Result<G>,
        I: FnOnce() -> Option<B::Image>,
    {
        if self.bypassed() {
            return PresentOutcome::Disabled;
        }

        match self.graphics.get_or_capture(capture) {
            Ok(true) => info!("host graphics captured"),
            Ok(false) => {}
            Err(err) => {
                if !self.capture_warned.swap(true, Ordering::AcqRel) {
                    error!("failed to capture host graphics: {err}");
                }
                return PresentOutcome::Disabled;
            }
        }
        if !self.engine.is_initialized() && !self.engine.is_disabled() {
            self.connect_engine();
        }

        if !self.engine.is_active() {
            return PresentOutcome::Disabled;
        }
        match back_buffer() {
            Some(image) => self.engine.on_present(&image),
            None => PresentOutcome::Disabled,
        }
    }

    fn connect_engine(&self) {
        let settings = self.engine.settings();
        let connect = self.connect;
        let result = self
            .graphics
            .with(|graphics| self.engine.initialize(|| connect(graphics, settings)));
        if let Some(Err(err)) = result {
            debug!("VR not connected, host rendering continues: {err}");
        }
    }

    /// Recreates the runtime session after loss, using the captured graphics.
    pub fn reset_session(&self) -> VrResult<()> {
        let settings = self.engine.settings();
        let connect = self.connect;
        self.graphics
            .with(|graphics| self.engine.reset_session(|| connect(graphics, settings)))
            .unwrap_or(Err(VrError::NotRunning))
    }

    /// Camera hook body: writes the headset pose when one is available.
    pub fn camera_update(&self, transform: &mut HostTransform) -> bool {
        if self.bypassed() {
            return false;
        }
        match self.engine.camera_pose() {
            Some(pose) => {
                apply_camera_pose(transform, &pose);
                true
            }
            None => false,
        }
    }

    /// Input hook body, run on the record the original poll returned.
    pub fn fuse_gamepad(&self, user_index: u32, pad: &mut GamepadState) -> bool {
        if user_index != 0 || self.bypassed() {
            return false;
        }
        let Some(vr) = self.engine.controller_state() else {
            return false;
        };
        if !pad.connected {
            *pad = GamepadState::default();
        }
        self.gamepad.fuse(pad, &vr);
        true
    }

    /// Stops routing hook calls into the engine, waits out in-flight calls,
    /// then releases the session and the captured graphics objects.
    pub fn shutdown(&self, grace: Duration) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("plugin shutting down");
        std::thread::sleep(grace);

        self.graphics.teardown(|graphics| {
            self.engine.shutdown();
            drop(graphics);
        });
        info!("plugin shut down");
    }
}

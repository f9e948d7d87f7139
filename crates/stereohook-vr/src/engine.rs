//! The stereo session engine.
//!
//! [`VrSystem`] is the only type the hook layer talks to. It owns the
//! runtime backend behind a mutex and exposes three entry points, one per
//! host callback:
//!
//! * [`on_present`](VrSystem::on_present) from the render thread, once per
//!   host present. Even presents are the left eye and also run the tracked
//!   frame (event drain, frame wait/begin, pose and action acquisition).
//! * [`camera_pose`](VrSystem::camera_pose) from the camera update, which
//!   only reads published caches.
//! * [`controller_state`](VrSystem::controller_state) from input polls,
//!   which likewise only reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::{
    backend::XrBackend,
    cache::Latest,
    config::VrSettings,
    coords::runtime_to_host,
    eye::{eye_position, Eye, EyeCounter, PairTracker, StereoPairCache},
    fusion::ActionFusion,
    session::{SessionLifecycle, SessionPhase, SessionStateMachine},
    status::{phase_status, set_vr_status},
    types::{CameraPose, ControllerState, FrameTiming, PoseKind, ProjectionView, TrackedPose, View},
    VrError, VrResult,
};

/// What a present call did with the host image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// VR is off or not initialized; the image was left alone.
    Disabled,
    /// The eye's VR work was skipped (no running frame, copy failure, ...).
    Skipped(Eye),
    /// The image was submitted and the stereo pair is still open.
    Submitted(Eye),
    /// The right eye completed the pair and the runtime frame was ended.
    FrameEnded,
}

/// A runtime frame between `begin_frame` and `end_frame`.
#[derive(Debug)]
struct OpenFrame {
    timing: FrameTiming,
    views: Option<[View; 2]>,
    copied: [bool; 2],
}

struct Inner<B> {
    backend: B,
    frame: Option<OpenFrame>,
    /// A frame that was waited on but never begun. The runtime expects
    /// begin before the next wait.
    waited: Option<FrameTiming>,
    fusion: ActionFusion,
}

struct Lifecycle<'a, B>(&'a mut B);

impl<B: XrBackend> SessionLifecycle for Lifecycle<'_, B> {
    fn begin_session(&mut self) -> VrResult<()> {
        self.0.begin_session()
    }

    fn end_session(&mut self) -> VrResult<()> {
        self.0.end_session()
    }
}

pub struct VrSystem<B: XrBackend> {
    settings: &'static VrSettings,
    inner: Mutex<Option<Inner<B>>>,
    initialized: AtomicBool,
    disabled: AtomicBool,
    failing: AtomicBool,
    session: SessionStateMachine,
    eyes: EyeCounter,
    pairs: PairTracker,
    pair_pose: StereoPairCache,
    head: Latest<TrackedPose>,
    controllers: Latest<ControllerState>,
}

impl<B: XrBackend> VrSystem<B> {
    pub fn new(settings: &'static VrSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(None),
            initialized: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            session: SessionStateMachine::new(),
            eyes: EyeCounter::new(),
            pairs: PairTracker::new(),
            pair_pose: StereoPairCache::new(),
            head: Latest::new(),
            controllers: Latest::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Inner<B>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn settings(&self) -> &'static VrSettings {
        self.settings
    }

    /// True once an unrecoverable error has switched VR off for good.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Initialized, not latched off, and enabled in settings.
    pub fn is_active(&self) -> bool {
        self.is_initialized() && !self.is_disabled() && self.settings.vr_enabled()
    }

    pub fn session_phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn present_count(&self) -> u64 {
        self.eyes.count()
    }

    /// Creates the backend if none exists yet.
    ///
    /// A fatal factory error latches the engine off; later calls fail fast
    /// without running the factory again.
    pub fn initialize<F>(&self, factory: F) -> VrResult<()>
    where
        F: FnOnce() -> VrResult<B>,
    {
        if self.is_disabled() {
            return Err(VrError::Unavailable("VR disabled after an earlier failure".into()));
        }
        let mut guard = self.lock();
        if guard.is_some() {
            return Ok(());
        }
        match factory() {
            Ok(backend) => {
                *guard = Some(Inner {
                    backend,
                    frame: None,
                    waited: None,
                    fusion: ActionFusion::new(),
                });
                self.session.reset();
                self.initialized.store(true, Ordering::Release);
                info!("VR session created");
                set_vr_status("VR: session created, waiting for runtime");
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                self.disabled.store(true, Ordering::Release);
                error!("VR initialization failed, disabling VR: {err}");
                set_vr_status(format!("VR disabled: {err}"));
                Err(err)
            }
            Err(err) => {
                warn!("VR initialization failed, will retry: {err}");
                set_vr_status(format!("VR: initialization failed ({err})"));
                Err(err)
            }
        }
    }

    fn note_failure(&self, context: &str, err: &VrError) {
        if matches!(err, VrError::NotRunning) {
            debug!("{context}: {err}");
        } else if !self.failing.swap(true, Ordering::AcqRel) {
            warn!("{context}: {err}");
        } else {
            debug!("{context}: {err}");
        }
    }

    fn note_success(&self) {
        if self.failing.swap(false, Ordering::AcqRel) {
            info!("VR frame pipeline recovered");
        }
    }

    fn drain_events(&self, inner: &mut Inner<B>) {
        loop {
            match inner.backend.poll_event() {
                Ok(Some(phase)) => {
                    let before = self.session.phase();
                    self.session.drive(phase, &mut Lifecycle(&mut inner.backend));
                    let after = self.session.phase();
                    if before != after {
                        set_vr_status(phase_status(after));
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    self.note_failure("event poll failed", &err);
                    break;
                }
            }
        }
    }

    /// Runs one tracked frame: drains runtime events and, when the session
    /// is running and no frame is open, waits for and begins a frame, then
    /// publishes the head pose and controller state.
    ///
    /// An already open frame is reused.
    pub fn update(&self) -> VrResult<()> {
        if self.is_disabled() {
            return Err(VrError::Unavailable("VR disabled".into()));
        }
        let mut guard = self.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| VrError::Unavailable("VR not initialized".into()))?;

        self.drain_events(inner);

        if self.session.is_terminal() {
            if inner.frame.take().is_some() {
                debug!("abandoning open frame after session loss");
            }
            inner.waited = None;
            self.pairs.reset();
            return Err(VrError::NotRunning);
        }
        if !self.session.is_running() {
            return Err(VrError::NotRunning);
        }
        if inner.frame.is_some() {
            return Ok(());
        }

        let timing = match inner.waited.take() {
            Some(timing) => timing,
            None => inner.backend.wait_frame()?,
        };
        if let Err(err) = inner.backend.begin_frame() {
            inner.waited = Some(timing);
            return Err(err);
        }
        let time = timing.predicted_display_time_ns;
        let mut frame = OpenFrame {
            timing,
            views: None,
            copied: [false; 2],
        };

        match inner.backend.locate_views(time) {
            Ok(views) => {
                frame.views = Some(views);
                self.head.publish(TrackedPose {
                    kind: PoseKind::Head,
                    pose: runtime_to_host(views[0].pose),
                    valid: true,
                });
            }
            Err(err) => {
                // Keep the last good pose, only flag it stale.
                self.head.update(|last| TrackedPose { valid: false, ..last });
                self.note_failure("view location failed", &err);
            }
        }
        inner.frame = Some(frame);

        let hands = inner.backend.locate_hands(time).unwrap_or_else(|err| {
            self.note_failure("hand location failed", &err);
            [None, None]
        });
        match inner.backend.poll_actions(time) {
            Ok(mut raw) => {
                for (hand, aim) in raw.hands.iter_mut().zip(hands) {
                    hand.aim = aim;
                }
                let state = inner.fusion.fuse(&raw, self.settings);
                self.controllers.publish(state);
            }
            Err(err) => self.note_failure("action sync failed", &err),
        }
        Ok(())
    }

    /// Copies `image` into `eye`'s swapchain and, for a right eye that
    /// follows a left eye, ends the runtime frame.
    ///
    /// Returns `Ok(true)` when the frame was ended.
    pub fn submit_frame(&self, image: &B::Image, eye: Eye) -> VrResult<bool> {
        let mut guard = self.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| VrError::Unavailable("VR not initialized".into()))?;
        let Some(frame) = inner.frame.as_mut() else {
            return Err(VrError::Protocol(format!("{eye:?} eye submitted with no open frame")));
        };

        if frame.timing.should_render {
            match inner.backend.copy_to_eye(image, eye) {
                Ok(()) => frame.copied[eye.index()] = true,
                Err(err) => self.note_failure("eye copy failed", &err),
            }
        }

        if !self.pairs.record(eye) {
            return Ok(false);
        }

        let Some(frame) = inner.frame.take() else {
            return Ok(false);
        };
        let layer = if frame.timing.should_render && frame.copied.iter().all(|c| *c) {
            frame.views.and_then(|views| {
                let left = inner.backend.swapchain_extent(Eye::Left)?;
                let right = inner.backend.swapchain_extent(Eye::Right)?;
                Some([
                    ProjectionView {
                        pose: views[0].pose,
                        fov: views[0].fov,
                        extent: left,
                    },
                    ProjectionView {
                        pose: views[1].pose,
                        fov: views[1].fov,
                        extent: right,
                    },
                ])
            })
        } else {
            None
        };
        inner
            .backend
            .end_frame(frame.timing.predicted_display_time_ns, layer.as_ref())?;
        Ok(true)
    }

    /// Render-thread entry point, once per host present.
    pub fn on_present(&self, image: &B::Image) -> PresentOutcome {
        if !self.is_active() {
            return PresentOutcome::Disabled;
        }
        let (_, eye) = self.eyes.advance();
        if eye == Eye::Left {
            if let Err(err) = self.update() {
                self.note_failure("tracked frame failed", &err);
            }
        }
        match self.submit_frame(image, eye) {
            Ok(true) => {
                self.note_success();
                PresentOutcome::FrameEnded
            }
            Ok(false) => PresentOutcome::Submitted(eye),
            Err(VrError::Protocol(msg)) => {
                debug!("{msg}");
                PresentOutcome::Skipped(eye)
            }
            Err(err) => {
                self.note_failure("frame submission failed", &err);
                PresentOutcome::Skipped(eye)
            }
        }
    }

    /// Latest head sample in host coordinates, including stale ones.
    pub fn head_pose(&self) -> Option<TrackedPose> {
        self.head.get()
    }

    /// Camera transform for the eye the next present will carry.
    pub fn camera_pose(&self) -> Option<CameraPose> {
        if !self.is_active() {
            return None;
        }
        let latest = self.head.get().filter(|sample| sample.valid)?;
        let eye = self.eyes.upcoming();
        let pose = self.pair_pose.pose_for(eye, || Some(latest.pose))?;
        Some(CameraPose {
            position: eye_position(
                pose.position,
                eye,
                self.settings.ipd(),
                self.settings.world_scale(),
            ),
            orientation: pose.orientation,
        })
    }

    /// The last published controller state, when at least one hand is tracked.
    pub fn controller_state(&self) -> Option<ControllerState> {
        if !self.is_active() {
            return None;
        }
        self.controllers.get().filter(ControllerState::any_valid)
    }

    /// Tears the backend down. The owner is expected to have stopped
    /// routing host calls here first.
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        self.initialized.store(false, Ordering::Release);
        if let Some(mut inner) = guard.take() {
            if inner.frame.take().is_some() {
                debug!("discarding open frame at shutdown");
            }
            if self.session.is_running() {
                if let Err(err) = inner.backend.end_session() {
                    warn!("failed to end session at shutdown: {err}");
                }
            }
            drop(inner);
            info!("VR session destroyed");
        }
        self.session.reset();
        self.pairs.reset();
        self.pair_pose.clear();
        self.head.clear();
        self.controllers.clear();
        set_vr_status("VR: shut down");
    }

    /// Replaces a lost or exited session with a freshly created one.
    pub fn reset_session<F>(&self, factory: F) -> VrResult<()>
    where
        F: FnOnce() -> VrResult<B>,
    {
        info!(phase = ?self.session.phase(), "recreating VR session");
        self.shutdown();
        self.initialize(factory)
    }
}

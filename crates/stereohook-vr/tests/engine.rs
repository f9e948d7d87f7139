use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use stereohook_vr::{
    Eye, Fov, FrameTiming, ImageExtent, Pose, PresentOutcome, ProjectionView, RawControllerInput,
    RawHandInput, SessionPhase, View, VrError, VrResult, VrSettings, VrSystem, XrBackend,
};

#[derive(Default)]
struct Script {
    events: VecDeque<SessionPhase>,
    should_render: bool,
    tracking: bool,
    head_position: [f32; 3],
    fail_copy: [bool; 2],
    right_hand_tracked: bool,
    right_primary: bool,
    begins: usize,
    ends: usize,
    fail_begin_frame: bool,
    frames_waited: usize,
    frames_begun: usize,
    copies: Vec<Eye>,
    frame_ends: Vec<Option<[ProjectionView; 2]>>,
}

struct MockBackend(Arc<Mutex<Script>>);

impl MockBackend {
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }
}

fn view(x: f32, pos: [f32; 3]) -> View {
    View {
        pose: Pose {
            position: [pos[0] + x, pos[1], pos[2]],
            orientation: [0.0, 0.0, 0.0, 1.0],
        },
        fov: Fov {
            angle_left: -0.8,
            angle_right: 0.8,
            angle_up: 0.8,
            angle_down: -0.8,
        },
    }
}

impl XrBackend for MockBackend {
    type Image = u32;

    fn poll_event(&mut self) -> VrResult<Option<SessionPhase>> {
        Ok(self.script().events.pop_front())
    }

    fn begin_session(&mut self) -> VrResult<()> {
        self.script().begins += 1;
        Ok(())
    }

    fn end_session(&mut self) -> VrResult<()> {
        self.script().ends += 1;
        Ok(())
    }

    fn wait_frame(&mut self) -> VrResult<FrameTiming> {
        let mut s = self.script();
        s.frames_waited += 1;
        Ok(FrameTiming {
            predicted_display_time_ns: 1_000 * (s.frames_begun as i64 + 1),
            predicted_display_period_ns: 11_111_111,
            should_render: s.should_render,
        })
    }

    fn begin_frame(&mut self) -> VrResult<()> {
        let mut s = self.script();
        if s.fail_begin_frame {
            return Err(VrError::Runtime("begin frame rejected".into()));
        }
        s.frames_begun += 1;
        Ok(())
    }

    fn locate_views(&mut self, _display_time_ns: i64) -> VrResult<[View; 2]> {
        let s = self.script();
        if !s.tracking {
            return Err(VrError::Runtime("views not tracked".into()));
        }
        Ok([view(-0.032, s.head_position), view(0.032, s.head_position)])
    }

    fn locate_hands(&mut self, _display_time_ns: i64) -> VrResult<[Option<Pose>; 2]> {
        let s = self.script();
        Ok([None, s.right_hand_tracked.then_some(Pose::IDENTITY)])
    }

    fn poll_actions(&mut self, _display_time_ns: i64) -> VrResult<RawControllerInput> {
        let s = self.script();
        let mut raw = RawControllerInput::default();
        raw.hands[1] = RawHandInput {
            active: true,
            primary: s.right_primary,
            ..Default::default()
        };
        Ok(raw)
    }

    fn copy_to_eye(&mut self, _image: &u32, eye: Eye) -> VrResult<()> {
        let mut s = self.script();
        if s.fail_copy[eye.index()] {
            return Err(VrError::Timeout("swapchain image wait".into()));
        }
        s.copies.push(eye);
        Ok(())
    }

    fn swapchain_extent(&self, _eye: Eye) -> Option<ImageExtent> {
        Some(ImageExtent {
            width: 1832,
            height: 1920,
        })
    }

    fn end_frame(
        &mut self,
        _display_time_ns: i64,
        layer: Option<&[ProjectionView; 2]>,
    ) -> VrResult<()> {
        self.script().frame_ends.push(layer.copied());
        Ok(())
    }
}

fn leaked_settings() -> &'static VrSettings {
    Box::leak(Box::new(VrSettings::default()))
}

const RUNNING: [SessionPhase; 5] = [
    SessionPhase::Idle,
    SessionPhase::Ready,
    SessionPhase::Synchronized,
    SessionPhase::Visible,
    SessionPhase::Focused,
];

fn running_system() -> (VrSystem<MockBackend>, Arc<Mutex<Script>>) {
    let script = Arc::new(Mutex::new(Script {
        events: RUNNING.into_iter().collect(),
        should_render: true,
        tracking: true,
        head_position: [0.0, 1.6, -0.5],
        ..Default::default()
    }));
    let system = VrSystem::new(leaked_settings());
    let backend = MockBackend(script.clone());
    system.initialize(move || Ok(backend)).unwrap();
    (system, script)
}

#[test]
fn presents_alternate_eyes_and_end_one_frame_per_pair() {
    let (system, script) = running_system();
    let outcomes: Vec<_> = (0..4).map(|_| system.on_present(&0)).collect();
    assert_eq!(
        outcomes,
        vec![
            PresentOutcome::Submitted(Eye::Left),
            PresentOutcome::FrameEnded,
            PresentOutcome::Submitted(Eye::Left),
            PresentOutcome::FrameEnded,
        ]
    );
    let s = script.lock().unwrap();
    assert_eq!(s.begins, 1);
    assert_eq!(s.frames_begun, 2);
    assert_eq!(s.copies, vec![Eye::Left, Eye::Right, Eye::Left, Eye::Right]);
    assert_eq!(s.frame_ends.len(), 2);
    let layer = s.frame_ends[0].expect("projection layer");
    assert_eq!(layer[0].extent.width, 1832);
    assert!(layer[0].pose.position[0] < layer[1].pose.position[0]);
}

#[test]
fn failed_begin_is_retried_before_waiting_again() {
    let (system, script) = running_system();
    script.lock().unwrap().fail_begin_frame = true;
    assert!(matches!(system.update(), Err(VrError::Runtime(_))));
    assert!(matches!(system.update(), Err(VrError::Runtime(_))));
    {
        let s = script.lock().unwrap();
        assert_eq!(s.frames_waited, 1);
        assert_eq!(s.frames_begun, 0);
    }

    script.lock().unwrap().fail_begin_frame = false;
    system.update().unwrap();
    let s = script.lock().unwrap();
    assert_eq!(s.frames_waited, 1);
    assert_eq!(s.frames_begun, 1);
}

#[test]
fn repeated_left_submission_does_not_end_frame() {
    let (system, script) = running_system();
    system.update().unwrap();
    assert!(!system.submit_frame(&0, Eye::Left).unwrap());
    assert!(!system.submit_frame(&0, Eye::Left).unwrap());
    assert!(script.lock().unwrap().frame_ends.is_empty());
    assert!(system.submit_frame(&0, Eye::Right).unwrap());
    assert_eq!(script.lock().unwrap().frame_ends.len(), 1);
}

#[test]
fn right_eye_without_open_frame_is_ignored() {
    let (system, script) = running_system();
    assert!(matches!(
        system.submit_frame(&0, Eye::Right),
        Err(VrError::Protocol(_))
    ));
    assert!(script.lock().unwrap().frame_ends.is_empty());
}

#[test]
fn should_render_false_ends_frame_without_layers() {
    let (system, script) = running_system();
    script.lock().unwrap().should_render = false;
    system.on_present(&0);
    assert_eq!(system.on_present(&0), PresentOutcome::FrameEnded);
    let s = script.lock().unwrap();
    assert!(s.copies.is_empty());
    assert_eq!(s.frame_ends, vec![None]);
}

#[test]
fn failed_eye_copy_skips_layer_but_ends_frame() {
    let (system, script) = running_system();
    script.lock().unwrap().fail_copy = [false, true];
    system.on_present(&0);
    assert_eq!(system.on_present(&0), PresentOutcome::FrameEnded);
    assert_eq!(script.lock().unwrap().frame_ends, vec![None]);

    // The next pair recovers.
    script.lock().unwrap().fail_copy = [false, false];
    system.on_present(&0);
    system.on_present(&0);
    assert!(script.lock().unwrap().frame_ends[1].is_some());
}

#[test]
fn camera_pose_applies_ipd_per_eye_from_one_head_sample() {
    let (system, script) = running_system();
    system.update().unwrap();

    // Runtime (0, 1.6, -0.5) is host (0, 0.5, 1.6); left view sits at x - 0.032.
    let left = system.camera_pose().unwrap();
    assert!((left.position[0] - (-0.032 - 0.032)).abs() < 1e-5, "{left:?}");
    assert!((left.position[1] - 0.5).abs() < 1e-5);
    assert!((left.position[2] - 1.6).abs() < 1e-5);

    system.on_present(&0);
    // A fresher sample must not leak into the right half of the pair.
    script.lock().unwrap().head_position = [5.0, 1.6, -0.5];
    let right = system.camera_pose().unwrap();
    assert!((right.position[0] - (-0.032 + 0.032)).abs() < 1e-5, "{right:?}");
    assert_eq!(right.orientation, left.orientation);
}

#[test]
fn world_scale_is_applied_to_camera_pose() {
    let (system, _script) = running_system();
    system.settings().set_world_scale(1.5);
    system.update().unwrap();
    let pose = system.camera_pose().unwrap();
    assert!((pose.position[1] - 0.75).abs() < 1e-5);
    assert!((pose.position[2] - 2.4).abs() < 1e-5);
}

#[test]
fn tracking_loss_keeps_cached_pose_but_suppresses_camera() {
    let (system, script) = running_system();
    system.on_present(&0);
    system.on_present(&0);
    let good = system.head_pose().unwrap();
    assert!(good.valid);

    script.lock().unwrap().tracking = false;
    script.lock().unwrap().head_position = [9.0, 9.0, 9.0];
    system.on_present(&0);
    let stale = system.head_pose().unwrap();
    assert!(!stale.valid);
    assert_eq!(stale.pose, good.pose);
    assert_eq!(system.camera_pose(), None);
    assert_eq!(system.on_present(&0), PresentOutcome::FrameEnded);
    // No views, so the frame ended without a layer.
    assert_eq!(script.lock().unwrap().frame_ends.last(), Some(&None));

    script.lock().unwrap().tracking = true;
    system.on_present(&0);
    assert!(system.camera_pose().is_some());
}

#[test]
fn loss_pending_stops_new_frames_until_reset() {
    let (system, script) = running_system();
    system.on_present(&0);
    system.on_present(&0);
    assert_eq!(script.lock().unwrap().frames_begun, 1);

    script
        .lock()
        .unwrap()
        .events
        .push_back(SessionPhase::LossPending);
    for _ in 0..6 {
        assert!(matches!(
            system.on_present(&0),
            PresentOutcome::Skipped(_)
        ));
    }
    assert_eq!(system.session_phase(), SessionPhase::LossPending);
    assert_eq!(script.lock().unwrap().frames_begun, 1);
    assert!(matches!(system.update(), Err(VrError::NotRunning)));

    let fresh = Arc::new(Mutex::new(Script {
        events: RUNNING.into_iter().collect(),
        should_render: true,
        tracking: true,
        ..Default::default()
    }));
    let backend = MockBackend(fresh.clone());
    system.reset_session(move || Ok(backend)).unwrap();
    system.on_present(&0);
    system.on_present(&0);
    let s = fresh.lock().unwrap();
    assert_eq!(s.begins, 1);
    assert_eq!(s.frames_begun, 1);
}

#[test]
fn fatal_initialization_latches_disabled() {
    let system: VrSystem<MockBackend> = VrSystem::new(leaked_settings());
    let err = system
        .initialize(|| Err(VrError::Config("runtime reported 1 view".into())))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(system.is_disabled());

    let mut called = false;
    let result = system.initialize(|| {
        called = true;
        Ok(MockBackend(Arc::default()))
    });
    assert!(matches!(result, Err(VrError::Unavailable(_))));
    assert!(!called);
    assert_eq!(system.on_present(&0), PresentOutcome::Disabled);
    assert_eq!(system.camera_pose(), None);
}

#[test]
fn transient_initialization_error_allows_retry() {
    let system: VrSystem<MockBackend> = VrSystem::new(leaked_settings());
    assert!(system
        .initialize(|| Err(VrError::Runtime("instance busy".into())))
        .is_err());
    assert!(!system.is_disabled());
    assert!(system
        .initialize(|| Ok(MockBackend(Arc::default())))
        .is_ok());
    assert!(system.is_initialized());
}

#[test]
fn disabled_setting_bypasses_everything() {
    let (system, script) = running_system();
    system.settings().set_vr_enabled(false);
    assert_eq!(system.on_present(&0), PresentOutcome::Disabled);
    assert_eq!(system.present_count(), 0);
    assert_eq!(script.lock().unwrap().frames_begun, 0);
}

#[test]
fn controller_state_requires_a_tracked_hand() {
    let (system, script) = running_system();
    script.lock().unwrap().right_primary = true;
    system.update().unwrap();
    assert_eq!(system.controller_state(), None);

    script.lock().unwrap().right_hand_tracked = true;
    system.on_present(&0);
    system.on_present(&0);
    system.on_present(&0);
    let state = system.controller_state().unwrap();
    assert!(state.right().valid);
    assert!(state.buttons.contains(stereohook_vr::GamepadButtons::A));
}

#[test]
fn shutdown_ends_running_session() {
    let (system, script) = running_system();
    system.update().unwrap();
    system.shutdown();
    assert_eq!(script.lock().unwrap().ends, 1);
    assert!(!system.is_initialized());
    assert_eq!(system.on_present(&0), PresentOutcome::Disabled);
    assert_eq!(system.head_pose(), None);
}

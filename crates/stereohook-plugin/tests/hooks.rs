use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use stereohook_common::Error;
use stereohook_plugin::{HostTransform, Plugin};
use stereohook_vr::{
    Eye, Fov, FrameTiming, GamepadButtons, GamepadState, ImageExtent, Pose, PresentOutcome,
    ProjectionView, RawControllerInput, RawHandInput, SessionPhase, View, VrError, VrResult,
    VrSettings, XrBackend,
};

#[derive(Default)]
struct Script {
    events: VecDeque<SessionPhase>,
    connects: usize,
    ends: usize,
    frame_ends: usize,
}

struct Graphics {
    script: Arc<Mutex<Script>>,
    fatal: bool,
}

struct Backend(Arc<Mutex<Script>>);

impl Backend {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }
}

impl XrBackend for Backend {
    type Image = u32;

    fn poll_event(&mut self) -> VrResult<Option<SessionPhase>> {
        Ok(self.script().events.pop_front())
    }

    fn begin_session(&mut self) -> VrResult<()> {
        Ok(())
    }

    fn end_session(&mut self) -> VrResult<()> {
        self.script().ends += 1;
        Ok(())
    }

    fn wait_frame(&mut self) -> VrResult<FrameTiming> {
        Ok(FrameTiming {
            predicted_display_time_ns: 1,
            predicted_display_period_ns: 11_111_111,
            should_render: true,
        })
    }

    fn begin_frame(&mut self) -> VrResult<()> {
        Ok(())
    }

    fn locate_views(&mut self, _display_time_ns: i64) -> VrResult<[View; 2]> {
        let view = View {
            pose: Pose {
                position: [0.0, 1.6, -0.5],
                orientation: [0.0, 0.0, 0.0, 1.0],
            },
            fov: Fov {
                angle_left: -0.8,
                angle_right: 0.8,
                angle_up: 0.8,
                angle_down: -0.8,
            },
        };
        Ok([view, view])
    }

    fn locate_hands(&mut self, _display_time_ns: i64) -> VrResult<[Option<Pose>; 2]> {
        Ok([None, Some(Pose::IDENTITY)])
    }

    fn poll_actions(&mut self, _display_time_ns: i64) -> VrResult<RawControllerInput> {
        let mut raw = RawControllerInput::default();
        raw.hands[1] = RawHandInput {
            active: true,
            primary: true,
            trigger: 1.0,
            ..Default::default()
        };
        Ok(raw)
    }

    fn copy_to_eye(&mut self, _image: &u32, _eye: Eye) -> VrResult<()> {
        Ok(())
    }

    fn swapchain_extent(&self, _eye: Eye) -> Option<ImageExtent> {
        Some(ImageExtent {
            width: 1024,
            height: 1024,
        })
    }

    fn end_frame(
        &mut self,
        _display_time_ns: i64,
        _layer: Option<&[ProjectionView; 2]>,
    ) -> VrResult<()> {
        self.script().frame_ends += 1;
        Ok(())
    }
}

fn connect(graphics: &Graphics, _settings: &'static VrSettings) -> VrResult<Backend> {
    graphics.script.lock().unwrap().connects += 1;
    if graphics.fatal {
        return Err(VrError::Unavailable("no headset".into()));
    }
    Ok(Backend(graphics.script.clone()))
}

fn leaked_settings() -> &'static VrSettings {
    Box::leak(Box::new(VrSettings::default()))
}

fn script() -> Arc<Mutex<Script>> {
    Arc::new(Mutex::new(Script {
        events: [
            SessionPhase::Idle,
            SessionPhase::Ready,
            SessionPhase::Synchronized,
            SessionPhase::Visible,
            SessionPhase::Focused,
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    }))
}

fn plugin() -> Plugin<Backend, Graphics> {
    Plugin::new(leaked_settings(), connect)
}

fn present(
    plugin: &Plugin<Backend, Graphics>,
    script: &Arc<Mutex<Script>>,
    captures: &AtomicUsize,
) -> PresentOutcome {
    plugin.present(
        || {
            captures.fetch_add(1, Ordering::SeqCst);
            Ok(Graphics {
                script: script.clone(),
                fatal: false,
            })
        },
        || Some(7),
    )
}

#[test]
fn first_present_captures_and_connects_once() {
    let plugin = plugin();
    let script = script();
    let captures = AtomicUsize::new(0);

    let outcomes: Vec<_> = (0..4).map(|_| present(&plugin, &script, &captures)).collect();
    assert_eq!(
        outcomes,
        vec![
            PresentOutcome::Submitted(Eye::Left),
            PresentOutcome::FrameEnded,
            PresentOutcome::Submitted(Eye::Left),
            PresentOutcome::FrameEnded,
        ]
    );
    assert_eq!(captures.load(Ordering::SeqCst), 1);
    assert_eq!(script.lock().unwrap().connects, 1);
    assert_eq!(script.lock().unwrap().frame_ends, 2);
}

#[test]
fn failed_capture_falls_through_and_retries() {
    let plugin = plugin();
    let script = script();
    let outcome = plugin.present(|| Err(Error::graphics("no device")), || Some(7));
    assert_eq!(outcome, PresentOutcome::Disabled);
    assert!(!plugin.graphics().is_ready());

    let captures = AtomicUsize::new(0);
    assert_eq!(
        present(&plugin, &script, &captures),
        PresentOutcome::Submitted(Eye::Left)
    );
    assert_eq!(captures.load(Ordering::SeqCst), 1);
}

#[test]
fn fatal_connect_disables_without_retrying() {
    let plugin = plugin();
    let script = script();
    for _ in 0..3 {
        let outcome = plugin.present(
            || {
                Ok(Graphics {
                    script: script.clone(),
                    fatal: true,
                })
            },
            || Some(7),
        );
        assert_eq!(outcome, PresentOutcome::Disabled);
    }
    assert!(plugin.engine().is_disabled());
    assert_eq!(script.lock().unwrap().connects, 1);
}

#[test]
fn disabled_setting_skips_capture() {
    let plugin = plugin();
    plugin.engine().settings().set_vr_enabled(false);
    let script = script();
    let captures = AtomicUsize::new(0);
    assert_eq!(present(&plugin, &script, &captures), PresentOutcome::Disabled);
    assert_eq!(captures.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_back_buffer_is_left_to_the_host() {
    let plugin = plugin();
    let script = script();
    let outcome = plugin.present(
        || {
            Ok(Graphics {
                script: script.clone(),
                fatal: false,
            })
        },
        || None,
    );
    assert_eq!(outcome, PresentOutcome::Disabled);
    assert!(plugin.graphics().is_ready());
}

#[test]
fn camera_hook_writes_right_eye_after_left_present() {
    let plugin = plugin();
    let script = script();
    let captures = AtomicUsize::new(0);

    let mut transform = HostTransform::default();
    assert!(!plugin.camera_update(&mut transform));

    present(&plugin, &script, &captures);
    assert!(plugin.camera_update(&mut transform));
    let position = transform.position_meters();
    assert!((position[0] - 0.032).abs() < 1.0e-4, "{position:?}");
    assert!((position[1] - 0.5).abs() < 1.0e-4, "{position:?}");
    assert!((position[2] - 1.6).abs() < 1.0e-4, "{position:?}");
}

#[test]
fn input_hook_synthesizes_a_pad_for_player_one_only() {
    let plugin = plugin();
    let script = script();
    let captures = AtomicUsize::new(0);

    let mut pad = GamepadState::default();
    assert!(!plugin.fuse_gamepad(0, &mut pad));

    present(&plugin, &script, &captures);

    let mut other = GamepadState::default();
    assert!(!plugin.fuse_gamepad(1, &mut other));
    assert_eq!(other, GamepadState::default());

    let mut pad = GamepadState {
        connected: false,
        buttons: GamepadButtons::DPAD_UP,
        thumb_lx: 1234,
        ..Default::default()
    };
    assert!(plugin.fuse_gamepad(0, &mut pad));
    assert!(pad.connected);
    assert!(pad.buttons.contains(GamepadButtons::A));
    assert!(!pad.buttons.contains(GamepadButtons::DPAD_UP));
    assert_eq!(pad.thumb_lx, 0);
    assert_eq!(pad.right_trigger, 255);
}

#[test]
fn shutdown_releases_resources_and_bypasses_hooks() {
    let plugin = plugin();
    let script = script();
    let captures = AtomicUsize::new(0);
    present(&plugin, &script, &captures);

    plugin.shutdown(Duration::ZERO);
    assert!(plugin.is_shutting_down());
    assert!(!plugin.graphics().is_ready());
    assert!(!plugin.engine().is_initialized());
    assert_eq!(script.lock().unwrap().ends, 1);

    assert_eq!(present(&plugin, &script, &captures), PresentOutcome::Disabled);
    assert_eq!(captures.load(Ordering::SeqCst), 1);
    let mut pad = GamepadState::default();
    assert!(!plugin.fuse_gamepad(0, &mut pad));

    // Second unload is a no-op.
    plugin.shutdown(Duration::ZERO);
    assert_eq!(script.lock().unwrap().ends, 1);
}

#[test]
fn reset_session_requires_captured_graphics() {
    let plugin = plugin();
    assert!(matches!(plugin.reset_session(), Err(VrError::NotRunning)));

    let script = script();
    let captures = AtomicUsize::new(0);
    present(&plugin, &script, &captures);
    plugin.reset_session().unwrap();
    assert_eq!(script.lock().unwrap().connects, 2);
}

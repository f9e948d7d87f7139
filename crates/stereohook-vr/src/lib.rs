#![forbid(unsafe_code)]

pub mod aim;
pub mod backend;
pub mod cache;
pub mod capture;
pub mod config;
pub mod coords;
pub mod engine;
pub mod eye;
pub mod fusion;
pub mod input;
pub mod session;
pub mod status;
pub mod types;

pub use backend::XrBackend;
pub use capture::CaptureOnce;
pub use config::{settings, VrSettings};
pub use engine::{PresentOutcome, VrSystem};
pub use eye::{Eye, EyeCounter};
pub use input::{GamepadButtons, GamepadFusion, GamepadState};
pub use session::{SessionPhase, SessionStateMachine};
pub use status::{phase_status, set_vr_status, vr_status};
pub use types::{
    CameraPose, ControllerState, Fov, FrameTiming, HandState, ImageExtent, Pose, PoseKind,
    ProjectionView, RawControllerInput, RawHandInput, TrackedPose, View,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VrError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("gpu error: {0}")]
    Gpu(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("session not running")]
    NotRunning,
    #[error("protocol misuse: {0}")]
    Protocol(String),
}

impl VrError {
    /// Errors that disable VR for the rest of the process lifetime.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VrError::Unavailable(_) | VrError::Config(_))
    }
}

pub type VrResult<T> = Result<T, VrError>;

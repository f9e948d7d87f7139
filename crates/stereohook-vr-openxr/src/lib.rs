//! OpenXR runtime backend for `stereohook-vr`.

pub mod common;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "windows")]
pub use self::windows::{GpuCopier, HostGraphics, OpenXrBackend};

#![allow(clippy::missing_safety_doc)]

//! Plugin loaded into the host process by its mod loader.
//!
//! The loader calls [`stereohook_load`] once with a [`HostApi`] table and
//! [`stereohook_unload`] before the process exits. Hooks are never removed;
//! after unload they fall straight through to the host's originals.

use std::ffi::c_void;

pub mod detour;
pub mod hooks;
pub mod pattern;
pub mod settings;

#[cfg(target_os = "windows")]
mod host;

pub use detour::{AttachFn, Detour, LoaderHooks, OriginalFn};
pub use hooks::{HostTransform, Plugin, SHUTDOWN_GRACE};
pub use pattern::Pattern;

/// Services the loader hands to the plugin.
#[repr(C)]
pub struct HostApi {
    /// Installs a detour and writes the trampoline to `original`.
    pub attach: Option<AttachFn>,
    /// Camera update function found through the host's reflection data, or
    /// null when the plugin has to fall back to signature scanning.
    pub camera_update: *mut c_void,
    /// Byte offset of the world transform inside a camera component.
    pub camera_transform_offset: usize,
}

/// Installs the hooks. Returns `false` when the mandatory present hook
/// could not be installed; the host keeps running unmodified.
#[cfg(target_os = "windows")]
#[no_mangle]
pub unsafe extern "C" fn stereohook_load(api: *const HostApi) -> bool {
    stereohook_common::init_tracing();
    let Some(api) = api.as_ref() else {
        tracing::error!("stereohook_load called without a host API table");
        return false;
    };
    match host::load(api) {
        Ok(()) => true,
        Err(err) => {
            tracing::error!("failed to load stereohook: {err}");
            stereohook_vr::set_vr_status(format!("VR disabled: {err}"));
            false
        }
    }
}

#[cfg(target_os = "windows")]
#[no_mangle]
pub extern "C" fn stereohook_unload() {
    host::unload();
}

//! C ABI settings bridge for the host's scripting layer.
//!
//! Every setter is callable from any thread; the store is a set of atomic
//! cells read by the hooks without locking.

use std::ffi::c_char;

use stereohook_vr::{settings, vr_status, VrSettings};
use tracing::{info, warn};

fn set_enabled(store: &VrSettings, enabled: bool) {
    if store.vr_enabled() != enabled {
        info!("VR {} via settings bridge", if enabled { "enabled" } else { "disabled" });
    }
    store.set_vr_enabled(enabled);
}

fn set_ipd(store: &VrSettings, ipd_mm: f32) -> f32 {
    match store.set_ipd_mm(ipd_mm) {
        Some(stored) => {
            info!("IPD set to {stored:.1} mm");
            stored
        }
        None => {
            warn!("ignoring non-finite IPD {ipd_mm}");
            store.ipd_mm()
        }
    }
}

fn set_scale(store: &VrSettings, scale: f32) -> f32 {
    match store.set_world_scale(scale) {
        Some(stored) => {
            info!("world scale set to {stored:.2}");
            stored
        }
        None => {
            warn!("ignoring non-finite world scale {scale}");
            store.world_scale()
        }
    }
}

fn set_aiming(store: &VrSettings, enabled: bool) {
    if store.decoupled_aiming() != enabled {
        info!(
            "decoupled aiming {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }
    store.set_decoupled_aiming(enabled);
}

fn set_smoothing(store: &VrSettings, factor: f32) -> f32 {
    match store.set_aim_smoothing(factor) {
        Some(stored) => {
            info!("aim smoothing set to {stored:.2}");
            stored
        }
        None => {
            warn!("ignoring non-finite aim smoothing {factor}");
            store.aim_smoothing()
        }
    }
}

fn set_timeout(store: &VrSettings, ms: u32) -> u32 {
    let stored = store.set_gpu_wait_timeout_ms(ms);
    info!("GPU wait timeout set to {stored} ms");
    stored
}

/// Copies `text` into `buf` as a NUL-terminated string, truncating on a
/// character boundary. Returns the full length the text needs, without
/// the terminator.
fn write_c_string(text: &str, buf: &mut [u8]) -> usize {
    if let Some(room) = buf.len().checked_sub(1) {
        let mut end = text.len().min(room);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        buf[..end].copy_from_slice(&text.as_bytes()[..end]);
        buf[end] = 0;
    }
    text.len()
}

#[no_mangle]
pub extern "C" fn stereohook_get_vr_enabled() -> bool {
    settings().vr_enabled()
}

#[no_mangle]
pub extern "C" fn stereohook_set_vr_enabled(enabled: bool) {
    set_enabled(settings(), enabled);
}

#[no_mangle]
pub extern "C" fn stereohook_get_ipd_mm() -> f32 {
    settings().ipd_mm()
}

/// Returns the IPD actually stored after clamping to [50, 80] mm.
#[no_mangle]
pub extern "C" fn stereohook_set_ipd_mm(ipd_mm: f32) -> f32 {
    set_ipd(settings(), ipd_mm)
}

#[no_mangle]
pub extern "C" fn stereohook_get_world_scale() -> f32 {
    settings().world_scale()
}

#[no_mangle]
pub extern "C" fn stereohook_set_world_scale(scale: f32) -> f32 {
    set_scale(settings(), scale)
}

#[no_mangle]
pub extern "C" fn stereohook_get_decoupled_aiming() -> bool {
    settings().decoupled_aiming()
}

#[no_mangle]
pub extern "C" fn stereohook_set_decoupled_aiming(enabled: bool) {
    set_aiming(settings(), enabled);
}

#[no_mangle]
pub extern "C" fn stereohook_get_aim_smoothing() -> f32 {
    settings().aim_smoothing()
}

#[no_mangle]
pub extern "C" fn stereohook_set_aim_smoothing(factor: f32) -> f32 {
    set_smoothing(settings(), factor)
}

#[no_mangle]
pub extern "C" fn stereohook_get_gpu_timeout_ms() -> u32 {
    settings().gpu_wait_timeout_ms()
}

#[no_mangle]
pub extern "C" fn stereohook_set_gpu_timeout_ms(ms: u32) -> u32 {
    set_timeout(settings(), ms)
}

/// Writes the current status line into `buf`.
///
/// Returns the status length in bytes; a return value of `len` or more
/// means the text was truncated.
#[no_mangle]
pub unsafe extern "C" fn stereohook_vr_status(buf: *mut c_char, len: usize) -> usize {
    let status = vr_status();
    if buf.is_null() || len == 0 {
        return status.len();
    }
    let out = std::slice::from_raw_parts_mut(buf.cast::<u8>(), len);
    write_c_string(&status, out)
}

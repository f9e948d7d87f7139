//! Function interception through the host loader.

use std::ffi::c_void;
use std::sync::OnceLock;

use stereohook_common::{Error, Result};
use tracing::info;

/// Something that can redirect a function to a replacement.
///
/// Interceptions are never removed; the loader tears them down with the
/// process.
pub trait Detour {
    /// Redirects `target` to `replacement` and returns the address of a
    /// trampoline that still runs the original body.
    ///
    /// # Safety
    /// `target` must be the entry point of a function whose signature matches
    /// `replacement`.
    unsafe fn install(&self, target: usize, replacement: usize) -> Result<usize>;
}

/// Attach callback exported by the host loader.
pub type AttachFn = unsafe extern "C" fn(
    target: *mut c_void,
    detour: *mut c_void,
    original: *mut *mut c_void,
) -> bool;

/// [`Detour`] backed by the loader's attach callback.
#[derive(Clone, Copy)]
pub struct LoaderHooks {
    attach: AttachFn,
}

impl LoaderHooks {
    pub fn new(attach: AttachFn) -> Self {
        Self { attach }
    }
}

impl Detour for LoaderHooks {
    unsafe fn install(&self, target: usize, replacement: usize) -> Result<usize> {
        let mut original: *mut c_void = std::ptr::null_mut();
        let attached = (self.attach)(
            target as *mut c_void,
            replacement as *mut c_void,
            &mut original,
        );
        if !attached {
            return Err(Error::hook(format!("loader refused to attach at {target:#x}")));
        }
        if original.is_null() {
            return Err(Error::hook(format!("loader returned no trampoline for {target:#x}")));
        }
        Ok(original as usize)
    }
}

/// Trampoline address for one hooked function. Written once at install
/// time, read from every hook invocation.
#[derive(Debug, Default)]
pub struct OriginalFn {
    slot: OnceLock<usize>,
}

impl OriginalFn {
    pub const fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Option<usize> {
        self.slot.get().copied()
    }

    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }

    fn set(&self, address: usize) -> Result<()> {
        self.slot
            .set(address)
            .map_err(|_| Error::hook("original function already recorded"))
    }
}

/// Installs one interception and records its trampoline in `slot`.
///
/// # Safety
/// Same contract as [`Detour::install`].
pub unsafe fn install_hook(
    detour: &dyn Detour,
    name: &str,
    target: usize,
    replacement: usize,
    slot: &OriginalFn,
) -> Result<()> {
    if target == 0 {
        return Err(Error::not_found(format!("{name}: no target address")));
    }
    if slot.is_set() {
        return Err(Error::hook(format!("{name}: already installed")));
    }
    let original = detour.install(target, replacement)?;
    slot.set(original)?;
    info!("{name} hook installed at {target:#x}");
    Ok(())
}

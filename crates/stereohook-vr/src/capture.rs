//! One-time capture of host resources from the first hooked call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Double-checked single initialization.
///
/// The fast path is one atomic load. Only callers that observe "not ready"
/// take the mutex, and they re-check before running the capture body, so the
/// body runs at most once per successful capture no matter how many threads
/// race through the first call.
#[derive(Debug)]
pub struct CaptureOnce<T> {
    ready: AtomicBool,
    slot: Mutex<Option<T>>,
}

impl<T> Default for CaptureOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CaptureOnce<T> {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            slot: Mutex::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Locks the slot. Teardown holds this guard while releasing resources.
    pub fn lock(&self) -> MutexGuard<'_, Option<T>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs `capture` if nothing has been captured yet.
    ///
    /// Returns `Ok(true)` when this call performed the capture. A failed
    /// capture leaves the slot empty so a later call may retry.
    pub fn get_or_capture<E>(&self, capture: impl FnOnce() -> Result<T, E>) -> Result<bool, E> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(false);
        }
        let mut slot = self.lock();
        if self.ready.load(Ordering::Acquire) {
            return Ok(false);
        }
        *slot = Some(capture()?);
        self.ready.store(true, Ordering::Release);
        Ok(true)
    }

    /// Runs `f` against the captured value, if any.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        if !self.is_ready() {
            return None;
        }
        self.lock().as_ref().map(f)
    }

    /// Clears the ready flag and hands the captured value to `teardown`,
    /// which runs with the lock still held.
    pub fn teardown<R>(&self, teardown: impl FnOnce(Option<T>) -> R) -> R {
        let mut slot = self.lock();
        self.ready.store(false, Ordering::Release);
        teardown(slot.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_capture_can_be_retried() {
        let once = CaptureOnce::<u32>::new();
        assert_eq!(once.get_or_capture(|| Err::<u32, _>("no queue yet")), Err("no queue yet"));
        assert!(!once.is_ready());
        assert_eq!(once.get_or_capture(|| Ok::<_, ()>(7)), Ok(true));
        assert_eq!(once.get_or_capture(|| Ok::<_, ()>(8)), Ok(false));
        assert_eq!(once.with(|v| *v), Some(7));
    }

    #[test]
    fn teardown_resets() {
        let once = CaptureOnce::new();
        once.get_or_capture(|| Ok::<_, ()>("device")).unwrap();
        assert_eq!(once.teardown(|v| v), Some("device"));
        assert!(!once.is_ready());
        assert_eq!(once.with(|v| *v), None);
    }
}

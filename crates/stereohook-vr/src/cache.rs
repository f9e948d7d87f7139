//! Whole-value publication slots shared between the render and update paths.

use std::sync::{Mutex, MutexGuard};

/// Holds the most recently published value.
///
/// Readers copy the whole value out under the lock, so a reader sees either
/// the previous or the new value, never a mix of both.
#[derive(Debug)]
pub struct Latest<T: Copy> {
    value: Mutex<Option<T>>,
}

impl<T: Copy> Default for Latest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> Latest<T> {
    pub const fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<T>> {
        match self.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn publish(&self, value: T) {
        *self.slot() = Some(value);
    }

    /// Replaces the stored value with `f(previous)` if one exists.
    pub fn update(&self, f: impl FnOnce(T) -> T) -> bool {
        let mut slot = self.slot();
        match *slot {
            Some(previous) => {
                *slot = Some(f(previous));
                true
            }
            None => false,
        }
    }

    pub fn get(&self) -> Option<T> {
        *self.slot()
    }

    pub fn clear(&self) {
        *self.slot() = None;
    }
}

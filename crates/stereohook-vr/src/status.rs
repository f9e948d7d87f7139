use std::sync::{Mutex, OnceLock};

use crate::session::SessionPhase;

fn default_status() -> String {
    "VR: idle (waiting for host graphics queue)".to_string()
}

static VR_STATUS: OnceLock<Mutex<String>> = OnceLock::new();

fn status_cell() -> &'static Mutex<String> {
    VR_STATUS.get_or_init(|| Mutex::new(default_status()))
}

/// Last lifecycle milestone, for display by the settings bridge.
pub fn vr_status() -> String {
    match status_cell().lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn set_vr_status(status: impl Into<String>) {
    let mut guard = match status_cell().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = status.into();
}

pub fn phase_status(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Unknown => "VR: waiting for runtime",
        SessionPhase::Idle => "VR: session idle (headset not ready)",
        SessionPhase::Ready => "VR: session starting",
        SessionPhase::Synchronized => "VR: session synchronized",
        SessionPhase::Visible => "VR: session visible",
        SessionPhase::Focused => "VR: session focused",
        SessionPhase::Stopping => "VR: session stopping",
        SessionPhase::LossPending => "VR: headset lost, restart required",
        SessionPhase::Exiting => "VR: runtime exiting",
    }
}

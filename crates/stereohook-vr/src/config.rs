//! Process-wide runtime-tunable settings.
//!
//! Every value lives in its own atomic cell so the render, camera and input
//! callbacks can read it without taking a lock while the settings bridge
//! writes from an arbitrary thread. Each cell carries a version counter that
//! is bumped on every accepted store.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use stereohook_common::helpers::{env_bool, env_parse};

pub const IPD_MIN_MM: f32 = 50.0;
pub const IPD_MAX_MM: f32 = 80.0;
pub const DEFAULT_IPD_MM: f32 = 64.0;

pub const WORLD_SCALE_MIN: f32 = 0.5;
pub const WORLD_SCALE_MAX: f32 = 2.0;

pub const AIM_SMOOTHING_MIN: f32 = 0.0;
pub const AIM_SMOOTHING_MAX: f32 = 0.95;
pub const DEFAULT_AIM_SMOOTHING: f32 = 0.5;

pub const GPU_TIMEOUT_MIN_MS: u32 = 1;
pub const GPU_TIMEOUT_MAX_MS: u32 = 5_000;
pub const DEFAULT_GPU_TIMEOUT_MS: u32 = 100;

#[derive(Debug)]
pub struct FloatCell {
    bits: AtomicU32,
    version: AtomicU64,
}

impl FloatCell {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
            version: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct FlagCell {
    value: AtomicBool,
    version: AtomicU64,
}

impl FlagCell {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
            version: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct U32Cell {
    value: AtomicU32,
    version: AtomicU64,
}

impl U32Cell {
    pub fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
            version: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: u32) {
        self.value.store(value, Ordering::Release);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// The settings exposed to the host's scripting bridge.
#[derive(Debug)]
pub struct VrSettings {
    vr_enabled: FlagCell,
    /// Stored in meters.
    ipd: FloatCell,
    world_scale: FloatCell,
    decoupled_aiming: FlagCell,
    aim_smoothing: FloatCell,
    gpu_wait_timeout_ms: U32Cell,
}

impl Default for VrSettings {
    fn default() -> Self {
        Self {
            vr_enabled: FlagCell::new(true),
            ipd: FloatCell::new(DEFAULT_IPD_MM / 1000.0),
            world_scale: FloatCell::new(1.0),
            decoupled_aiming: FlagCell::new(true),
            aim_smoothing: FloatCell::new(DEFAULT_AIM_SMOOTHING),
            gpu_wait_timeout_ms: U32Cell::new(DEFAULT_GPU_TIMEOUT_MS),
        }
    }
}

impl VrSettings {
    /// Defaults overridden by `STEREOHOOK_*` environment variables.
    pub fn from_env() -> Self {
        let settings = Self::default();
        settings.apply_env();
        settings
    }

    pub fn apply_env(&self) {
        if let Some(enabled) = env_bool("STEREOHOOK_VR_ENABLED") {
            self.set_vr_enabled(enabled);
        }
        if let Some(ipd_mm) = env_parse::<f32>("STEREOHOOK_IPD_MM") {
            self.set_ipd_mm(ipd_mm);
        }
        if let Some(scale) = env_parse::<f32>("STEREOHOOK_WORLD_SCALE") {
            self.set_world_scale(scale);
        }
        if let Some(enabled) = env_bool("STEREOHOOK_DECOUPLED_AIMING") {
            self.set_decoupled_aiming(enabled);
        }
        if let Some(factor) = env_parse::<f32>("STEREOHOOK_AIM_SMOOTHING") {
            self.set_aim_smoothing(factor);
        }
        if let Some(ms) = env_parse::<u32>("STEREOHOOK_GPU_TIMEOUT_MS") {
            self.set_gpu_wait_timeout_ms(ms);
        }
    }

    pub fn vr_enabled(&self) -> bool {
        self.vr_enabled.get()
    }

    pub fn set_vr_enabled(&self, enabled: bool) {
        self.vr_enabled.set(enabled);
    }

    /// Inter-pupillary distance in meters.
    pub fn ipd(&self) -> f32 {
        self.ipd.get()
    }

    pub fn ipd_mm(&self) -> f32 {
        self.ipd.get() * 1000.0
    }

    /// Returns the stored value in millimeters, or `None` if rejected.
    pub fn set_ipd_mm(&self, ipd_mm: f32) -> Option<f32> {
        if !ipd_mm.is_finite() {
            return None;
        }
        let clamped = ipd_mm.clamp(IPD_MIN_MM, IPD_MAX_MM);
        self.ipd.set(clamped / 1000.0);
        Some(clamped)
    }

    pub fn world_scale(&self) -> f32 {
        self.world_scale.get()
    }

    pub fn set_world_scale(&self, scale: f32) -> Option<f32> {
        if !scale.is_finite() {
            return None;
        }
        let clamped = scale.clamp(WORLD_SCALE_MIN, WORLD_SCALE_MAX);
        self.world_scale.set(clamped);
        Some(clamped)
    }

    pub fn decoupled_aiming(&self) -> bool {
        self.decoupled_aiming.get()
    }

    pub fn set_decoupled_aiming(&self, enabled: bool) {
        self.decoupled_aiming.set(enabled);
    }

    pub fn aim_smoothing(&self) -> f32 {
        self.aim_smoothing.get()
    }

    pub fn set_aim_smoothing(&self, factor: f32) -> Option<f32> {
        if !factor.is_finite() {
            return None;
        }
        let clamped = factor.clamp(AIM_SMOOTHING_MIN, AIM_SMOOTHING_MAX);
        self.aim_smoothing.set(clamped);
        Some(clamped)
    }

    pub fn gpu_wait_timeout_ms(&self) -> u32 {
        self.gpu_wait_timeout_ms.get()
    }

    pub fn gpu_wait_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.gpu_wait_timeout_ms.get()))
    }

    pub fn set_gpu_wait_timeout_ms(&self, ms: u32) -> u32 {
        let clamped = ms.clamp(GPU_TIMEOUT_MIN_MS, GPU_TIMEOUT_MAX_MS);
        self.gpu_wait_timeout_ms.set(clamped);
        clamped
    }

    /// Sum of all cell versions; changes whenever any setting is stored.
    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.vr_enabled.version()
            + self.ipd.version()
            + self.world_scale.version()
            + self.decoupled_aiming.version()
            + self.aim_smoothing.version()
            + self.gpu_wait_timeout_ms.version()
    }
}

static SETTINGS: OnceLock<VrSettings> = OnceLock::new();

/// The process-wide settings store, seeded from the environment on first use.
pub fn settings() -> &'static VrSettings {
    SETTINGS.get_or_init(VrSettings::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn defaults_match_documented_values() {
        let s = VrSettings::default();
        assert!(s.vr_enabled());
        assert!((s.ipd() - 0.064).abs() < 1e-6);
        assert_eq!(s.world_scale(), 1.0);
        assert!(s.decoupled_aiming());
        assert_eq!(s.aim_smoothing(), 0.5);
        assert_eq!(s.gpu_wait_timeout_ms(), DEFAULT_GPU_TIMEOUT_MS);
    }

    #[test]
    fn ipd_is_clamped_and_stored_in_meters() {
        let s = VrSettings::default();
        assert_eq!(s.set_ipd_mm(40.0), Some(50.0));
        assert!((s.ipd() - 0.050).abs() < 1e-6);
        assert_eq!(s.set_ipd_mm(95.0), Some(80.0));
        assert!((s.ipd_mm() - 80.0).abs() < 1e-3);
        assert_eq!(s.set_ipd_mm(63.5), Some(63.5));
        assert!((s.ipd() - 0.0635).abs() < 1e-6);
    }

    #[test]
    fn scalar_clamps() {
        let s = VrSettings::default();
        assert_eq!(s.set_world_scale(0.1), Some(0.5));
        assert_eq!(s.set_world_scale(3.0), Some(2.0));
        assert_eq!(s.set_aim_smoothing(-1.0), Some(0.0));
        assert_eq!(s.set_aim_smoothing(1.0), Some(0.95));
        assert_eq!(s.set_gpu_wait_timeout_ms(0), GPU_TIMEOUT_MIN_MS);
        assert_eq!(s.set_gpu_wait_timeout_ms(60_000), GPU_TIMEOUT_MAX_MS);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let s = VrSettings::default();
        assert_eq!(s.set_world_scale(f32::NAN), None);
        assert_eq!(s.set_ipd_mm(f32::INFINITY), None);
        assert_eq!(s.world_scale(), 1.0);
        assert!((s.ipd() - 0.064).abs() < 1e-6);
    }

    #[test]
    fn versions_advance_on_store() {
        let s = VrSettings::default();
        let before = s.generation();
        s.set_decoupled_aiming(false);
        s.set_world_scale(1.5);
        assert_eq!(s.generation(), before + 2);
    }

    #[test]
    fn concurrent_writers_never_produce_out_of_range_values() {
        let s = Arc::new(VrSettings::default());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let s = s.clone();
                thread::spawn(move || {
                    for n in 0..1_000 {
                        s.set_world_scale((n % 7) as f32 * 0.5 + i as f32);
                    }
                })
            })
            .collect();
        for _ in 0..1_000 {
            let scale = s.world_scale();
            assert!((WORLD_SCALE_MIN..=WORLD_SCALE_MAX).contains(&scale));
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }
}

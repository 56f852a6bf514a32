//! Persistent work settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::kernel::KernelData;
use crate::session::Film;
use crate::util::{Error, Result};

/// Settings controlling how work is distributed and filtered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkSettings {
    // CPU
    pub num_threads: usize, // 0 = all cores

    // GPU
    pub max_num_path_states: usize,
    pub use_accelerated_rt: bool,

    // Adaptive sampling
    pub adaptive_threshold: f32,
    pub adaptive_min_samples: u32,
    pub adaptive_step: u32,

    // Sampling pattern
    pub scrambling_distance: f32,

    // Display
    pub show_active_pixels: bool,
}

impl Default for WorkSettings {
    fn default() -> Self {
        Self {
            num_threads: 0,
            max_num_path_states: 1 << 20,
            use_accelerated_rt: false,
            adaptive_threshold: 0.01,
            adaptive_min_samples: 0,
            adaptive_step: 4,
            scrambling_distance: 1.0,
            show_active_pixels: false,
        }
    }
}

impl WorkSettings {
    /// Default settings file location.
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("tilework");
            p.push("settings.json");
            p
        })
    }

    /// Load settings from the default location, falling back to defaults.
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| Self::load_from(&p).ok())
            .unwrap_or_default()
    }

    /// Save settings to the default location.
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| Error::other("no config directory"))?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.save_to(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut settings: Self = serde_json::from_str(&json)?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Replace out-of-range values with defaults.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if !(self.adaptive_threshold > 0.0) {
            self.adaptive_threshold = defaults.adaptive_threshold;
        }
        if self.adaptive_step == 0 {
            self.adaptive_step = 1;
        }
        if !self.scrambling_distance.is_finite() || self.scrambling_distance < 0.0 {
            self.scrambling_distance = defaults.scrambling_distance;
        }
    }

    /// Copy the device related settings into `info`.
    pub fn apply_to_device(&self, info: &mut DeviceInfo) {
        info.num_threads = self.num_threads;
        if self.max_num_path_states > 0 {
            info.max_num_path_states = self.max_num_path_states;
        }
        info.use_hardware_raytracing = self.use_accelerated_rt;
    }

    pub fn apply_to_kernel_data(&self, data: &mut KernelData) {
        data.integrator.scrambling_distance = self.scrambling_distance;
    }

    pub fn apply_to_film(&self, film: &mut Film) {
        film.show_active_pixels = self.show_active_pixels;
    }

    /// Whether the adaptive filter should run after `num_samples` samples.
    pub fn adaptive_filter_due(&self, num_samples: u32) -> bool {
        num_samples >= self.adaptive_min_samples && num_samples % self.adaptive_step.max(1) == 0
    }
}

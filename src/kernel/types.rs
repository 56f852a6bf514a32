//! Plain data shared between the work executors and the device kernels.

use bytemuck::{Pod, Zeroable};

use crate::session::{BufferParams, PassMode, PassType};

/// Unit of dispatch handed to one kernel invocation.
///
/// `x, y, w, h` are in global image coordinates. `offset`/`stride` address
/// the render buffer the kernel writes into (see [`BufferParams`]).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct KernelWorkTile {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,

    pub start_sample: i32,
    pub num_samples: i32,
    pub sample_offset: i32,

    pub offset: i32,
    pub stride: i32,
}

impl KernelWorkTile {
    #[inline]
    pub fn num_pixels(&self) -> i64 {
        self.w as i64 * self.h as i64
    }

    /// Number of pixel-samples this tile represents.
    #[inline]
    pub fn work_size(&self) -> i64 {
        self.num_pixels() * self.num_samples as i64
    }
}

/// Film settings and pass offsets, as seen by the kernels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelFilm {
    pub exposure: f32,
    pub pass_stride: usize,

    pub pass_combined: Option<usize>,
    pub pass_adaptive_aux_buffer: Option<usize>,
    pub pass_sample_count: Option<usize>,
    pub pass_render_time: Option<usize>,
    pub pass_shadow_catcher: Option<usize>,
    pub pass_cryptomatte: Option<usize>,
    /// Number of 4-float cryptomatte layers.
    pub cryptomatte_depth: usize,

    /// Nominal samples per pixel, used when no sample count pass exists.
    pub num_samples: u32,
}

impl KernelFilm {
    /// Resolve pass offsets from a buffer layout.
    pub fn from_buffer_params(params: &BufferParams, exposure: f32) -> Self {
        let noisy = |ty| params.get_pass_offset(ty, PassMode::Noisy);
        let cryptomatte_depth = params
            .find_pass(PassType::Cryptomatte, PassMode::Noisy)
            .map(|pass| pass.num_components / PassType::Cryptomatte.num_components())
            .unwrap_or(0);

        Self {
            exposure,
            pass_stride: params.pass_stride,
            pass_combined: noisy(PassType::Combined),
            pass_adaptive_aux_buffer: noisy(PassType::AdaptiveAuxBuffer),
            pass_sample_count: noisy(PassType::SampleCount),
            pass_render_time: noisy(PassType::RenderTime),
            pass_shadow_catcher: noisy(PassType::ShadowCatcher),
            pass_cryptomatte: noisy(PassType::Cryptomatte),
            cryptomatte_depth,
            num_samples: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelIntegrator {
    /// Run a shadow catcher state next to the primary one for every sample.
    pub has_shadow_catcher: bool,
    /// Sampling pattern scrambling distance; below 0.9 favours wide tiles.
    pub scrambling_distance: f32,
}

impl Default for KernelIntegrator {
    fn default() -> Self {
        Self {
            has_shadow_catcher: false,
            scrambling_distance: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelBake {
    /// Initialize paths from the bake source instead of the camera.
    pub use_bake: bool,
}

/// Read-mostly scene data uploaded for one render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelData {
    pub film: KernelFilm,
    pub integrator: KernelIntegrator,
    pub bake: KernelBake,
}

impl KernelData {
    pub fn new(film: KernelFilm) -> Self {
        Self { film, ..Default::default() }
    }
}

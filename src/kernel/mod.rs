//! Contract between the work executors and the integrator kernels.
//!
//! The kernels themselves (intersection, shading, light transport) live
//! outside this crate. The executors only rely on [`IntegratorKernels`]:
//! initialize a path state for one sample of a work tile, then run it to
//! completion, accumulating into the pixel record of that tile.

mod film;
mod globals;
mod types;

pub use film::*;
pub use globals::*;
pub use types::*;

/// In-flight state of one path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegratorState {
    pub x: i32,
    pub y: i32,
    pub sample: i32,
    /// Secondary state isolating the shadow catcher contribution.
    pub shadow_catcher: bool,
    /// Set by the kernels once the path has terminated.
    pub terminated: bool,
}

impl IntegratorState {
    /// State for the shadow catcher path of the same sample.
    pub fn shadow_catcher_split(&self) -> Self {
        Self {
            shadow_catcher: true,
            terminated: false,
            ..self.clone()
        }
    }
}

/// Device kernels the CPU executor calls.
///
/// `pixel` is the render buffer record of the tile's single pixel
/// (`pass_stride` floats). Kernels accumulate into it; the sample count and
/// render time passes are maintained by the executor.
///
/// Kernels run on the work's rayon pool and may use rayon themselves. A
/// thread waiting on such nested work can start another pixel, which then
/// gets its own `KernelGlobals`.
pub trait IntegratorKernels: Send + Sync {
    /// Set up `state` from the camera. Returns `false` when the pixel must
    /// not be sampled (e.g. it already converged).
    fn init_from_camera(
        &self,
        kg: &mut KernelGlobals,
        state: &mut IntegratorState,
        tile: &KernelWorkTile,
        pixel: &mut [f32],
    ) -> bool;

    /// Set up `state` from the bake source.
    fn init_from_bake(
        &self,
        kg: &mut KernelGlobals,
        state: &mut IntegratorState,
        tile: &KernelWorkTile,
        pixel: &mut [f32],
    ) -> bool;

    /// Run the integrator on `state` until the path terminates.
    fn megakernel(&self, kg: &mut KernelGlobals, state: &mut IntegratorState, pixel: &mut [f32]);
}

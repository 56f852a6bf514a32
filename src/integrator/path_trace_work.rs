//! Device-agnostic part of a path trace work.
//!
//! A work renders into a private buffer covering its *effective* rectangle.
//! Several works may cooperate on one *big tile*; each then owns a
//! horizontal band of it. Bands span the full big-tile width, so the
//! big tile is only ever divided vertically and every copy between the two
//! buffers is a single contiguous move.
//!
//! ```text
//! full image  ┌──────────────────────┐
//!             │  big tile ┌────────┐ │
//!             │           │ work 0 │ │
//!             │           ├────────┤ │  offset_y = buffer.full_y - big_tile.full_y
//!             │           │ work 1 │ │
//!             │           └────────┘ │
//!             └──────────────────────┘
//! ```

use std::sync::Arc;

use super::pass_accessor::{Destination, DestinationPixels, PassAccessInfo, PassAccessor, Source};
use super::path_trace_work_cpu::PathTraceWorkCPU;
use super::path_trace_work_gpu::PathTraceWorkGPU;
use crate::device::{CancelToken, Device, DeviceInfo, DeviceType, RenderStatistics};
use crate::kernel::KernelData;
use crate::session::{
    render_buffers_host_copy_denoised, BufferParams, Film, PassMode, PathTraceDisplay,
    RenderBuffers,
};
use crate::util::{Error, Result};

/// Where a work's pixels land on the display texture, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayDestination {
    pub offset: usize,
    pub stride: usize,
}

/// State shared by every device implementation.
#[derive(Debug)]
pub struct PathTraceWorkBase {
    pub device_info: DeviceInfo,
    pub kernel_data: Arc<KernelData>,
    pub film: Film,
    pub cancel: CancelToken,

    /// Render buffer of this work, laid out by `effective_buffer_params`.
    pub buffers: RenderBuffers,

    pub effective_full_params: BufferParams,
    pub effective_big_tile_params: BufferParams,
    pub effective_buffer_params: BufferParams,
}

impl PathTraceWorkBase {
    pub fn new(device_info: DeviceInfo, kernel_data: Arc<KernelData>, film: Film, cancel: CancelToken) -> Self {
        Self {
            device_info,
            kernel_data,
            film,
            cancel,
            buffers: RenderBuffers::default(),
            effective_full_params: BufferParams::default(),
            effective_big_tile_params: BufferParams::default(),
            effective_buffer_params: BufferParams::default(),
        }
    }

    #[inline]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Float offset of this work's first row inside the big-tile buffer.
    fn big_tile_float_offset(&self) -> usize {
        let params = &self.effective_buffer_params;
        let big_tile = &self.effective_big_tile_params;
        debug_assert_eq!(params.full_x, big_tile.full_x, "works split the big tile vertically");
        debug_assert_eq!(params.width, big_tile.width, "works span the big tile width");
        debug_assert_eq!(params.pass_stride, big_tile.pass_stride);

        let offset_y = (params.full_y - big_tile.full_y).max(0) as usize;
        offset_y * params.width.max(0) as usize * params.pass_stride
    }

    /// Number of floats covered by this work's rows.
    fn region_floats(&self) -> usize {
        let params = &self.effective_buffer_params;
        params.num_pixels() * params.pass_stride
    }

    /// Read this work's buffer into `display` through `accessor`.
    ///
    /// Runs on the current rayon pool. A missing pass or a failed texture
    /// mapping skips the update.
    pub fn write_display(
        &self,
        display: &mut dyn PathTraceDisplay,
        info: PassAccessInfo,
        destination: DisplayDestination,
        num_samples: u32,
    ) {
        if let Err(err) = self.buffers.params.require_pass(info.ty, info.mode) {
            tracing::warn!("display update skipped: {err}");
            return;
        }
        let Some(texels) = display.map_texture_buffer() else {
            tracing::debug!("display texture not mappable, skipping update");
            return;
        };

        let accessor = PassAccessor::new(info, &self.kernel_data.film, num_samples);
        let written = accessor.get_render_tile_pixels(
            &self.buffers,
            &self.effective_buffer_params,
            Destination {
                pixels: DestinationPixels::HalfRgba(texels),
                offset: destination.offset,
                stride: destination.stride,
                num_components: 4,
            },
        );
        if !written {
            tracing::warn!("display pass {:?} missing from render buffer", info.ty);
        }

        display.unmap_texture_buffer();
    }
}

/// A unit of rendering bound to one device.
///
/// Implementations provide execution; the buffer partition logic is shared
/// through the provided methods.
pub trait PathTraceWork: Send {
    fn base(&self) -> &PathTraceWorkBase;
    fn base_mut(&mut self) -> &mut PathTraceWorkBase;

    /// Allocate per-execution resources. Must run before rendering.
    fn init_execution(&mut self);

    /// Render `samples_num` samples starting at `start_sample` into the
    /// work's buffer. Blocks until done or cancelled.
    fn render_samples(
        &mut self,
        statistics: &mut RenderStatistics,
        start_sample: i32,
        samples_num: i32,
        sample_offset: i32,
    );

    /// Convert the display pass into the display texture.
    fn copy_to_display(&mut self, display: &mut dyn PathTraceDisplay, pass_mode: PassMode, num_samples: u32);

    /// Release device memory. Host buffers stay intact.
    fn destroy_gpu_resources(&mut self) {}

    /// Bring the host buffer up to date with the device.
    fn copy_render_buffers_from_device(&mut self) -> bool;

    /// Upload the host buffer to the device.
    fn copy_render_buffers_to_device(&mut self) -> bool;

    /// Zero the buffer on both host and device.
    fn zero_render_buffers(&mut self) -> bool;

    /// Run the adaptive sampling filter. Returns the number of active pixels.
    fn adaptive_sampling_converge_filter_count_active(&mut self, threshold: f32, reset: bool) -> usize;

    /// Sort cryptomatte slots of every pixel by weight.
    fn cryptomatte_postproces(&mut self);

    /// Record the nested rectangles this work renders and lay out its buffer.
    ///
    /// `full_params` is the whole image, `big_tile_params` the region shared
    /// with sibling works, `buffer_params` this work's own band.
    fn set_effective_buffer_params(
        &mut self,
        full_params: &BufferParams,
        big_tile_params: &BufferParams,
        buffer_params: &BufferParams,
    ) -> Result<()> {
        debug_assert!(buffer_params.width <= big_tile_params.width);
        let base = self.base_mut();
        base.effective_full_params = full_params.clone();
        base.effective_big_tile_params = big_tile_params.clone();
        base.effective_buffer_params = buffer_params.clone();
        if !base.buffers.params.modified(buffer_params) && base.buffers.buffer.len() == buffer_params.buffer_size() {
            base.buffers.params = buffer_params.clone();
            return Ok(());
        }
        base.buffers.reset(buffer_params.clone())?;
        self.render_buffers_reset();
        Ok(())
    }

    /// Called after the host buffer was re-laid out and zeroed. Devices
    /// holding their own copy of the buffer must drop its contents here.
    fn render_buffers_reset(&mut self) {}

    /// Whether sibling works share the big tile with this one.
    fn has_multiple_works(&self) -> bool {
        let base = self.base();
        !base.effective_buffer_params.same_rect(&base.effective_big_tile_params)
    }

    fn get_render_buffers(&self) -> &RenderBuffers {
        &self.base().buffers
    }

    fn is_cancel_requested(&self) -> bool {
        self.base().is_cancel_requested()
    }

    /// Copy this work's rows into the big-tile buffer.
    fn copy_to_render_buffers(&mut self, render_buffers: &mut RenderBuffers) {
        self.copy_render_buffers_from_device();

        let base = self.base();
        let offset = base.big_tile_float_offset();
        let size = base.region_floats();
        render_buffers.buffer[offset..offset + size].copy_from_slice(&base.buffers.buffer[..size]);
    }

    /// Copy this work's rows out of the big-tile buffer.
    fn copy_from_render_buffers(&mut self, render_buffers: &RenderBuffers) {
        let base = self.base_mut();
        let offset = base.big_tile_float_offset();
        let size = base.region_floats();
        base.buffers.buffer[..size].copy_from_slice(&render_buffers.buffer[offset..offset + size]);

        self.copy_render_buffers_to_device();
    }

    /// Take the denoised passes of this work's rows from the big-tile buffer.
    fn copy_from_denoised_render_buffers(&mut self, render_buffers: &RenderBuffers) {
        let base = self.base_mut();
        let params = &base.effective_buffer_params;
        let offset_y = (params.full_y - base.effective_big_tile_params.full_y).max(0) as usize;
        let pixel_offset = offset_y * params.width.max(0) as usize;
        let dst_params = params.clone();
        render_buffers_host_copy_denoised(
            &mut base.buffers,
            &dst_params,
            render_buffers,
            &render_buffers.params,
            pixel_offset,
        );

        self.copy_render_buffers_to_device();
    }

    /// Read the window of this work's band through `accessor` into a
    /// destination covering the big tile window. Addressed in display rows,
    /// since the window crop may differ from the buffer crop.
    fn get_render_tile_pixels(&self, accessor: &PassAccessor<'_>, mut destination: Destination<'_>) -> bool {
        let base = self.base();
        let params = &base.effective_buffer_params;
        let big_tile = &base.effective_big_tile_params;
        let offset_y = (params.full_y + params.window_y) - (big_tile.full_y + big_tile.window_y);
        destination.offset += offset_y.max(0) as usize * destination.stride;

        accessor.get_render_tile_pixels(&base.buffers, params, destination)
    }

    /// Write this work's band of a big-tile sized source through `accessor`.
    fn set_render_tile_pixels(&mut self, accessor: &PassAccessor<'_>, source: &Source<'_>) -> bool {
        let base = self.base_mut();
        let params = &base.effective_buffer_params;
        let offset_y = (params.full_y - base.effective_big_tile_params.full_y).max(0) as usize;
        let slice_source = Source {
            pixels: source.pixels,
            offset: source.offset + offset_y * params.width.max(0) as usize,
            num_components: source.num_components,
        };

        accessor.set_render_tile_pixels(&mut base.buffers, &slice_source)
    }

    /// Resolve the pass shown for `pass_mode`, falling back to the noisy
    /// variant when no denoised one exists.
    fn get_display_pass_access_info(&self, pass_mode: PassMode) -> PassAccessInfo {
        let base = self.base();
        let display_pass = base.film.display_pass;
        let actual = base.buffers.params.get_actual_display_pass(display_pass, pass_mode);

        PassAccessInfo {
            ty: display_pass,
            mode: actual.map(|pass| pass.mode).unwrap_or(PassMode::Noisy),
            offset: actual.map(|pass| pass.offset),
            show_active_pixels: base.film.show_active_pixels,
        }
    }

    /// Offset and stride of this work inside the display texture, which
    /// spans the full image.
    fn get_display_destination_template(&self, display: &dyn PathTraceDisplay) -> DisplayDestination {
        let base = self.base();
        let params = &base.effective_buffer_params;
        let full = &base.effective_full_params;
        let texture_size = display.texture_size();

        let texture_x = params.full_x - full.full_x + params.window_x;
        let texture_y = params.full_y - full.full_y + params.window_y;

        DisplayDestination {
            offset: (texture_y * texture_size.x + texture_x).max(0) as usize,
            stride: texture_size.x.max(0) as usize,
        }
    }
}

/// Create the work implementation matching the device type.
pub fn create_path_trace_work(
    device: &dyn Device,
    kernel_data: Arc<KernelData>,
    film: Film,
    cancel: CancelToken,
) -> Result<Box<dyn PathTraceWork>> {
    let info = device.info().clone();
    tracing::debug!("creating {:?} path trace work on {}", info.ty, info.description);

    match info.ty {
        DeviceType::Cpu => {
            let kernels = device
                .cpu_kernels()
                .ok_or_else(|| Error::UnsupportedDevice(format!("{} has no CPU kernels", info.description)))?;
            let base = PathTraceWorkBase::new(info, kernel_data, film, cancel);
            Ok(Box::new(PathTraceWorkCPU::new(base, kernels)?))
        }
        DeviceType::Gpu => {
            let queue = device
                .gpu_queue_create()
                .ok_or_else(|| Error::UnsupportedDevice(format!("{} cannot create a queue", info.description)))?;
            let base = PathTraceWorkBase::new(info, kernel_data, film, cancel);
            Ok(Box::new(PathTraceWorkGPU::new(base, queue)))
        }
    }
}

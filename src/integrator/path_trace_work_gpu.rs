//! GPU path trace work.
//!
//! Keeps the device saturated with path states: whenever states free up,
//! more tiles are claimed from the scheduler and initialized, then the
//! megakernel advances every active state. The host buffer is a mirror of
//! the device buffer, synchronized explicitly.

use super::adaptive_sampling::converge_filter_count_active;
use super::path_trace_work::{PathTraceWork, PathTraceWorkBase};
use super::path_trace_work_cpu::cryptomatte_postprocess_buffer;
use super::work_tile_scheduler::WorkTileScheduler;
use crate::device::{DeviceKernel, DeviceQueue, RenderStatistics};
use crate::kernel::KernelWorkTile;
use crate::session::{PassMode, PathTraceDisplay};

pub struct PathTraceWorkGPU {
    base: PathTraceWorkBase,
    queue: Box<dyn DeviceQueue>,
    scheduler: WorkTileScheduler,

    /// Path states the device keeps in flight.
    max_num_paths: usize,
    /// Scratch list of tiles initialized by one enqueue.
    work_tiles: Vec<KernelWorkTile>,
    /// Size of the device render buffer, in floats.
    device_buffer_size: usize,
}

impl PathTraceWorkGPU {
    pub fn new(base: PathTraceWorkBase, queue: Box<dyn DeviceQueue>) -> Self {
        Self {
            base,
            queue,
            scheduler: WorkTileScheduler::new(),
            max_num_paths: 0,
            work_tiles: Vec::new(),
            device_buffer_size: 0,
        }
    }

    pub fn max_num_paths(&self) -> usize {
        self.max_num_paths
    }

    fn alloc_work_memory(&mut self) {
        let queue_states = self.queue.num_concurrent_states();
        self.max_num_paths = if queue_states > 0 {
            queue_states
        } else {
            self.base.device_info.max_num_path_states
        };

        self.scheduler.set_max_num_path_states(self.max_num_paths);
        self.scheduler
            .set_accelerated_rt(self.base.device_info.use_hardware_raytracing);
        tracing::debug!("GPU work with {} path states", self.max_num_paths);
    }

    /// Reallocate the device buffer after the host layout changed.
    fn ensure_device_buffer(&mut self) -> bool {
        let size = self.base.buffers.buffer.len();
        if size == self.device_buffer_size {
            return true;
        }
        self.queue.alloc_render_buffer(size);
        self.device_buffer_size = size;
        self.queue.copy_render_buffer_to_device(&self.base.buffers.buffer)
    }

    /// Claim tiles into the free path states and initialize them.
    ///
    /// Returns the number of tiles enqueued, `None` on device failure.
    fn enqueue_work_tiles(&mut self, kernel: DeviceKernel) -> Option<usize> {
        let mut num_free_paths = self
            .max_num_paths
            .saturating_sub(self.queue.num_active_paths());

        self.work_tiles.clear();
        while num_free_paths > 0 {
            let Some(tile) = self.scheduler.get_work(num_free_paths) else {
                break;
            };
            num_free_paths -= tile.work_size() as usize;
            self.work_tiles.push(tile);
        }

        if self.work_tiles.is_empty() {
            return Some(0);
        }
        if !self.queue.enqueue_init(kernel, &self.work_tiles) {
            return None;
        }
        Some(self.work_tiles.len())
    }
}

impl PathTraceWork for PathTraceWorkGPU {
    fn base(&self) -> &PathTraceWorkBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PathTraceWorkBase {
        &mut self.base
    }

    fn init_execution(&mut self) {
        if !self.queue.init_execution() {
            tracing::error!("failed to initialize queue of {}", self.base.device_info.description);
        }
        self.alloc_work_memory();
        self.device_buffer_size = 0;
        if !self.ensure_device_buffer() {
            tracing::error!("failed to upload render buffer");
        }
    }

    #[tracing::instrument(skip_all, fields(start_sample = start_sample, samples_num = samples_num))]
    fn render_samples(
        &mut self,
        statistics: &mut RenderStatistics,
        start_sample: i32,
        samples_num: i32,
        sample_offset: i32,
    ) {
        if !self.ensure_device_buffer() {
            tracing::error!("failed to upload render buffer");
            return;
        }

        let data = &self.base.kernel_data;
        let kernel = if data.bake.use_bake {
            DeviceKernel::IntegratorInitFromBake
        } else {
            DeviceKernel::IntegratorInitFromCamera
        };
        self.scheduler.reset(
            &self.base.effective_buffer_params,
            start_sample,
            samples_num,
            sample_offset,
            data.integrator.scrambling_distance,
        );

        let mut num_iterations = 0usize;
        let mut num_busy_accum = 0usize;

        loop {
            // On cancel stop claiming tiles, but let paths in flight finish.
            if !self.base.is_cancel_requested() && self.enqueue_work_tiles(kernel).is_none() {
                tracing::error!("failed to enqueue work tiles");
                break;
            }

            let num_active_paths = self.queue.num_active_paths();
            if num_active_paths == 0 {
                break;
            }

            num_busy_accum += num_active_paths;
            num_iterations += 1;

            if !self.queue.enqueue_megakernel() {
                tracing::error!("failed to enqueue megakernel");
                break;
            }
        }

        if !self.queue.synchronize() {
            tracing::error!("device failure while rendering samples");
        }

        statistics.occupancy = if num_iterations > 0 && self.max_num_paths > 0 {
            num_busy_accum as f32 / num_iterations as f32 / self.max_num_paths as f32
        } else {
            0.0
        };
        tracing::debug!(
            "{} iterations, occupancy {:.2}, {} work items left",
            num_iterations,
            statistics.occupancy,
            self.scheduler.num_remaining_work()
        );
    }

    fn copy_to_display(&mut self, display: &mut dyn PathTraceDisplay, pass_mode: PassMode, num_samples: u32) {
        if !self.copy_render_buffers_from_device() {
            tracing::warn!("display update skipped, device buffer unavailable");
            return;
        }
        let info = self.get_display_pass_access_info(pass_mode);
        let destination = self.get_display_destination_template(display);
        self.base.write_display(display, info, destination, num_samples);
    }

    fn render_buffers_reset(&mut self) {
        // Reallocated and refilled from the zeroed host buffer on next use.
        self.device_buffer_size = 0;
    }

    fn destroy_gpu_resources(&mut self) {
        self.queue.alloc_render_buffer(0);
        self.device_buffer_size = 0;
        self.work_tiles = Vec::new();
    }

    fn copy_render_buffers_from_device(&mut self) -> bool {
        if !self.ensure_device_buffer() {
            return false;
        }
        self.queue.synchronize() && self.queue.copy_render_buffer_from_device(&mut self.base.buffers.buffer)
    }

    fn copy_render_buffers_to_device(&mut self) -> bool {
        if self.device_buffer_size != self.base.buffers.buffer.len() {
            return self.ensure_device_buffer();
        }
        self.queue.copy_render_buffer_to_device(&self.base.buffers.buffer) && self.queue.synchronize()
    }

    fn zero_render_buffers(&mut self) -> bool {
        self.base.buffers.zero();
        if self.device_buffer_size != self.base.buffers.buffer.len() {
            return self.ensure_device_buffer();
        }
        self.queue.zero_render_buffer();
        self.queue.synchronize()
    }

    fn adaptive_sampling_converge_filter_count_active(&mut self, threshold: f32, reset: bool) -> usize {
        if !self.copy_render_buffers_from_device() {
            return 0;
        }
        let base = &mut self.base;
        let num_active = converge_filter_count_active(&base.kernel_data.film, &mut base.buffers, threshold, reset);
        self.copy_render_buffers_to_device();
        num_active
    }

    fn cryptomatte_postproces(&mut self) {
        if !self.copy_render_buffers_from_device() {
            return;
        }
        let base = &mut self.base;
        cryptomatte_postprocess_buffer(&base.kernel_data.film, &mut base.buffers);
        self.copy_render_buffers_to_device();
    }
}

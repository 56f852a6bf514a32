//! CPU path trace work.
//!
//! Renders one pixel per parallel task on a dedicated rayon pool. A task
//! runs all requested samples of its pixel back to back, so per-pixel
//! sample order is strictly increasing. Tasks own disjoint pixel records,
//! which is what allows accumulation without atomics.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::adaptive_sampling::converge_filter_count_active;
use super::path_trace_work::{PathTraceWork, PathTraceWorkBase};
use crate::device::{CancelToken, RenderStatistics};
use crate::kernel::{
    add_sample_count, cryptomatte_post, GuidingStorage, IntegratorKernels, IntegratorState,
    KernelData, KernelFilm, KernelGlobals, KernelWorkTile, ProfilingCounters,
};
use crate::session::{PassMode, PathTraceDisplay, RenderBuffers};
use crate::util::{Error, Result};

pub struct PathTraceWorkCPU {
    base: PathTraceWorkBase,
    kernels: Arc<dyn IntegratorKernels>,
    pool: ThreadPool,

    /// One instance per pool thread, selected by the pool's thread index.
    /// Allocated by `init_execution`, dropped with the work.
    kernel_thread_globals: Vec<Mutex<KernelGlobals>>,

    /// Globals for tasks started while their thread's entry is still held,
    /// which happens when a kernel waits on nested rayon work and the
    /// thread picks up another pixel meanwhile.
    spare_thread_globals: Mutex<Vec<KernelGlobals>>,

    guiding_storage: Option<Arc<GuidingStorage>>,
}

/// Everything a pixel task needs besides its globals and pixel record.
struct SamplePipeline<'a> {
    kernels: &'a dyn IntegratorKernels,
    film: &'a KernelFilm,
    has_bake: bool,
    has_shadow_catcher: bool,
    cancel: &'a CancelToken,
}

impl SamplePipeline<'_> {
    /// Render `samples_num` samples of the tile's pixel, one at a time.
    /// Returns the number of samples completed.
    fn render_samples_full_pipeline(
        &self,
        kg: &mut KernelGlobals,
        work_tile: &KernelWorkTile,
        samples_num: i32,
        pixel: &mut [f32],
    ) -> i32 {
        let mut sample_work_tile = *work_tile;
        let mut completed = 0;

        for _ in 0..samples_num {
            if self.cancel.is_cancelled() {
                break;
            }

            let timer = self.film.pass_render_time.map(|_| Instant::now());

            let mut state = IntegratorState {
                x: sample_work_tile.x,
                y: sample_work_tile.y,
                sample: sample_work_tile.start_sample,
                ..Default::default()
            };
            let initialized = if self.has_bake {
                self.kernels.init_from_bake(kg, &mut state, &sample_work_tile, pixel)
            } else {
                self.kernels.init_from_camera(kg, &mut state, &sample_work_tile, pixel)
            };
            kg.count_kernel_call();
            if !initialized {
                break;
            }

            let mut shadow_catcher_state = self.has_shadow_catcher.then(|| state.shadow_catcher_split());

            self.kernels.megakernel(kg, &mut state, pixel);
            kg.count_kernel_call();
            if let Some(shadow_state) = shadow_catcher_state.as_mut() {
                self.kernels.megakernel(kg, shadow_state, pixel);
                kg.count_kernel_call();
            }

            if let Some(offset) = self.film.pass_sample_count {
                add_sample_count(pixel, offset, 1);
            }
            if let (Some(offset), Some(timer)) = (self.film.pass_render_time, timer) {
                pixel[offset] += timer.elapsed().as_secs_f32() * 1000.0;
            }
            kg.count_sample();

            sample_work_tile.start_sample += 1;
            completed += 1;
        }

        completed
    }
}

impl PathTraceWorkCPU {
    pub fn new(base: PathTraceWorkBase, kernels: Arc<dyn IntegratorKernels>) -> Result<Self> {
        let num_threads = base.device_info.resolved_num_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("tilework-cpu-{}", i))
            .build()
            .map_err(|e| Error::other(format!("failed to build CPU thread pool: {e}")))?;

        Ok(Self {
            base,
            kernels,
            pool,
            kernel_thread_globals: Vec::new(),
            spare_thread_globals: Mutex::new(Vec::new()),
            guiding_storage: None,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Shared storage receiving path guiding training samples after each
    /// render call.
    pub fn set_guiding_storage(&mut self, storage: Arc<GuidingStorage>) {
        self.guiding_storage = Some(storage);
    }

    /// Move the training samples every thread recorded into the shared storage.
    pub fn guiding_push_sample_data_to_global_storage(&mut self) {
        let Some(storage) = &self.guiding_storage else {
            return;
        };
        for kg in &self.kernel_thread_globals {
            storage.push(&mut kg.lock().guiding_samples);
        }
        for kg in self.spare_thread_globals.lock().iter_mut() {
            storage.push(&mut kg.guiding_samples);
        }
    }

    fn start_profiling(&self) {
        for kg in &self.kernel_thread_globals {
            kg.lock().start_profiling();
        }
        for kg in self.spare_thread_globals.lock().iter_mut() {
            kg.start_profiling();
        }
    }

    fn stop_profiling(&self) -> ProfilingCounters {
        let mut total = ProfilingCounters::default();
        for kg in &self.kernel_thread_globals {
            total.merge(&kg.lock().stop_profiling());
        }
        for kg in self.spare_thread_globals.lock().iter_mut() {
            total.merge(&kg.stop_profiling());
        }
        total
    }
}

/// Run `f` with the globals of the current pool thread.
///
/// The thread's entry may already be locked further up the same stack when
/// a kernel blocks on nested rayon work. Such tasks borrow spare globals
/// instead of waiting on themselves.
fn with_thread_globals<R>(
    thread_globals: &[Mutex<KernelGlobals>],
    spare_globals: &Mutex<Vec<KernelGlobals>>,
    data: &Arc<KernelData>,
    profiling: bool,
    f: impl FnOnce(&mut KernelGlobals) -> R,
) -> R {
    let thread_index = rayon::current_thread_index().unwrap_or(0);
    let entry = &thread_globals[thread_index.min(thread_globals.len() - 1)];
    if let Some(mut kg) = entry.try_lock() {
        return f(&mut kg);
    }

    let spare = spare_globals.lock().pop();
    let mut kg = spare.unwrap_or_else(|| {
        let mut kg = KernelGlobals::new(Arc::clone(data), thread_index);
        if profiling {
            kg.start_profiling();
        }
        kg
    });
    kg.thread_index = thread_index;
    let result = f(&mut kg);
    spare_globals.lock().push(kg);
    result
}

/// Sort the cryptomatte slots of every pixel, in parallel on the current pool.
pub(crate) fn cryptomatte_postprocess_buffer(film: &KernelFilm, buffers: &mut RenderBuffers) {
    let pass_stride = buffers.params.pass_stride;
    if film.pass_cryptomatte.is_none() || pass_stride == 0 {
        return;
    }
    let num_pixels = buffers.params.num_pixels();
    buffers
        .buffer
        .par_chunks_mut(pass_stride)
        .take(num_pixels)
        .for_each(|pixel| cryptomatte_post(film, pixel));
}

impl PathTraceWork for PathTraceWorkCPU {
    fn base(&self) -> &PathTraceWorkBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PathTraceWorkBase {
        &mut self.base
    }

    fn init_execution(&mut self) {
        let data = &self.base.kernel_data;
        self.kernel_thread_globals = (0..self.pool.current_num_threads())
            .map(|thread_index| Mutex::new(KernelGlobals::new(Arc::clone(data), thread_index)))
            .collect();
        tracing::debug!("initialized {} CPU kernel globals", self.kernel_thread_globals.len());
    }

    #[tracing::instrument(skip_all, fields(start_sample = start_sample, samples_num = samples_num))]
    fn render_samples(
        &mut self,
        statistics: &mut RenderStatistics,
        start_sample: i32,
        samples_num: i32,
        sample_offset: i32,
    ) {
        debug_assert!(
            !self.kernel_thread_globals.is_empty(),
            "render_samples called before init_execution"
        );

        let profiling = self.base.device_info.profiling;
        if profiling {
            self.start_profiling();
        }

        let base = &mut self.base;
        let params = &base.effective_buffer_params;
        debug_assert_eq!(params.stride, params.width);

        let image_width = params.width.max(0) as usize;
        let total_pixels_num = params.num_pixels();
        let pass_stride = base.buffers.params.pass_stride;
        let (full_x, full_y) = (params.full_x, params.full_y);
        let (offset, stride) = params.get_offset_stride();

        let data = Arc::clone(&base.kernel_data);
        let pipeline = SamplePipeline {
            kernels: self.kernels.as_ref(),
            film: &data.film,
            has_bake: data.bake.use_bake,
            has_shadow_catcher: data.integrator.has_shadow_catcher,
            cancel: &base.cancel,
        };
        let kernel_thread_globals = &self.kernel_thread_globals;
        let spare_thread_globals = &self.spare_thread_globals;
        let buffer = &mut base.buffers.buffer;

        if total_pixels_num > 0 && pass_stride > 0 && !kernel_thread_globals.is_empty() {
            self.pool.install(|| {
                buffer
                    .par_chunks_mut(pass_stride)
                    .take(total_pixels_num)
                    .enumerate()
                    .for_each(|(work_index, pixel)| {
                        if pipeline.cancel.is_cancelled() {
                            return;
                        }

                        let y = work_index / image_width;
                        let x = work_index - y * image_width;
                        let work_tile = KernelWorkTile {
                            x: full_x + x as i32,
                            y: full_y + y as i32,
                            w: 1,
                            h: 1,
                            start_sample,
                            num_samples: 1,
                            sample_offset,
                            offset,
                            stride,
                        };

                        with_thread_globals(
                            kernel_thread_globals,
                            spare_thread_globals,
                            &data,
                            profiling,
                            |kg| pipeline.render_samples_full_pipeline(kg, &work_tile, samples_num, pixel),
                        );
                    });
            });
        }

        if pipeline.cancel.is_cancelled() {
            tracing::debug!("render cancelled, keeping partial samples");
        }

        if profiling {
            let counters = self.stop_profiling();
            statistics.samples += counters.samples;
            statistics.kernel_calls += counters.kernel_calls;
        }

        self.guiding_push_sample_data_to_global_storage();

        // Every pool thread works on pixels until the range is exhausted.
        statistics.occupancy = 1.0;
    }

    #[tracing::instrument(skip_all)]
    fn copy_to_display(&mut self, display: &mut dyn PathTraceDisplay, pass_mode: PassMode, num_samples: u32) {
        let info = self.get_display_pass_access_info(pass_mode);
        let destination = self.get_display_destination_template(display);
        let base = &self.base;
        self.pool
            .install(|| base.write_display(display, info, destination, num_samples));
    }

    fn copy_render_buffers_from_device(&mut self) -> bool {
        true
    }

    fn copy_render_buffers_to_device(&mut self) -> bool {
        true
    }

    fn zero_render_buffers(&mut self) -> bool {
        self.base.buffers.zero();
        true
    }

    fn adaptive_sampling_converge_filter_count_active(&mut self, threshold: f32, reset: bool) -> usize {
        let base = &mut self.base;
        let film = &base.kernel_data.film;
        let buffers = &mut base.buffers;
        self.pool
            .install(|| converge_filter_count_active(film, buffers, threshold, reset))
    }

    fn cryptomatte_postproces(&mut self) {
        let base = &mut self.base;
        let film = &base.kernel_data.film;
        let buffers = &mut base.buffers;
        self.pool.install(|| cryptomatte_postprocess_buffer(film, buffers));
    }
}

//! CPU work behaviour through the public work interface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tilework::device::{CancelToken, Device, DeviceInfo, RenderStatistics};
use tilework::integrator::{
    create_path_trace_work, Destination, DestinationPixels, PassAccessor, PathTraceWork, Source,
};
use tilework::kernel::{
    read_sample_count, IntegratorKernels, IntegratorState, KernelData, KernelFilm, KernelGlobals,
    KernelWorkTile,
};
use tilework::session::{BufferParams, Film, HostDisplay, Pass, PassMode, PassType, RenderBuffers};
use tilework::Error;

const IMAGE_WIDTH: i32 = 4;

/// Records every sample index per pixel and accumulates `(x + 1, y + 1, 1, 1)`.
struct RecordingKernels {
    samples: Mutex<Vec<Vec<i32>>>,
    num_samples_done: AtomicUsize,
    cancel_after: Option<(usize, CancelToken)>,
}

impl RecordingKernels {
    fn new(num_pixels: usize) -> Self {
        Self {
            samples: Mutex::new(vec![Vec::new(); num_pixels]),
            num_samples_done: AtomicUsize::new(0),
            cancel_after: None,
        }
    }
}

impl IntegratorKernels for RecordingKernels {
    fn init_from_camera(
        &self,
        _kg: &mut KernelGlobals,
        state: &mut IntegratorState,
        tile: &KernelWorkTile,
        _pixel: &mut [f32],
    ) -> bool {
        assert_eq!((tile.w, tile.h, tile.num_samples), (1, 1, 1));
        let index = (state.y * IMAGE_WIDTH + state.x) as usize;
        self.samples.lock()[index].push(state.sample);
        true
    }

    fn init_from_bake(
        &self,
        _kg: &mut KernelGlobals,
        _state: &mut IntegratorState,
        _tile: &KernelWorkTile,
        _pixel: &mut [f32],
    ) -> bool {
        unreachable!("bake is not enabled")
    }

    fn megakernel(&self, _kg: &mut KernelGlobals, state: &mut IntegratorState, pixel: &mut [f32]) {
        pixel[0] += (state.x + 1) as f32;
        pixel[1] += (state.y + 1) as f32;
        pixel[2] += 1.0;
        pixel[3] += 1.0;
        state.terminated = true;

        let done = self.num_samples_done.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, cancel)) = &self.cancel_after {
            if done >= *limit {
                cancel.cancel();
            }
        }
    }
}

struct CpuDevice {
    info: DeviceInfo,
    kernels: Option<Arc<RecordingKernels>>,
}

impl Device for CpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn cpu_kernels(&self) -> Option<Arc<dyn IntegratorKernels>> {
        self.kernels.clone().map(|k| k as Arc<dyn IntegratorKernels>)
    }
}

fn passes() -> Vec<Pass> {
    vec![Pass::new(PassType::Combined), Pass::new(PassType::SampleCount)]
}

fn band(full_y: i32, height: i32) -> BufferParams {
    BufferParams::new(0, full_y, IMAGE_WIDTH, height)
        .with_full_size(IMAGE_WIDTH, 4)
        .with_passes(&passes())
}

fn create_work(
    kernels: Arc<RecordingKernels>,
    cancel: CancelToken,
    full: &BufferParams,
    big_tile: &BufferParams,
    buffer: &BufferParams,
) -> Box<dyn PathTraceWork> {
    let device = CpuDevice { info: DeviceInfo::cpu(2), kernels: Some(kernels) };
    let data = KernelData::new(KernelFilm::from_buffer_params(buffer, 1.0));
    let mut work = create_path_trace_work(&device, Arc::new(data), Film::default(), cancel).unwrap();
    work.set_effective_buffer_params(full, big_tile, buffer).unwrap();
    work.init_execution();
    work
}

#[test]
fn test_samples_strictly_increasing_per_pixel() {
    let full = band(0, 4);
    let kernels = Arc::new(RecordingKernels::new(16));
    let mut work = create_work(Arc::clone(&kernels), CancelToken::new(), &full, &full, &full);

    let mut stats = RenderStatistics::default();
    work.render_samples(&mut stats, 0, 7, 0);
    work.render_samples(&mut stats, 7, 3, 0);

    for sequence in kernels.samples.lock().iter() {
        assert_eq!(sequence, &(0..10).collect::<Vec<_>>());
    }
    for i in 0..16 {
        assert_eq!(read_sample_count(work.get_render_buffers().pixel(i), 4), 10);
    }
}

#[test]
fn test_cancelled_render_keeps_contiguous_prefix() {
    let full = band(0, 4);
    let cancel = CancelToken::new();
    let mut kernels = RecordingKernels::new(16);
    kernels.cancel_after = Some((40, cancel.clone()));
    let kernels = Arc::new(kernels);
    let mut work = create_work(Arc::clone(&kernels), cancel.clone(), &full, &full, &full);

    work.render_samples(&mut RenderStatistics::default(), 0, 16, 0);
    assert!(work.is_cancel_requested());

    let sequences = kernels.samples.lock();
    let total: usize = sequences.iter().map(Vec::len).sum();
    assert!(total >= 40 && total < 16 * 16);
    for (index, sequence) in sequences.iter().enumerate() {
        assert_eq!(sequence, &(0..sequence.len() as i32).collect::<Vec<_>>());
        let pixel = work.get_render_buffers().pixel(index);
        assert_eq!(read_sample_count(pixel, 4) as usize, sequence.len());
    }
}

#[test]
fn test_buffer_copy_round_trip() {
    let full = band(0, 4);
    let lower = band(2, 2);
    let kernels = Arc::new(RecordingKernels::new(16));
    let mut work = create_work(kernels, CancelToken::new(), &full, &full, &lower);
    assert!(work.has_multiple_works());
    work.render_samples(&mut RenderStatistics::default(), 0, 3, 0);

    let before = work.get_render_buffers().buffer.clone();
    let mut big_tile = RenderBuffers::new(full.clone()).unwrap();
    work.copy_to_render_buffers(&mut big_tile);

    // Rows land below the upper band.
    let pass_stride = full.pass_stride;
    assert!(big_tile.buffer[..8 * pass_stride].iter().all(|v| *v == 0.0));
    assert_eq!(&big_tile.buffer[8 * pass_stride..], &before[..]);

    work.copy_from_render_buffers(&big_tile);
    assert_eq!(work.get_render_buffers().buffer, before);
}

#[test]
fn test_has_multiple_works_detects_any_rect_change() {
    let full = band(0, 4);
    let kernels = Arc::new(RecordingKernels::new(16));
    let mut work = create_work(kernels, CancelToken::new(), &full, &full, &full);
    assert!(!work.has_multiple_works());

    let variants = [
        BufferParams { full_x: full.full_x + 1, ..full.clone() },
        BufferParams { full_y: full.full_y + 1, ..full.clone() },
        BufferParams { width: full.width + 1, ..full.clone() },
        BufferParams { height: full.height + 1, ..full.clone() },
    ];
    for big_tile in &variants {
        work.set_effective_buffer_params(&full, big_tile, &full).unwrap();
        assert!(work.has_multiple_works(), "{big_tile:?}");
    }
}

#[test]
fn test_bands_copy_to_display() {
    let full = band(0, 4);
    let kernels = Arc::new(RecordingKernels::new(16));
    let mut display = HostDisplay::new(IMAGE_WIDTH, 4);

    for params in [band(0, 2), band(2, 2)] {
        let mut work = create_work(Arc::clone(&kernels), CancelToken::new(), &full, &full, &params);
        work.render_samples(&mut RenderStatistics::default(), 0, 4, 0);
        work.copy_to_display(&mut display, PassMode::Noisy, 4);
        assert!(!display.is_mapped());
    }

    for y in 0..4 {
        for x in 0..IMAGE_WIDTH {
            let expected = [(x + 1) as f32, (y + 1) as f32, 1.0, 1.0];
            assert_eq!(display.pixel(x, y).to_f32(), expected);
        }
    }
}

#[test]
fn test_windowed_work_copies_window_to_display() {
    let full = band(0, 4).with_window(1, 1, 2, 2);
    let kernels = Arc::new(RecordingKernels::new(16));
    let mut work = create_work(kernels, CancelToken::new(), &full, &full, &full);
    work.render_samples(&mut RenderStatistics::default(), 0, 2, 0);

    let mut display = HostDisplay::new(IMAGE_WIDTH, 4);
    work.copy_to_display(&mut display, PassMode::Noisy, 2);

    for y in 0..4 {
        for x in 0..IMAGE_WIDTH {
            let inside = (1..3).contains(&x) && (1..3).contains(&y);
            let expected = if inside {
                [(x + 1) as f32, (y + 1) as f32, 1.0, 1.0]
            } else {
                [0.0; 4]
            };
            assert_eq!(display.pixel(x, y).to_f32(), expected, "texel ({x}, {y})");
        }
    }
}

#[test]
fn test_bands_read_into_big_tile_window() {
    let full = band(0, 4);
    let big_tile = band(0, 4).with_window(1, 1, 2, 2);
    let bands = [band(0, 2).with_window(1, 1, 2, 1), band(2, 2).with_window(1, 0, 2, 1)];
    let kernels = Arc::new(RecordingKernels::new(16));
    let film = KernelFilm::from_buffer_params(&full, 1.0);

    // Destination covers the big tile window only.
    let mut values = vec![0.0; 2 * 2 * 4];
    for params in &bands {
        let mut work = create_work(Arc::clone(&kernels), CancelToken::new(), &full, &big_tile, params);
        assert!(work.has_multiple_works());
        work.render_samples(&mut RenderStatistics::default(), 0, 3, 0);

        let accessor = PassAccessor::new(work.get_display_pass_access_info(PassMode::Noisy), &film, 3);
        assert!(work.get_render_tile_pixels(
            &accessor,
            Destination {
                pixels: DestinationPixels::Float(&mut values),
                offset: 0,
                stride: 2,
                num_components: 4,
            },
        ));
    }

    for dy in 0..2 {
        for dx in 0..2 {
            let start = (dy * 2 + dx) * 4;
            let expected = [(dx + 2) as f32, (dy + 2) as f32, 1.0, 1.0];
            assert_eq!(&values[start..start + 4], &expected, "pixel ({dx}, {dy})");
        }
    }
}

#[test]
fn test_band_takes_its_rows_of_big_tile_source() {
    let full = band(0, 4);
    let lower = band(2, 2);
    let kernels = Arc::new(RecordingKernels::new(16));
    let mut work = create_work(kernels, CancelToken::new(), &full, &full, &lower);

    let source: Vec<f32> = (0..16).flat_map(|p| [p as f32; 4]).collect();
    let film = KernelFilm::from_buffer_params(&lower, 1.0);
    let accessor = PassAccessor::new(work.get_display_pass_access_info(PassMode::Noisy), &film, 1);
    assert!(work.set_render_tile_pixels(&accessor, &Source { pixels: &source, offset: 0, num_components: 4 }));

    let buffers = work.get_render_buffers();
    for i in 0..8 {
        assert_eq!(&buffers.pixel(i)[..4], &[(8 + i) as f32; 4]);
    }
}

#[test]
fn test_band_takes_its_rows_of_denoised_big_tile() {
    let with_denoised = |params: BufferParams| {
        params.with_passes(&[
            Pass::new(PassType::Combined),
            Pass::denoised(PassType::Combined),
            Pass::new(PassType::SampleCount),
        ])
    };
    let full = with_denoised(band(0, 4));
    let lower = with_denoised(band(2, 2));
    let denoised = full.get_pass_offset(PassType::Combined, PassMode::Denoised).unwrap();

    let mut big_tile = RenderBuffers::new(full.clone()).unwrap();
    for p in 0..16 {
        big_tile.pixel_mut(p)[denoised..denoised + 4].copy_from_slice(&[p as f32; 4]);
    }

    let kernels = Arc::new(RecordingKernels::new(16));
    let mut work = create_work(kernels, CancelToken::new(), &full, &full, &lower);
    work.copy_from_denoised_render_buffers(&big_tile);

    let buffers = work.get_render_buffers();
    for i in 0..8 {
        let pixel = buffers.pixel(i);
        assert_eq!(&pixel[denoised..denoised + 4], &[(8 + i) as f32; 4]);
        assert_eq!(&pixel[..4], &[0.0; 4]);
    }
    assert_eq!(work.get_display_pass_access_info(PassMode::Denoised).mode, PassMode::Denoised);
}

#[test]
fn test_unmappable_display_is_skipped() {
    let full = band(0, 4);
    let kernels = Arc::new(RecordingKernels::new(16));
    let mut work = create_work(kernels, CancelToken::new(), &full, &full, &full);
    work.render_samples(&mut RenderStatistics::default(), 0, 1, 0);

    let mut display = HostDisplay::new(IMAGE_WIDTH, 4);
    display.set_mappable(false);
    work.copy_to_display(&mut display, PassMode::Denoised, 1);
    assert!(display.pixels().iter().all(|p| p.to_f32() == [0.0; 4]));
}

#[test]
fn test_denoised_display_falls_back_to_noisy() {
    let full = band(0, 4);
    let kernels = Arc::new(RecordingKernels::new(16));
    let work = create_work(kernels, CancelToken::new(), &full, &full, &full);
    let info = work.get_display_pass_access_info(PassMode::Denoised);
    assert_eq!(info.ty, PassType::Combined);
    assert_eq!(info.mode, PassMode::Noisy);
    assert_eq!(info.offset, Some(0));
}

#[test]
fn test_device_without_kernels_is_rejected() {
    let device = CpuDevice { info: DeviceInfo::cpu(1), kernels: None };
    let result = create_path_trace_work(&device, Arc::new(KernelData::default()), Film::default(), CancelToken::new());
    assert!(matches!(result, Err(Error::UnsupportedDevice(_))));
}

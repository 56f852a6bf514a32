//! Reads passes out of a render buffer into display or float destinations,
//! and writes passes back from float sources.
//!
//! Values are normalized by `exposure / samples`, using the sample count
//! pass when the buffer has one.

use rayon::prelude::*;

use crate::kernel::{read_sample_count, AdaptiveSamplingPasses, KernelFilm};
use crate::session::{BufferParams, Half4, PassMode, PassType, RenderBuffers};

/// Which pass to read and how.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassAccessInfo {
    pub ty: PassType,
    pub mode: PassMode,
    /// Float offset inside the pixel record, `None` when the pass is absent.
    pub offset: Option<usize>,
    pub show_active_pixels: bool,
}

/// Pixel memory a pass is written into.
pub enum DestinationPixels<'a> {
    Float(&'a mut [f32]),
    HalfRgba(&'a mut [Half4]),
}

/// Destination of a pass read. `offset` and `stride` are in pixels.
pub struct Destination<'a> {
    pub pixels: DestinationPixels<'a>,
    pub offset: usize,
    pub stride: usize,
    /// Components per pixel of a float destination.
    pub num_components: usize,
}

/// Source of a pass write. `offset` is in pixels; rows are `width` apart.
pub struct Source<'a> {
    pub pixels: &'a [f32],
    pub offset: usize,
    pub num_components: usize,
}

const ACTIVE_PIXEL_TINT: [f32; 3] = [1.0, 0.5, 0.0];
const ACTIVE_PIXEL_BLEND: f32 = 0.5;

pub struct PassAccessor<'f> {
    info: PassAccessInfo,
    film: &'f KernelFilm,
    /// Samples used when the buffer has no sample count pass.
    num_samples: u32,
}

impl<'f> PassAccessor<'f> {
    pub fn new(info: PassAccessInfo, film: &'f KernelFilm, num_samples: u32) -> Self {
        Self { info, film, num_samples }
    }

    pub fn info(&self) -> &PassAccessInfo {
        &self.info
    }

    fn scale(&self, pixel: &[f32]) -> f32 {
        let samples = match self.film.pass_sample_count {
            Some(offset) => read_sample_count(pixel, offset),
            None => self.num_samples,
        };
        if samples == 0 {
            0.0
        } else {
            self.film.exposure / samples as f32
        }
    }

    fn pixel_rgba(&self, pixel: &[f32], pass_offset: usize, num_components: usize) -> [f32; 4] {
        // Stored as integer bits, shown unscaled.
        if self.info.ty == PassType::SampleCount {
            let v = read_sample_count(pixel, pass_offset) as f32;
            return [v, v, v, 1.0];
        }
        let scale = self.scale(pixel);
        let mut rgba = [0.0, 0.0, 0.0, 1.0];
        match num_components {
            1 => {
                let v = pixel[pass_offset] * scale;
                rgba = [v, v, v, 1.0];
            }
            3 => {
                for c in 0..3 {
                    rgba[c] = pixel[pass_offset + c] * scale;
                }
            }
            _ => {
                for c in 0..4 {
                    rgba[c] = pixel[pass_offset + c] * scale;
                }
            }
        }
        rgba
    }

    fn overlay_active(&self, pixel: &[f32], rgba: &mut [f32; 4]) {
        if !self.info.show_active_pixels {
            return;
        }
        let Some(passes) = AdaptiveSamplingPasses::from_film(self.film) else {
            return;
        };
        if !passes.is_converged(pixel) {
            for c in 0..3 {
                rgba[c] = rgba[c] * (1.0 - ACTIVE_PIXEL_BLEND) + ACTIVE_PIXEL_TINT[c] * ACTIVE_PIXEL_BLEND;
            }
        }
    }

    /// Read the pass of every pixel inside the window of `params` into
    /// `destination`.
    ///
    /// The destination offset addresses the first window pixel and each
    /// destination row receives `window_width` pixels. Rows are converted in
    /// parallel. Returns `false` when the pass is absent from the buffer.
    pub fn get_render_tile_pixels(
        &self,
        buffers: &RenderBuffers,
        params: &BufferParams,
        destination: Destination<'_>,
    ) -> bool {
        let Some(pass_offset) = self.info.offset else {
            return false;
        };
        let Some(pass) = params.find_pass(self.info.ty, self.info.mode) else {
            return false;
        };
        let num_components = pass.num_components;
        let window_x = params.window_x.max(0) as usize;
        let window_y = params.window_y.max(0) as usize;
        let width = params.window_width.max(0) as usize;
        let height = params.window_height.max(0) as usize;
        let pass_stride = params.pass_stride;
        let row_floats = params.stride.max(0) as usize * pass_stride;
        if width == 0 || height == 0 {
            return true;
        }
        let last_float = ((window_y + height - 1) * params.stride.max(0) as usize + window_x + width) * pass_stride;
        if last_float > buffers.buffer.len() {
            return false;
        }
        let source_pixel = |x: usize, y: usize| {
            let start = (window_y + y) * row_floats + (window_x + x) * pass_stride;
            &buffers.buffer[start..start + pass_stride]
        };

        let Destination { pixels, offset, stride, num_components: dst_components } = destination;
        if stride < width {
            return false;
        }
        match pixels {
            DestinationPixels::HalfRgba(texels) => {
                if offset > texels.len() {
                    return false;
                }
                let rows = texels[offset..].par_chunks_mut(stride).take(height);
                rows.enumerate().for_each(|(y, row)| {
                    for (x, texel) in row.iter_mut().take(width).enumerate() {
                        let pixel = source_pixel(x, y);
                        let mut rgba = self.pixel_rgba(pixel, pass_offset, num_components);
                        self.overlay_active(pixel, &mut rgba);
                        *texel = Half4::from_f32(rgba);
                    }
                });
            }
            DestinationPixels::Float(values) => {
                let channels = dst_components.max(1);
                if offset * channels > values.len() {
                    return false;
                }
                let rows = values[offset * channels..].par_chunks_mut(stride * channels).take(height);
                rows.enumerate().for_each(|(y, row)| {
                    for (x, out) in row.chunks_mut(channels).take(width).enumerate() {
                        let rgba = self.pixel_rgba(source_pixel(x, y), pass_offset, num_components);
                        let n = out.len().min(4);
                        out[..n].copy_from_slice(&rgba[..n]);
                    }
                });
            }
        }
        true
    }

    /// Write `source` into the pass of every pixel in `buffers`.
    ///
    /// Values are stored as-is (no sample normalization).
    pub fn set_render_tile_pixels(&self, buffers: &mut RenderBuffers, source: &Source<'_>) -> bool {
        let Some(pass_offset) = self.info.offset else {
            return false;
        };
        let Some(pass) = buffers.params.find_pass(self.info.ty, self.info.mode) else {
            return false;
        };
        let num_components = pass.num_components.min(source.num_components);
        let pass_stride = buffers.params.pass_stride;
        let num_pixels = buffers.params.num_pixels();

        buffers
            .buffer
            .par_chunks_mut(pass_stride)
            .take(num_pixels)
            .enumerate()
            .for_each(|(i, pixel)| {
                let from = (source.offset + i) * source.num_components;
                pixel[pass_offset..pass_offset + num_components]
                    .copy_from_slice(&source.pixels[from..from + num_components]);
            });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::add_sample_count;
    use crate::session::Pass;

    fn buffers() -> (RenderBuffers, KernelFilm) {
        let params = BufferParams::new(0, 0, 2, 2).with_passes(&[
            Pass::new(PassType::Combined),
            Pass::new(PassType::SampleCount),
        ]);
        let mut buffers = RenderBuffers::new(params.clone()).unwrap();
        for i in 0..4 {
            let pixel = buffers.pixel_mut(i);
            pixel[..4].copy_from_slice(&[4.0, 8.0, 2.0, 4.0]);
            add_sample_count(pixel, 4, 4);
        }
        let film = KernelFilm::from_buffer_params(&params, 1.0);
        (buffers, film)
    }

    fn combined_info(buffers: &RenderBuffers) -> PassAccessInfo {
        PassAccessInfo {
            ty: PassType::Combined,
            mode: PassMode::Noisy,
            offset: buffers.params.get_pass_offset(PassType::Combined, PassMode::Noisy),
            show_active_pixels: false,
        }
    }

    #[test]
    fn test_read_normalized_half() {
        let (buffers, film) = buffers();
        let accessor = PassAccessor::new(combined_info(&buffers), &film, 0);
        let mut texels = vec![Half4::default(); 4];
        let ok = accessor.get_render_tile_pixels(
            &buffers,
            &buffers.params,
            Destination {
                pixels: DestinationPixels::HalfRgba(&mut texels),
                offset: 0,
                stride: 2,
                num_components: 4,
            },
        );
        assert!(ok);
        assert_eq!(texels[3].to_f32(), [1.0, 2.0, 0.5, 1.0]);
    }

    #[test]
    fn test_read_window_only() {
        let params = BufferParams::new(0, 0, 4, 4)
            .with_window(1, 1, 2, 2)
            .with_passes(&[Pass::new(PassType::Combined)]);
        let mut buffers = RenderBuffers::new(params.clone()).unwrap();
        for i in 0..16 {
            buffers.pixel_mut(i)[..4].copy_from_slice(&[i as f32, 0.0, 0.0, 1.0]);
        }
        let film = KernelFilm::from_buffer_params(&params, 1.0);
        let accessor = PassAccessor::new(combined_info(&buffers), &film, 1);

        let mut values = vec![-1.0; 3 * 3];
        assert!(accessor.get_render_tile_pixels(
            &buffers,
            &params,
            Destination {
                pixels: DestinationPixels::Float(&mut values),
                offset: 0,
                stride: 3,
                num_components: 1,
            },
        ));
        assert_eq!(values, vec![5.0, 6.0, -1.0, 9.0, 10.0, -1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_sample_count_shown_as_count() {
        let (buffers, film) = buffers();
        let info = PassAccessInfo {
            ty: PassType::SampleCount,
            mode: PassMode::Noisy,
            offset: buffers.params.get_pass_offset(PassType::SampleCount, PassMode::Noisy),
            show_active_pixels: false,
        };
        let accessor = PassAccessor::new(info, &film, 0);
        let mut values = vec![0.0; 4];
        assert!(accessor.get_render_tile_pixels(
            &buffers,
            &buffers.params,
            Destination {
                pixels: DestinationPixels::Float(&mut values),
                offset: 0,
                stride: 2,
                num_components: 1,
            },
        ));
        assert_eq!(values, vec![4.0; 4]);
    }

    #[test]
    fn test_missing_pass() {
        let (buffers, film) = buffers();
        let info = PassAccessInfo { offset: None, ..combined_info(&buffers) };
        let accessor = PassAccessor::new(info, &film, 0);
        let mut values = vec![0.0; 16];
        assert!(!accessor.get_render_tile_pixels(
            &buffers,
            &buffers.params,
            Destination {
                pixels: DestinationPixels::Float(&mut values),
                offset: 0,
                stride: 2,
                num_components: 4,
            },
        ));
    }

    #[test]
    fn test_write_pass() {
        let (mut buffers, film) = buffers();
        let accessor = PassAccessor::new(combined_info(&buffers), &film, 0);
        let source: Vec<f32> = (0..16).map(|v| v as f32).collect();
        assert!(accessor.set_render_tile_pixels(
            &mut buffers,
            &Source { pixels: &source, offset: 0, num_components: 4 },
        ));
        assert_eq!(&buffers.pixel(2)[..4], &[8.0, 9.0, 10.0, 11.0]);
    }
}

//! Adaptive sampling convergence filter over a whole render buffer.
//!
//! Runs after every block of samples:
//! 1. per-pixel convergence check, writing the converged flag;
//! 2. row pass reactivating the converged pixel left of an active one;
//! 3. column pass doing the same upwards.
//!
//! The returned count is taken after step 1. Dilation only decides which
//! pixels receive samples next round. Uses the current rayon pool.

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::kernel::{
    adaptive_sampling_convergence_check, adaptive_sampling_filter_x,
    adaptive_sampling_filter_y_targets, AdaptiveSamplingPasses, KernelFilm,
};
use crate::session::RenderBuffers;

/// Check convergence of every pixel and dilate the active region.
///
/// Returns the number of pixels that are not converged. A buffer without
/// the combined or auxiliary pass has nothing to filter and reports 0.
#[tracing::instrument(skip_all, fields(threshold = threshold, reset = reset))]
pub fn converge_filter_count_active(
    film: &KernelFilm,
    buffers: &mut RenderBuffers,
    threshold: f32,
    reset: bool,
) -> usize {
    let Some(passes) = AdaptiveSamplingPasses::from_film(film) else {
        tracing::warn!("adaptive sampling filter without combined/aux passes");
        return 0;
    };

    let width = buffers.params.width.max(0) as usize;
    let height = buffers.params.height.max(0) as usize;
    let stride = buffers.params.stride.max(0) as usize;
    let pass_stride = buffers.params.pass_stride;
    debug_assert_eq!(pass_stride, film.pass_stride);
    if width == 0 || height == 0 || pass_stride == 0 {
        return 0;
    }

    // Convergence check and row dilation share one parallel pass.
    let num_active_pixels: usize = buffers
        .buffer
        .par_chunks_mut(stride * pass_stride)
        .take(height)
        .map(|row| {
            let mut num_row_pixels_active = 0;
            for x in 0..width {
                let pixel = &mut row[x * pass_stride..(x + 1) * pass_stride];
                if !adaptive_sampling_convergence_check(film, &passes, pixel, threshold, reset) {
                    num_row_pixels_active += 1;
                }
            }
            if num_row_pixels_active > 0 {
                adaptive_sampling_filter_x(&passes, pass_stride, row, width);
            }
            num_row_pixels_active
        })
        .sum();

    if num_active_pixels > 0 {
        let buffer = &buffers.buffer;
        let column_targets: Vec<(usize, SmallVec<[usize; 8]>)> = (0..width)
            .into_par_iter()
            .map(|x| {
                let rows = adaptive_sampling_filter_y_targets(&passes, pass_stride, buffer, x, height, stride);
                (x, rows)
            })
            .filter(|(_, rows)| !rows.is_empty())
            .collect();

        for (x, rows) in column_targets {
            for y in rows {
                let base = (y * stride + x) * pass_stride;
                passes.set_converged(&mut buffers.buffer[base..base + pass_stride], false);
            }
        }
    }

    tracing::debug!("{} of {} pixels active", num_active_pixels, width * height);
    num_active_pixels
}

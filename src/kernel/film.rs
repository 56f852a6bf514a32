//! Film-level pixel operations: sample bookkeeping, adaptive sampling
//! convergence and cryptomatte slot sorting.
//!
//! All functions operate on a single pixel record (`pass_stride` floats) or
//! on a line of converged flags, so callers can partition the buffer freely.

use smallvec::SmallVec;

use super::types::KernelFilm;
use crate::util::Vec4;

const CONVERGENCE_EPSILON: f32 = 1e-4;

#[inline]
pub fn read_pass_float4(pixel: &[f32], offset: usize) -> Vec4 {
    Vec4::from_slice(&pixel[offset..offset + 4])
}

/// Sample count stored as `u32` bits in a float slot.
#[inline]
pub fn read_sample_count(pixel: &[f32], offset: usize) -> u32 {
    pixel[offset].to_bits()
}

#[inline]
pub fn add_sample_count(pixel: &mut [f32], offset: usize, samples: u32) {
    let count = pixel[offset].to_bits().saturating_add(samples);
    pixel[offset] = f32::from_bits(count);
}

/// Pass offsets the adaptive sampling filter needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveSamplingPasses {
    pub combined: usize,
    pub aux: usize,
    pub sample_count: Option<usize>,
}

impl AdaptiveSamplingPasses {
    /// `None` when the film has no combined or auxiliary pass.
    pub fn from_film(film: &KernelFilm) -> Option<Self> {
        Some(Self {
            combined: film.pass_combined?,
            aux: film.pass_adaptive_aux_buffer?,
            sample_count: film.pass_sample_count,
        })
    }

    /// Offset of the converged flag (`w` of the auxiliary pass).
    #[inline]
    pub fn flag(&self) -> usize {
        self.aux + 3
    }

    #[inline]
    pub fn is_converged(&self, pixel: &[f32]) -> bool {
        pixel[self.flag()] != 0.0
    }

    #[inline]
    pub fn set_converged(&self, pixel: &mut [f32], converged: bool) {
        pixel[self.flag()] = if converged { 1.0 } else { 0.0 };
    }
}

/// Per-pixel convergence test. Writes the result into the converged flag.
///
/// A pixel already flagged stays converged unless `reset` is set. The error
/// compares the full accumulation with the half-sample accumulation, scaled
/// by `exposure / samples` and normalized by the pixel intensity.
pub fn adaptive_sampling_convergence_check(
    film: &KernelFilm,
    passes: &AdaptiveSamplingPasses,
    pixel: &mut [f32],
    threshold: f32,
    reset: bool,
) -> bool {
    if !reset && passes.is_converged(pixel) {
        return true;
    }

    let samples = match passes.sample_count {
        Some(offset) => read_sample_count(pixel, offset),
        None => film.num_samples,
    };
    if samples == 0 {
        passes.set_converged(pixel, false);
        return false;
    }

    let combined = read_pass_float4(pixel, passes.combined);
    let aux = read_pass_float4(pixel, passes.aux);
    let intensity_scale = film.exposure / samples as f32;

    let error_difference = ((combined.x - aux.x).abs()
        + (combined.y - aux.y).abs()
        + (combined.z - aux.z).abs())
        * intensity_scale;
    let intensity = (combined.x + combined.y + combined.z) * intensity_scale;
    let error_normalize = if intensity < 1.0 { intensity.max(0.0).sqrt() } else { intensity };
    let error = error_difference / (CONVERGENCE_EPSILON + error_normalize);

    let converged = error < threshold;
    passes.set_converged(pixel, converged);
    converged
}

/// Positions along a line of pixels that must be reactivated.
///
/// Walks the line once, remembering whether the previous pixel was
/// converged. A converged pixel directly left of (or above) an active one is
/// returned, so the border of an active region keeps receiving samples.
/// Only the immediate neighbour is affected.
pub fn adaptive_sampling_dilation_targets<I>(converged: I) -> SmallVec<[usize; 8]>
where
    I: IntoIterator<Item = bool>,
{
    let mut targets = SmallVec::new();
    let mut prev_converged = false;
    for (i, is_converged) in converged.into_iter().enumerate() {
        if !is_converged && i > 0 && prev_converged {
            targets.push(i - 1);
        }
        prev_converged = is_converged;
    }
    targets
}

/// Row pass of the dilation over `width` contiguous pixel records.
pub fn adaptive_sampling_filter_x(
    passes: &AdaptiveSamplingPasses,
    pass_stride: usize,
    row: &mut [f32],
    width: usize,
) {
    let targets = adaptive_sampling_dilation_targets(
        (0..width).map(|x| passes.is_converged(&row[x * pass_stride..])),
    );
    for x in targets {
        passes.set_converged(&mut row[x * pass_stride..], false);
    }
}

/// Column pass of the dilation: rows (buffer-local) to reactivate in column `x`.
///
/// Read-only so columns can be scanned in parallel; the caller applies the
/// returned targets.
pub fn adaptive_sampling_filter_y_targets(
    passes: &AdaptiveSamplingPasses,
    pass_stride: usize,
    buffer: &[f32],
    x: usize,
    height: usize,
    row_stride: usize,
) -> SmallVec<[usize; 8]> {
    adaptive_sampling_dilation_targets((0..height).map(|y| {
        let base = (y * row_stride + x) * pass_stride;
        passes.is_converged(&buffer[base..])
    }))
}

/// Sort cryptomatte ID/weight slots by descending weight.
///
/// Slot counts are tiny, so an insertion sort is used. An empty (zero
/// weight) slot terminates the list.
pub fn sort_cryptomatte_slots(slots: &mut [f32], num_slots: usize) {
    let num_slots = num_slots.min(slots.len() / 2);
    for slot in 1..num_slots {
        if slots[slot * 2 + 1] == 0.0 {
            return;
        }
        let mut i = slot;
        while i > 0 && slots[i * 2 + 1] > slots[(i - 1) * 2 + 1] {
            slots.swap(i * 2, (i - 1) * 2);
            slots.swap(i * 2 + 1, (i - 1) * 2 + 1);
            i -= 1;
        }
    }
}

/// Sort the cryptomatte pass of one pixel record.
pub fn cryptomatte_post(film: &KernelFilm, pixel: &mut [f32]) {
    let Some(offset) = film.pass_cryptomatte else {
        return;
    };
    let num_slots = 2 * film.cryptomatte_depth;
    sort_cryptomatte_slots(&mut pixel[offset..offset + num_slots * 2], num_slots);
}

//! Work tile size heuristic.

use crate::util::{round_down_to_power_of_two, round_up_to_power_of_two, IVec2};

/// Shape of a scheduling unit: a pixel rectangle and a sample count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileSize {
    pub width: i32,
    pub height: i32,
    pub num_samples: i32,
}

impl TileSize {
    pub const ZERO: TileSize = TileSize { width: 0, height: 0, num_samples: 0 };

    pub const fn new(width: i32, height: i32, num_samples: i32) -> Self {
        Self { width, height, num_samples }
    }

    /// Pixel-samples covered by a full tile.
    #[inline]
    pub fn num_path_states(&self) -> i64 {
        self.width as i64 * self.height as i64 * self.num_samples as i64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0 || self.num_samples <= 0
    }
}

/// Pick a tile size that keeps `width * height * num_samples` within
/// `max_num_path_states`.
///
/// Small tiles with many samples are preferred for spatial coherency, with
/// power-of-two sides so several tiles pack into the path state pool. With
/// hardware ray tracing and a low scrambling distance, wide tiles are used
/// instead. Returns [`TileSize::ZERO`] when there is nothing to schedule.
pub fn tile_calculate_best_size(
    accel_rt: bool,
    image_size: IVec2,
    num_samples: i32,
    max_num_path_states: usize,
    scrambling_distance: f32,
) -> TileSize {
    if max_num_path_states == 0 || image_size.x <= 0 || image_size.y <= 0 || num_samples <= 0 {
        return TileSize::ZERO;
    }

    if max_num_path_states == 1 {
        return TileSize::new(1, 1, 1);
    }

    let image_width = image_size.x as usize;
    let image_height = image_size.y as usize;
    let samples = num_samples as usize;

    let num_pixel_samples = image_width * image_height * samples;
    if max_num_path_states >= num_pixel_samples {
        // Whole image and sample range fit into the state pool.
        return TileSize::new(image_size.x, image_size.y, num_samples);
    }

    let (tile_width, tile_height) = if scrambling_distance < 0.9 && accel_rt {
        let width = image_width.min(max_num_path_states);
        let height = image_height.min((max_num_path_states / width).max(1));
        (width, height)
    } else {
        let num_path_states_per_sample = max_num_path_states / samples;
        let mut side = if num_path_states_per_sample != 0 {
            round_down_to_power_of_two((num_path_states_per_sample as f64).sqrt().round() as usize)
                .max(1)
        } else {
            1
        };
        // Rounding the square root up may overshoot the pool.
        while side > 1 && side * side > max_num_path_states {
            side /= 2;
        }
        (side.min(image_width), side.min(image_height))
    };

    let tile_area = tile_width * tile_height;
    let tile_samples = if samples == 1 {
        1
    } else {
        // Prefer an even split of the sample range ([32 x 38, 8] over [1024, 200])
        // so more tiles can be scheduled early.
        round_up_to_power_of_two(((samples / 2) as f64).sqrt().round() as usize)
            .min(samples)
            .min(max_num_path_states / tile_area)
            .max(1)
    };

    let tile_size = TileSize::new(tile_width as i32, tile_height as i32, tile_samples as i32);
    debug_assert!(tile_size.num_path_states() <= max_num_path_states as i64);
    tile_size
}

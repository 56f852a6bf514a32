//! Splits a buffer and a sample range into a resumable sequence of work tiles.
//!
//! Work indices enumerate spatial tiles in row-major order; every tile is
//! visited once per sample sub-range before moving on to the next tile:
//!
//! ```text
//! work_index = tile_index * num_tiles_per_sample_range + sample_range_index
//! ```
//!
//! The scheduler is single-writer: `get_work` takes `&mut self`, so sharing
//! one instance between devices requires external synchronization. Devices
//! rendering the same image should rather own a scheduler each.

use super::tile::{tile_calculate_best_size, TileSize};
use crate::kernel::KernelWorkTile;
use crate::session::BufferParams;
use crate::util::{divide_up, IVec2};

#[derive(Debug, Clone, Default)]
pub struct WorkTileScheduler {
    accelerated_rt: bool,
    max_num_path_states: usize,

    /// Offset of the buffer inside the full image.
    image_full_offset_px: IVec2,
    image_size_px: IVec2,

    /// Buffer addressing handed to every tile.
    offset: i32,
    stride: i32,

    sample_start: i32,
    samples_num: i32,
    sample_offset: i32,
    scrambling_distance: f32,

    tile_size: TileSize,
    num_tiles_x: usize,
    num_tiles_y: usize,
    num_tiles_per_sample_range: usize,
    total_tiles_num: usize,
    total_work_size: usize,

    next_work_index: usize,
}

impl WorkTileScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device traces rays in hardware; affects tile shape.
    pub fn set_accelerated_rt(&mut self, accelerated_rt: bool) {
        self.accelerated_rt = accelerated_rt;
    }

    /// Capacity ceiling for a single tile, in pixel-samples.
    pub fn set_max_num_path_states(&mut self, max_num_path_states: usize) {
        self.max_num_path_states = max_num_path_states;
    }

    /// Start scheduling `samples_num` samples over the buffer.
    #[tracing::instrument(skip_all, fields(width = buffer_params.width, height = buffer_params.height, samples_num = samples_num))]
    pub fn reset(
        &mut self,
        buffer_params: &BufferParams,
        sample_start: i32,
        samples_num: i32,
        sample_offset: i32,
        scrambling_distance: f32,
    ) {
        self.image_full_offset_px = IVec2::new(buffer_params.full_x, buffer_params.full_y);
        self.image_size_px = IVec2::new(buffer_params.width, buffer_params.height);

        let (offset, stride) = buffer_params.get_offset_stride();
        self.offset = offset;
        self.stride = stride;

        self.sample_start = sample_start;
        self.samples_num = samples_num;
        self.sample_offset = sample_offset;
        self.scrambling_distance = scrambling_distance;

        self.reset_scheduler_state();
    }

    fn reset_scheduler_state(&mut self) {
        self.tile_size = tile_calculate_best_size(
            self.accelerated_rt,
            self.image_size_px,
            self.samples_num,
            self.max_num_path_states,
            self.scrambling_distance,
        );

        self.next_work_index = 0;

        if self.tile_size.is_empty() {
            if self.max_num_path_states == 0 {
                tracing::warn!("scheduler reset with zero path state capacity, nothing will render");
            }
            self.num_tiles_x = 0;
            self.num_tiles_y = 0;
            self.num_tiles_per_sample_range = 0;
            self.total_tiles_num = 0;
            self.total_work_size = 0;
            return;
        }

        self.num_tiles_x = divide_up(self.image_size_px.x as usize, self.tile_size.width as usize);
        self.num_tiles_y = divide_up(self.image_size_px.y as usize, self.tile_size.height as usize);
        self.total_tiles_num = self.num_tiles_x * self.num_tiles_y;
        self.num_tiles_per_sample_range =
            divide_up(self.samples_num as usize, self.tile_size.num_samples as usize);
        self.total_work_size = self.total_tiles_num * self.num_tiles_per_sample_range;

        tracing::debug!(
            "tile size {}x{}x{}, {}x{} tiles, {} sample ranges, {} work items",
            self.tile_size.width,
            self.tile_size.height,
            self.tile_size.num_samples,
            self.num_tiles_x,
            self.num_tiles_y,
            self.num_tiles_per_sample_range,
            self.total_work_size
        );
    }

    /// Claim the next tile.
    ///
    /// Returns `None` when all work has been handed out. With a non-zero
    /// `max_work_size`, a tile whose pixel-sample count exceeds it is left
    /// in place (the cursor is not advanced) and `None` is returned, so a
    /// later call with a larger bound gets the same tile.
    ///
    /// `max_work_size` may exceed the path state capacity: the capacity is
    /// the scheduling unit, the work size is a scheduling limit.
    pub fn get_work(&mut self, max_work_size: usize) -> Option<KernelWorkTile> {
        let work_index = self.next_work_index;
        if work_index >= self.total_work_size {
            return None;
        }

        let sample_range_index = work_index % self.num_tiles_per_sample_range;
        let tile_index = work_index / self.num_tiles_per_sample_range;
        let tile_y = (tile_index / self.num_tiles_x) as i32;
        let tile_x = (tile_index % self.num_tiles_x) as i32;
        let start_sample = sample_range_index as i32 * self.tile_size.num_samples;

        let x = tile_x * self.tile_size.width;
        let y = tile_y * self.tile_size.height;

        let work_tile = KernelWorkTile {
            x: x + self.image_full_offset_px.x,
            y: y + self.image_full_offset_px.y,
            w: self.tile_size.width.min(self.image_size_px.x - x),
            h: self.tile_size.height.min(self.image_size_px.y - y),
            start_sample: self.sample_start + start_sample,
            num_samples: self.tile_size.num_samples.min(self.samples_num - start_sample),
            sample_offset: self.sample_offset,
            offset: self.offset,
            stride: self.stride,
        };

        let tile_work_size = work_tile.work_size();
        debug_assert!(tile_work_size > 0);

        if max_work_size > 0 && tile_work_size > max_work_size as i64 {
            tracing::trace!(
                "tile {} of size {} rejected, limit {}",
                work_index,
                tile_work_size,
                max_work_size
            );
            return None;
        }

        self.next_work_index = work_index + 1;
        Some(work_tile)
    }

    pub fn tile_size(&self) -> TileSize {
        self.tile_size
    }

    pub fn num_tiles(&self) -> (usize, usize) {
        (self.num_tiles_x, self.num_tiles_y)
    }

    pub fn num_tiles_per_sample_range(&self) -> usize {
        self.num_tiles_per_sample_range
    }

    pub fn total_tiles_num(&self) -> usize {
        self.total_tiles_num
    }

    pub fn total_work_size(&self) -> usize {
        self.total_work_size
    }

    pub fn num_remaining_work(&self) -> usize {
        self.total_work_size.saturating_sub(self.next_work_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(width: i32, height: i32, samples: i32, capacity: usize) -> WorkTileScheduler {
        let mut scheduler = WorkTileScheduler::new();
        scheduler.set_max_num_path_states(capacity);
        scheduler.reset(&BufferParams::new(0, 0, width, height), 0, samples, 0, 1.0);
        scheduler
    }

    #[test]
    fn test_zero_capacity_yields_no_work() {
        let mut s = scheduler(16, 16, 4, 0);
        assert_eq!(s.total_work_size(), 0);
        assert!(s.get_work(0).is_none());
    }

    #[test]
    fn test_work_order_tiles_outer_samples_inner() {
        // 4x4 image, 8 samples, capacity 32: 2x2 tiles with 2 samples each.
        let mut s = scheduler(4, 4, 8, 32);
        assert_eq!(s.tile_size(), TileSize::new(2, 2, 2));
        assert_eq!(s.num_tiles(), (2, 2));
        assert_eq!(s.num_tiles_per_sample_range(), 4);

        for start_sample in [0, 2, 4, 6] {
            let tile = s.get_work(0).unwrap();
            assert_eq!((tile.x, tile.y, tile.start_sample), (0, 0, start_sample));
        }
        let next = s.get_work(0).unwrap();
        assert_eq!((next.x, next.y, next.start_sample), (2, 0, 0));
    }

    #[test]
    fn test_edge_tiles_are_clipped() {
        let mut s = scheduler(5, 3, 1, 4);
        let mut widths = Vec::new();
        while let Some(tile) = s.get_work(0) {
            assert!(tile.x + tile.w <= 5);
            assert!(tile.y + tile.h <= 3);
            widths.push(tile.w);
        }
        assert!(widths.contains(&1));
    }

    #[test]
    fn test_tiles_offset_into_full_image() {
        let mut s = WorkTileScheduler::new();
        s.set_max_num_path_states(1 << 16);
        let params = BufferParams::new(100, 50, 8, 8);
        s.reset(&params, 10, 4, 3, 1.0);
        let tile = s.get_work(0).unwrap();
        assert_eq!((tile.x, tile.y), (100, 50));
        assert_eq!(tile.start_sample, 10);
        assert_eq!(tile.sample_offset, 3);
        assert_eq!((tile.offset, tile.stride), params.get_offset_stride());
    }

    #[test]
    fn test_rejected_claim_keeps_cursor() {
        let mut s = scheduler(8, 8, 8, 64);
        let remaining = s.num_remaining_work();
        assert!(s.get_work(1).is_none());
        assert_eq!(s.num_remaining_work(), remaining);
        assert!(s.get_work(0).is_some());
        assert_eq!(s.num_remaining_work(), remaining - 1);
    }
}

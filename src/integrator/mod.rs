//! Work distribution: tile scheduling, per-device work executors and the
//! buffer post-processing passes they run.

mod adaptive_sampling;
mod pass_accessor;
mod path_trace_work;
mod path_trace_work_cpu;
mod path_trace_work_gpu;
mod tile;
mod work_tile_scheduler;

pub use adaptive_sampling::converge_filter_count_active;
pub use pass_accessor::{Destination, DestinationPixels, PassAccessInfo, PassAccessor, Source};
pub use path_trace_work::{create_path_trace_work, DisplayDestination, PathTraceWork, PathTraceWorkBase};
pub use path_trace_work_cpu::PathTraceWorkCPU;
pub use path_trace_work_gpu::PathTraceWorkGPU;
pub use tile::{tile_calculate_best_size, TileSize};
pub use work_tile_scheduler::WorkTileScheduler;

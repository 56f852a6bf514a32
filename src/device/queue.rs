//! Ordered command queue of a GPU device.
//!
//! The queue owns the device-side path states and render buffer. Commands
//! execute in submission order; the host only observes results after
//! [`DeviceQueue::synchronize`].

use crate::kernel::KernelWorkTile;

/// Kernels a GPU work enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKernel {
    IntegratorInitFromCamera,
    IntegratorInitFromBake,
    /// One iteration over every active path state.
    IntegratorMegakernel,
}

pub trait DeviceQueue: Send {
    /// Prepare the queue for a render. Returns `false` on device failure.
    fn init_execution(&mut self) -> bool;

    /// Number of path states the device can hold at once.
    fn num_concurrent_states(&self) -> usize;

    /// Path states currently in flight.
    fn num_active_paths(&self) -> usize;

    /// Initialize one path state per pixel-sample of every tile.
    fn enqueue_init(&mut self, kernel: DeviceKernel, tiles: &[KernelWorkTile]) -> bool;

    /// Advance all active path states by one kernel launch.
    fn enqueue_megakernel(&mut self) -> bool;

    /// Wait for all enqueued commands.
    fn synchronize(&mut self) -> bool;

    /// Allocate (or resize) the device render buffer and zero it.
    fn alloc_render_buffer(&mut self, num_floats: usize);

    fn zero_render_buffer(&mut self);

    fn copy_render_buffer_to_device(&mut self, host: &[f32]) -> bool;

    fn copy_render_buffer_from_device(&mut self, host: &mut [f32]) -> bool;
}

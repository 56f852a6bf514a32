//! Compute device descriptors and the seams the work executors drive.
//!
//! A [`Device`] reports its capabilities through [`DeviceInfo`] and hands out
//! either CPU kernels or a GPU command queue. The work factory picks the
//! executor once from [`DeviceType`].

mod queue;

pub use queue::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::kernel::IntegratorKernels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
    Gpu,
}

/// Capabilities of a compute device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub ty: DeviceType,
    pub description: String,
    /// Worker threads for CPU execution. 0 uses all cores.
    pub num_threads: usize,
    /// Path states the device can keep in flight (GPU scheduling unit).
    pub max_num_path_states: usize,
    /// Hardware ray tracing is available.
    pub use_hardware_raytracing: bool,
    /// Collect per-thread kernel counters during rendering.
    pub profiling: bool,
}

impl DeviceInfo {
    pub fn cpu(num_threads: usize) -> Self {
        Self {
            ty: DeviceType::Cpu,
            description: "CPU".to_string(),
            num_threads,
            max_num_path_states: 0,
            use_hardware_raytracing: false,
            profiling: false,
        }
    }

    pub fn gpu(description: impl Into<String>, max_num_path_states: usize) -> Self {
        Self {
            ty: DeviceType::Gpu,
            description: description.into(),
            num_threads: 0,
            max_num_path_states,
            use_hardware_raytracing: false,
            profiling: false,
        }
    }

    /// Number of CPU worker threads, resolving 0 to the core count.
    pub fn resolved_num_threads(&self) -> usize {
        if self.num_threads > 0 {
            self.num_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// A compute device as seen by the work factory.
pub trait Device: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Kernels for CPU execution.
    fn cpu_kernels(&self) -> Option<Arc<dyn IntegratorKernels>> {
        None
    }

    /// Create a command queue for GPU execution.
    fn gpu_queue_create(&self) -> Option<Box<dyn DeviceQueue>> {
        None
    }
}

/// Cooperative cancellation flag shared between the session and its works.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scheduling statistics reported by a render call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderStatistics {
    /// Fraction of the device's concurrency that was busy, 0..1.
    pub occupancy: f32,
    /// Samples taken, when profiling is active.
    pub samples: u64,
    /// Kernel invocations, when profiling is active.
    pub kernel_calls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_resolved_threads() {
        assert_eq!(DeviceInfo::cpu(3).resolved_num_threads(), 3);
        assert!(DeviceInfo::cpu(0).resolved_num_threads() >= 1);
    }
}

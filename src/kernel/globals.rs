//! Per-thread kernel globals for CPU execution.
//!
//! One instance exists per worker thread of a work's thread pool. The scene
//! data is shared read-only; everything else is thread-private scratch.

use std::sync::Arc;

use parking_lot::Mutex;

use super::types::KernelData;
use crate::util::Vec4;

/// Counters a thread accumulates while profiling is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilingCounters {
    pub samples: u64,
    pub kernel_calls: u64,
}

impl ProfilingCounters {
    pub fn merge(&mut self, other: &ProfilingCounters) {
        self.samples += other.samples;
        self.kernel_calls += other.kernel_calls;
    }
}

/// Radiance estimate recorded for path guiding training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidingSample {
    pub x: i32,
    pub y: i32,
    pub sample: i32,
    pub radiance: Vec4,
}

/// Training samples gathered from all threads of a render.
#[derive(Debug, Default)]
pub struct GuidingStorage {
    samples: Mutex<Vec<GuidingSample>>,
}

impl GuidingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, samples: &mut Vec<GuidingSample>) {
        if samples.is_empty() {
            return;
        }
        self.samples.lock().append(samples);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all stored samples, leaving the storage empty.
    pub fn take(&self) -> Vec<GuidingSample> {
        std::mem::take(&mut *self.samples.lock())
    }
}

/// Kernel globals owned by one worker thread.
#[derive(Debug)]
pub struct KernelGlobals {
    pub data: Arc<KernelData>,
    /// Thread pool index this instance belongs to.
    pub thread_index: usize,

    pub profiling: bool,
    pub counters: ProfilingCounters,

    /// Training samples recorded by kernels, drained after each render call.
    pub guiding_samples: Vec<GuidingSample>,
}

impl KernelGlobals {
    pub fn new(data: Arc<KernelData>, thread_index: usize) -> Self {
        Self {
            data,
            thread_index,
            profiling: false,
            counters: ProfilingCounters::default(),
            guiding_samples: Vec::new(),
        }
    }

    pub fn start_profiling(&mut self) {
        self.profiling = true;
        self.counters = ProfilingCounters::default();
    }

    pub fn stop_profiling(&mut self) -> ProfilingCounters {
        self.profiling = false;
        std::mem::take(&mut self.counters)
    }

    #[inline]
    pub fn count_kernel_call(&mut self) {
        if self.profiling {
            self.counters.kernel_calls += 1;
        }
    }

    #[inline]
    pub fn count_sample(&mut self) {
        if self.profiling {
            self.counters.samples += 1;
        }
    }
}

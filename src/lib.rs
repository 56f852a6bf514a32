//! # Tilework
//!
//! Tile scheduling and work distribution for a progressive path tracer.
//!
//! A render session hands each compute device a [`PathTraceWork`]. The work
//! owns a private render buffer covering its band of the image, renders
//! sample blocks into it and exchanges pixels with the session's big-tile
//! buffer. CPU works render pixel by pixel on a thread pool; GPU works keep a
//! command queue saturated with tiles from a [`WorkTileScheduler`].
//!
//! ## Modules
//!
//! - [`util`] - Errors and integer helpers
//! - [`session`] - Buffer layout, render buffers, display surface
//! - [`kernel`] - Data and kernel contract shared with the devices
//! - [`device`] - Device descriptors, GPU queue, cancellation
//! - [`integrator`] - Scheduler, work executors, adaptive sampling filter
//! - [`config`] - Persistent settings
//!
//! ## Example
//!
//! ```ignore
//! use tilework::prelude::*;
//!
//! let mut work = create_path_trace_work(&device, kernel_data, Film::default(), cancel)?;
//! work.set_effective_buffer_params(&full, &big_tile, &band)?;
//! work.init_execution();
//!
//! let mut stats = RenderStatistics::default();
//! work.render_samples(&mut stats, 0, 16, 0);
//! let active = work.adaptive_sampling_converge_filter_count_active(0.01, false);
//! ```

pub mod util;
pub mod session;
pub mod kernel;
pub mod device;
pub mod integrator;
pub mod config;

// Re-export commonly used types
pub use config::WorkSettings;
pub use integrator::{create_path_trace_work, PathTraceWork, WorkTileScheduler};
pub use util::{Error, Result};

/// Build date stamped by the build script.
pub const BUILD_DATE: &str = env!("TILEWORK_BUILD_DATE");
/// Build time stamped by the build script.
pub const BUILD_TIME: &str = env!("TILEWORK_BUILD_TIME");

/// Install a global fmt subscriber filtered by `TILEWORK_LOG` (default `warn`).
///
/// Returns `false` when a global subscriber is already set.
pub fn init_tracing() -> bool {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("TILEWORK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }

    tracing::info!("tilework {} built {} {}", env!("CARGO_PKG_VERSION"), BUILD_DATE, BUILD_TIME);
    true
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::WorkSettings;
    pub use crate::device::{CancelToken, Device, DeviceInfo, DeviceKernel, DeviceQueue, DeviceType, RenderStatistics};
    pub use crate::integrator::*;
    pub use crate::kernel::{IntegratorKernels, IntegratorState, KernelData, KernelFilm, KernelGlobals, KernelWorkTile};
    pub use crate::session::*;
    pub use crate::util::{Error, Result};
}

//! Utility types and functions for tilework.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Integer helpers and `glam` re-exports

mod error;
mod math;

pub use error::*;
pub use math::*;

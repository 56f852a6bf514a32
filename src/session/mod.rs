//! Render buffers and the display surface shared with the session.

mod buffers;
mod display;

pub use buffers::*;
pub use display::*;

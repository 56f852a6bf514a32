//! Presentation surface the path trace works draw into.
//!
//! The surface spans the whole image and stores half-precision RGBA.
//! Works address it with a pixel `(offset, stride)` derived from their
//! position inside the full image.

use bytemuck::{Pod, Zeroable};
use half::f16;

use super::PassType;
use crate::util::IVec2;

/// Display-facing film settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Film {
    /// Pass shown in the viewport.
    pub display_pass: PassType,
    /// Tint pixels adaptive sampling still works on.
    pub show_active_pixels: bool,
}

impl Default for Film {
    fn default() -> Self {
        Self {
            display_pass: PassType::Combined,
            show_active_pixels: false,
        }
    }
}

/// Half-precision RGBA texel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Half4 {
    pub x: f16,
    pub y: f16,
    pub z: f16,
    pub w: f16,
}

impl Half4 {
    #[inline]
    pub fn from_f32(rgba: [f32; 4]) -> Self {
        Self {
            x: f16::from_f32(rgba[0]),
            y: f16::from_f32(rgba[1]),
            z: f16::from_f32(rgba[2]),
            w: f16::from_f32(rgba[3]),
        }
    }

    #[inline]
    pub fn to_f32(self) -> [f32; 4] {
        [self.x.to_f32(), self.y.to_f32(), self.z.to_f32(), self.w.to_f32()]
    }
}

/// Texture-like destination for display updates.
pub trait PathTraceDisplay: Send {
    /// Texture size in pixels.
    fn texture_size(&self) -> IVec2;

    /// Map the texture for writing. `None` when the texture is unavailable
    /// this frame; callers skip the update.
    fn map_texture_buffer(&mut self) -> Option<&mut [Half4]>;

    /// Release a mapping obtained from [`map_texture_buffer`](Self::map_texture_buffer).
    fn unmap_texture_buffer(&mut self);
}

/// Display backed by host memory. Used for headless rendering.
#[derive(Debug, Clone)]
pub struct HostDisplay {
    size: IVec2,
    pixels: Vec<Half4>,
    mappable: bool,
    mapped: bool,
}

impl HostDisplay {
    pub fn new(width: i32, height: i32) -> Self {
        let num_pixels = width.max(0) as usize * height.max(0) as usize;
        Self {
            size: IVec2::new(width, height),
            pixels: vec![Half4::default(); num_pixels],
            mappable: true,
            mapped: false,
        }
    }

    /// Make subsequent map requests fail (e.g. lost context).
    pub fn set_mappable(&mut self, mappable: bool) {
        self.mappable = mappable;
    }

    pub fn pixels(&self) -> &[Half4] {
        &self.pixels
    }

    pub fn pixel(&self, x: i32, y: i32) -> Half4 {
        self.pixels[(y * self.size.x + x) as usize]
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

impl PathTraceDisplay for HostDisplay {
    fn texture_size(&self) -> IVec2 {
        self.size
    }

    fn map_texture_buffer(&mut self) -> Option<&mut [Half4]> {
        if !self.mappable {
            return None;
        }
        debug_assert!(!self.mapped, "texture mapped twice");
        self.mapped = true;
        Some(&mut self.pixels)
    }

    fn unmap_texture_buffer(&mut self) {
        self.mapped = false;
    }
}

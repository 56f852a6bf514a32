//! Render buffer layout and storage.
//!
//! A render buffer is a flat `f32` array. Every pixel owns a record of
//! `pass_stride` floats, passes are interleaved inside that record in the
//! order they were declared. Rows are `stride` pixels apart.
//!
//! ```text
//! pixel_index = offset + x + y * stride      (x, y in global image space)
//! float_index = pixel_index * pass_stride + pass.offset
//! ```

use smallvec::SmallVec;

use crate::util::{Error, Result};

/// Kind of data stored in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassType {
    /// Beauty RGBA accumulation.
    Combined,
    Depth,
    Normal,
    Albedo,
    /// Half-sample RGB accumulation; `w` holds the converged flag.
    AdaptiveAuxBuffer,
    /// Number of samples taken, stored as `u32` bits.
    SampleCount,
    /// Accumulated render time in milliseconds.
    RenderTime,
    ShadowCatcher,
    ShadowCatcherMatte,
    /// ID/weight pairs, two pairs per 4-float layer.
    Cryptomatte,
}

impl PassType {
    /// Number of floats a single layer of this pass occupies.
    pub fn num_components(self) -> usize {
        match self {
            PassType::Combined
            | PassType::AdaptiveAuxBuffer
            | PassType::ShadowCatcherMatte
            | PassType::Cryptomatte => 4,
            PassType::Normal | PassType::Albedo | PassType::ShadowCatcher => 3,
            PassType::Depth | PassType::SampleCount | PassType::RenderTime => 1,
        }
    }

    /// Whether a denoised variant of this pass can exist.
    pub fn supports_denoising(self) -> bool {
        matches!(
            self,
            PassType::Combined | PassType::ShadowCatcher | PassType::ShadowCatcherMatte
        )
    }
}

/// Noisy accumulation or denoiser output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PassMode {
    #[default]
    Noisy,
    Denoised,
}

/// Pass declaration, before it is placed in the pixel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    pub ty: PassType,
    pub mode: PassMode,
    /// Number of layers (only cryptomatte uses more than one).
    pub layers: usize,
}

impl Pass {
    pub fn new(ty: PassType) -> Self {
        Self { ty, mode: PassMode::Noisy, layers: 1 }
    }

    pub fn denoised(ty: PassType) -> Self {
        debug_assert!(ty.supports_denoising());
        Self { ty, mode: PassMode::Denoised, layers: 1 }
    }

    /// Cryptomatte pass with `depth` layers of two ID/weight slots each.
    pub fn cryptomatte(depth: usize) -> Self {
        Self { ty: PassType::Cryptomatte, mode: PassMode::Noisy, layers: depth.max(1) }
    }
}

/// A pass placed inside the pixel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPass {
    pub ty: PassType,
    pub mode: PassMode,
    pub num_components: usize,
    /// Float offset inside the pixel record.
    pub offset: usize,
}

/// Geometry and pass layout of a render buffer.
///
/// `full_x/full_y` place the buffer inside the whole image of
/// `full_width x full_height` pixels. The window is a display crop inside
/// the buffer, in buffer-local pixels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BufferParams {
    pub width: i32,
    pub height: i32,

    pub window_x: i32,
    pub window_y: i32,
    pub window_width: i32,
    pub window_height: i32,

    pub full_x: i32,
    pub full_y: i32,
    pub full_width: i32,
    pub full_height: i32,

    /// Pixel index bias for global coordinates.
    pub offset: i32,
    /// Row pitch in pixels.
    pub stride: i32,
    /// Floats per pixel across all passes.
    pub pass_stride: usize,

    pub passes: SmallVec<[BufferPass; 8]>,
}

impl BufferParams {
    /// Buffer covering `width x height` pixels at `(full_x, full_y)`.
    ///
    /// The whole image defaults to the buffer extent and the window to the
    /// entire buffer. No passes are declared yet.
    pub fn new(full_x: i32, full_y: i32, width: i32, height: i32) -> Self {
        let mut params = Self {
            width,
            height,
            window_x: 0,
            window_y: 0,
            window_width: width,
            window_height: height,
            full_x,
            full_y,
            full_width: full_x + width,
            full_height: full_y + height,
            ..Default::default()
        };
        params.update_offset_stride();
        params
    }

    /// Set the size of the whole image this buffer is part of.
    pub fn with_full_size(mut self, full_width: i32, full_height: i32) -> Self {
        self.full_width = full_width;
        self.full_height = full_height;
        self
    }

    /// Set the display window, in buffer-local pixels.
    pub fn with_window(mut self, x: i32, y: i32, width: i32, height: i32) -> Self {
        self.window_x = x;
        self.window_y = y;
        self.window_width = width;
        self.window_height = height;
        self
    }

    /// Declare passes and lay them out in the pixel record.
    pub fn with_passes(mut self, passes: &[Pass]) -> Self {
        self.update_passes(passes);
        self
    }

    /// Recompute `offset`/`stride` from the buffer rectangle.
    pub fn update_offset_stride(&mut self) {
        self.offset = -(self.full_x + self.full_y * self.width);
        self.stride = self.width;
    }

    /// Place passes contiguously in declaration order and update `pass_stride`.
    pub fn update_passes(&mut self, passes: &[Pass]) {
        self.passes.clear();
        let mut offset = 0;
        for pass in passes {
            let num_components = pass.ty.num_components() * pass.layers;
            self.passes.push(BufferPass {
                ty: pass.ty,
                mode: pass.mode,
                num_components,
                offset,
            });
            offset += num_components;
        }
        self.pass_stride = offset;
    }

    /// `(offset, stride)` a kernel uses to address this buffer.
    #[inline]
    pub fn get_offset_stride(&self) -> (i32, i32) {
        (self.offset, self.stride)
    }

    pub fn find_pass(&self, ty: PassType, mode: PassMode) -> Option<&BufferPass> {
        self.passes.iter().find(|p| p.ty == ty && p.mode == mode)
    }

    /// Float offset of a pass inside the pixel record, `None` when unused.
    pub fn get_pass_offset(&self, ty: PassType, mode: PassMode) -> Option<usize> {
        self.find_pass(ty, mode).map(|p| p.offset)
    }

    /// Pass to read for display: the requested variant, else the noisy one.
    pub fn get_actual_display_pass(&self, ty: PassType, mode: PassMode) -> Option<&BufferPass> {
        self.find_pass(ty, mode)
            .or_else(|| self.find_pass(ty, PassMode::Noisy))
    }

    /// Like [`find_pass`](Self::find_pass), failing with [`Error::MissingPass`].
    pub fn require_pass(&self, ty: PassType, mode: PassMode) -> Result<&BufferPass> {
        self.find_pass(ty, mode).ok_or(Error::MissingPass(ty))
    }

    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.width.max(0) as usize * self.height.max(0) as usize
    }

    /// Total number of floats the buffer needs.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.stride.max(0) as usize * self.height.max(0) as usize * self.pass_stride
    }

    /// Pixel index for global coordinates, `None` outside the buffer.
    #[inline]
    pub fn pixel_index(&self, x: i32, y: i32) -> Option<usize> {
        let local_x = x - self.full_x;
        let local_y = y - self.full_y;
        if local_x < 0 || local_y < 0 || local_x >= self.width || local_y >= self.height {
            return None;
        }
        let index = self.offset as i64 + x as i64 + y as i64 * self.stride as i64;
        usize::try_from(index).ok()
    }

    /// Whether the rectangle (origin and extent) matches another one.
    #[inline]
    pub fn same_rect(&self, other: &BufferParams) -> bool {
        self.full_x == other.full_x
            && self.full_y == other.full_y
            && self.width == other.width
            && self.height == other.height
    }

    /// Whether geometry or pass layout differ, requiring a buffer reset.
    pub fn modified(&self, other: &BufferParams) -> bool {
        !(self.same_rect(other)
            && self.full_width == other.full_width
            && self.full_height == other.full_height
            && self.offset == other.offset
            && self.stride == other.stride
            && self.pass_stride == other.pass_stride
            && self.passes == other.passes)
    }

    /// Check the rectangle and the addressing invariant.
    pub fn validate(&self) -> Result<()> {
        if self.width < 0 || self.height < 0 {
            return Err(Error::invalid(format!(
                "negative extent {}x{}",
                self.width, self.height
            )));
        }
        if self.stride < self.width {
            return Err(Error::invalid(format!(
                "stride {} smaller than width {}",
                self.stride, self.width
            )));
        }
        if self.width > 0 && self.height > 0 && self.pixel_index(self.full_x, self.full_y) != Some(0) {
            return Err(Error::invalid(format!(
                "offset {} does not map origin ({}, {}) to pixel 0",
                self.offset, self.full_x, self.full_y
            )));
        }
        if self.window_x < 0
            || self.window_y < 0
            || self.window_x + self.window_width > self.width
            || self.window_y + self.window_height > self.height
        {
            return Err(Error::invalid(format!(
                "window {}x{}+{}+{} outside buffer {}x{}",
                self.window_width, self.window_height, self.window_x, self.window_y,
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Host-side render buffer storage.
#[derive(Debug, Clone, Default)]
pub struct RenderBuffers {
    pub params: BufferParams,
    pub buffer: Vec<f32>,
}

impl RenderBuffers {
    /// Allocate a zeroed buffer for the given layout.
    pub fn new(params: BufferParams) -> Result<Self> {
        params.validate()?;
        let buffer = vec![0.0; params.buffer_size()];
        Ok(Self { params, buffer })
    }

    /// Re-layout the buffer. Contents are zeroed.
    pub fn reset(&mut self, params: BufferParams) -> Result<()> {
        params.validate()?;
        self.buffer.clear();
        self.buffer.resize(params.buffer_size(), 0.0);
        self.params = params;
        Ok(())
    }

    pub fn zero(&mut self) {
        self.buffer.fill(0.0);
    }

    /// Pixel record by pixel index.
    #[inline]
    pub fn pixel(&self, index: usize) -> &[f32] {
        let stride = self.params.pass_stride;
        &self.buffer[index * stride..(index + 1) * stride]
    }

    #[inline]
    pub fn pixel_mut(&mut self, index: usize) -> &mut [f32] {
        let stride = self.params.pass_stride;
        &mut self.buffer[index * stride..(index + 1) * stride]
    }
}

/// Copy every denoised pass present in both buffers.
///
/// `src_offset` is the pixel index in `src` that maps to pixel 0 of `dst`.
/// Both layouts must describe the same number of pixels to copy.
pub fn render_buffers_host_copy_denoised(
    dst: &mut RenderBuffers,
    dst_params: &BufferParams,
    src: &RenderBuffers,
    src_params: &BufferParams,
    src_offset: usize,
) {
    debug_assert_eq!(dst_params.width, src_params.width);

    let pass_pairs: SmallVec<[(usize, usize, usize); 4]> = dst_params
        .passes
        .iter()
        .filter(|pass| pass.mode == PassMode::Denoised)
        .filter_map(|dst_pass| {
            src_params
                .find_pass(dst_pass.ty, dst_pass.mode)
                .map(|src_pass| (dst_pass.offset, src_pass.offset, dst_pass.num_components))
        })
        .collect();

    if pass_pairs.is_empty() {
        return;
    }

    let dst_stride = dst_params.pass_stride;
    let src_stride = src_params.pass_stride;
    let num_pixels = dst_params.num_pixels();

    for pixel in 0..num_pixels {
        let dst_base = pixel * dst_stride;
        let src_base = (src_offset + pixel) * src_stride;
        for &(dst_pass_offset, src_pass_offset, num_components) in &pass_pairs {
            let from = src_base + src_pass_offset;
            let to = dst_base + dst_pass_offset;
            dst.buffer[to..to + num_components]
                .copy_from_slice(&src.buffer[from..from + num_components]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passes() -> Vec<Pass> {
        vec![
            Pass::new(PassType::Combined),
            Pass::denoised(PassType::Combined),
            Pass::new(PassType::SampleCount),
            Pass::cryptomatte(2),
        ]
    }

    #[test]
    fn test_pass_layout() {
        let params = BufferParams::new(0, 0, 4, 4).with_passes(&passes());
        assert_eq!(params.pass_stride, 4 + 4 + 1 + 8);
        assert_eq!(params.get_pass_offset(PassType::Combined, PassMode::Noisy), Some(0));
        assert_eq!(params.get_pass_offset(PassType::Combined, PassMode::Denoised), Some(4));
        assert_eq!(params.get_pass_offset(PassType::SampleCount, PassMode::Noisy), Some(8));
        assert_eq!(params.get_pass_offset(PassType::Cryptomatte, PassMode::Noisy), Some(9));
        assert_eq!(params.get_pass_offset(PassType::Depth, PassMode::Noisy), None);
    }

    #[test]
    fn test_offset_stride_addresses_global_coordinates() {
        let params = BufferParams::new(10, 20, 8, 4);
        assert_eq!(params.get_offset_stride(), (-(10 + 20 * 8), 8));
        assert_eq!(params.pixel_index(10, 20), Some(0));
        assert_eq!(params.pixel_index(17, 23), Some(31));
        assert_eq!(params.pixel_index(9, 20), None);
        assert_eq!(params.pixel_index(10, 24), None);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_pixel_indices_unique() {
        let params = BufferParams::new(3, 5, 7, 6);
        let mut seen = vec![false; params.num_pixels()];
        for y in 0..params.height {
            for x in 0..params.width {
                let index = params
                    .pixel_index(params.full_x + x, params.full_y + y)
                    .expect("inside buffer");
                assert!(!seen[index]);
                seen[index] = true;
            }
        }
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn test_display_pass_fallback() {
        let params = BufferParams::new(0, 0, 2, 2).with_passes(&[Pass::new(PassType::Combined)]);
        let pass = params
            .get_actual_display_pass(PassType::Combined, PassMode::Denoised)
            .expect("noisy pass");
        assert_eq!(pass.mode, PassMode::Noisy);

        let moved = BufferParams::new(1, 0, 2, 2).with_passes(&[Pass::new(PassType::Combined)]);
        assert!(params.modified(&moved));
        assert!(!params.modified(&params.clone().with_window(0, 0, 1, 1)));

        assert!(matches!(
            params.require_pass(PassType::Depth, PassMode::Noisy),
            Err(Error::MissingPass(PassType::Depth))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_window() {
        let params = BufferParams::new(0, 0, 4, 4).with_window(2, 0, 4, 4);
        assert!(matches!(params.validate(), Err(Error::InvalidBufferParams(_))));
    }

    #[test]
    fn test_copy_denoised() {
        let params = BufferParams::new(0, 0, 2, 1).with_passes(&passes());
        let big_params = BufferParams::new(0, 0, 2, 3).with_passes(&passes());
        let mut big = RenderBuffers::new(big_params.clone()).unwrap();
        let denoised = big_params.get_pass_offset(PassType::Combined, PassMode::Denoised).unwrap();
        for (i, value) in big.buffer.iter_mut().enumerate() {
            *value = i as f32;
        }
        let mut dst = RenderBuffers::new(params.clone()).unwrap();
        render_buffers_host_copy_denoised(&mut dst, &params, &big, &big_params, 2);

        let stride = params.pass_stride;
        for pixel in 0..2 {
            let expected_base = (2 + pixel) * stride + denoised;
            assert_eq!(
                &dst.buffer[pixel * stride + denoised..pixel * stride + denoised + 4],
                &big.buffer[expected_base..expected_base + 4]
            );
            // Noisy passes untouched.
            assert_eq!(dst.buffer[pixel * stride], 0.0);
        }
    }
}

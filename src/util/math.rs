//! Integer helpers shared by the scheduler and the buffer layout.

pub use glam::{IVec2, Vec4};

/// Integer division rounding up. Returns 0 for a zero divisor.
#[inline]
pub fn divide_up(value: usize, divisor: usize) -> usize {
    if divisor == 0 {
        return 0;
    }
    value.div_ceil(divisor)
}

/// Largest power of two that is `<= value`. Returns 0 for 0.
#[inline]
pub fn round_down_to_power_of_two(value: usize) -> usize {
    if value == 0 {
        return 0;
    }
    1 << (usize::BITS - 1 - value.leading_zeros())
}

/// Smallest power of two that is `>= value`. Returns 1 for 0.
#[inline]
pub fn round_up_to_power_of_two(value: usize) -> usize {
    value.max(1).next_power_of_two()
}

//! Wrap-safe arithmetic on the 32-bit millisecond counter
//!
//! Show time and local time are both `u32` milliseconds that wrap roughly
//! every 49.7 days. Any two timestamps no more than `i32::MAX` ms (~24.8 days)
//! apart compare correctly across the wrap.

/// Largest unsigned difference still treated as non-negative
const HALF_RANGE: u32 = 0x7fff_ffff;

/// Signed elapsed time from `start` to `end`, tolerant of one wrap
#[inline]
pub fn duration(start: u32, end: u32) -> i32 {
    end.wrapping_sub(start) as i32
}

/// Signed difference `a - b`, tolerant of one wrap
#[inline]
pub fn diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// True when `target` is `now` or already in the past
#[inline]
pub fn is_due(now: u32, target: u32) -> bool {
    now.wrapping_sub(target) <= HALF_RANGE
}

/// Apply a signed offset to a timestamp
#[inline]
pub fn offset_by(t: u32, offset: i32) -> u32 {
    t.wrapping_add(offset as u32)
}

//! Local clock sources
//!
//! The agent never reads wall-clock time. All it needs is a monotonic
//! millisecond counter, truncated to 32 bits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic local millisecond source
pub trait LocalClock: Send {
    /// Milliseconds since the clock was started, truncated to 32 bits
    fn now_ms(&self) -> u32;
}

/// Clock backed by the OS monotonic clock
/// INVARIANT: never goes backwards (modulo the 32-bit wrap)
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    reference: Instant,
}

impl MonotonicClock {
    /// Create a clock reading zero now
    pub fn new() -> Self {
        MonotonicClock {
            reference: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalClock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap
        self.reference.elapsed().as_millis() as u32
    }
}

/// Manually driven clock for simulations and tests.
///
/// Clones share the same counter, so a test can keep a handle and advance
/// the clock the agent is reading.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    value: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        ManualClock {
            value: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.value.store(ms, Ordering::SeqCst);
    }

    /// Advance by `ms`, wrapping at 2^32
    pub fn advance(&self, ms: u32) -> u32 {
        self.value.fetch_add(ms, Ordering::SeqCst).wrapping_add(ms)
    }
}

impl LocalClock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let t1 = clock.now_ms();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = clock.now_ms();
        assert!(crate::duration(t1, t2) >= 10);
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(99_000);
        let handle = clock.clone();

        handle.advance(1100);
        assert_eq!(clock.now_ms(), 100_100);

        handle.set(0xFFFF_FFFF);
        assert_eq!(clock.advance(2), 1);
        assert_eq!(handle.now_ms(), 1);
    }
}

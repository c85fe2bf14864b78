//! CueSync Time - Show-time arithmetic and clock synchronization
//!
//! This crate implements:
//! - Wrap-safe operations on the 32-bit millisecond counter
//! - Local clock sources (monotonic and manual)
//! - Offset estimation from beacons and round-trip probes
//! - The bounded table of in-flight time probes

pub mod clock;
pub mod offset;
pub mod probe;
pub mod wrap;

pub use clock::*;
pub use offset::*;
pub use probe::*;
pub use wrap::*;

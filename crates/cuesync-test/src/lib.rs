//! CueSync Test Harness - Simulated shows and network chaos
//!
//! This crate provides:
//! - Seeded lossy datagram links
//! - A show controller simulator
//! - A multi-node simulator running real agents on manual clocks
//! - End-to-end fire scenarios

pub mod chaos;
pub mod controller;
pub mod integration;
pub mod simulator;

pub use chaos::*;
pub use controller::*;
pub use integration::*;
pub use simulator::*;

//! CueSync Transport Layer - datagram I/O
//!
//! This crate provides:
//! - The `DatagramTransport` seam the reactor is written against
//! - Multicast UDP transport bound to the show group

pub mod udp;

pub use udp::*;

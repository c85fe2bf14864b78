//! CueSync Wire Protocol - Binary datagram format
//!
//! Every datagram is:
//! - Fixed header (32 bytes)
//! - Fixed-size payload determined by the message type
//!
//! All integers are little-endian with no padding.

pub mod datagram;
pub mod flags;
pub mod header;
pub mod payload;

pub use datagram::*;
pub use flags::*;
pub use header::*;
pub use payload::*;

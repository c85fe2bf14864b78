//! CueSync Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by every CueSync crate:
//! - Identifiers (NodeId, EpochId, MessageId, CueId, GroupId)
//! - Node identity derivation
//! - The error taxonomy

pub mod error;
pub mod id;

pub use error::*;
pub use id::*;

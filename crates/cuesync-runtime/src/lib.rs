//! CueSync Runtime - Node agent and reactor
//!
//! The agent keeps a node's lighting cues in step with the show controller:
//! 1. Adopt the controller epoch from BEACON
//! 2. Estimate the clock offset (beacon, then round-trip probes)
//! 3. Store prepared cues and schedule fires
//! 4. Apply each fire when show time reaches it
//!
//! The reactor owns the agent and feeds it from a datagram transport.

pub mod agent;
pub mod applier;
pub mod config;
pub mod cues;
pub mod logging;
pub mod reactor;
pub mod status;

pub use agent::*;
pub use applier::*;
pub use config::*;
pub use cues::*;
pub use logging::*;
pub use reactor::*;
pub use status::*;

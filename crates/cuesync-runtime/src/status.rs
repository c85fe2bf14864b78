//! Agent status and counters

use std::net::SocketAddr;

use cuesync_core::{CueId, EpochId, NodeId};
use cuesync_time::SyncMethod;
use cuesync_wire::PatternType;

/// Agent lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    /// No trusted epoch
    #[default]
    Unsynchronized,
    /// Epoch adopted and offset known
    Synchronized,
}

/// What the renderer is currently showing, as reported in PONG
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectStatus {
    pub pattern_type: u8,
    pub brightness_pct: u8,
    pub frame_ms: u16,
}

impl EffectStatus {
    pub fn new(frame_ms: u16) -> Self {
        EffectStatus {
            pattern_type: PatternType::Off as u8,
            brightness_pct: 100,
            frame_ms,
        }
    }
}

impl Default for EffectStatus {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Agent counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub datagrams_in: u64,
    pub datagrams_out: u64,
    /// Bad header, overrun or undecodable payload
    pub dropped_malformed: u64,
    /// Outside the trusted epoch
    pub dropped_epoch: u64,
    /// Addressed to another node or group
    pub dropped_filtered: u64,
    /// Unknown or unhandled message type
    pub ignored: u64,
    pub cues_prepared: u64,
    pub cues_cancelled: u64,
    pub cues_applied: u64,
    pub fires_scheduled: u64,
    /// Rejected because the fire queue was full
    pub fires_dropped: u64,
    /// Became due for a cue that was never prepared
    pub fires_unknown_cue: u64,
    pub probes_sent: u64,
    pub probes_answered: u64,
    pub probes_evicted: u64,
    pub unmatched_responses: u64,
    pub epoch_changes: u64,
    pub send_errors: u64,
}

/// Read-only snapshot of an agent
#[derive(Clone, Debug, PartialEq)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub name: String,
    pub state: SyncState,
    pub epoch: Option<EpochId>,
    pub controller: Option<SocketAddr>,
    pub offset_ms: i32,
    pub sync_method: Option<SyncMethod>,
    pub last_rtt_ms: Option<i32>,
    pub show_time_ms: u32,
    pub active_cue: Option<CueId>,
    pub effect: EffectStatus,
    pub rssi_dbm: i8,
    pub cues: usize,
    pub pending_fires: usize,
    pub probes_in_flight: usize,
    pub stats: AgentStats,
}

impl NodeStatus {
    pub fn is_synchronized(&self) -> bool {
        self.state == SyncState::Synchronized
    }
}

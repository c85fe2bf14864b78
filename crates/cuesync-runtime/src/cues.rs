//! Cue table and pending fires
//!
//! Both are fixed-capacity. A full table rejects new entries; nothing is
//! ever evicted to make room.

use std::collections::VecDeque;

use cuesync_core::{CueId, CueSyncError, CueSyncResult};
use cuesync_time::{duration, is_due};
use cuesync_wire::{CuePrepare, PatternConfig};

/// Default cue table capacity
pub const DEFAULT_CUE_CAPACITY: usize = 64;

/// Default pending fire capacity
pub const DEFAULT_FIRE_CAPACITY: usize = 64;

/// Applied fires remembered for duplicate suppression
pub const RECENT_FIRES_CAPACITY: usize = 32;

/// A prepared cue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CueEntry {
    pub cue_id: CueId,
    pub fade_in_ms: u16,
    pub fade_out_ms: u16,
    pub pattern: PatternConfig,
}

impl From<CuePrepare> for CueEntry {
    fn from(p: CuePrepare) -> Self {
        CueEntry {
            cue_id: p.cue_id,
            fade_in_ms: p.fade_in_ms,
            fade_out_ms: p.fade_out_ms,
            pattern: p.pattern,
        }
    }
}

/// Prepared cues keyed by cue id. At most one entry per id.
#[derive(Debug)]
pub struct CueTable {
    entries: Vec<CueEntry>,
    capacity: usize,
}

impl CueTable {
    pub fn new(capacity: usize) -> Self {
        CueTable {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert or overwrite the entry for `entry.cue_id`.
    ///
    /// Overwriting an existing id always succeeds, even when the table is full.
    pub fn upsert(&mut self, entry: CueEntry) -> CueSyncResult<()> {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.cue_id == entry.cue_id) {
            *existing = entry;
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(CueSyncError::CueTableFull(entry.cue_id));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Remove the entry for `cue_id`, returning it if present
    pub fn remove(&mut self, cue_id: CueId) -> Option<CueEntry> {
        let pos = self.entries.iter().position(|e| e.cue_id == cue_id)?;
        Some(self.entries.swap_remove(pos))
    }

    pub fn get(&self, cue_id: CueId) -> Option<&CueEntry> {
        self.entries.iter().find(|e| e.cue_id == cue_id)
    }

    pub fn contains(&self, cue_id: CueId) -> bool {
        self.get(cue_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A scheduled application of a cue at a show time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingFire {
    pub cue_id: CueId,
    /// Show time in ms
    pub execute_at: u32,
}

/// Pending fires in arrival order
#[derive(Debug)]
pub struct FireQueue {
    fires: Vec<PendingFire>,
    capacity: usize,
}

impl FireQueue {
    pub fn new(capacity: usize) -> Self {
        FireQueue {
            fires: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Schedule a fire.
    ///
    /// Returns `Ok(false)` when an identical fire (same cue, same time) is
    /// already pending; the retransmission is absorbed.
    pub fn push(&mut self, fire: PendingFire) -> CueSyncResult<bool> {
        if self.fires.contains(&fire) {
            return Ok(false);
        }
        if self.fires.len() >= self.capacity {
            return Err(CueSyncError::FireQueueFull(fire.cue_id));
        }
        self.fires.push(fire);
        Ok(true)
    }

    /// Drop every pending fire for `cue_id`, returning how many were removed
    pub fn remove_cue(&mut self, cue_id: CueId) -> usize {
        let before = self.fires.len();
        self.fires.retain(|f| f.cue_id != cue_id);
        before - self.fires.len()
    }

    /// Remove and return every fire due at `now_show`, most overdue first
    pub fn take_due(&mut self, now_show: u32) -> Vec<PendingFire> {
        let mut due = Vec::new();
        self.fires.retain(|f| {
            if is_due(now_show, f.execute_at) {
                due.push(*f);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|f| std::cmp::Reverse(duration(f.execute_at, now_show)));
        due
    }

    /// Milliseconds until the earliest pending fire, 0 if one is already due
    pub fn next_due_in(&self, now_show: u32) -> Option<u32> {
        self.fires
            .iter()
            .map(|f| duration(now_show, f.execute_at).max(0) as u32)
            .min()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingFire> {
        self.fires.iter()
    }

    pub fn len(&self) -> usize {
        self.fires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fires.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.fires.clear();
    }
}

/// Ring of recently applied fires.
///
/// A retransmitted CUE_FIRE can arrive after its original was applied and
/// removed from the queue; matching it here keeps it from applying again.
#[derive(Debug)]
pub struct RecentFires {
    fires: VecDeque<PendingFire>,
    capacity: usize,
}

impl RecentFires {
    pub fn new(capacity: usize) -> Self {
        RecentFires {
            fires: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Remember an applied fire, forgetting the oldest when full
    pub fn record(&mut self, fire: PendingFire) {
        if self.capacity == 0 || self.fires.contains(&fire) {
            return;
        }
        if self.fires.len() >= self.capacity {
            self.fires.pop_front();
        }
        self.fires.push_back(fire);
    }

    pub fn contains(&self, fire: &PendingFire) -> bool {
        self.fires.contains(fire)
    }

    pub fn len(&self) -> usize {
        self.fires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fires.is_empty()
    }

    pub fn clear(&mut self) {
        self.fires.clear();
    }
}

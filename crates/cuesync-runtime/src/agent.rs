//! CueSync node agent
//!
//! The agent owns every piece of node state and is free of I/O: the reactor
//! hands it datagrams and sends whatever it returns. This keeps the whole
//! synchronization and scheduling logic testable against a manual clock.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info, warn};

use cuesync_core::{CueId, CueSyncResult, EpochId, GroupId, MessageId, NodeId};
use cuesync_time::{duration, LocalClock, OffsetEstimator, ProbeTickets, RoundTripSample};
use cuesync_wire::{
    build_datagram, build_message, pack_name, split_datagram, Ack, AckStatus, CuePrepare, CueRef,
    Header, MessageType, Pong, TargetMode, TimeResp, WirePayload, STATE_RUNNING,
    STATE_TIME_SYNCED,
};

use crate::{
    AgentStats, CueApplier, CueEntry, CueTable, EffectStatus, FireQueue, NodeConfig, NodeStatus,
    PendingFire, RecentFires, SyncState, RECENT_FIRES_CAPACITY,
};

/// A datagram the agent wants sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub dest: SocketAddr,
    pub kind: MessageType,
    pub bytes: Vec<u8>,
}

/// Node-side synchronization and scheduling agent
pub struct Agent<C, A> {
    node_id: NodeId,
    name: String,
    groups: Vec<GroupId>,
    max_wait_ms: u32,
    probe_interval_ms: u32,
    probe_enabled: bool,

    clock: C,
    applier: A,

    /// Trusted controller epoch
    epoch: Option<EpochId>,
    /// Where the last beacon came from
    controller: Option<SocketAddr>,
    offset: OffsetEstimator,
    /// A probe has completed since the epoch was adopted
    round_trip_in_epoch: bool,
    last_probe_local: Option<u32>,
    next_request: MessageId,
    tickets: ProbeTickets,

    cues: CueTable,
    fires: FireQueue,
    /// Applied fires, so late retransmissions are absorbed
    recent_fires: RecentFires,
    active_cue: Option<CueId>,

    effect: EffectStatus,
    initial_effect: EffectStatus,
    rssi_dbm: i8,
    stats: AgentStats,
}

impl<C: LocalClock, A: CueApplier> Agent<C, A> {
    /// Create an unsynchronized agent
    pub fn start(config: &NodeConfig, clock: C, applier: A) -> CueSyncResult<Self> {
        config.validate()?;

        let node_id = config.resolved_node_id();
        let effect = EffectStatus::new(config.frame_ms);
        info!(node = %node_id, name = %config.wire_name(), "agent started");

        Ok(Agent {
            node_id,
            name: config.wire_name(),
            groups: config.group_ids(),
            max_wait_ms: config.max_wait_ms(),
            probe_interval_ms: config.probe_interval_ms(),
            probe_enabled: config.time_probe_enabled,
            clock,
            applier,
            epoch: None,
            controller: None,
            offset: OffsetEstimator::new(),
            round_trip_in_epoch: false,
            last_probe_local: None,
            next_request: MessageId(rand::random()),
            tickets: ProbeTickets::new(config.ticket_capacity),
            cues: CueTable::new(config.cue_capacity),
            fires: FireQueue::new(config.fire_capacity),
            recent_fires: RecentFires::new(RECENT_FIRES_CAPACITY),
            active_cue: None,
            effect,
            initial_effect: effect,
            rssi_dbm: 0,
            stats: AgentStats::default(),
        })
    }

    /// Return to Unsynchronized, dropping all cues, fires and probes
    pub fn stop(&mut self) {
        self.epoch = None;
        self.controller = None;
        self.offset.reset();
        self.round_trip_in_epoch = false;
        self.last_probe_local = None;
        self.tickets.clear();
        self.cues.clear();
        self.fires.clear();
        self.recent_fires.clear();
        self.active_cue = None;
        self.effect = self.initial_effect;
        info!(node = %self.node_id, "agent stopped");
    }

    /// Process one received datagram, returning any replies
    pub fn handle_datagram(&mut self, buf: &[u8], src: SocketAddr) -> Vec<Outbound> {
        self.stats.datagrams_in += 1;

        let (header, payload) = match split_datagram(buf) {
            Ok(parts) => parts,
            Err(e) => {
                self.stats.dropped_malformed += 1;
                debug!(%src, error = %e, "dropping malformed datagram");
                return Vec::new();
            }
        };

        let Some(kind) = header.message_type() else {
            self.stats.ignored += 1;
            debug!(%src, kind = header.kind, "ignoring unknown message type");
            return Vec::new();
        };

        // Epoch-independent
        match kind {
            MessageType::Beacon => return self.on_beacon(&header, src),
            MessageType::Ping => return vec![self.on_ping(&header, src)],
            _ => {}
        }

        if self.epoch != Some(header.epoch) {
            self.stats.dropped_epoch += 1;
            debug!(?kind, epoch = %header.epoch, "dropping message outside trusted epoch");
            return Vec::new();
        }

        match kind {
            MessageType::TimeResp => {
                self.on_time_resp(payload);
                Vec::new()
            }
            MessageType::CuePrepare => self.on_cue_prepare(&header, payload, src),
            MessageType::CueFire => {
                self.on_cue_fire(&header, payload);
                Vec::new()
            }
            MessageType::CueCancel => {
                self.on_cue_cancel(payload);
                Vec::new()
            }
            _ => {
                self.stats.ignored += 1;
                Vec::new()
            }
        }
    }

    fn on_beacon(&mut self, header: &Header, src: SocketAddr) -> Vec<Outbound> {
        if header.epoch.is_none() {
            self.stats.ignored += 1;
            debug!(%src, "ignoring beacon without epoch");
            return Vec::new();
        }

        if self.epoch != Some(header.epoch) {
            match self.epoch {
                Some(old) => info!(old = %old, new = %header.epoch, "controller epoch changed, resetting cues"),
                None => info!(epoch = %header.epoch, controller = %src, "adopted controller epoch"),
            }
            self.adopt_epoch(header.epoch);
        }
        self.controller = Some(src);

        let now = self.clock.now_ms();
        let offset = self.offset.observe_beacon(header.execute_at, now);
        debug!(
            epoch = %header.epoch,
            show_time = header.execute_at,
            offset_ms = offset,
            "beacon"
        );

        self.maybe_probe(now).into_iter().collect()
    }

    fn adopt_epoch(&mut self, epoch: EpochId) {
        self.epoch = Some(epoch);
        self.cues.clear();
        self.fires.clear();
        self.recent_fires.clear();
        self.tickets.clear();
        self.active_cue = None;
        self.round_trip_in_epoch = false;
        self.stats.epoch_changes += 1;
    }

    fn on_ping(&mut self, header: &Header, src: SocketAddr) -> Outbound {
        let mut state_flags = STATE_RUNNING;
        if self.state() == SyncState::Synchronized {
            state_flags |= STATE_TIME_SYNCED;
        }

        let pong = Pong {
            uptime_ms: self.clock.now_ms(),
            rssi_dbm: self.rssi_dbm,
            state_flags,
            brightness_pct: self.effect.brightness_pct,
            pattern_type: self.effect.pattern_type,
            frame_ms: self.effect.frame_ms,
            active_cue: self.active_cue.unwrap_or(CueId::NONE),
            controller_epoch: self.epoch.unwrap_or(EpochId::NONE),
            show_time_ms: self.show_time_now(),
            name: pack_name(&self.name),
        };
        debug!(%src, msg_id = header.msg_id.0, "pong");

        self.outbound(
            src,
            MessageType::Pong,
            build_message(self.reply_header(MessageType::Pong, header.msg_id), &pong),
        )
    }

    fn on_cue_prepare(&mut self, header: &Header, payload: &[u8], src: SocketAddr) -> Vec<Outbound> {
        if !self.is_addressed(header) {
            self.stats.dropped_filtered += 1;
            debug!(target = header.target, flags = header.flags.0, "prepare not addressed to us");
            return Vec::new();
        }

        let status = match CuePrepare::decode(payload) {
            None => {
                self.stats.dropped_malformed += 1;
                debug!(len = payload.len(), "malformed CUE_PREPARE payload");
                AckStatus::Malformed
            }
            Some(prepare) => match self.cues.upsert(CueEntry::from(prepare)) {
                Ok(()) => {
                    self.stats.cues_prepared += 1;
                    info!(
                        cue_id = prepare.cue_id.0,
                        pattern = ?prepare.pattern.kind(),
                        brightness = prepare.pattern.brightness_pct,
                        "cue prepared"
                    );
                    AckStatus::Ok
                }
                Err(e) => {
                    warn!(error = %e, "rejecting CUE_PREPARE");
                    AckStatus::TableFull
                }
            },
        };

        if !header.flags.ack_requested() {
            return Vec::new();
        }
        let ack = Ack::new(header.msg_id, status);
        vec![self.outbound(
            src,
            MessageType::Ack,
            build_message(self.reply_header(MessageType::Ack, header.msg_id), &ack),
        )]
    }

    fn on_cue_fire(&mut self, header: &Header, payload: &[u8]) {
        let Some(CueRef { cue_id }) = CueRef::decode(payload) else {
            self.stats.dropped_malformed += 1;
            debug!(len = payload.len(), "malformed CUE_FIRE payload");
            return;
        };

        let fire = PendingFire {
            cue_id,
            execute_at: header.execute_at,
        };
        if self.recent_fires.contains(&fire) {
            debug!(cue_id = cue_id.0, execute_at = fire.execute_at, "fire already applied");
            return;
        }
        match self.fires.push(fire) {
            Ok(true) => {
                self.stats.fires_scheduled += 1;
                info!(
                    cue_id = cue_id.0,
                    execute_at = fire.execute_at,
                    in_ms = duration(self.show_time_now(), fire.execute_at),
                    "cue fire scheduled"
                );
            }
            Ok(false) => debug!(cue_id = cue_id.0, execute_at = fire.execute_at, "duplicate fire"),
            Err(e) => {
                self.stats.fires_dropped += 1;
                warn!(error = %e, "dropping CUE_FIRE");
            }
        }
    }

    fn on_cue_cancel(&mut self, payload: &[u8]) {
        let Some(CueRef { cue_id }) = CueRef::decode(payload) else {
            self.stats.dropped_malformed += 1;
            debug!(len = payload.len(), "malformed CUE_CANCEL payload");
            return;
        };

        let had_cue = self.cues.remove(cue_id).is_some();
        let fires = self.fires.remove_cue(cue_id);
        if self.active_cue == Some(cue_id) {
            self.active_cue = None;
        }
        self.stats.cues_cancelled += 1;
        info!(cue_id = cue_id.0, had_cue, fires, "cue cancelled");
    }

    fn on_time_resp(&mut self, payload: &[u8]) {
        let Some(resp) = TimeResp::decode(payload) else {
            self.stats.dropped_malformed += 1;
            debug!(len = payload.len(), "malformed TIME_RESP payload");
            return;
        };

        let Some(t0_local) = self.tickets.take(resp.request) else {
            self.stats.unmatched_responses += 1;
            debug!(request = resp.request.0, "TIME_RESP without a matching request");
            return;
        };

        let sample = RoundTripSample {
            t0_local,
            controller_rx: resp.controller_rx,
            controller_tx: resp.controller_tx,
            t3_local: self.clock.now_ms(),
        };
        let estimate = self.offset.observe_round_trip(sample);
        self.round_trip_in_epoch = true;
        self.stats.probes_answered += 1;
        info!(
            rtt_ms = estimate.rtt_ms,
            one_way_ms = estimate.one_way_ms,
            offset_ms = estimate.offset_ms,
            "round-trip offset"
        );
    }

    /// Send a TIME_REQ to the controller, at most once per probe interval
    fn maybe_probe(&mut self, now: u32) -> Option<Outbound> {
        if !self.probe_enabled {
            return None;
        }
        let dest = self.controller?;
        let epoch = self.epoch?;
        if let Some(last) = self.last_probe_local {
            if duration(last, now) < self.probe_interval_ms as i32 {
                return None;
            }
        }

        self.last_probe_local = Some(now);
        self.next_request = self.next_request.next();
        let request = self.next_request;
        if self.tickets.store(request, now).is_some() {
            self.stats.probes_evicted += 1;
        }
        self.stats.probes_sent += 1;

        let mut header = self.reply_header(MessageType::TimeReq, request);
        header.epoch = epoch;
        debug!(request = request.0, %dest, "TIME_REQ");
        Some(self.outbound(dest, MessageType::TimeReq, build_datagram(header, &[])))
    }

    /// Periodic work between datagrams: retry the probe until a round trip
    /// has completed in this epoch
    pub fn housekeeping(&mut self) -> Option<Outbound> {
        if self.state() != SyncState::Synchronized || self.round_trip_in_epoch {
            return None;
        }
        let now = self.clock.now_ms();
        self.maybe_probe(now)
    }

    /// Apply every pending fire whose time has come. Returns how many fired.
    pub fn process_due_fires(&mut self) -> usize {
        if self.fires.is_empty() {
            return 0;
        }

        let now_show = self.show_time_now();
        let due = self.fires.take_due(now_show);
        let mut applied = 0;
        for fire in due {
            if self.apply_fire(fire) {
                applied += 1;
            }
        }
        applied
    }

    fn apply_fire(&mut self, fire: PendingFire) -> bool {
        let Some(entry) = self.cues.get(fire.cue_id).copied() else {
            self.stats.fires_unknown_cue += 1;
            warn!(cue_id = fire.cue_id.0, "fire for unknown cue, dropping");
            return false;
        };

        self.applier.apply(entry.cue_id, &entry.pattern);
        self.effect.pattern_type = entry.pattern.pattern_type;
        self.effect.brightness_pct = entry.pattern.brightness_pct.max(1);
        self.active_cue = Some(entry.cue_id);
        self.recent_fires.record(fire);
        self.stats.cues_applied += 1;
        info!(
            cue_id = entry.cue_id.0,
            execute_at = fire.execute_at,
            late_ms = duration(fire.execute_at, self.show_time_now()),
            "cue applied"
        );
        true
    }

    /// How long the reactor may block before the next fire is due
    pub fn next_wait(&self) -> Duration {
        let ms = match self.fires.next_due_in(self.show_time_now()) {
            Some(ms) => ms.min(self.max_wait_ms),
            None => self.max_wait_ms,
        };
        Duration::from_millis(ms as u64)
    }

    /// Local time translated to controller show time
    pub fn show_time_now(&self) -> u32 {
        self.offset.show_time(self.clock.now_ms())
    }

    pub fn state(&self) -> SyncState {
        if self.epoch.is_some() && self.offset.is_synced() {
            SyncState::Synchronized
        } else {
            SyncState::Unsynchronized
        }
    }

    /// Renderer-reported effect status, shown in PONG
    pub fn set_effect_status(&mut self, effect: EffectStatus) {
        self.effect = effect;
    }

    /// Signal strength in dBm, clamped to the wire range
    pub fn set_rssi(&mut self, rssi_dbm: i32) {
        self.rssi_dbm = rssi_dbm.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
    }

    pub fn record_send_error(&mut self) {
        self.stats.send_errors += 1;
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn epoch(&self) -> Option<EpochId> {
        self.epoch
    }

    pub fn offset_ms(&self) -> i32 {
        self.offset.offset_ms()
    }

    pub fn active_cue(&self) -> Option<CueId> {
        self.active_cue
    }

    pub fn effect(&self) -> EffectStatus {
        self.effect
    }

    pub fn cues(&self) -> &CueTable {
        &self.cues
    }

    pub fn fires(&self) -> &FireQueue {
        &self.fires
    }

    pub fn stats(&self) -> &AgentStats {
        &self.stats
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id,
            name: self.name.clone(),
            state: self.state(),
            epoch: self.epoch,
            controller: self.controller,
            offset_ms: self.offset.offset_ms(),
            sync_method: self.offset.method(),
            last_rtt_ms: self.offset.last_rtt_ms(),
            show_time_ms: self.show_time_now(),
            active_cue: self.active_cue,
            effect: self.effect,
            rssi_dbm: self.rssi_dbm,
            cues: self.cues.len(),
            pending_fires: self.fires.len(),
            probes_in_flight: self.tickets.len(),
            stats: self.stats.clone(),
        }
    }

    fn is_addressed(&self, header: &Header) -> bool {
        match header.flags.target_mode() {
            Some(TargetMode::All) => true,
            Some(TargetMode::Node) => header.target == self.node_id.0,
            Some(TargetMode::Group) => self.groups.contains(&GroupId(header.target)),
            None => false,
        }
    }

    fn reply_header(&self, kind: MessageType, msg_id: MessageId) -> Header {
        let mut header = Header::new(kind);
        header.epoch = self.epoch.unwrap_or(EpochId::NONE);
        header.msg_id = msg_id;
        header.sender = self.node_id;
        header
    }

    fn outbound(&mut self, dest: SocketAddr, kind: MessageType, bytes: Vec<u8>) -> Outbound {
        self.stats.datagrams_out += 1;
        Outbound { dest, kind, bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cuesync_time::{ManualClock, SyncMethod};
    use cuesync_wire::{HeaderFlags, PatternConfig, PatternType};
    use parking_lot::Mutex;

    type Applied = Arc<Mutex<Vec<(CueId, PatternConfig)>>>;
    type TestAgent = Agent<ManualClock, Box<dyn FnMut(CueId, &PatternConfig) + Send>>;

    fn controller() -> SocketAddr {
        "10.0.0.1:4626".parse().unwrap()
    }

    fn test_config() -> NodeConfig {
        NodeConfig {
            node_id: Some(0x0000_0A0A),
            name: "test-node".into(),
            groups: vec![5],
            ..NodeConfig::default()
        }
    }

    fn agent_with(config: NodeConfig, start_ms: u32) -> (TestAgent, ManualClock, Applied) {
        let clock = ManualClock::new(start_ms);
        let applied: Applied = Arc::default();
        let sink = Arc::clone(&applied);
        let applier: Box<dyn FnMut(CueId, &PatternConfig) + Send> =
            Box::new(move |cue, pattern: &PatternConfig| sink.lock().push((cue, *pattern)));
        let agent = Agent::start(&config, clock.clone(), applier).unwrap();
        (agent, clock, applied)
    }

    fn agent_at(start_ms: u32) -> (TestAgent, ManualClock, Applied) {
        agent_with(test_config(), start_ms)
    }

    fn header(kind: MessageType, epoch: u32, execute_at: u32) -> Header {
        let mut header = Header::new(kind);
        header.epoch = EpochId(epoch);
        header.msg_id = MessageId(77);
        header.sender = NodeId(1);
        header.execute_at = execute_at;
        header
    }

    fn beacon(epoch: u32, show_time: u32) -> Vec<u8> {
        build_datagram(header(MessageType::Beacon, epoch, show_time), &[])
    }

    fn prepare(epoch: u32, cue: u32, pattern: PatternType, ack: bool) -> Vec<u8> {
        let mut h = header(MessageType::CuePrepare, epoch, 0);
        h.flags.set_ack_requested(ack);
        build_message(
            h,
            &CuePrepare {
                cue_id: CueId(cue),
                fade_in_ms: 0,
                fade_out_ms: 0,
                pattern: PatternConfig::new(pattern, 80),
            },
        )
    }

    fn fire(epoch: u32, cue: u32, at: u32) -> Vec<u8> {
        build_message(header(MessageType::CueFire, epoch, at), &CueRef { cue_id: CueId(cue) })
    }

    fn cancel(epoch: u32, cue: u32) -> Vec<u8> {
        build_message(header(MessageType::CueCancel, epoch, 0), &CueRef { cue_id: CueId(cue) })
    }

    fn ack_status(out: &Outbound) -> AckStatus {
        let (h, payload) = split_datagram(&out.bytes).unwrap();
        assert_eq!(h.message_type(), Some(MessageType::Ack));
        Ack::decode(payload).unwrap().status().unwrap()
    }

    #[test]
    fn test_show_scenario() {
        let (mut agent, clock, applied) = agent_at(99_000);
        assert_eq!(agent.state(), SyncState::Unsynchronized);

        agent.handle_datagram(&beacon(7, 100_000), controller());
        assert_eq!(agent.state(), SyncState::Synchronized);
        assert_eq!(agent.epoch(), Some(EpochId(7)));
        assert_eq!(agent.offset_ms(), 1000);

        agent.handle_datagram(&prepare(7, 1, PatternType::Rainbow, false), controller());
        agent.handle_datagram(&fire(7, 1, 101_000), controller());
        assert_eq!(agent.fires().len(), 1);

        clock.set(99_999);
        assert_eq!(agent.process_due_fires(), 0);
        assert!(applied.lock().is_empty());

        clock.set(100_100);
        assert_eq!(agent.process_due_fires(), 1);
        assert!(agent.fires().is_empty());
        assert_eq!(agent.active_cue(), Some(CueId(1)));

        let applied = applied.lock();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, CueId(1));
        assert_eq!(applied[0].1.kind(), Some(PatternType::Rainbow));
    }

    #[test]
    fn test_fire_applies_exactly_once() {
        let (mut agent, clock, applied) = agent_at(0);
        agent.handle_datagram(&beacon(1, 10_000), controller());
        agent.handle_datagram(&prepare(1, 4, PatternType::Chase, false), controller());
        agent.handle_datagram(&fire(1, 4, 10_050), controller());
        // Retransmitted fire
        agent.handle_datagram(&fire(1, 4, 10_050), controller());

        clock.set(60);
        assert_eq!(agent.process_due_fires(), 1);
        clock.set(1_000);
        assert_eq!(agent.process_due_fires(), 0);
        assert_eq!(applied.lock().len(), 1);
    }

    #[test]
    fn test_late_retransmitted_fire_absorbed() {
        let (mut agent, clock, applied) = agent_at(0);
        agent.handle_datagram(&beacon(1, 0), controller());
        agent.handle_datagram(&prepare(1, 4, PatternType::Chase, false), controller());
        let original = fire(1, 4, 100);
        agent.handle_datagram(&original, controller());

        clock.set(100);
        assert_eq!(agent.process_due_fires(), 1);

        // Same datagram arrives after the original was applied
        clock.set(120);
        agent.handle_datagram(&original, controller());
        assert!(agent.fires().is_empty());
        assert_eq!(agent.process_due_fires(), 0);
        assert_eq!(applied.lock().len(), 1);
        assert_eq!(agent.stats().cues_applied, 1);
    }

    #[test]
    fn test_applied_fire_memory_cleared_on_epoch_change() {
        let (mut agent, clock, applied) = agent_at(0);
        agent.handle_datagram(&beacon(1, 0), controller());
        agent.handle_datagram(&prepare(1, 4, PatternType::Chase, false), controller());
        agent.handle_datagram(&fire(1, 4, 100), controller());
        clock.set(100);
        assert_eq!(agent.process_due_fires(), 1);

        // Restarted controller reuses the same cue id and show time
        agent.handle_datagram(&beacon(2, 100), controller());
        agent.handle_datagram(&prepare(2, 4, PatternType::Chase, false), controller());
        agent.handle_datagram(&fire(2, 4, 100), controller());
        assert_eq!(agent.fires().len(), 1);
        assert_eq!(agent.process_due_fires(), 1);
        assert_eq!(applied.lock().len(), 2);
    }

    #[test]
    fn test_repeated_triggers_both_apply() {
        let (mut agent, clock, applied) = agent_at(0);
        agent.handle_datagram(&beacon(1, 0), controller());
        agent.handle_datagram(&prepare(1, 4, PatternType::Chase, false), controller());
        agent.handle_datagram(&fire(1, 4, 100), controller());
        agent.handle_datagram(&fire(1, 4, 200), controller());

        clock.set(150);
        assert_eq!(agent.process_due_fires(), 1);
        clock.set(250);
        assert_eq!(agent.process_due_fires(), 1);
        assert_eq!(applied.lock().len(), 2);
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let (mut agent, _clock, _) = agent_at(0);
        agent.handle_datagram(&beacon(3, 0), controller());

        for _ in 0..3 {
            let out = agent.handle_datagram(&prepare(3, 9, PatternType::Sparkle, true), controller());
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].dest, controller());
            assert_eq!(ack_status(&out[0]), AckStatus::Ok);
        }
        assert_eq!(agent.cues().len(), 1);
    }

    #[test]
    fn test_prepare_ack_codes() {
        let config = NodeConfig {
            cue_capacity: 1,
            ..test_config()
        };
        let (mut agent, _clock, _) = agent_with(config, 0);
        agent.handle_datagram(&beacon(3, 0), controller());

        let out = agent.handle_datagram(&prepare(3, 1, PatternType::Chase, true), controller());
        assert_eq!(ack_status(&out[0]), AckStatus::Ok);

        let out = agent.handle_datagram(&prepare(3, 2, PatternType::Chase, true), controller());
        assert_eq!(ack_status(&out[0]), AckStatus::TableFull);

        let mut h = header(MessageType::CuePrepare, 3, 0);
        h.flags.set_ack_requested(true);
        let out = agent.handle_datagram(&build_datagram(h, &[0u8; 10]), controller());
        assert_eq!(ack_status(&out[0]), AckStatus::Malformed);

        // No ack unless requested
        assert!(agent
            .handle_datagram(&prepare(3, 2, PatternType::Chase, false), controller())
            .is_empty());
    }

    #[test]
    fn test_cancel_removes_cue_and_fires() {
        let (mut agent, clock, applied) = agent_at(0);
        agent.handle_datagram(&beacon(2, 0), controller());
        agent.handle_datagram(&prepare(2, 1, PatternType::Chase, false), controller());
        agent.handle_datagram(&prepare(2, 2, PatternType::Chase, false), controller());
        agent.handle_datagram(&fire(2, 1, 10), controller());
        clock.set(10);
        agent.process_due_fires();
        assert_eq!(agent.active_cue(), Some(CueId(1)));

        agent.handle_datagram(&fire(2, 1, 500), controller());
        agent.handle_datagram(&fire(2, 1, 600), controller());
        agent.handle_datagram(&fire(2, 2, 700), controller());
        agent.handle_datagram(&cancel(2, 1), controller());

        assert!(!agent.cues().contains(CueId(1)));
        assert!(agent.cues().contains(CueId(2)));
        assert!(agent.fires().iter().all(|f| f.cue_id != CueId(1)));
        assert_eq!(agent.fires().len(), 1);
        assert_eq!(agent.active_cue(), None);

        clock.set(1_000);
        agent.process_due_fires();
        assert_eq!(applied.lock().len(), 2);
        assert_eq!(agent.active_cue(), Some(CueId(2)));
    }

    #[test]
    fn test_epoch_change_resets_tables() {
        let (mut agent, clock, _) = agent_at(0);
        agent.handle_datagram(&beacon(7, 0), controller());
        agent.handle_datagram(&prepare(7, 1, PatternType::Chase, false), controller());
        agent.handle_datagram(&fire(7, 1, 0), controller());
        agent.process_due_fires();
        agent.handle_datagram(&fire(7, 1, 5_000), controller());

        clock.set(100);
        agent.handle_datagram(&beacon(8, 20_000), controller());

        assert_eq!(agent.epoch(), Some(EpochId(8)));
        assert!(agent.cues().is_empty());
        assert!(agent.fires().is_empty());
        assert_eq!(agent.active_cue(), None);
        assert_eq!(agent.offset_ms(), 19_900);
        assert_eq!(agent.stats().epoch_changes, 2);
    }

    #[test]
    fn test_messages_outside_epoch_dropped() {
        let (mut agent, _clock, _) = agent_at(0);

        // Nothing trusted before the first beacon
        agent.handle_datagram(&prepare(7, 1, PatternType::Chase, true), controller());
        assert!(agent.cues().is_empty());

        agent.handle_datagram(&beacon(7, 0), controller());
        agent.handle_datagram(&prepare(6, 1, PatternType::Chase, true), controller());
        agent.handle_datagram(&fire(9, 1, 0), controller());
        assert!(agent.cues().is_empty());
        assert!(agent.fires().is_empty());
        assert_eq!(agent.stats().dropped_epoch, 3);
    }

    #[test]
    fn test_beacon_without_epoch_ignored() {
        let (mut agent, _clock, _) = agent_at(0);
        assert!(agent.handle_datagram(&beacon(0, 5_000), controller()).is_empty());
        assert_eq!(agent.state(), SyncState::Unsynchronized);
        assert_eq!(agent.offset_ms(), 0);
    }

    #[test]
    fn test_malformed_and_unknown_dropped() {
        let (mut agent, _clock, _) = agent_at(0);
        agent.handle_datagram(&[0u8; 12], controller());

        let mut bad_magic = beacon(7, 0);
        bad_magic[0] = b'X';
        agent.handle_datagram(&bad_magic, controller());

        let mut unknown = Header::new(MessageType::Beacon);
        unknown.kind = 0x7E;
        unknown.epoch = EpochId(7);
        agent.handle_datagram(&build_datagram(unknown, &[]), controller());

        assert_eq!(agent.state(), SyncState::Unsynchronized);
        assert_eq!(agent.stats().dropped_malformed, 2);
        assert_eq!(agent.stats().ignored, 1);
    }

    #[test]
    fn test_ping_before_sync() {
        let (mut agent, _clock, _) = agent_at(1_234);
        let requester: SocketAddr = "10.0.0.9:5000".parse().unwrap();

        let out = agent.handle_datagram(&build_datagram(header(MessageType::Ping, 0, 0), &[]), requester);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dest, requester);

        let (h, payload) = split_datagram(&out[0].bytes).unwrap();
        assert_eq!(h.message_type(), Some(MessageType::Pong));
        assert_eq!(h.msg_id, MessageId(77));
        assert_eq!(h.sender, NodeId(0x0A0A));
        assert_eq!(h.epoch, EpochId::NONE);

        let pong = Pong::decode(payload).unwrap();
        assert_eq!(pong.uptime_ms, 1_234);
        assert_eq!(pong.state_flags, STATE_RUNNING);
        assert_eq!(pong.controller_epoch, EpochId::NONE);
        assert_eq!(pong.brightness_pct, 100);
        assert_eq!(pong.frame_ms, 20);
        assert_eq!(pong.name_str(), "test-node");
    }

    #[test]
    fn test_ping_after_apply() {
        let (mut agent, clock, _) = agent_at(0);
        agent.set_rssi(-300);
        agent.handle_datagram(&beacon(4, 50_000), controller());

        let mut h = header(MessageType::CuePrepare, 4, 0);
        h.flags = HeaderFlags::NONE;
        let dark = CuePrepare {
            cue_id: CueId(3),
            fade_in_ms: 0,
            fade_out_ms: 0,
            pattern: PatternConfig::new(PatternType::Breathing, 0),
        };
        agent.handle_datagram(&build_message(h, &dark), controller());
        agent.handle_datagram(&fire(4, 3, 50_010), controller());
        clock.set(10);
        agent.process_due_fires();

        let out = agent.handle_datagram(&build_datagram(header(MessageType::Ping, 0, 0), &[]), controller());
        let (h, payload) = split_datagram(&out[0].bytes).unwrap();
        let pong = Pong::decode(payload).unwrap();

        assert_eq!(h.epoch, EpochId(4));
        assert_eq!(pong.state_flags, STATE_RUNNING | STATE_TIME_SYNCED);
        assert_eq!(pong.active_cue, CueId(3));
        assert_eq!(pong.controller_epoch, EpochId(4));
        assert_eq!(pong.pattern_type, PatternType::Breathing as u8);
        assert_eq!(pong.brightness_pct, 1);
        assert_eq!(pong.rssi_dbm, i8::MIN);
        assert_eq!(pong.show_time_ms, 50_010);
    }

    #[test]
    fn test_round_trip_refines_offset() {
        let (mut agent, clock, _) = agent_at(1_000);
        let out = agent.handle_datagram(&beacon(5, 50_000), controller());
        assert_eq!(agent.offset_ms(), 49_000);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, MessageType::TimeReq);
        assert_eq!(out[0].dest, controller());
        let (req, _) = split_datagram(&out[0].bytes).unwrap();
        assert_eq!(req.epoch, EpochId(5));

        clock.set(1_040);
        let resp = TimeResp {
            request: req.msg_id,
            controller_rx: 50_010,
            controller_tx: 50_012,
        };
        agent.handle_datagram(&build_message(header(MessageType::TimeResp, 5, 0), &resp), controller());

        let status = agent.status();
        assert_eq!(status.offset_ms, 48_991);
        assert_eq!(status.sync_method, Some(SyncMethod::RoundTrip));
        assert_eq!(status.last_rtt_ms, Some(40));
        assert_eq!(status.probes_in_flight, 0);

        // Same response again has no ticket left
        agent.handle_datagram(&build_message(header(MessageType::TimeResp, 5, 0), &resp), controller());
        assert_eq!(agent.stats().unmatched_responses, 1);
        assert_eq!(agent.offset_ms(), 48_991);
    }

    #[test]
    fn test_probe_rate_limited() {
        let (mut agent, clock, _) = agent_at(0);
        assert_eq!(agent.handle_datagram(&beacon(1, 0), controller()).len(), 1);

        clock.set(499);
        assert!(agent.handle_datagram(&beacon(1, 499), controller()).is_empty());
        assert!(agent.housekeeping().is_none());

        clock.set(500);
        assert_eq!(agent.housekeeping().map(|o| o.kind), Some(MessageType::TimeReq));
        assert_eq!(agent.stats().probes_sent, 2);
    }

    #[test]
    fn test_housekeeping_stops_after_round_trip() {
        let (mut agent, clock, _) = agent_at(0);
        assert!(agent.housekeeping().is_none());

        let out = agent.handle_datagram(&beacon(1, 0), controller());
        let (req, _) = split_datagram(&out[0].bytes).unwrap();
        clock.set(20);
        let resp = TimeResp {
            request: req.msg_id,
            controller_rx: 10,
            controller_tx: 10,
        };
        agent.handle_datagram(&build_message(header(MessageType::TimeResp, 1, 0), &resp), controller());

        clock.set(5_000);
        assert!(agent.housekeeping().is_none());
    }

    #[test]
    fn test_probing_disabled() {
        let config = NodeConfig {
            time_probe_enabled: false,
            ..test_config()
        };
        let (mut agent, clock, _) = agent_with(config, 0);
        assert!(agent.handle_datagram(&beacon(1, 0), controller()).is_empty());
        clock.set(10_000);
        assert!(agent.housekeeping().is_none());
    }

    #[test]
    fn test_target_filtering() {
        let (mut agent, _clock, _) = agent_at(0);
        agent.handle_datagram(&beacon(1, 0), controller());

        let send = |agent: &mut TestAgent, mode: TargetMode, target: u32, cue: u32| {
            let mut h = header(MessageType::CuePrepare, 1, 0);
            h.flags.set_target_mode(mode);
            h.target = target;
            let p = CuePrepare {
                cue_id: CueId(cue),
                fade_in_ms: 0,
                fade_out_ms: 0,
                pattern: PatternConfig::new(PatternType::Chase, 50),
            };
            agent.handle_datagram(&build_message(h, &p), controller());
        };

        send(&mut agent, TargetMode::Node, 0x0A0A, 1);
        send(&mut agent, TargetMode::Node, 0x0B0B, 2);
        send(&mut agent, TargetMode::Group, 5, 3);
        send(&mut agent, TargetMode::Group, 6, 4);

        assert!(agent.cues().contains(CueId(1)));
        assert!(!agent.cues().contains(CueId(2)));
        assert!(agent.cues().contains(CueId(3)));
        assert!(!agent.cues().contains(CueId(4)));
        assert_eq!(agent.stats().dropped_filtered, 2);
    }

    #[test]
    fn test_fire_for_unknown_cue_dropped() {
        let (mut agent, clock, applied) = agent_at(0);
        agent.handle_datagram(&beacon(1, 0), controller());
        agent.handle_datagram(&fire(1, 42, 5), controller());

        clock.set(5);
        assert_eq!(agent.process_due_fires(), 0);
        assert!(agent.fires().is_empty());
        assert!(applied.lock().is_empty());
        assert_eq!(agent.stats().fires_unknown_cue, 1);
    }

    #[test]
    fn test_fire_queue_full() {
        let config = NodeConfig {
            fire_capacity: 2,
            ..test_config()
        };
        let (mut agent, _clock, _) = agent_with(config, 0);
        agent.handle_datagram(&beacon(1, 0), controller());
        for at in [100, 200, 300] {
            agent.handle_datagram(&fire(1, 1, at), controller());
        }
        assert_eq!(agent.fires().len(), 2);
        assert_eq!(agent.stats().fires_dropped, 1);
    }

    #[test]
    fn test_latest_due_fire_becomes_active() {
        let (mut agent, clock, applied) = agent_at(0);
        agent.handle_datagram(&beacon(1, 0), controller());
        agent.handle_datagram(&prepare(1, 1, PatternType::Chase, false), controller());
        agent.handle_datagram(&prepare(1, 2, PatternType::Rainbow, false), controller());
        agent.handle_datagram(&fire(1, 2, 300), controller());
        agent.handle_datagram(&fire(1, 1, 200), controller());

        clock.set(400);
        assert_eq!(agent.process_due_fires(), 2);
        let order: Vec<CueId> = applied.lock().iter().map(|(c, _)| *c).collect();
        assert_eq!(order, vec![CueId(1), CueId(2)]);
        assert_eq!(agent.active_cue(), Some(CueId(2)));
    }

    #[test]
    fn test_fire_across_wrap() {
        let (mut agent, clock, applied) = agent_at(0);
        agent.handle_datagram(&beacon(1, 0xFFFF_FF00), controller());
        agent.handle_datagram(&prepare(1, 1, PatternType::Chase, false), controller());
        agent.handle_datagram(&fire(1, 1, 0x0000_0010), controller());

        clock.set(0xFF);
        assert_eq!(agent.process_due_fires(), 0);
        assert_eq!(agent.next_wait(), Duration::from_millis(0x11));

        clock.set(0x110);
        assert_eq!(agent.process_due_fires(), 1);
        assert_eq!(applied.lock().len(), 1);
    }

    #[test]
    fn test_next_wait_clamped() {
        let (mut agent, clock, _) = agent_at(0);
        assert_eq!(agent.next_wait(), Duration::from_millis(500));

        agent.handle_datagram(&beacon(1, 0), controller());
        agent.handle_datagram(&fire(1, 1, 10_000), controller());
        assert_eq!(agent.next_wait(), Duration::from_millis(500));

        clock.set(9_900);
        assert_eq!(agent.next_wait(), Duration::from_millis(100));

        clock.set(10_300);
        assert_eq!(agent.next_wait(), Duration::ZERO);
    }

    #[test]
    fn test_stop_returns_to_unsynchronized() {
        let (mut agent, _clock, _) = agent_at(0);
        agent.handle_datagram(&beacon(1, 9_000), controller());
        agent.handle_datagram(&prepare(1, 1, PatternType::Chase, false), controller());
        agent.handle_datagram(&fire(1, 1, 99_000), controller());

        agent.stop();
        let status = agent.status();
        assert_eq!(status.state, SyncState::Unsynchronized);
        assert_eq!(status.epoch, None);
        assert_eq!(status.offset_ms, 0);
        assert_eq!(status.cues, 0);
        assert_eq!(status.pending_fires, 0);
        assert_eq!(status.probes_in_flight, 0);

        // A fresh beacon brings it back
        agent.handle_datagram(&beacon(1, 9_000), controller());
        assert!(agent.status().is_synchronized());
    }
}

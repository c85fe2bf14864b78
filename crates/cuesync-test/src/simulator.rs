//! Multi-node show simulator
//!
//! Runs one controller and N agents in lock-step simulated time (1 ms
//! steps). Every node has its own free-running local clock and its own
//! impaired link to and from the controller.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cuesync_core::{CueId, CueSyncResult};
use cuesync_runtime::{Agent, CueApplier, NodeConfig, NodeStatus};
use cuesync_time::{diff, LocalClock, ManualClock};
use cuesync_wire::PatternConfig;

use crate::chaos::{ChaosConfig, ChaosNetwork, ChaosStats};
use crate::controller::ControllerSim;

/// Show port used by every simulated host
pub const SIM_PORT: u16 = 4626;

/// One cue application observed on a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppliedCue {
    pub cue_id: CueId,
    pub pattern: PatternConfig,
    pub local_ms: u32,
}

/// Applier that records what it applied and when
#[derive(Clone)]
pub struct RecordingApplier {
    clock: ManualClock,
    log: Arc<Mutex<Vec<AppliedCue>>>,
}

impl RecordingApplier {
    pub fn new(clock: ManualClock) -> Self {
        RecordingApplier {
            clock,
            log: Arc::default(),
        }
    }

    pub fn applied(&self) -> Vec<AppliedCue> {
        self.log.lock().clone()
    }
}

impl CueApplier for RecordingApplier {
    fn apply(&mut self, cue_id: CueId, pattern: &PatternConfig) {
        self.log.lock().push(AppliedCue {
            cue_id,
            pattern: *pattern,
            local_ms: self.clock.now_ms(),
        });
    }
}

/// A simulated node
pub struct SimNode {
    pub addr: SocketAddr,
    pub agent: Agent<ManualClock, RecordingApplier>,
    clock: ManualClock,
    /// Local clock reading at simulation time 0
    local_start: u32,
    downlink: ChaosNetwork,
}

impl SimNode {
    pub fn status(&self) -> NodeStatus {
        self.agent.status()
    }

    pub fn local_start(&self) -> u32 {
        self.local_start
    }
}

/// A cue application translated to the controller's show clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObservedFire {
    pub cue_id: CueId,
    /// True controller show time at the moment of application
    pub show_ms: u32,
}

/// Controller plus N nodes on impaired links
pub struct ShowSimulator {
    now_ms: u64,
    controller: ControllerSim,
    nodes: Vec<SimNode>,
    uplink: ChaosNetwork,
}

impl ShowSimulator {
    /// `count` nodes with default configuration and random clock starts
    pub fn new(
        controller: ControllerSim,
        count: usize,
        chaos: ChaosConfig,
        seed: u64,
    ) -> CueSyncResult<Self> {
        let configs = (0..count)
            .map(|i| NodeConfig {
                name: format!("sim-node-{i}"),
                ..NodeConfig::default()
            })
            .collect();
        Self::with_configs(controller, configs, chaos, seed)
    }

    /// One node per config, random clock starts
    pub fn with_configs(
        controller: ControllerSim,
        configs: Vec<NodeConfig>,
        chaos: ChaosConfig,
        seed: u64,
    ) -> CueSyncResult<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let starts = configs.iter().map(|_| rng.gen()).collect();
        Self::with_clock_starts(controller, configs, starts, chaos, seed)
    }

    /// Fully specified node clocks
    pub fn with_clock_starts(
        controller: ControllerSim,
        configs: Vec<NodeConfig>,
        starts: Vec<u32>,
        chaos: ChaosConfig,
        seed: u64,
    ) -> CueSyncResult<Self> {
        let mut nodes = Vec::with_capacity(configs.len());
        for (i, (config, local_start)) in configs.iter().zip(starts).enumerate() {
            let clock = ManualClock::new(local_start);
            let applier = RecordingApplier::new(clock.clone());
            let agent = Agent::start(config, clock.clone(), applier)?;
            let host = Ipv4Addr::new(10, 0, 1 + (i / 250) as u8, 1 + (i % 250) as u8);
            nodes.push(SimNode {
                addr: SocketAddr::from((host, SIM_PORT)),
                agent,
                clock,
                local_start,
                downlink: ChaosNetwork::new(chaos.clone(), seed.wrapping_add(1 + i as u64)),
            });
        }

        Ok(ShowSimulator {
            now_ms: 0,
            controller,
            nodes,
            uplink: ChaosNetwork::new(chaos, seed.wrapping_mul(31).wrapping_add(7)),
        })
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Controller show time right now
    pub fn show_time(&self) -> u32 {
        self.controller.show_time(self.now_ms)
    }

    pub fn controller(&self) -> &ControllerSim {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ControllerSim {
        &mut self.controller
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &SimNode {
        &self.nodes[index]
    }

    /// Send to every node, each copy impaired independently
    pub fn multicast(&mut self, bytes: Vec<u8>) {
        let src = self.controller.addr();
        for node in &mut self.nodes {
            node.downlink.send(src, node.addr, bytes.clone());
        }
    }

    /// Send to one node
    pub fn unicast(&mut self, index: usize, bytes: Vec<u8>) {
        let src = self.controller.addr();
        let node = &mut self.nodes[index];
        node.downlink.send(src, node.addr, bytes);
    }

    /// Multicast a beacon stamped with the current show time
    pub fn send_beacon(&mut self) {
        let beacon = self.controller.beacon(self.now_ms);
        self.multicast(beacon);
    }

    /// Advance one millisecond
    pub fn step(&mut self) {
        self.now_ms += 1;
        let now = self.now_ms;

        // Bring every link to `now` first so all sends below are stamped `now`
        let uplink_due = self.uplink.advance_to(now);
        let mut downlink_due = Vec::with_capacity(self.nodes.len());
        for node in &mut self.nodes {
            node.clock.set(node.local_start.wrapping_add(now as u32));
            downlink_due.push(node.downlink.advance_to(now));
        }

        for packet in uplink_due {
            if packet.dest != self.controller.addr() {
                continue;
            }
            let Some(reply) = self.controller.handle(&packet.data, packet.src, now) else {
                continue;
            };
            let src = self.controller.addr();
            if let Some(node) = self.nodes.iter_mut().find(|n| n.addr == packet.src) {
                node.downlink.send(src, node.addr, reply);
            }
        }

        for (node, due) in self.nodes.iter_mut().zip(downlink_due) {
            for packet in due {
                for reply in node.agent.handle_datagram(&packet.data, packet.src) {
                    self.uplink.send(node.addr, reply.dest, reply.bytes);
                }
            }
            node.agent.process_due_fires();
            if let Some(probe) = node.agent.housekeeping() {
                self.uplink.send(node.addr, probe.dest, probe.bytes);
            }
        }
    }

    pub fn run_for(&mut self, ms: u64) {
        for _ in 0..ms {
            self.step();
        }
    }

    /// Run while beaconing every `interval_ms`, starting immediately
    pub fn run_with_beacons(&mut self, ms: u64, interval_ms: u64) {
        let end = self.now_ms + ms;
        while self.now_ms < end {
            if self.now_ms % interval_ms == 0 {
                self.send_beacon();
            }
            self.step();
        }
    }

    /// Cue applications on node `index`, mapped to controller show time
    pub fn observed_fires(&self, index: usize) -> Vec<ObservedFire> {
        let node = &self.nodes[index];
        node.agent
            .applier()
            .applied()
            .into_iter()
            .map(|a| {
                let sim_ms = a.local_ms.wrapping_sub(node.local_start);
                ObservedFire {
                    cue_id: a.cue_id,
                    show_ms: self.controller.show_time(sim_ms as u64),
                }
            })
            .collect()
    }

    /// Signed error of each node's application of `cue` against `execute_at`
    pub fn fire_errors(&self, cue: CueId, execute_at: u32) -> Vec<Vec<i32>> {
        (0..self.nodes.len())
            .map(|i| {
                self.observed_fires(i)
                    .into_iter()
                    .filter(|f| f.cue_id == cue)
                    .map(|f| diff(f.show_ms, execute_at))
                    .collect()
            })
            .collect()
    }

    pub fn uplink_stats(&self) -> &ChaosStats {
        self.uplink.stats()
    }
}

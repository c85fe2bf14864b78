//! End-to-end show scenarios
//!
//! Drives a controller and a swarm of agents through a full cue cycle:
//! - Clock synchronization from beacons and probes
//! - Prepare / fire delivery over impaired links
//! - Cue application timing across nodes

use std::net::SocketAddr;

use cuesync_core::{CueId, CueSyncResult};
use cuesync_wire::{PatternConfig, PatternType};

use crate::chaos::ChaosConfig;
use crate::controller::ControllerSim;
use crate::simulator::{ShowSimulator, SIM_PORT};

/// Controller address in every scenario
pub fn controller_addr() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], SIM_PORT))
}

/// Fire scenario parameters
#[derive(Clone, Debug)]
pub struct ShowScenario {
    pub node_count: usize,
    pub chaos: ChaosConfig,
    pub seed: u64,
    pub epoch: u32,
    /// Controller show time at simulation start
    pub show_origin: u32,
    pub beacon_interval_ms: u64,
    /// Beaconing before the first cue
    pub warmup_ms: u64,
    /// Copies of each prepare / fire the controller sends
    pub repeats: usize,
    /// Fire time ahead of the first send
    pub lead_ms: u32,
}

impl ShowScenario {
    /// Few nodes, clean link
    pub fn minimal() -> Self {
        ShowScenario {
            node_count: 3,
            chaos: ChaosConfig::perfect(3),
            seed: 1,
            epoch: 7,
            show_origin: 100_000,
            beacon_interval_ms: 250,
            warmup_ms: 1_000,
            repeats: 1,
            lead_ms: 600,
        }
    }

    /// Venue-sized swarm on a wired network
    pub fn standard() -> Self {
        ShowScenario {
            node_count: 12,
            chaos: ChaosConfig::good(),
            seed: 42,
            repeats: 3,
            ..Self::minimal()
        }
    }

    /// Loss and duplication, compensated by repeats
    pub fn lossy() -> Self {
        ShowScenario {
            node_count: 8,
            chaos: ChaosConfig::lossy(0.1, 0.2),
            seed: 2024,
            repeats: 5,
            ..Self::minimal()
        }
    }

    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    pub fn controller(&self) -> ControllerSim {
        ControllerSim::new(controller_addr(), self.epoch, self.show_origin)
    }

    pub fn simulator(&self) -> CueSyncResult<ShowSimulator> {
        ShowSimulator::new(self.controller(), self.node_count, self.chaos.clone(), self.seed)
    }
}

/// Outcome of a fire scenario
#[derive(Clone, Debug)]
pub struct ScenarioResult {
    pub cue_id: CueId,
    pub execute_at: u32,
    /// Application error per node, one entry per application
    pub errors: Vec<Vec<i32>>,
    pub synchronized: usize,
}

impl ScenarioResult {
    /// Every node applied the cue exactly once
    pub fn all_applied_once(&self) -> bool {
        self.errors.iter().all(|e| e.len() == 1)
    }

    /// Worst absolute application error
    pub fn max_abs_error_ms(&self) -> i32 {
        self.errors
            .iter()
            .flatten()
            .map(|e| e.abs())
            .max()
            .unwrap_or(0)
    }

    /// Difference between the earliest and latest node
    pub fn spread_ms(&self) -> i32 {
        let all: Vec<i32> = self.errors.iter().flatten().copied().collect();
        match (all.iter().min(), all.iter().max()) {
            (Some(min), Some(max)) => max - min,
            _ => 0,
        }
    }

    pub fn passed(&self, tolerance_ms: i32) -> bool {
        self.all_applied_once() && self.max_abs_error_ms() <= tolerance_ms
    }
}

/// Warm up, prepare and fire one cue, run past its time
pub fn run_fire_scenario(
    scenario: &ShowScenario,
) -> CueSyncResult<(ShowSimulator, ScenarioResult)> {
    let mut sim = scenario.simulator()?;
    let interval = scenario.beacon_interval_ms;
    sim.run_with_beacons(scenario.warmup_ms, interval);

    let cue = CueId(1);
    let execute_at = sim.show_time().wrapping_add(scenario.lead_ms);
    for _ in 0..scenario.repeats {
        let prepare = sim
            .controller_mut()
            .prepare(cue.0, PatternConfig::new(PatternType::Rainbow, 90), false);
        sim.multicast(prepare);
        let fire = sim.controller_mut().fire(cue.0, execute_at);
        sim.multicast(fire);
        sim.run_with_beacons(10, interval);
    }
    sim.run_with_beacons(scenario.lead_ms as u64 + 500, interval);

    let result = ScenarioResult {
        cue_id: cue,
        execute_at,
        errors: sim.fire_errors(cue, execute_at),
        synchronized: sim.nodes().iter().filter(|n| n.status().is_synchronized()).count(),
    };
    Ok((sim, result))
}

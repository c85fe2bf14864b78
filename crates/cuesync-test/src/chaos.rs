//! Lossy datagram links
//!
//! Simulates what a show network does to multicast traffic:
//! - Latency with jitter
//! - Packet loss (random and bursts)
//! - Duplication
//!
//! Reordering falls out of jitter. Everything is driven by a seeded `StdRng`
//! so a scenario replays identically.

use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Extra delay added on top of the base latency
#[derive(Clone, Debug)]
pub enum JitterDistribution {
    None,
    /// Uniform in `[min_ms, max_ms]`
    Uniform { min_ms: u32, max_ms: u32 },
    /// Heavy tail, capped at one second
    Pareto { scale_ms: f64, shape: f64 },
}

impl JitterDistribution {
    pub fn sample(&self, rng: &mut StdRng) -> u64 {
        match *self {
            JitterDistribution::None => 0,
            JitterDistribution::Uniform { min_ms, max_ms } => {
                rng.gen_range(min_ms..=max_ms.max(min_ms)) as u64
            }
            JitterDistribution::Pareto { scale_ms, shape } => {
                let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                (scale_ms / u.powf(1.0 / shape)).min(1000.0) as u64
            }
        }
    }
}

/// Link impairment settings
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    pub base_latency_ms: u64,
    pub jitter: JitterDistribution,
    /// Independent loss probability (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability that a send starts a loss burst
    pub burst_loss_prob: f64,
    /// Burst length range, in datagrams
    pub burst_length: (u32, u32),
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::good()
    }
}

impl ChaosConfig {
    /// Lossless link with a fixed delay
    pub fn perfect(latency_ms: u64) -> Self {
        ChaosConfig {
            base_latency_ms: latency_ms,
            jitter: JitterDistribution::None,
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            duplicate_prob: 0.0,
        }
    }

    /// Wired venue network
    pub fn good() -> Self {
        ChaosConfig {
            base_latency_ms: 2,
            jitter: JitterDistribution::Uniform { min_ms: 0, max_ms: 4 },
            loss_rate: 0.001,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            duplicate_prob: 0.001,
        }
    }

    /// Crowded Wi-Fi during a show
    pub fn congested() -> Self {
        ChaosConfig {
            base_latency_ms: 15,
            jitter: JitterDistribution::Pareto {
                scale_ms: 5.0,
                shape: 1.5,
            },
            loss_rate: 0.05,
            burst_loss_prob: 0.02,
            burst_length: (2, 6),
            duplicate_prob: 0.02,
        }
    }

    /// Random loss and duplication without bursts
    pub fn lossy(loss_rate: f64, duplicate_prob: f64) -> Self {
        ChaosConfig {
            base_latency_ms: 5,
            jitter: JitterDistribution::Uniform { min_ms: 0, max_ms: 10 },
            loss_rate,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            duplicate_prob,
        }
    }
}

/// A datagram in flight
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChaosPacket {
    pub src: SocketAddr,
    pub dest: SocketAddr,
    pub data: Vec<u8>,
    /// Simulation time of delivery, ms
    pub deliver_at: u64,
    pub sent_at: u64,
    pub seq: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_lost: u64,
    pub packets_duplicated: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.packets_delivered == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.packets_delivered as f64
        }
    }
}

/// One impaired link. Time is advanced explicitly by the caller.
pub struct ChaosNetwork {
    config: ChaosConfig,
    rng: StdRng,
    in_flight: Vec<ChaosPacket>,
    now_ms: u64,
    burst_remaining: u32,
    next_seq: u64,
    stats: ChaosStats,
}

impl ChaosNetwork {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosNetwork {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            now_ms: 0,
            burst_remaining: 0,
            next_seq: 0,
            stats: ChaosStats::default(),
        }
    }

    pub fn send(&mut self, src: SocketAddr, dest: SocketAddr, data: Vec<u8>) {
        self.stats.packets_sent += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.should_drop() {
            self.stats.packets_lost += 1;
            return;
        }

        let deliver_at = self.now_ms + self.sample_latency();
        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            let dup_at = self.now_ms + self.sample_latency();
            self.stats.packets_duplicated += 1;
            self.in_flight.push(ChaosPacket {
                src,
                dest,
                data: data.clone(),
                deliver_at: dup_at,
                sent_at: self.now_ms,
                seq,
            });
        }
        self.in_flight.push(ChaosPacket {
            src,
            dest,
            data,
            deliver_at,
            sent_at: self.now_ms,
            seq,
        });
    }

    fn sample_latency(&mut self) -> u64 {
        self.config.base_latency_ms + self.config.jitter.sample(&mut self.rng)
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        if self.config.burst_loss_prob > 0.0 && self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max.max(min)).saturating_sub(1);
            return true;
        }

        self.config.loss_rate > 0.0 && self.rng.gen::<f64>() < self.config.loss_rate
    }

    /// Advance to `now_ms` and return everything due, in delivery order
    pub fn advance_to(&mut self, now_ms: u64) -> Vec<ChaosPacket> {
        self.now_ms = self.now_ms.max(now_ms);

        let mut due = Vec::new();
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].deliver_at <= self.now_ms {
                due.push(self.in_flight.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|p| (p.deliver_at, p.seq));

        for packet in &due {
            let latency = packet.deliver_at - packet.sent_at;
            self.stats.packets_delivered += 1;
            self.stats.total_latency_ms += latency;
            self.stats.max_latency_ms = self.stats.max_latency_ms.max(latency);
        }
        due
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }
}

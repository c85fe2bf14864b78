//! Controller clock offset estimation
//!
//! Two independent sources feed the same offset:
//! - Beacons: zero round trip, assumes negligible one-way delay
//! - Round-trip probes: NTP-style, corrects for network latency

use crate::{diff, duration, offset_by};

/// How the current offset was obtained
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMethod {
    Beacon,
    RoundTrip,
}

/// Timestamps of one completed probe exchange
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundTripSample {
    /// Local time the request was sent
    pub t0_local: u32,
    /// Controller show time the request was received
    pub controller_rx: u32,
    /// Controller show time the response was sent
    pub controller_tx: u32,
    /// Local time the response arrived
    pub t3_local: u32,
}

/// Result of folding a probe into the estimator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundTripEstimate {
    pub rtt_ms: i32,
    pub one_way_ms: i32,
    pub offset_ms: i32,
}

impl RoundTripSample {
    /// Offset implied by this exchange
    pub fn estimate(&self) -> RoundTripEstimate {
        let rtt = duration(self.t0_local, self.t3_local);
        let processing = duration(self.controller_rx, self.controller_tx);
        let effective = rtt.saturating_sub(processing).max(0);
        let one_way = effective / 2;
        let controller_at_t3 = offset_by(self.controller_tx, one_way);

        RoundTripEstimate {
            rtt_ms: rtt,
            one_way_ms: one_way,
            offset_ms: diff(controller_at_t3, self.t3_local),
        }
    }
}

/// Offset of the controller's show clock relative to the local clock
#[derive(Clone, Debug, Default)]
pub struct OffsetEstimator {
    offset_ms: i32,
    synced: bool,
    method: Option<SyncMethod>,
    last_rtt_ms: Option<i32>,
}

impl OffsetEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse estimate from a beacon carrying the controller's show time
    pub fn observe_beacon(&mut self, controller_ms: u32, local_ms: u32) -> i32 {
        self.offset_ms = diff(controller_ms, local_ms);
        self.synced = true;
        self.method = Some(SyncMethod::Beacon);
        self.offset_ms
    }

    /// Refined estimate from a completed probe exchange
    pub fn observe_round_trip(&mut self, sample: RoundTripSample) -> RoundTripEstimate {
        let estimate = sample.estimate();
        self.offset_ms = estimate.offset_ms;
        self.synced = true;
        self.method = Some(SyncMethod::RoundTrip);
        self.last_rtt_ms = Some(estimate.rtt_ms);
        estimate
    }

    /// Local time translated to show time
    #[inline]
    pub fn show_time(&self, local_ms: u32) -> u32 {
        offset_by(local_ms, self.offset_ms)
    }

    pub fn offset_ms(&self) -> i32 {
        self.offset_ms
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn method(&self) -> Option<SyncMethod> {
        self.method
    }

    pub fn last_rtt_ms(&self) -> Option<i32> {
        self.last_rtt_ms
    }

    /// Forget everything, back to unsynchronized
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_offset() {
        let mut est = OffsetEstimator::new();
        assert!(!est.is_synced());

        assert_eq!(est.observe_beacon(100_000, 99_000), 1000);
        assert!(est.is_synced());
        assert_eq!(est.method(), Some(SyncMethod::Beacon));
        assert_eq!(est.show_time(100_100), 101_100);
    }

    #[test]
    fn test_beacon_offset_negative() {
        let mut est = OffsetEstimator::new();
        assert_eq!(est.observe_beacon(1_000, 5_000), -4000);
        assert_eq!(est.show_time(5_000), 1_000);
    }

    #[test]
    fn test_round_trip_symmetric_delay() {
        // Controller is 10_000 ms ahead, 20 ms each way, 4 ms processing
        let sample = RoundTripSample {
            t0_local: 1_000,
            controller_rx: 11_020,
            controller_tx: 11_024,
            t3_local: 1_044,
        };
        let mut est = OffsetEstimator::new();
        let result = est.observe_round_trip(sample);

        assert_eq!(result.rtt_ms, 44);
        assert_eq!(result.one_way_ms, 20);
        assert_eq!(result.offset_ms, 10_000);
        assert_eq!(est.offset_ms(), 10_000);
        assert_eq!(est.method(), Some(SyncMethod::RoundTrip));
        assert_eq!(est.last_rtt_ms(), Some(44));
    }

    #[test]
    fn test_round_trip_processing_exceeds_rtt() {
        // Bogus controller timestamps never produce a negative one-way delay
        let sample = RoundTripSample {
            t0_local: 0,
            controller_rx: 500,
            controller_tx: 600,
            t3_local: 10,
        };
        let result = sample.estimate();
        assert_eq!(result.one_way_ms, 0);
        assert_eq!(result.offset_ms, 590);
    }

    #[test]
    fn test_round_trip_across_wrap() {
        let sample = RoundTripSample {
            t0_local: 0xFFFF_FFF0,
            controller_rx: 0x0000_0100,
            controller_tx: 0x0000_0100,
            t3_local: 0x0000_0010,
        };
        let result = sample.estimate();
        assert_eq!(result.rtt_ms, 0x20);
        assert_eq!(result.one_way_ms, 0x10);
        assert_eq!(result.offset_ms, 0x100);
    }

    #[test]
    fn test_reset() {
        let mut est = OffsetEstimator::new();
        est.observe_beacon(10, 0);
        est.reset();
        assert!(!est.is_synced());
        assert_eq!(est.offset_ms(), 0);
        assert_eq!(est.method(), None);
    }
}

#![no_main]

use std::net::SocketAddr;

use cuesync_core::CueId;
use cuesync_runtime::{Agent, NodeConfig};
use cuesync_time::ManualClock;
use cuesync_wire::{PatternConfig, HEADER_SIZE};
use libfuzzer_sys::fuzz_target;

// Feeds a sequence of datagrams to one agent. The first four bytes set the
// local clock; the rest is split into chunks on a one-byte length prefix.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let start = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let clock = ManualClock::new(start);
    let config = NodeConfig {
        name: "fuzz".into(),
        ..NodeConfig::default()
    };
    let Ok(mut agent) = Agent::start(&config, clock.clone(), |_: CueId, _: &PatternConfig| {}) else {
        return;
    };
    let src: SocketAddr = SocketAddr::from(([10, 0, 0, 1], 4626));

    let mut rest = &data[4..];
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize + HEADER_SIZE).min(tail.len());
        let (datagram, next) = tail.split_at(len);
        for reply in agent.handle_datagram(datagram, src) {
            assert!(!reply.bytes.is_empty());
        }
        clock.advance(len as u32);
        agent.process_due_fires();
        let _ = agent.housekeeping();
        assert!(agent.fires().len() <= agent.fires().capacity());
        assert!(agent.cues().len() <= agent.cues().capacity());
        rest = next;
    }
});

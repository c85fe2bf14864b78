//! Show controller simulator
//!
//! Builds controller-side datagrams and answers time probes. The
//! controller's show clock is a pure function of simulation time.

use std::net::SocketAddr;

use cuesync_core::{CueId, EpochId, MessageId, NodeId};
use cuesync_wire::{
    build_datagram, build_message, split_datagram, Ack, CuePrepare, CueRef, Header, MessageType,
    PatternConfig, Pong, TargetMode, TimeResp, WirePayload,
};

/// Controller node id used in headers
pub const CONTROLLER_ID: NodeId = NodeId(0xC0C0_0001);

/// Simulated show controller
#[derive(Debug)]
pub struct ControllerSim {
    addr: SocketAddr,
    epoch: EpochId,
    /// Show time at simulation time 0
    show_origin: u32,
    next_msg: MessageId,
    acks: Vec<(SocketAddr, Ack)>,
    pongs: Vec<(SocketAddr, Header, Pong)>,
    time_requests: u64,
}

impl ControllerSim {
    pub fn new(addr: SocketAddr, epoch: u32, show_origin: u32) -> Self {
        ControllerSim {
            addr,
            epoch: EpochId(epoch),
            show_origin,
            next_msg: MessageId(0),
            acks: Vec::new(),
            pongs: Vec::new(),
            time_requests: 0,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn epoch(&self) -> EpochId {
        self.epoch
    }

    /// Controller show time at simulation time `sim_ms`
    pub fn show_time(&self, sim_ms: u64) -> u32 {
        self.show_origin.wrapping_add(sim_ms as u32)
    }

    /// Simulate a controller restart: new epoch, show clock continues
    pub fn restart(&mut self, epoch: u32) {
        self.epoch = EpochId(epoch);
    }

    fn header(&mut self, kind: MessageType) -> Header {
        self.next_msg = self.next_msg.next();
        let mut header = Header::new(kind);
        header.epoch = self.epoch;
        header.msg_id = self.next_msg;
        header.sender = CONTROLLER_ID;
        header
    }

    pub fn beacon(&mut self, sim_ms: u64) -> Vec<u8> {
        let mut header = self.header(MessageType::Beacon);
        header.execute_at = self.show_time(sim_ms);
        build_datagram(header, &[])
    }

    pub fn prepare(&mut self, cue: u32, pattern: PatternConfig, ack: bool) -> Vec<u8> {
        self.prepare_targeted(cue, pattern, TargetMode::All, 0, ack)
    }

    pub fn prepare_targeted(
        &mut self,
        cue: u32,
        pattern: PatternConfig,
        mode: TargetMode,
        target: u32,
        ack: bool,
    ) -> Vec<u8> {
        let mut header = self.header(MessageType::CuePrepare);
        header.flags.set_target_mode(mode);
        header.flags.set_ack_requested(ack);
        header.target = target;
        let payload = CuePrepare {
            cue_id: CueId(cue),
            fade_in_ms: 0,
            fade_out_ms: 0,
            pattern,
        };
        build_message(header, &payload)
    }

    /// Fire `cue` at show time `execute_at`
    pub fn fire(&mut self, cue: u32, execute_at: u32) -> Vec<u8> {
        let mut header = self.header(MessageType::CueFire);
        header.execute_at = execute_at;
        build_message(header, &CueRef { cue_id: CueId(cue) })
    }

    pub fn cancel(&mut self, cue: u32) -> Vec<u8> {
        let header = self.header(MessageType::CueCancel);
        build_message(header, &CueRef { cue_id: CueId(cue) })
    }

    pub fn ping(&mut self) -> Vec<u8> {
        let header = self.header(MessageType::Ping);
        build_datagram(header, &[])
    }

    /// Handle a datagram from a node. Returns a TIME_RESP for TIME_REQ.
    pub fn handle(&mut self, bytes: &[u8], src: SocketAddr, sim_ms: u64) -> Option<Vec<u8>> {
        let (header, payload) = split_datagram(bytes).ok()?;
        match header.message_type()? {
            MessageType::TimeReq => {
                self.time_requests += 1;
                let now = self.show_time(sim_ms);
                let resp = TimeResp {
                    request: header.msg_id,
                    controller_rx: now,
                    controller_tx: now,
                };
                let mut reply = self.header(MessageType::TimeResp);
                reply.target = header.sender.0;
                reply.flags.set_target_mode(TargetMode::Node);
                Some(build_message(reply, &resp))
            }
            MessageType::Ack => {
                self.acks.push((src, Ack::decode(payload)?));
                None
            }
            MessageType::Pong => {
                self.pongs.push((src, header, Pong::decode(payload)?));
                None
            }
            _ => None,
        }
    }

    pub fn acks(&self) -> &[(SocketAddr, Ack)] {
        &self.acks
    }

    pub fn pongs(&self) -> &[(SocketAddr, Header, Pong)] {
        &self.pongs
    }

    pub fn clear_replies(&mut self) {
        self.acks.clear();
        self.pongs.clear();
    }

    pub fn time_requests(&self) -> u64 {
        self.time_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuesync_wire::PatternType;

    fn sim() -> ControllerSim {
        ControllerSim::new("10.0.0.1:4626".parse().unwrap(), 7, 100_000)
    }

    #[test]
    fn test_beacon_carries_show_time() {
        let mut controller = sim();
        let (header, _) = split_datagram(&controller.beacon(250)).unwrap();
        assert_eq!(header.message_type(), Some(MessageType::Beacon));
        assert_eq!(header.epoch, EpochId(7));
        assert_eq!(header.execute_at, 100_250);
        assert_eq!(header.sender, CONTROLLER_ID);
    }

    #[test]
    fn test_message_ids_increase() {
        let mut controller = sim();
        let a = split_datagram(&controller.ping()).unwrap().0.msg_id;
        let b = split_datagram(&controller.cancel(1)).unwrap().0.msg_id;
        assert_eq!(b, a.next());
    }

    #[test]
    fn test_answers_time_request() {
        let mut controller = sim();
        let mut req = Header::new(MessageType::TimeReq);
        req.epoch = EpochId(7);
        req.msg_id = MessageId(4242);
        req.sender = NodeId(9);
        let node: SocketAddr = "10.0.1.1:4626".parse().unwrap();

        let reply = controller
            .handle(&build_datagram(req, &[]), node, 40)
            .unwrap();
        let (header, payload) = split_datagram(&reply).unwrap();
        let resp = TimeResp::decode(payload).unwrap();

        assert_eq!(header.target, 9);
        assert_eq!(resp.request, MessageId(4242));
        assert_eq!(resp.controller_rx, 100_040);
        assert_eq!(controller.time_requests(), 1);
    }

    #[test]
    fn test_prepare_flags() {
        let mut controller = sim();
        let bytes = controller.prepare_targeted(
            3,
            PatternConfig::new(PatternType::Chase, 50),
            TargetMode::Group,
            12,
            true,
        );
        let (header, payload) = split_datagram(&bytes).unwrap();
        assert_eq!(header.flags.target_mode(), Some(TargetMode::Group));
        assert!(header.flags.ack_requested());
        assert_eq!(header.target, 12);
        assert_eq!(CuePrepare::decode(payload).unwrap().cue_id, CueId(3));
    }
}

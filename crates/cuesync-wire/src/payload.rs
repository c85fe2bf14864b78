//! Fixed-size message payloads
//!
//! Decoders return `None` when the slice is shorter than the payload size;
//! trailing bytes beyond the size are ignored.

use bytes::{Buf, BufMut};

use cuesync_core::{CueId, EpochId, MessageId};

/// A fixed-layout payload
pub trait WirePayload: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Parse from the front of `buf`
    fn decode(buf: &[u8]) -> Option<Self>;

    /// Append exactly `SIZE` bytes
    fn encode_to<B: BufMut>(&self, out: &mut B);

    fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.encode_to(&mut out);
        out
    }
}

/// Known pattern types. The pattern blob itself is opaque to the agent;
/// this is only for logging and telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PatternType {
    Off = 0,
    Rainbow = 1,
    Chase = 2,
    Breathing = 3,
    Sparkle = 4,
}

impl PatternType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PatternType::Off),
            1 => Some(PatternType::Rainbow),
            2 => Some(PatternType::Chase),
            3 => Some(PatternType::Breathing),
            4 => Some(PatternType::Sparkle),
            _ => None,
        }
    }
}

/// Pattern configuration (20 bytes), interpreted only by the renderer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatternConfig {
    pub pattern_type: u8,
    pub brightness_pct: u8,
    pub flags: u8,
    pub reserved: u8,
    pub seed: u32,
    pub data: [u8; 12],
}

impl PatternConfig {
    pub fn new(pattern: PatternType, brightness_pct: u8) -> Self {
        PatternConfig {
            pattern_type: pattern as u8,
            brightness_pct,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> Option<PatternType> {
        PatternType::from_byte(self.pattern_type)
    }
}

impl WirePayload for PatternConfig {
    const SIZE: usize = 20;

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut cur = buf;
        let pattern_type = cur.get_u8();
        let brightness_pct = cur.get_u8();
        let flags = cur.get_u8();
        let reserved = cur.get_u8();
        let seed = cur.get_u32_le();
        let mut data = [0u8; 12];
        cur.copy_to_slice(&mut data);
        Some(PatternConfig {
            pattern_type,
            brightness_pct,
            flags,
            reserved,
            seed,
            data,
        })
    }

    fn encode_to<B: BufMut>(&self, out: &mut B) {
        out.put_u8(self.pattern_type);
        out.put_u8(self.brightness_pct);
        out.put_u8(self.flags);
        out.put_u8(self.reserved);
        out.put_u32_le(self.seed);
        out.put_slice(&self.data);
    }
}

/// CUE_PREPARE payload (28 bytes)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CuePrepare {
    pub cue_id: CueId,
    pub fade_in_ms: u16,
    pub fade_out_ms: u16,
    pub pattern: PatternConfig,
}

impl WirePayload for CuePrepare {
    const SIZE: usize = 8 + PatternConfig::SIZE;

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut cur = buf;
        let cue_id = CueId(cur.get_u32_le());
        let fade_in_ms = cur.get_u16_le();
        let fade_out_ms = cur.get_u16_le();
        let pattern = PatternConfig::decode(cur)?;
        Some(CuePrepare {
            cue_id,
            fade_in_ms,
            fade_out_ms,
            pattern,
        })
    }

    fn encode_to<B: BufMut>(&self, out: &mut B) {
        out.put_u32_le(self.cue_id.0);
        out.put_u16_le(self.fade_in_ms);
        out.put_u16_le(self.fade_out_ms);
        self.pattern.encode_to(out);
    }
}

/// CUE_FIRE and CUE_CANCEL payload (4 bytes)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CueRef {
    pub cue_id: CueId,
}

impl WirePayload for CueRef {
    const SIZE: usize = 4;

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut cur = buf;
        Some(CueRef {
            cue_id: CueId(cur.get_u32_le()),
        })
    }

    fn encode_to<B: BufMut>(&self, out: &mut B) {
        out.put_u32_le(self.cue_id.0);
    }
}

/// Length of the node name carried in PONG
pub const NODE_NAME_LEN: usize = 16;

/// PONG state flag: agent running
pub const STATE_RUNNING: u8 = 0x01;
/// PONG state flag: show time synchronized
pub const STATE_TIME_SYNCED: u8 = 0x04;

/// PONG payload (43 bytes; the last 5 are zero)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pong {
    pub uptime_ms: u32,
    pub rssi_dbm: i8,
    pub state_flags: u8,
    pub brightness_pct: u8,
    pub pattern_type: u8,
    pub frame_ms: u16,
    pub active_cue: CueId,
    pub controller_epoch: EpochId,
    pub show_time_ms: u32,
    /// Zero-padded node name
    pub name: [u8; NODE_NAME_LEN],
}

impl Pong {
    /// Name with trailing zero padding stripped
    pub fn name_str(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NODE_NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

/// Pack a name into the fixed field, truncating at 16 bytes
pub fn pack_name(name: &str) -> [u8; NODE_NAME_LEN] {
    let mut out = [0u8; NODE_NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(NODE_NAME_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

impl WirePayload for Pong {
    const SIZE: usize = 43;

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut cur = buf;
        let uptime_ms = cur.get_u32_le();
        let rssi_dbm = cur.get_i8();
        let state_flags = cur.get_u8();
        let brightness_pct = cur.get_u8();
        let pattern_type = cur.get_u8();
        let frame_ms = cur.get_u16_le();
        let active_cue = CueId(cur.get_u32_le());
        let controller_epoch = EpochId(cur.get_u32_le());
        let show_time_ms = cur.get_u32_le();
        let mut name = [0u8; NODE_NAME_LEN];
        cur.copy_to_slice(&mut name);
        Some(Pong {
            uptime_ms,
            rssi_dbm,
            state_flags,
            brightness_pct,
            pattern_type,
            frame_ms,
            active_cue,
            controller_epoch,
            show_time_ms,
            name,
        })
    }

    fn encode_to<B: BufMut>(&self, out: &mut B) {
        out.put_u32_le(self.uptime_ms);
        out.put_i8(self.rssi_dbm);
        out.put_u8(self.state_flags);
        out.put_u8(self.brightness_pct);
        out.put_u8(self.pattern_type);
        out.put_u16_le(self.frame_ms);
        out.put_u32_le(self.active_cue.0);
        out.put_u32_le(self.controller_epoch.0);
        out.put_u32_le(self.show_time_ms);
        out.put_slice(&self.name);
        out.put_bytes(0, 5);
    }
}

/// ACK status codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum AckStatus {
    Ok = 0,
    Malformed = 1,
    TableFull = 2,
}

impl AckStatus {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(AckStatus::Ok),
            1 => Some(AckStatus::Malformed),
            2 => Some(AckStatus::TableFull),
            _ => None,
        }
    }
}

/// ACK payload (8 bytes)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ack {
    pub ack_for: MessageId,
    pub code: u16,
    pub reserved: u16,
}

impl Ack {
    pub fn new(ack_for: MessageId, status: AckStatus) -> Self {
        Ack {
            ack_for,
            code: status as u16,
            reserved: 0,
        }
    }

    pub fn status(&self) -> Option<AckStatus> {
        AckStatus::from_code(self.code)
    }
}

impl WirePayload for Ack {
    const SIZE: usize = 8;

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut cur = buf;
        Some(Ack {
            ack_for: MessageId(cur.get_u32_le()),
            code: cur.get_u16_le(),
            reserved: cur.get_u16_le(),
        })
    }

    fn encode_to<B: BufMut>(&self, out: &mut B) {
        out.put_u32_le(self.ack_for.0);
        out.put_u16_le(self.code);
        out.put_u16_le(self.reserved);
    }
}

/// TIME_RESP payload (12 bytes)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeResp {
    /// Message id of the TIME_REQ being answered
    pub request: MessageId,
    /// Controller show time when the request arrived
    pub controller_rx: u32,
    /// Controller show time when the response left
    pub controller_tx: u32,
}

impl WirePayload for TimeResp {
    const SIZE: usize = 12;

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut cur = buf;
        Some(TimeResp {
            request: MessageId(cur.get_u32_le()),
            controller_rx: cur.get_u32_le(),
            controller_tx: cur.get_u32_le(),
        })
    }

    fn encode_to<B: BufMut>(&self, out: &mut B) {
        out.put_u32_le(self.request.0);
        out.put_u32_le(self.controller_rx);
        out.put_u32_le(self.controller_tx);
    }
}

//! Fixed header for CueSync wire protocol
//!
//! Fixed header is 32 bytes:
//! - Bytes 0-3: Magic "MLED"
//! - Byte 4: Version
//! - Byte 5: Message type
//! - Byte 6: Flags
//! - Byte 7: Header length
//! - Bytes 8-11: Epoch ID (LE)
//! - Bytes 12-15: Message ID (LE)
//! - Bytes 16-19: Sender ID (LE)
//! - Bytes 20-23: Target (LE)
//! - Bytes 24-27: Execute-at, controller show time in ms (LE)
//! - Bytes 28-29: Payload length (LE)
//! - Bytes 30-31: Reserved

use bytes::{Buf, BufMut};

use cuesync_core::{CueSyncError, CueSyncResult, EpochId, MessageId, NodeId};

use crate::HeaderFlags;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Protocol magic
pub const MAGIC: [u8; 4] = *b"MLED";

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Message types. Unknown values are carried on the header as raw bytes
/// and ignored by receivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Beacon = 0x01,
    Hello = 0x02,
    TimeReq = 0x03,
    TimeResp = 0x04,
    CuePrepare = 0x10,
    CueFire = 0x11,
    CueCancel = 0x12,
    Ping = 0x20,
    Pong = 0x21,
    Ack = 0x22,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MessageType::Beacon),
            0x02 => Some(MessageType::Hello),
            0x03 => Some(MessageType::TimeReq),
            0x04 => Some(MessageType::TimeResp),
            0x10 => Some(MessageType::CuePrepare),
            0x11 => Some(MessageType::CueFire),
            0x12 => Some(MessageType::CueCancel),
            0x20 => Some(MessageType::Ping),
            0x21 => Some(MessageType::Pong),
            0x22 => Some(MessageType::Ack),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Fixed header structure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u8,
    /// Raw message type byte
    pub kind: u8,
    pub flags: HeaderFlags,
    /// Declared header length
    pub header_len: u8,
    /// Controller epoch the message belongs to
    pub epoch: EpochId,
    pub msg_id: MessageId,
    pub sender: NodeId,
    /// Node or group id, interpreted per target mode
    pub target: u32,
    /// Controller show time in ms
    pub execute_at: u32,
    pub payload_len: u16,
    pub reserved: u16,
}

impl Header {
    /// Create a header for `kind` with magic, version and length filled in
    pub fn new(kind: MessageType) -> Self {
        Header {
            magic: MAGIC,
            version: WIRE_VERSION,
            kind: kind.to_byte(),
            flags: HeaderFlags::NONE,
            header_len: HEADER_SIZE as u8,
            epoch: EpochId::NONE,
            msg_id: MessageId::default(),
            sender: NodeId::ZERO,
            target: 0,
            execute_at: 0,
            payload_len: 0,
            reserved: 0,
        }
    }

    /// Known message type, `None` for types this node does not understand
    #[inline]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_byte(self.kind)
    }

    /// Check magic, version and header length against this implementation
    pub fn validate(&self) -> bool {
        self.magic == MAGIC && self.version == WIRE_VERSION && self.header_len as usize == HEADER_SIZE
    }

    /// Parse header from bytes. Does not validate.
    pub fn decode(buf: &[u8]) -> CueSyncResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CueSyncError::BufferTooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut cur = &buf[..HEADER_SIZE];
        let mut magic = [0u8; 4];
        cur.copy_to_slice(&mut magic);

        Ok(Header {
            magic,
            version: cur.get_u8(),
            kind: cur.get_u8(),
            flags: HeaderFlags::new(cur.get_u8()),
            header_len: cur.get_u8(),
            epoch: EpochId(cur.get_u32_le()),
            msg_id: MessageId(cur.get_u32_le()),
            sender: NodeId(cur.get_u32_le()),
            target: cur.get_u32_le(),
            execute_at: cur.get_u32_le(),
            payload_len: cur.get_u16_le(),
            reserved: cur.get_u16_le(),
        })
    }

    /// Serialize header into exactly `HEADER_SIZE` bytes
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut w = &mut out[..];
        w.put_slice(&self.magic);
        w.put_u8(self.version);
        w.put_u8(self.kind);
        w.put_u8(self.flags.0);
        w.put_u8(self.header_len);
        w.put_u32_le(self.epoch.0);
        w.put_u32_le(self.msg_id.0);
        w.put_u32_le(self.sender.0);
        w.put_u32_le(self.target);
        w.put_u32_le(self.execute_at);
        w.put_u16_le(self.payload_len);
        w.put_u16_le(self.reserved);
        out
    }
}

/// Parse a header; fails only when `buf` is shorter than the header
pub fn decode_header(buf: &[u8]) -> CueSyncResult<Header> {
    Header::decode(buf)
}

/// Serialize a header into exactly `HEADER_SIZE` bytes
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Check a decoded header; callers discard the message on `false`
pub fn validate(header: &Header) -> bool {
    header.validate()
}

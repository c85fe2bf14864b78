//! Identity types for CueSync
//!
//! Every identifier on the wire is a little-endian `u32`.

use std::fmt;

/// Node identity - stable per device, derived from its name unless configured
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ZERO: NodeId = NodeId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    /// Derive a node id from a name with 32-bit FNV-1a.
    ///
    /// Zero is reserved for "unaddressed", so a zero hash maps to 1.
    pub fn from_name(name: &[u8]) -> Self {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in name {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
        if hash == 0 {
            hash = 1;
        }
        NodeId(hash)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({:08x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Controller epoch - changes whenever the controller restarts.
/// Zero means "no epoch".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EpochId(pub u32);

impl EpochId {
    pub const NONE: EpochId = EpochId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        EpochId(id)
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identity - correlates requests with replies
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageId(pub u32);

impl MessageId {
    #[inline]
    pub fn new(id: u32) -> Self {
        MessageId(id)
    }

    /// Next id in sequence, skipping zero on wrap
    #[inline]
    pub fn next(self) -> Self {
        match self.0.wrapping_add(1) {
            0 => MessageId(1),
            n => MessageId(n),
        }
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({})", self.0)
    }
}

/// Cue identity - assigned by the controller, stable for the cue's lifetime
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct CueId(pub u32);

impl CueId {
    /// Sentinel used for "no active cue"
    pub const NONE: CueId = CueId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        CueId(id)
    }
}

impl fmt::Debug for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cue({})", self.0)
    }
}

impl fmt::Display for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cue#{}", self.0)
    }
}

/// Group identity for group-targeted messages
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct GroupId(pub u32);

//! Header flags for CueSync wire protocol

/// Who a message is addressed to (flag bits 0-1)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TargetMode {
    /// Every node
    All = 0,
    /// The node whose id equals the header target
    Node = 1,
    /// Nodes belonging to the group in the header target
    Group = 2,
}

impl TargetMode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(TargetMode::All),
            1 => Some(TargetMode::Node),
            2 => Some(TargetMode::Group),
            _ => None,
        }
    }
}

/// Header flags (1 byte)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeaderFlags(pub u8);

impl HeaderFlags {
    pub const NONE: HeaderFlags = HeaderFlags(0);

    // Flag bits
    pub const TARGET_MODE_MASK: u8 = 0b0000_0011;
    pub const ACK_REQUESTED: u8 = 0b0000_0100;

    #[inline]
    pub fn new(bits: u8) -> Self {
        HeaderFlags(bits)
    }

    /// Target mode, `None` for the unassigned value 3
    #[inline]
    pub fn target_mode(self) -> Option<TargetMode> {
        TargetMode::from_bits(self.0 & Self::TARGET_MODE_MASK)
    }

    #[inline]
    pub fn set_target_mode(&mut self, mode: TargetMode) {
        self.0 = (self.0 & !Self::TARGET_MODE_MASK) | mode as u8;
    }

    #[inline]
    pub fn ack_requested(self) -> bool {
        self.0 & Self::ACK_REQUESTED != 0
    }

    #[inline]
    pub fn set_ack_requested(&mut self, value: bool) {
        if value {
            self.0 |= Self::ACK_REQUESTED;
        } else {
            self.0 &= !Self::ACK_REQUESTED;
        }
    }
}

impl From<u8> for HeaderFlags {
    fn from(bits: u8) -> Self {
        HeaderFlags(bits)
    }
}

impl From<HeaderFlags> for u8 {
    fn from(flags: HeaderFlags) -> Self {
        flags.0
    }
}

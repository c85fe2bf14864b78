//! In-flight time probe tickets
//!
//! A ticket remembers when a TIME_REQ left so the matching TIME_RESP can be
//! turned into a round-trip sample. Tickets are never expired by age; the
//! table is bounded and the oldest ticket makes room for a new probe.

use cuesync_core::MessageId;

/// Default number of concurrent probes
pub const DEFAULT_TICKET_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Ticket {
    request: MessageId,
    t0_local: u32,
    /// Insertion order, for eviction
    order: u64,
}

/// Fixed-capacity table of outstanding probes
#[derive(Debug)]
pub struct ProbeTickets {
    slots: Vec<Option<Ticket>>,
    inserted: u64,
}

impl ProbeTickets {
    pub fn new(capacity: usize) -> Self {
        ProbeTickets {
            slots: vec![None; capacity.max(1)],
            inserted: 0,
        }
    }

    /// Record a probe. Returns the request id that was evicted to make room,
    /// if the table was full.
    pub fn store(&mut self, request: MessageId, t0_local: u32) -> Option<MessageId> {
        let ticket = Ticket {
            request,
            t0_local,
            order: self.inserted,
        };
        self.inserted += 1;

        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(ticket);
            return None;
        }

        let oldest = self
            .slots
            .iter_mut()
            .min_by_key(|s| s.map(|t| t.order).unwrap_or(u64::MAX))?;
        let evicted = oldest.replace(ticket).map(|t| t.request);
        if let Some(id) = evicted {
            tracing::debug!(request = id.0, "probe table full, evicted oldest ticket");
        }
        evicted
    }

    /// Consume the ticket for `request`, returning its send time
    pub fn take(&mut self, request: MessageId) -> Option<u32> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some(t) if t.request == request))?;
        slot.take().map(|t| t.t0_local)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}

impl Default for ProbeTickets {
    fn default() -> Self {
        Self::new(DEFAULT_TICKET_CAPACITY)
    }
}

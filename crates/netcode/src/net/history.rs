use std::time::Duration;

use super::protocol::{Packet, Snapshot};
use super::sequence::sequence_greater_than;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Decides whether a predicted state matches the authoritative one.
pub trait Reconcile {
    fn agrees_with(&self, other: &Self, tolerance: f32) -> bool;
}

impl Reconcile for Snapshot {
    fn agrees_with(&self, other: &Self, tolerance: f32) -> bool {
        self.position.abs_diff_eq(other.position, tolerance)
            && self.orientation.abs_diff_eq(other.orientation, tolerance)
    }
}

/// Ring of the last `capacity` snapshots, slot `seqno % capacity`.
///
/// A slot may hold a snapshot for a different seqno (evicted or never written). Lookups check
/// the stored seqno and treat a mismatch as absent.
#[derive(Debug, Clone)]
pub struct SnapshotHistory<S> {
    slots: Vec<Option<Packet<S>>>,
    seqno: u32,
    recorded: bool,
    time_since_last_ack: Duration,
    tolerance: f32,
}

impl<S> Default for SnapshotHistory<S> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl<S> SnapshotHistory<S> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            seqno: 0,
            recorded: false,
            time_since_last_ack: Duration::ZERO,
            tolerance: 0.0,
        }
    }

    pub fn with_initial(capacity: usize, initial: Packet<S>) -> Self {
        let mut history = Self::new(capacity);
        history.record(initial);
        history
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    fn index(&self, seqno: u32) -> usize {
        seqno as usize % self.slots.len()
    }

    pub fn record(&mut self, packet: Packet<S>) {
        self.time_since_last_ack = Duration::ZERO;
        if !self.recorded || sequence_greater_than(packet.seqno, self.seqno) {
            self.seqno = packet.seqno;
            self.recorded = true;
        }
        let index = self.index(packet.seqno);
        self.slots[index] = Some(packet);
    }

    pub fn get(&self, seqno: u32) -> Option<&Packet<S>> {
        match &self.slots[self.index(seqno)] {
            Some(packet) if packet.seqno == seqno => Some(packet),
            Some(packet) => {
                log::debug!(
                    "Seqnos don't match: wanted {}, slot holds {}",
                    seqno,
                    packet.seqno
                );
                None
            }
            None => {
                log::debug!("No snapshot recorded for seqno {}", seqno);
                None
            }
        }
    }

    /// The snapshot at the high-water seqno, if it is still in its slot.
    pub fn latest(&self) -> Option<&Packet<S>> {
        if !self.recorded {
            return None;
        }
        self.get(self.seqno)
    }

    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    pub fn is_empty(&self) -> bool {
        !self.recorded
    }

    /// True when `seqno` is older than the highest one recorded.
    pub fn is_stale(&self, seqno: u32) -> bool {
        self.recorded && sequence_greater_than(self.seqno, seqno)
    }

    pub fn time_since_last_ack(&self) -> Duration {
        self.time_since_last_ack
    }

    pub fn advance_ack_timer(&mut self, dt: Duration) {
        self.time_since_last_ack = self.time_since_last_ack.saturating_add(dt);
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.seqno = 0;
        self.recorded = false;
        self.time_since_last_ack = Duration::ZERO;
    }
}

impl<S: Reconcile + Clone> SnapshotHistory<S> {
    /// Compares the authoritative packet with the prediction recorded under the same seqno.
    ///
    /// Returns true when they agree. Otherwise the authoritative packet replaces the local slot
    /// and the caller must snap its entity to it. A missing or evicted prediction never agrees.
    pub fn reconcile(&mut self, authoritative: &Packet<S>) -> bool {
        let agrees = self
            .get(authoritative.seqno)
            .is_some_and(|predicted| {
                predicted
                    .payload
                    .agrees_with(&authoritative.payload, self.tolerance)
            });

        if !agrees {
            let index = self.index(authoritative.seqno);
            self.slots[index] = Some(authoritative.clone());
        }
        agrees
    }
}

//! Lamport clock and the queue of chats that arrived too early.
//!
//! A room shares one counter. Every chat is stamped with the sender's
//! counter, and a receiver only delivers a chat once its own counter has
//! caught up with the stamp. This gives one total order per room. It is
//! not a vector clock: a chat that never arrives holds back everything
//! queued behind it.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LogicalClock
// ---------------------------------------------------------------------------

/// The local Lamport counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalClock {
    /// Just joined an existing room; waiting for the first chat to learn
    /// where the room's counter is.
    Unsynced,
    /// Synchronised at this value.
    At(u64),
}

/// What to do with an incoming chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Deliver now. The clock has already been advanced.
    Deliver,
    /// The stamp is ahead of the clock; hold it back.
    Defer,
}

impl LogicalClock {
    /// A clock for a fresh room, starting at zero.
    pub fn new() -> Self {
        Self::At(0)
    }

    /// The current value, or `None` while unsynced.
    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Unsynced => None,
            Self::At(t) => Some(*t),
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Self::At(_))
    }

    /// Returns the stamp for an outgoing chat and advances the clock.
    ///
    /// While unsynced the stamp is 0 and the clock stays unsynced, so
    /// the first chat observed from the room still sets it.
    pub fn stamp(&mut self) -> u64 {
        match self {
            Self::Unsynced => 0,
            Self::At(t) => {
                let stamp = *t;
                *t = t.saturating_add(1);
                stamp
            }
        }
    }

    /// Advances the clock by one after a delivery. No-op while unsynced.
    /// Saturates at `u64::MAX`.
    pub fn advance(&mut self) {
        if let Self::At(t) = self {
            *t = t.saturating_add(1);
        }
    }

    /// Decides what to do with a chat stamped `timestamp`.
    ///
    /// An unsynced clock first adopts the stamp, so the first chat a
    /// joiner sees is always delivered.
    pub fn observe(&mut self, timestamp: u64) -> Arrival {
        let now = match *self {
            Self::Unsynced => {
                *self = Self::At(timestamp);
                timestamp
            }
            Self::At(t) => t,
        };
        if timestamp > now {
            Arrival::Defer
        } else {
            self.advance();
            Arrival::Deliver
        }
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsynced => f.write_str("unsynced"),
            Self::At(t) => write!(f, "{t}"),
        }
    }
}

// ---------------------------------------------------------------------------
// PendingDeliveryQueue
// ---------------------------------------------------------------------------

struct Pending<T> {
    timestamp: u64,
    /// Arrival order; breaks ties between equal stamps.
    seq: u64,
    item: T,
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.seq == other.seq
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, self.seq).cmp(&(other.timestamp, other.seq))
    }
}

/// Min-queue of deferred chats keyed by their stamp.
pub struct PendingDeliveryQueue<T> {
    heap: BinaryHeap<Reverse<Pending<T>>>,
    next_seq: u64,
}

impl<T> PendingDeliveryQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, timestamp: u64, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Pending {
            timestamp,
            seq,
            item,
        }));
    }

    /// The smallest queued stamp.
    pub fn peek_timestamp(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(p)| p.timestamp)
    }

    /// Pops every entry the clock has caught up with, advancing the clock
    /// once per entry. Returned in delivery order.
    pub fn drain_ready(&mut self, clock: &mut LogicalClock) -> Vec<(u64, T)> {
        let mut ready = Vec::new();
        while let (Some(now), Some(next)) = (clock.value(), self.peek_timestamp()) {
            if next > now {
                break;
            }
            let Some(Reverse(p)) = self.heap.pop() else {
                break;
            };
            clock.advance();
            ready.push((p.timestamp, p.item));
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<T> Default for PendingDeliveryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PendingDeliveryQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDeliveryQueue")
            .field("len", &self.heap.len())
            .field("next", &self.peek_timestamp())
            .finish()
    }
}

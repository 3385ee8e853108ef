//! Bounded inbound queue shared between the I/O side and the tick.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::lobby::PeerId;
use crate::protocol::frame_is_critical;

/// One unit of inbound work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A frame from a lobby member.
    Frame {
        /// Sender.
        from: PeerId,
        /// Raw frame bytes.
        bytes: Vec<u8>,
        /// Header critical flag, read without decoding.
        critical: bool,
    },
    /// The transport saw a member leave.
    PeerDisconnected(PeerId),
    /// The lobby no longer exists.
    SessionDestroyed,
}

impl Inbound {
    /// Builds a frame entry, reading the critical flag from its header.
    #[must_use]
    pub fn frame(from: PeerId, bytes: Vec<u8>) -> Self {
        let critical = frame_is_critical(&bytes);
        Self::Frame { from, bytes, critical }
    }

    /// Membership and teardown notices are always critical.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        match self {
            Self::Frame { critical, .. } => *critical,
            Self::PeerDisconnected(_) | Self::SessionDestroyed => true,
        }
    }
}

/// Queue counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries accepted.
    pub accepted: u64,
    /// Queued non-critical entries evicted to make room.
    pub evicted: u64,
    /// Incoming non-critical entries refused because only critical ones were queued.
    pub refused: u64,
    /// Largest length observed.
    pub high_water: usize,
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Inbound>,
    capacity: usize,
    stats: QueueStats,
}

/// Bounded multi-producer queue drained once per tick.
///
/// When full, the oldest non-critical entry is evicted. Critical entries are
/// always accepted, so the queue can exceed its capacity when flooded with
/// spawns, despawns and leaves.
#[derive(Clone, Debug)]
pub struct InboundQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl InboundQueue {
    /// Creates a queue holding up to `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                stats: QueueStats::default(),
            })),
        }
    }

    /// Pushes an entry. Returns false if it was refused.
    pub fn push(&self, item: Inbound) -> bool {
        let mut inner = self.inner.lock();
        if inner.items.len() >= inner.capacity {
            if let Some(victim) = inner.items.iter().position(|i| !i.is_critical()) {
                inner.items.remove(victim);
                inner.stats.evicted += 1;
            } else if !item.is_critical() {
                inner.stats.refused += 1;
                return false;
            }
        }
        inner.items.push_back(item);
        inner.stats.accepted += 1;
        inner.stats.high_water = inner.stats.high_water.max(inner.items.len());
        true
    }

    /// Pushes a raw frame from `from`.
    pub fn push_frame(&self, from: PeerId, bytes: Vec<u8>) -> bool {
        self.push(Inbound::frame(from, bytes))
    }

    /// Takes everything queued so far.
    #[must_use]
    pub fn drain(&self) -> Vec<Inbound> {
        self.inner.lock().items.drain(..).collect()
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8, critical: bool) -> Inbound {
        Inbound::Frame { from: PeerId(1), bytes: vec![n], critical }
    }

    #[test]
    fn test_overflow_evicts_oldest_non_critical() {
        let queue = InboundQueue::new(3);
        assert!(queue.push(frame(0, true)));
        assert!(queue.push(frame(1, false)));
        assert!(queue.push(frame(2, false)));
        assert!(queue.push(frame(3, false)));

        let drained = queue.drain();
        assert_eq!(drained, vec![frame(0, true), frame(2, false), frame(3, false)]);
        assert_eq!(queue.stats().evicted, 1);
    }

    #[test]
    fn test_critical_never_dropped() {
        let queue = InboundQueue::new(2);
        assert!(queue.push(frame(0, true)));
        assert!(queue.push(Inbound::PeerDisconnected(PeerId(4))));
        assert!(!queue.push(frame(1, false)));
        assert!(queue.push(frame(2, true)));
        assert!(queue.push(Inbound::SessionDestroyed));

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.stats().refused, 1);
        assert_eq!(queue.stats().high_water, 4);
    }

    #[test]
    fn test_critical_push_still_evicts_when_possible() {
        let queue = InboundQueue::new(2);
        queue.push(frame(0, false));
        queue.push(frame(1, true));
        queue.push(frame(2, true));
        assert_eq!(queue.drain(), vec![frame(1, true), frame(2, true)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shared_between_threads() {
        let queue = InboundQueue::new(1024);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..100u8 {
                producer.push(frame(i, true));
            }
        });
        handle.join().unwrap();
        assert_eq!(queue.drain().len(), 100);
    }
}

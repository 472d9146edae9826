//! Per-worker abort-backoff scheduler.
//!
//! A naive abort buffer is a fixed array scanned linearly every
//! iteration, both to find a ready entry and to find the minimum
//! ready-time when none is ready. This replaces that scan with a
//! fixed-capacity min-heap ordered by ready-time: insert is O(log n) and
//! "is anything ready / what's the minimum" is O(1).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

struct Entry<Q> {
    ready_at: Instant,
    started_at: Instant,
    query: Q,
}

impl<Q> PartialEq for Entry<Q> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}
impl<Q> Eq for Entry<Q> {}
impl<Q> PartialOrd for Entry<Q> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl<Q> Ord for Entry<Q> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest ready-time first.
        other.ready_at.cmp(&self.ready_at)
    }
}

/// Bounded retry queue for aborted queries, ordered by ready-time.
pub struct AbortBuffer<Q> {
    capacity: usize,
    heap: BinaryHeap<Entry<Q>>,
}

impl<Q> AbortBuffer<Q> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedule `query` for a retry after `penalty`, remembering its
    /// original `started_at` so end-to-end latency still measures from
    /// the first attempt.
    pub fn push(&mut self, query: Q, started_at: Instant, penalty: Duration) {
        debug_assert!(!self.is_full(), "abort buffer push on a full buffer");
        self.heap.push(Entry {
            ready_at: Instant::now() + penalty,
            started_at,
            query,
        });
    }

    /// Pop the earliest-ready entry if its ready-time has passed.
    pub fn take_ready(&mut self, now: Instant) -> Option<(Q, Instant)> {
        if self.heap.peek()?.ready_at > now {
            return None;
        }
        let entry = self.heap.pop().expect("peek just confirmed a head");
        Some((entry.query, entry.started_at))
    }

    /// The ready-time of the entry the worker should next wake up for,
    /// used to bound the sleep when the buffer is full and nothing is
    /// ready yet.
    #[must_use]
    pub fn earliest_ready_at(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.ready_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_has_nothing_ready() {
        let mut buf = AbortBuffer::<u32>::new(4);
        assert!(buf.take_ready(Instant::now()).is_none());
        assert!(buf.earliest_ready_at().is_none());
    }

    #[test]
    fn entry_not_ready_until_penalty_elapses() {
        let mut buf = AbortBuffer::new(4);
        buf.push(1u32, Instant::now(), Duration::from_millis(50));
        assert!(buf.take_ready(Instant::now()).is_none());
        assert!(buf.take_ready(Instant::now() + Duration::from_millis(60)).is_some());
    }

    #[test]
    fn pops_earliest_ready_time_first() {
        let mut buf = AbortBuffer::new(4);
        let start = Instant::now();
        buf.push(1u32, start, Duration::from_millis(30));
        buf.push(2u32, start, Duration::from_millis(10));
        buf.push(3u32, start, Duration::from_millis(20));
        let far_future = Instant::now() + Duration::from_millis(100);
        let (first, _) = buf.take_ready(far_future).unwrap();
        let (second, _) = buf.take_ready(far_future).unwrap();
        let (third, _) = buf.take_ready(far_future).unwrap();
        assert_eq!((first, second, third), (2, 3, 1));
    }

    #[test]
    fn capacity_is_respected_by_is_full() {
        let mut buf = AbortBuffer::new(2);
        buf.push(1u32, Instant::now(), Duration::ZERO);
        assert!(!buf.is_full());
        buf.push(2u32, Instant::now(), Duration::ZERO);
        assert!(buf.is_full());
    }
}

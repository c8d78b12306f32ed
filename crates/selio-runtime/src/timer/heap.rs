//! Binary-heap timer backend
//!
//! Min-heap by deadline with lazy cancellation: cancelled handles go into
//! a set and are skipped at poll time, so cancel stays O(1) instead of
//! O(n) heap surgery. The set is emptied whenever the heap drains.

use std::collections::{BinaryHeap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use super::{TimerBackend, TimerEntry, TimerHandle};

/// Wrapper for heap ordering (earliest deadline first)
struct HeapSlot(TimerEntry);

impl PartialEq for HeapSlot {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl Eq for HeapSlot {}

impl PartialOrd for HeapSlot {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapSlot {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed for a min-heap; tie-break on handle for determinism.
        match other.0.deadline.cmp(&self.0.deadline) {
            std::cmp::Ordering::Equal => other.0.handle.0.cmp(&self.0.handle.0),
            ord => ord,
        }
    }
}

struct HeapInner {
    heap: BinaryHeap<HeapSlot>,
    cancelled: HashSet<TimerHandle>,
}

/// Binary-heap timer backend, thread-safe via a short-held mutex
pub struct DeadlineHeap {
    inner: Mutex<HeapInner>,
}

impl DeadlineHeap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HeapInner {
                heap: BinaryHeap::with_capacity(64),
                cancelled: HashSet::new(),
            }),
        }
    }
}

impl Default for DeadlineHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for DeadlineHeap {
    fn insert(&self, entry: TimerEntry) -> TimerHandle {
        let handle = entry.handle;
        let mut inner = self.inner.lock().unwrap();
        inner.heap.push(HeapSlot(entry));
        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled.insert(handle)
    }

    fn poll_expired(&self, now: Instant) -> Vec<TimerEntry> {
        let mut inner = self.inner.lock().unwrap();
        let mut expired = Vec::new();

        while let Some(slot) = inner.heap.peek() {
            if slot.0.deadline > now {
                break; // heap is ordered, nothing further is due
            }
            let entry = inner.heap.pop().unwrap().0;
            if inner.cancelled.remove(&entry.handle) {
                continue;
            }
            expired.push(entry);
        }

        if inner.heap.is_empty() {
            inner.cancelled.clear();
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner.heap.peek().map(|slot| slot.0.deadline)
    }

    fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.heap.len().saturating_sub(inner.cancelled.len())
    }

    fn name(&self) -> &'static str {
        "deadline_heap"
    }
}

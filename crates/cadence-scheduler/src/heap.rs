//! Indexed min-heap of delayed items, ordered by ready time.
//!
//! Every entry's position is tracked by key so a pending entry can be found
//! and moved earlier in O(log n).

use std::collections::HashMap;

use tokio::time::Instant;

use crate::queue::WorkItem;

/// An item waiting to become visible in the FIFO.
#[derive(Debug)]
pub(crate) struct DelayedEntry<T> {
    pub item: T,
    pub ready_at: Instant,
}

/// What `DelayHeap::insert` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insertion {
    /// New key, new entry.
    Pushed,
    /// Key was pending; its ready time moved earlier.
    Advanced,
    /// Key was pending with an earlier or equal ready time.
    Unchanged,
}

pub(crate) struct DelayHeap<T: WorkItem> {
    entries: Vec<DelayedEntry<T>>,
    positions: HashMap<T::Key, usize>,
}

impl<T: WorkItem> DelayHeap<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ready time of the earliest entry.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.entries.first().map(|entry| entry.ready_at)
    }

    /// Ready time of the pending entry for `key`, if any.
    #[cfg(test)]
    pub fn ready_at(&self, key: &T::Key) -> Option<Instant> {
        self.positions.get(key).map(|&pos| self.entries[pos].ready_at)
    }

    /// Schedule `item` at `ready_at`, keeping the earliest time when the key
    /// is already pending. The pending item itself is kept.
    pub fn insert(&mut self, item: T, ready_at: Instant) -> Insertion {
        let key = item.key();
        if let Some(&pos) = self.positions.get(&key) {
            if ready_at < self.entries[pos].ready_at {
                self.entries[pos].ready_at = ready_at;
                self.sift_up(pos);
                return Insertion::Advanced;
            }
            return Insertion::Unchanged;
        }

        let pos = self.entries.len();
        self.entries.push(DelayedEntry { item, ready_at });
        self.positions.insert(key, pos);
        self.sift_up(pos);
        Insertion::Pushed
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_ready(&mut self, now: Instant) -> Option<DelayedEntry<T>> {
        match self.next_ready_at() {
            Some(ready_at) if ready_at <= now => self.pop(),
            _ => None,
        }
    }

    pub fn pop(&mut self) -> Option<DelayedEntry<T>> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.swap(0, last);
        let entry = self.entries.pop()?;
        self.positions.remove(&entry.item.key());
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(entry)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].item.key(), a);
        self.positions.insert(self.entries[b].item.key(), b);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.entries[pos].ready_at >= self.entries[parent].ready_at {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;

            if left < len && self.entries[left].ready_at < self.entries[smallest].ready_at {
                smallest = left;
            }
            if right < len && self.entries[right].ready_at < self.entries[smallest].ready_at {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        key: u8,
        tag: &'static str,
    }

    impl WorkItem for Item {
        type Key = u8;

        fn key(&self) -> u8 {
            self.key
        }
    }

    fn item(key: u8) -> Item {
        Item { key, tag: "first" }
    }

    #[test]
    fn test_pops_in_ready_order() {
        let base = Instant::now();
        let mut heap = DelayHeap::new();
        heap.insert(item(1), base + Duration::from_millis(30));
        heap.insert(item(2), base + Duration::from_millis(10));
        heap.insert(item(3), base + Duration::from_millis(20));

        let order: Vec<u8> = std::iter::from_fn(|| heap.pop())
            .map(|entry| entry.item.key)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_pending_key_keeps_earliest() {
        let base = Instant::now();
        let mut heap = DelayHeap::new();

        assert_eq!(
            heap.insert(item(1), base + Duration::from_millis(50)),
            Insertion::Pushed
        );
        assert_eq!(
            heap.insert(item(1), base + Duration::from_millis(10)),
            Insertion::Advanced
        );
        assert_eq!(
            heap.insert(item(1), base + Duration::from_millis(40)),
            Insertion::Unchanged
        );

        assert_eq!(heap.len(), 1);
        assert_eq!(heap.ready_at(&1), Some(base + Duration::from_millis(10)));
    }

    #[test]
    fn test_pending_item_is_not_replaced() {
        let base = Instant::now();
        let mut heap = DelayHeap::new();
        heap.insert(item(1), base + Duration::from_millis(50));
        heap.insert(
            Item {
                key: 1,
                tag: "second",
            },
            base + Duration::from_millis(10),
        );

        let entry = heap.pop().unwrap();
        assert_eq!(entry.item.tag, "first");
    }

    #[test]
    fn test_pop_ready_respects_now() {
        let base = Instant::now();
        let mut heap = DelayHeap::new();
        heap.insert(item(1), base + Duration::from_millis(10));
        heap.insert(item(2), base + Duration::from_millis(20));

        assert!(heap.pop_ready(base).is_none());
        let first = heap.pop_ready(base + Duration::from_millis(15)).unwrap();
        assert_eq!(first.item.key, 1);
        assert!(heap.pop_ready(base + Duration::from_millis(15)).is_none());
        assert_eq!(heap.next_ready_at(), Some(base + Duration::from_millis(20)));
        assert!(heap.ready_at(&1).is_none());
    }

    proptest! {
        // Popping yields non-decreasing ready times, one entry per key, each at
        // the minimum time requested for that key.
        #[test]
        fn heap_orders_and_dedups(requests in prop::collection::vec((0u8..16, 0u64..1000), 1..200)) {
            let base = Instant::now();
            let mut heap = DelayHeap::new();
            let mut expected: HashMap<u8, Instant> = HashMap::new();

            for (key, offset) in &requests {
                let ready_at = base + Duration::from_millis(*offset);
                heap.insert(item(*key), ready_at);
                expected
                    .entry(*key)
                    .and_modify(|at| *at = (*at).min(ready_at))
                    .or_insert(ready_at);
            }

            prop_assert_eq!(heap.len(), expected.len());

            let mut last = base;
            let mut seen = HashMap::new();
            while let Some(entry) = heap.pop() {
                prop_assert!(entry.ready_at >= last);
                last = entry.ready_at;
                prop_assert!(seen.insert(entry.item.key, entry.ready_at).is_none());
            }
            prop_assert_eq!(seen, expected);
        }
    }
}

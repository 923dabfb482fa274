//! Indexed binary min-heap
//!
//! An array-backed min-heap plus a map from key to heap position, so that the
//! minimum can be evicted in O(log n) and any member can be re-scored or
//! removed without a linear scan. Used for both the local RC set and the RC
//! list of a negotiating node.
//!
//! Ordering is by score ascending. Among equal scores the most recently
//! admitted entry is the minimum, so the entry that was admitted first keeps
//! its slot when a tie has to be broken.
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Clone, Debug)]
struct Slot<K> {
    key: K,
    score: u64,
    // admission order, never changes while the key stays in the heap
    seq: u64,
}

impl<K> Slot<K> {
    fn precedes(&self, other: &Slot<K>) -> bool {
        self.score < other.score || (self.score == other.score && self.seq > other.seq)
    }
}

#[derive(Clone, Debug)]
pub struct IndexedMinHeap<K> {
    slots: Vec<Slot<K>>,
    positions: HashMap<K, usize>,
    next_seq: u64,
}

impl<K: Clone + Eq + Hash> Default for IndexedMinHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash> IndexedMinHeap<K> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            positions: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn score(&self, key: &K) -> Option<u64> {
        self.positions.get(key).map(|&i| self.slots[i].score)
    }

    /// Smallest entry without removing it
    pub fn peek_min(&self) -> Option<(&K, u64)> {
        self.slots.first().map(|slot| (&slot.key, slot.score))
    }

    /// Insert `key`, or re-score it if it is already present.
    /// Returns the previous score when the key was present.
    pub fn push(&mut self, key: K, score: u64) -> Option<u64> {
        if self.contains(&key) {
            return self.update(&key, score);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let idx = self.slots.len();
        self.positions.insert(key.clone(), idx);
        self.slots.push(Slot { key, score, seq });
        self.sift_up(idx);
        None
    }

    pub fn pop_min(&mut self) -> Option<(K, u64)> {
        if self.slots.is_empty() {
            return None;
        }
        let slot = self.remove_at(0);
        Some((slot.key, slot.score))
    }

    pub fn remove(&mut self, key: &K) -> Option<u64> {
        let idx = *self.positions.get(key)?;
        Some(self.remove_at(idx).score)
    }

    /// Change the score of a present key, keeping its admission order.
    pub fn update(&mut self, key: &K, score: u64) -> Option<u64> {
        let idx = *self.positions.get(key)?;
        let old = self.slots[idx].score;
        self.slots[idx].score = score;
        if score < old {
            self.sift_up(idx);
        } else if score > old {
            self.sift_down(idx);
        }
        Some(old)
    }

    /// Push `key` then pop the minimum as one step. The heap size does not
    /// change; the returned entry is either the previous minimum or `key`
    /// itself when it would have been the new minimum.
    pub fn push_pop_min(&mut self, key: K, score: u64) -> (K, u64) {
        if self.contains(&key) {
            self.update(&key, score);
            // present key means the size already accounts for it
            return match self.pop_min() {
                Some(min) => min,
                None => (key, score),
            };
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let incoming = Slot { key, score, seq };
        match self.slots.first() {
            Some(root) if root.precedes(&incoming) => {}
            _ => return (incoming.key, incoming.score),
        }

        self.positions.insert(incoming.key.clone(), 0);
        let evicted = std::mem::replace(&mut self.slots[0], incoming);
        self.positions.remove(&evicted.key);
        self.sift_down(0);
        (evicted.key, evicted.score)
    }

    /// Entries in heap order (not sorted)
    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.slots.iter().map(|slot| (&slot.key, slot.score))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.slots.iter().map(|slot| &slot.key)
    }

    /// Entries by score descending; ties keep admission order
    pub fn sorted_desc(&self) -> Vec<(K, u64)> {
        let mut slots: Vec<&Slot<K>> = self.slots.iter().collect();
        slots.sort_by(|a, b| b.score.cmp(&a.score).then(a.seq.cmp(&b.seq)));
        slots
            .into_iter()
            .map(|slot| (slot.key.clone(), slot.score))
            .collect()
    }

    fn remove_at(&mut self, idx: usize) -> Slot<K> {
        let last = self.slots.len() - 1;
        self.swap(idx, last);
        let slot = match self.slots.pop() {
            Some(slot) => slot,
            None => unreachable!("remove_at on an empty heap"),
        };
        self.positions.remove(&slot.key);
        if idx < self.slots.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        slot
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.slots.swap(a, b);
        self.positions.insert(self.slots[a].key.clone(), a);
        self.positions.insert(self.slots[b].key.clone(), b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.slots[idx].precedes(&self.slots[parent]) {
                self.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.slots.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && self.slots[left].precedes(&self.slots[smallest]) {
                smallest = left;
            }
            if right < len && self.slots[right].precedes(&self.slots[smallest]) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(heap: &mut IndexedMinHeap<u32>) -> Vec<(u32, u64)> {
        let mut out = Vec::new();
        while let Some(entry) = heap.pop_min() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_pop_order() {
        let mut heap = IndexedMinHeap::new();
        for (key, score) in [(1, 50), (2, 10), (3, 40), (4, 20), (5, 30)] {
            heap.push(key, score);
        }
        assert_eq!(heap.len(), 5);
        assert_eq!(heap.peek_min(), Some((&2, 10)));
        assert_eq!(
            drain(&mut heap),
            vec![(2, 10), (4, 20), (5, 30), (3, 40), (1, 50)]
        );
        assert!(heap.is_empty());
    }

    #[test]
    fn test_ties_evict_latest_admission_first() {
        let mut heap = IndexedMinHeap::new();
        heap.push(1, 10);
        heap.push(2, 10);
        heap.push(3, 10);
        assert_eq!(heap.pop_min(), Some((3, 10)));
        assert_eq!(heap.pop_min(), Some((2, 10)));
        assert_eq!(heap.pop_min(), Some((1, 10)));
    }

    #[test]
    fn test_remove_and_update_keep_index_consistent() {
        let mut heap = IndexedMinHeap::new();
        for key in 0..10u32 {
            heap.push(key, u64::from(key) * 10);
        }
        assert_eq!(heap.remove(&4), Some(40));
        assert_eq!(heap.remove(&4), None);
        assert_eq!(heap.update(&9, 5), Some(90));
        assert_eq!(heap.update(&0, 100), Some(0));
        assert_eq!(heap.score(&9), Some(5));
        assert!(!heap.contains(&4));

        let order: Vec<u32> = drain(&mut heap).into_iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec![9, 1, 2, 3, 5, 6, 7, 8, 0]);
    }

    #[test]
    fn test_push_existing_key_rescores() {
        let mut heap = IndexedMinHeap::new();
        heap.push(1, 10);
        heap.push(2, 20);
        assert_eq!(heap.push(1, 30), Some(10));
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.peek_min(), Some((&2, 20)));
    }

    #[test]
    fn test_push_pop_min() {
        let mut heap = IndexedMinHeap::new();
        heap.push(1, 10);
        heap.push(2, 20);

        // Newcomer smaller than the minimum comes straight back out
        assert_eq!(heap.push_pop_min(3, 5), (3, 5));
        // Equal score: the newcomer is the later admission and loses
        assert_eq!(heap.push_pop_min(4, 10), (4, 10));
        // Larger newcomer replaces the minimum
        assert_eq!(heap.push_pop_min(5, 15), (1, 10));
        assert_eq!(heap.len(), 2);
        assert!(heap.contains(&5));
        assert!(!heap.contains(&1));
        assert_eq!(heap.peek_min(), Some((&5, 15)));
    }

    #[test]
    fn test_sorted_desc() {
        let mut heap = IndexedMinHeap::new();
        heap.push("a", 3);
        heap.push("b", 7);
        heap.push("c", 3);
        assert_eq!(heap.sorted_desc(), vec![("b", 7), ("a", 3), ("c", 3)]);
    }
}

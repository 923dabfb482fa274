//! Bounded recency window over endpoint accesses
//!
//! Entries are kept oldest first. When the window is full, touching a new id
//! evicts exactly one entry, the oldest. What a re-touch of a present id does
//! is set by [`RecencyPolicy`]:
//!
//! * `FirstSeen`: the entry stays where it is, so the window evicts in arrival
//!   order. With N=3, touches `[1, 2, 3, 1, 4]` leave `[2, 3, 4]`.
//! * `MostRecent`: the entry moves to the newest end (classic LRU). The same
//!   touches leave `[3, 1, 4]`.
use std::collections::VecDeque;

use super::EndpointId;
use crate::settings::RecencyPolicy;

const CELL_WIDTH: usize = 6;

#[derive(Clone, Debug)]
pub struct RecencyTracker {
    capacity: usize,
    policy: RecencyPolicy,
    entries: VecDeque<EndpointId>,
    // position of the restartable pass
    cursor: usize,
}

impl RecencyTracker {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, RecencyPolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: RecencyPolicy) -> Self {
        Self {
            capacity,
            policy,
            entries: VecDeque::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> RecencyPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &EndpointId) -> bool {
        self.entries.contains(id)
    }

    pub fn touch(&mut self, id: EndpointId) {
        if self.capacity == 0 {
            return;
        }
        if let Some(pos) = self.entries.iter().position(|entry| *entry == id) {
            if self.policy == RecencyPolicy::MostRecent {
                self.entries.remove(pos);
                self.entries.push_back(id);
            }
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(id);
    }

    /// Contents, oldest first
    pub fn snapshot(&self) -> Vec<EndpointId> {
        self.entries.iter().copied().collect()
    }

    /// Next id of the current pass. Past the last entry this returns `None`
    /// once and rewinds, so the following call starts a new pass.
    pub fn next_id(&mut self) -> Option<EndpointId> {
        match self.entries.get(self.cursor) {
            Some(&id) => {
                self.cursor += 1;
                Some(id)
            }
            None => {
                self.cursor = 0;
                None
            }
        }
    }

    /// Lazy iterator over one pass, continuing from the current position
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor { tracker: self }
    }

    /// Drop `id` from the window, keeping the current pass position
    pub fn remove(&mut self, id: &EndpointId) -> bool {
        let Some(pos) = self.entries.iter().position(|entry| entry == id) else {
            return false;
        };
        self.entries.remove(pos);
        if pos < self.cursor {
            self.cursor -= 1;
        }
        true
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Box drawing of the window, newest on the left
    pub fn render(&self) -> String {
        let border = format!(
            "     +{}",
            format!("{}+", "-".repeat(CELL_WIDTH)).repeat(self.capacity)
        );
        let cells: String = self
            .entries
            .iter()
            .rev()
            .map(|id| format!("{:^width$}|", id.to_string(), width = CELL_WIDTH))
            .collect();
        format!("{}\n --> |{} -->\n{}", border, cells, border)
    }
}

impl std::fmt::Display for RecencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

pub struct Cursor<'a> {
    tracker: &'a mut RecencyTracker,
}

impl Iterator for Cursor<'_> {
    type Item = EndpointId;

    fn next(&mut self) -> Option<Self::Item> {
        self.tracker.next_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<EndpointId> {
        raw.iter().copied().map(EndpointId::new).collect()
    }

    fn touch_all(tracker: &mut RecencyTracker, raw: &[u64]) {
        for &id in raw {
            tracker.touch(EndpointId::new(id));
        }
    }

    #[test]
    fn test_first_seen_trace() {
        let mut tracker = RecencyTracker::new(3);
        touch_all(&mut tracker, &[1, 2, 3, 1, 4]);
        assert_eq!(tracker.snapshot(), ids(&[2, 3, 4]));
    }

    #[test]
    fn test_most_recent_trace() {
        let mut tracker = RecencyTracker::with_policy(3, RecencyPolicy::MostRecent);
        touch_all(&mut tracker, &[1, 2, 3, 1, 4]);
        assert_eq!(tracker.snapshot(), ids(&[3, 1, 4]));
    }

    #[test]
    fn test_no_duplicates_and_bounded() {
        let mut tracker = RecencyTracker::new(4);
        touch_all(&mut tracker, &[5, 5, 6, 5, 7, 8, 9, 9, 10]);
        assert_eq!(tracker.len(), 4);
        assert_eq!(tracker.snapshot(), ids(&[7, 8, 9, 10]));
    }

    #[test]
    fn test_cursor_restarts() {
        let mut tracker = RecencyTracker::new(3);
        touch_all(&mut tracker, &[1, 2]);

        let first: Vec<EndpointId> = tracker.cursor().collect();
        let second: Vec<EndpointId> = tracker.cursor().collect();
        assert_eq!(first, ids(&[1, 2]));
        assert_eq!(second, first);

        assert_eq!(tracker.next_id(), Some(EndpointId::new(1)));
        assert_eq!(tracker.next_id(), Some(EndpointId::new(2)));
        assert_eq!(tracker.next_id(), None);
        assert_eq!(tracker.next_id(), Some(EndpointId::new(1)));
    }

    #[test]
    fn test_remove_keeps_pass_position() {
        let mut tracker = RecencyTracker::new(3);
        touch_all(&mut tracker, &[1, 2, 3]);
        assert_eq!(tracker.next_id(), Some(EndpointId::new(1)));
        assert_eq!(tracker.next_id(), Some(EndpointId::new(2)));

        assert!(tracker.remove(&EndpointId::new(1)));
        assert!(!tracker.remove(&EndpointId::new(1)));
        assert_eq!(tracker.next_id(), Some(EndpointId::new(3)));
        assert_eq!(tracker.snapshot(), ids(&[2, 3]));
    }

    #[test]
    fn test_empty_cursor() {
        let mut tracker = RecencyTracker::new(2);
        assert_eq!(tracker.cursor().count(), 0);
        tracker.touch(EndpointId::new(3));
        tracker.reset();
        assert!(tracker.is_empty());
        assert_eq!(tracker.next_id(), None);
    }

    #[test]
    fn test_render() {
        let mut tracker = RecencyTracker::new(2);
        touch_all(&mut tracker, &[4, 12]);
        let expected = "     +------+------+\n --> |  12  |  4   | -->\n     +------+------+";
        assert_eq!(tracker.render(), expected);
    }
}

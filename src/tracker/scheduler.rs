//! Capacity-bounded RC selection with hysteresis
//!
//! The scheduler turns one window of hit counts into the next RC membership.
//! Incumbents still seen in the window are kept and re-keyed by their new hit
//! count; important newcomers fill free slots, and once the set is full a
//! newcomer only replaces the weakest member when it beats it by more than
//! `margin * window_size` hits.
//!
//! Ties are broken by admission order: among equal hit counts the entry
//! admitted first keeps its slot.
use serde::Serialize;
use tracing::debug;

use super::aggregation::{AggregationWindow, HitRecord};
use super::{EndpointId, WindowShare};
use crate::config_error;
use crate::error::Result;
use crate::heap::IndexedMinHeap;
use crate::settings::SimulationSettings;

/// Bounded set of RC members keyed by hit count
#[derive(Clone, Debug)]
pub struct RcSet {
    capacity: usize,
    heap: IndexedMinHeap<EndpointId>,
}

impl RcSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: IndexedMinHeap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn contains(&self, id: &EndpointId) -> bool {
        self.heap.contains(id)
    }

    pub fn min(&self) -> Option<HitRecord> {
        self.heap
            .peek_min()
            .map(|(&id, hits)| HitRecord { id, hits })
    }

    /// Add a member if there is room. Returns false when full.
    pub fn insert(&mut self, record: HitRecord) -> bool {
        if self.is_full() && !self.contains(&record.id) {
            return false;
        }
        self.heap.push(record.id, record.hits);
        true
    }

    /// Admit `record` and evict the minimum in one step; the evicted entry may
    /// be `record` itself when it does not beat the current minimum.
    pub fn push_pop_min(&mut self, record: HitRecord) -> HitRecord {
        let (id, hits) = self.heap.push_pop_min(record.id, record.hits);
        HitRecord { id, hits }
    }

    /// Members by hits descending
    pub fn members(&self) -> Vec<HitRecord> {
        self.heap
            .sorted_desc()
            .into_iter()
            .map(|(id, hits)| HitRecord { id, hits })
            .collect()
    }
}

/// Outcome of one scheduling step
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    /// New RC membership, hits descending
    pub members: Vec<HitRecord>,
    /// DC -> RC, in the order they were admitted
    pub promoted: Vec<EndpointId>,
    /// RC -> DC
    pub demoted: Vec<EndpointId>,
}

impl Schedule {
    pub fn member_ids(&self) -> Vec<EndpointId> {
        self.members.iter().map(|record| record.id).collect()
    }

    pub fn is_unchanged(&self) -> bool {
        self.promoted.is_empty() && self.demoted.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CapacityScheduler {
    capacity: usize,
    threshold: f64,
    window_size: u64,
    margin: WindowShare,
}

impl CapacityScheduler {
    /// `threshold` and `margin` are fractions of `window_size`
    pub fn new(capacity: usize, threshold: f64, window_size: u64, margin: f64) -> Result<Self> {
        if window_size == 0 {
            return Err(config_error!("window size must be positive"));
        }
        Ok(Self {
            capacity,
            threshold,
            window_size,
            margin: WindowShare::new(margin),
        })
    }

    pub fn from_settings(settings: &SimulationSettings) -> Result<Self> {
        Self::new(
            settings.rc_capacity,
            settings.rc_threshold,
            settings.window_size,
            settings.hysteresis,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window_size(&self) -> u64 {
        self.window_size
    }

    /// Hit advantage a newcomer must strictly exceed to replace the minimum
    pub fn margin_hits(&self) -> f64 {
        self.margin.of_window(self.window_size)
    }

    pub fn schedule(&self, previous: &[EndpointId], window: &AggregationWindow) -> Schedule {
        let mut rc = RcSet::new(self.capacity);
        let mut promoted = Vec::new();
        let mut demoted = Vec::new();

        for &id in previous {
            match window.hits(&id) {
                Some(hits) if !rc.is_full() => {
                    rc.insert(HitRecord { id, hits });
                }
                Some(hits) => {
                    let evicted = rc.push_pop_min(HitRecord { id, hits });
                    demoted.push(evicted.id);
                }
                None => {
                    debug!("EP {} not seen this window, RC -> DC", id);
                    demoted.push(id);
                }
            }
        }

        for id in window.important_ids(self.threshold, self.window_size) {
            if rc.contains(&id) {
                continue;
            }
            let hits = window.hits(&id).unwrap_or_default();
            let candidate = HitRecord { id, hits };
            debug!("EP {} is important, trying to switch to RC...", id);

            if rc.insert(candidate) {
                debug!("EP {} DC -> RC", id);
                promoted.push(id);
                continue;
            }

            let Some(min) = rc.min() else {
                // zero capacity
                continue;
            };
            let gap = hits.saturating_sub(min.hits);
            if self.margin.exceeded_by(gap, self.window_size) {
                let evicted = rc.push_pop_min(candidate);
                debug!("EP {} DC -> RC, EP {} RC -> DC", id, evicted.id);
                promoted.push(id);
                match promoted.iter().position(|p| *p == evicted.id) {
                    // admitted earlier in this same window, never really RC
                    Some(pos) => {
                        promoted.remove(pos);
                    }
                    None => demoted.push(evicted.id),
                }
            } else {
                debug!(
                    "EP {} stays DC: gap {} to RC minimum {} within margin {}",
                    id,
                    gap,
                    min,
                    self.margin_hits()
                );
            }
        }

        Schedule {
            members: rc.members(),
            promoted,
            demoted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<EndpointId> {
        raw.iter().copied().map(EndpointId::new).collect()
    }

    fn window(records: &[(u64, u64)]) -> AggregationWindow {
        AggregationWindow::from_records(records.iter().map(|&(id, hits)| HitRecord::new(id, hits)))
    }

    #[test]
    fn test_hysteresis_keeps_incumbent_within_margin() {
        let scheduler = CapacityScheduler::new(1, 0.1, 100, 0.05).unwrap();
        assert_eq!(scheduler.margin_hits(), 5.0);

        let schedule = scheduler.schedule(&ids(&[1]), &window(&[(1, 10), (2, 14)]));
        assert_eq!(schedule.members, vec![HitRecord::new(1, 10)]);
        assert!(schedule.is_unchanged());
    }

    #[test]
    fn test_hysteresis_replaces_beyond_margin() {
        let scheduler = CapacityScheduler::new(1, 0.1, 100, 0.05).unwrap();
        let schedule = scheduler.schedule(&ids(&[1]), &window(&[(1, 10), (2, 16)]));
        assert_eq!(schedule.members, vec![HitRecord::new(2, 16)]);
        assert_eq!(schedule.promoted, ids(&[2]));
        assert_eq!(schedule.demoted, ids(&[1]));
    }

    #[test]
    fn test_gap_equal_to_margin_keeps_incumbent() {
        // 0.29 * 100 is just below 29 in floating point
        let scheduler = CapacityScheduler::new(1, 0.1, 100, 0.29).unwrap();
        let schedule = scheduler.schedule(&ids(&[1]), &window(&[(1, 10), (2, 39)]));
        assert_eq!(schedule.member_ids(), ids(&[1]));
        assert!(schedule.is_unchanged());

        let schedule = scheduler.schedule(&ids(&[1]), &window(&[(1, 10), (2, 40)]));
        assert_eq!(schedule.member_ids(), ids(&[2]));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let err = CapacityScheduler::new(1, 0.5, 0, 0.0).unwrap_err();
        assert!(matches!(err, crate::error::RcdcError::Config(_)));
    }

    #[test]
    fn test_fills_free_slots_in_aggregator_order() {
        let scheduler = CapacityScheduler::new(2, 0.2, 10, 0.0).unwrap();
        let schedule = scheduler.schedule(&[], &window(&[(4, 3), (8, 1), (6, 9), (5, 2)]));
        assert_eq!(schedule.promoted, ids(&[4, 6]));
        assert_eq!(schedule.members, vec![HitRecord::new(6, 9), HitRecord::new(4, 3)]);
    }

    #[test]
    fn test_equal_hits_first_considered_wins() {
        let scheduler = CapacityScheduler::new(1, 0.1, 10, 0.0).unwrap();
        let schedule = scheduler.schedule(&[], &window(&[(3, 5), (1, 5)]));
        assert_eq!(schedule.member_ids(), ids(&[3]));
        assert_eq!(schedule.promoted, ids(&[3]));
    }

    #[test]
    fn test_newcomer_displaced_in_same_window_is_not_demoted() {
        let scheduler = CapacityScheduler::new(1, 0.1, 10, 0.0).unwrap();
        let schedule = scheduler.schedule(&[], &window(&[(1, 2), (2, 7)]));
        assert_eq!(schedule.member_ids(), ids(&[2]));
        assert_eq!(schedule.promoted, ids(&[2]));
        assert!(schedule.demoted.is_empty());
    }

    #[test]
    fn test_unseen_incumbent_is_demoted() {
        let scheduler = CapacityScheduler::new(2, 0.5, 10, 0.0).unwrap();
        let schedule = scheduler.schedule(&ids(&[1, 9]), &window(&[(1, 2)]));
        // 1 is not important any more but still seen, so it stays
        assert_eq!(schedule.members, vec![HitRecord::new(1, 2)]);
        assert_eq!(schedule.demoted, ids(&[9]));
        assert!(schedule.promoted.is_empty());
    }

    #[test]
    fn test_rc_set_bounds() {
        let mut rc = RcSet::new(2);
        assert!(rc.insert(HitRecord::new(1, 4)));
        assert!(rc.insert(HitRecord::new(2, 6)));
        assert!(!rc.insert(HitRecord::new(3, 9)));
        assert!(rc.insert(HitRecord::new(2, 1)));
        assert_eq!(rc.len(), 2);
        assert_eq!(rc.min(), Some(HitRecord::new(2, 1)));
        assert_eq!(rc.push_pop_min(HitRecord::new(3, 9)), HitRecord::new(2, 1));
        assert_eq!(rc.members(), vec![HitRecord::new(3, 9), HitRecord::new(1, 4)]);
    }
}

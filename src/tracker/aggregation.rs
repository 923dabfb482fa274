use std::collections::HashMap;

use serde::Serialize;

use super::recency::RecencyTracker;
use super::{EndpointId, WindowShare};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HitRecord {
    pub id: EndpointId,
    pub hits: u64,
}

impl HitRecord {
    pub fn new(id: impl Into<EndpointId>, hits: u64) -> Self {
        Self {
            id: id.into(),
            hits,
        }
    }
}

impl std::fmt::Display for HitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.id, self.hits)
    }
}

/// Per-window hit counters. Every `aggregate` call counts one full pass over
/// the recency window; records keep the order in which ids were first seen.
#[derive(Clone, Debug, Default)]
pub struct AggregationWindow {
    records: Vec<HitRecord>,
    index: HashMap<EndpointId, usize>,
    last_window: Vec<HitRecord>,
    passes: u64,
}

impl AggregationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window with preset counters
    pub fn from_records(records: impl IntoIterator<Item = HitRecord>) -> Self {
        let mut window = Self::new();
        for record in records {
            window.add_hits(record.id, record.hits);
        }
        window
    }

    /// Count one full pass over the tracker's current contents.
    /// Returns how many ids were seen.
    pub fn aggregate(&mut self, tracker: &mut RecencyTracker) -> usize {
        let mut seen = 0;
        for id in tracker.cursor() {
            self.add_hits(id, 1);
            seen += 1;
        }
        self.passes += 1;
        seen
    }

    fn add_hits(&mut self, id: EndpointId, hits: u64) {
        match self.index.get(&id) {
            Some(&i) => self.records[i].hits += hits,
            None => {
                self.index.insert(id, self.records.len());
                self.records.push(HitRecord { id, hits });
            }
        }
    }

    /// Ids with `hits >= threshold * window_size`, in first-seen order
    pub fn important_ids(&self, threshold: f64, window_size: u64) -> Vec<EndpointId> {
        let required = WindowShare::new(threshold);
        self.records
            .iter()
            .filter(|record| required.reached_by(record.hits, window_size))
            .map(|record| record.id)
            .collect()
    }

    /// Raise the count of `id` to at least `hits`, adding it when unseen
    pub fn raise(&mut self, id: EndpointId, hits: u64) {
        match self.index.get(&id) {
            Some(&i) => self.records[i].hits = self.records[i].hits.max(hits),
            None => self.add_hits(id, hits),
        }
    }

    /// Forget `id` in this and the last window. Returns its current record.
    pub fn remove(&mut self, id: &EndpointId) -> Option<HitRecord> {
        self.last_window.retain(|record| record.id != *id);
        let i = self.index.remove(id)?;
        let record = self.records.remove(i);
        for pos in self.index.values_mut() {
            if *pos > i {
                *pos -= 1;
            }
        }
        Some(record)
    }

    pub fn hits(&self, id: &EndpointId) -> Option<u64> {
        self.index.get(id).map(|&i| self.records[i].hits)
    }

    pub fn records(&self) -> &[HitRecord] {
        &self.records
    }

    /// Records of the window before the last `reset`
    pub fn last_window(&self) -> &[HitRecord] {
        &self.last_window
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Passes aggregated since the last reset
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn reset(&mut self) {
        self.last_window = std::mem::take(&mut self.records);
        self.index.clear();
        self.passes = 0;
    }
}

//! Continuous RC balancer
//!
//! Ties the recency window, the aggregation window and the scheduler together
//! for a long-running process: callers report traffic with [`Balancer::add`]
//! and advance time with [`Balancer::progress`]. Every `window_size` ticks the
//! balancer flushes: it schedules the next RC membership, starts a fresh
//! aggregation window and returns the result.
//!
//! Peers can also report their own view of an endpoint with
//! [`Balancer::push_remote_score`]. The endpoint becomes a member at once,
//! evicting the weakest member when the set is full, and the reported score
//! counts as a floor on its hits at the next flush.
use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::aggregation::{AggregationWindow, HitRecord};
use super::recency::RecencyTracker;
use super::scheduler::{CapacityScheduler, Schedule};
use super::EndpointId;
use crate::error::Result;
use crate::settings::SimulationSettings;

#[derive(Clone, Debug)]
pub struct Balancer {
    tracker: RecencyTracker,
    window: AggregationWindow,
    scheduler: CapacityScheduler,
    members: Vec<EndpointId>,
    // peer-reported scores, dropped at the next flush
    remote: BTreeMap<EndpointId, u64>,
    ticks: u64,
    flushes: u64,
    // clear the recency window at every flush
    reset_recency: bool,
}

impl Balancer {
    pub fn new(tracker: RecencyTracker, scheduler: CapacityScheduler) -> Self {
        Self {
            tracker,
            window: AggregationWindow::new(),
            scheduler,
            members: Vec::new(),
            remote: BTreeMap::new(),
            ticks: 0,
            flushes: 0,
            reset_recency: true,
        }
    }

    pub fn from_settings(settings: &SimulationSettings) -> Result<Self> {
        Ok(Self::new(
            RecencyTracker::with_policy(settings.queue_length, settings.recency_policy),
            CapacityScheduler::from_settings(settings)?,
        ))
    }

    /// Keep the recency window across flushes
    pub fn keep_recency(mut self) -> Self {
        self.reset_recency = false;
        self
    }

    pub fn add(&mut self, id: EndpointId) {
        self.tracker.touch(id);
    }

    /// Aggregate one tick. Returns the flush result on window boundaries.
    pub fn progress(&mut self) -> Option<Schedule> {
        self.window.aggregate(&mut self.tracker);
        self.ticks += 1;
        if self.ticks % self.scheduler.window_size() != 0 {
            return None;
        }
        Some(self.flush())
    }

    /// Store the score a peer reports for `id` and make `id` a member.
    /// Returns the member evicted to make room.
    pub fn push_remote_score(&mut self, id: EndpointId, score: u64) -> Option<EndpointId> {
        self.remote.insert(id, score);
        if self.is_rc(&id) {
            return None;
        }
        let capacity = self.scheduler.capacity();
        if capacity == 0 {
            warn!("[Balancer] no RC capacity, EP {} stays DC", id);
            return None;
        }
        let evicted = if self.members.len() >= capacity {
            self.weakest_member().map(|pos| self.members.remove(pos))
        } else {
            None
        };
        self.members.push(id);
        match evicted {
            Some(old) => debug!(
                "[Balancer] remote score {} moves EP {} to RC, EP {} RC -> DC",
                score, id, old
            ),
            None => debug!("[Balancer] remote score {} moves EP {} to RC", score, id),
        }
        evicted
    }

    /// Forget everything known about `id`. Returns false if it was unknown.
    pub fn remove(&mut self, id: &EndpointId) -> bool {
        let member = match self.members.iter().position(|member| member == id) {
            Some(pos) => {
                self.members.remove(pos);
                true
            }
            None => false,
        };
        let counted = self.window.remove(id).is_some();
        let reported = self.remote.remove(id).is_some();
        let recent = self.tracker.remove(id);
        member || counted || reported || recent
    }

    // Last-window hits raised by any remote score
    fn rank(&self, id: &EndpointId) -> u64 {
        let local = self.score(id).unwrap_or_default();
        self.remote.get(id).map_or(local, |&remote| local.max(remote))
    }

    // Ties go to the latest admission, as in the scheduler
    fn weakest_member(&self) -> Option<usize> {
        let mut weakest: Option<(usize, u64)> = None;
        for (pos, id) in self.members.iter().enumerate() {
            let rank = self.rank(id);
            if weakest.map_or(true, |(_, min)| rank <= min) {
                weakest = Some((pos, rank));
            }
        }
        weakest.map(|(pos, _)| pos)
    }

    fn flush(&mut self) -> Schedule {
        let schedule = if self.remote.is_empty() {
            self.scheduler.schedule(&self.members, &self.window)
        } else {
            let mut ranked = self.window.clone();
            for (&id, &score) in &self.remote {
                ranked.raise(id, score);
            }
            self.scheduler.schedule(&self.members, &ranked)
        };
        self.remote.clear();
        self.flushes += 1;
        self.members = schedule.member_ids();
        self.window.reset();
        if self.reset_recency {
            self.tracker.reset();
        }
        if schedule.is_unchanged() {
            debug!(
                "[Balancer] flush {}: RC unchanged ({} members)",
                self.flushes,
                self.members.len()
            );
        } else {
            info!(
                "[Balancer] flush {}: {} promoted, {} demoted, {} members",
                self.flushes,
                schedule.promoted.len(),
                schedule.demoted.len(),
                self.members.len()
            );
        }
        schedule
    }

    /// Current RC members, hits descending as of the last flush
    pub fn members(&self) -> &[EndpointId] {
        &self.members
    }

    pub fn is_rc(&self, id: &EndpointId) -> bool {
        self.members.contains(id)
    }

    /// Hits of `id` in the last completed window
    pub fn score(&self, id: &EndpointId) -> Option<u64> {
        self.window
            .last_window()
            .iter()
            .find(|record| record.id == *id)
            .map(|record| record.hits)
    }

    pub fn last_window(&self) -> &[HitRecord] {
        self.window.last_window()
    }

    pub fn tracker(&self) -> &RecencyTracker {
        &self.tracker
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

//! Local heuristic simulation
//!
//! `Simulation` is the explicit context for one run: it owns the balancer
//! pipeline plus the bookkeeping a report needs (messages per endpoint, the
//! RC/DC split and switch counters). New endpoints start in DC. Scheduling
//! happens after every `window_size` full ticks.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::settings::SimulationSettings;
use crate::tracker::{Balancer, EndpointId, HitRecord, Schedule};
use crate::traffic::TrafficSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EndpointUsage {
    pub id: EndpointId,
    pub messages: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationReport {
    pub settings: SimulationSettings,
    pub distribution: String,
    pub ticks: u64,
    pub windows: u64,
    pub rc: Vec<EndpointUsage>,
    pub dc: Vec<EndpointUsage>,
    pub dc_to_rc_switches: u64,
    pub rc_to_dc_switches: u64,
    pub last_window: Vec<HitRecord>,
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = |usage: &[EndpointUsage]| {
            usage
                .iter()
                .map(|u| format!("{} ({})", u.id, u.messages))
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(
            f,
            "{} traffic, {} ticks, {} windows",
            self.distribution, self.ticks, self.windows
        )?;
        writeln!(f, "EP num (msgs sent)")?;
        writeln!(f, "RC Endpoints: {{ {} }}", list(&self.rc))?;
        writeln!(f, "DC Endpoints: {{ {} }}", list(&self.dc))?;
        writeln!(f, "DC -> RC switches: {}", self.dc_to_rc_switches)?;
        write!(f, "RC -> DC switches: {}", self.rc_to_dc_switches)
    }
}

#[derive(Debug)]
pub struct Simulation {
    settings: SimulationSettings,
    balancer: Balancer,
    messages: BTreeMap<EndpointId, u64>,
    rc: BTreeSet<EndpointId>,
    dc: BTreeSet<EndpointId>,
    dc_to_rc: u64,
    rc_to_dc: u64,
    ticks: u64,
}

impl Simulation {
    pub fn new(settings: SimulationSettings) -> Result<Self> {
        settings.validate()?;
        let balancer = Balancer::from_settings(&settings)?.keep_recency();
        Ok(Self {
            settings,
            balancer,
            messages: BTreeMap::new(),
            rc: BTreeSet::new(),
            dc: BTreeSet::new(),
            dc_to_rc: 0,
            rc_to_dc: 0,
            ticks: 0,
        })
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    /// Record one packet from `id`
    pub fn add(&mut self, id: EndpointId) {
        debug!("completed EP {}", id);
        *self.messages.entry(id).or_default() += 1;
        self.balancer.add(id);
        if !self.rc.contains(&id) && self.dc.insert(id) {
            debug!("EP {} starts in DC", id);
        }
    }

    /// Advance one tick; on a window boundary the new schedule is applied
    /// and returned.
    pub fn tick(&mut self) -> Option<Schedule> {
        self.ticks += 1;
        let schedule = self.balancer.progress()?;
        self.apply(&schedule);
        debug!("recency window after tick {}:\n{}", self.ticks, self.balancer.tracker());
        Some(schedule)
    }

    fn apply(&mut self, schedule: &Schedule) {
        for id in &schedule.demoted {
            if self.rc.remove(id) {
                self.dc.insert(*id);
                self.rc_to_dc += 1;
            }
        }
        for id in &schedule.promoted {
            if self.dc.remove(id) {
                self.rc.insert(*id);
                self.dc_to_rc += 1;
            }
        }
    }

    /// Run every configured tick against `source`
    pub fn run(&mut self, source: &mut dyn TrafficSource) -> SimulationReport {
        info!(
            "Starting simulation: queue length {}, window size {}, {} endpoints, {} ticks, \
             RC threshold {}, RC capacity {}, {} distribution",
            self.settings.queue_length,
            self.settings.window_size,
            self.settings.endpoints,
            self.settings.ticks,
            self.settings.rc_threshold,
            self.settings.rc_capacity,
            source.name()
        );
        info!(
            "An endpoint can appear up to {} times per window, {:.2} times on average; \
             it needs {} to be important",
            self.settings.window_size,
            self.settings.window_size as f64 / self.settings.endpoints as f64,
            self.settings.importance_hits()
        );
        for _ in 0..self.settings.ticks {
            for _ in 0..self.settings.packets_per_tick {
                self.add(source.next_endpoint());
            }
            self.tick();
        }
        info!("Finished simulation");
        self.report(source.name())
    }

    pub fn rc(&self) -> &BTreeSet<EndpointId> {
        &self.rc
    }

    pub fn dc(&self) -> &BTreeSet<EndpointId> {
        &self.dc
    }

    pub fn messages(&self, id: &EndpointId) -> u64 {
        self.messages.get(id).copied().unwrap_or_default()
    }

    pub fn switches(&self) -> (u64, u64) {
        (self.dc_to_rc, self.rc_to_dc)
    }

    pub fn report(&self, distribution: &str) -> SimulationReport {
        let usage = |ids: &BTreeSet<EndpointId>| {
            ids.iter()
                .map(|&id| EndpointUsage {
                    id,
                    messages: self.messages(&id),
                })
                .collect()
        };
        SimulationReport {
            settings: self.settings.clone(),
            distribution: distribution.to_string(),
            ticks: self.ticks,
            windows: self.balancer.flushes(),
            rc: usage(&self.rc),
            dc: usage(&self.dc),
            dc_to_rc_switches: self.dc_to_rc,
            rc_to_dc_switches: self.rc_to_dc,
            last_window: self.balancer.last_window().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Distribution;
    use crate::traffic::RoundRobinSource;

    fn small_settings() -> SimulationSettings {
        SimulationSettings {
            queue_length: 4,
            window_size: 10,
            endpoints: 4,
            ticks: 30,
            rc_threshold: 0.5,
            rc_capacity: 2,
            hysteresis: 0.05,
            distribution: Distribution::RoundRobin,
            packets_per_tick: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_new_endpoints_start_in_dc() {
        let mut sim = Simulation::new(small_settings()).unwrap();
        sim.add(EndpointId::new(3));
        sim.add(EndpointId::new(3));
        assert!(sim.dc().contains(&EndpointId::new(3)));
        assert!(sim.rc().is_empty());
        assert_eq!(sim.messages(&EndpointId::new(3)), 2);
    }

    #[test]
    fn test_schedules_only_on_window_boundary() {
        let mut sim = Simulation::new(small_settings()).unwrap();
        for tick in 1..=10u64 {
            sim.add(EndpointId::new(1));
            let schedule = sim.tick();
            assert_eq!(schedule.is_some(), tick == 10, "tick {}", tick);
        }
        assert!(sim.rc().contains(&EndpointId::new(1)));
        assert!(!sim.dc().contains(&EndpointId::new(1)));
        assert_eq!(sim.switches(), (1, 0));
    }

    #[test]
    fn test_round_robin_run_fills_capacity() {
        let mut sim = Simulation::new(small_settings()).unwrap();
        let mut source = RoundRobinSource::new(4).unwrap();
        let report = sim.run(&mut source);

        assert_eq!(report.ticks, 30);
        assert_eq!(report.windows, 3);
        // every endpoint stays in the recency window, so all are important
        // and the first two seen hold the slots
        let rc: Vec<u64> = report.rc.iter().map(|u| u.id.value()).collect();
        assert_eq!(rc, vec![0, 1]);
        assert_eq!(report.dc.len(), 2);
        assert_eq!(report.dc_to_rc_switches, 2);
        assert_eq!(report.rc_to_dc_switches, 0);
        assert!(report.to_string().contains("RC Endpoints: { 0 (8), 1 (8) }"));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = SimulationSettings {
            window_size: 0,
            ..small_settings()
        };
        assert!(Simulation::new(settings).is_err());
    }
}

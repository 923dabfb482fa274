use rcdc::settings::{Distribution, RecencyPolicy, SimulationSettings};
use rcdc::simulation::Simulation;
use rcdc::tracker::{
    AggregationWindow, Balancer, CapacityScheduler, EndpointId, HitRecord, RecencyTracker,
};
use rcdc::traffic::{self, RoundRobinSource};

fn ids(raw: &[u64]) -> Vec<EndpointId> {
    raw.iter().copied().map(EndpointId::new).collect()
}

fn touch_all(tracker: &mut RecencyTracker, raw: &[u64]) {
    for &id in raw {
        tracker.touch(EndpointId::new(id));
    }
}

#[test]
fn test_recency_policies_on_retouch() {
    let mut first_seen = RecencyTracker::with_policy(3, RecencyPolicy::FirstSeen);
    touch_all(&mut first_seen, &[1, 2, 3, 1, 4]);
    assert_eq!(first_seen.snapshot(), ids(&[2, 3, 4]));

    let mut most_recent = RecencyTracker::with_policy(3, RecencyPolicy::MostRecent);
    touch_all(&mut most_recent, &[1, 2, 3, 1, 4]);
    assert_eq!(most_recent.snapshot(), ids(&[3, 1, 4]));
}

#[test]
fn test_aggregation_counts_presence_per_pass() {
    let mut tracker = RecencyTracker::new(3);
    let mut window = AggregationWindow::new();

    touch_all(&mut tracker, &[1, 2]);
    assert_eq!(window.aggregate(&mut tracker), 2);
    touch_all(&mut tracker, &[3, 4]);
    assert_eq!(window.aggregate(&mut tracker), 3);

    assert_eq!(window.hits(&EndpointId::new(1)), Some(1));
    assert_eq!(window.hits(&EndpointId::new(2)), Some(2));
    assert_eq!(window.hits(&EndpointId::new(4)), Some(1));
    assert_eq!(window.passes(), 2);
    // threshold 0.75 of a 2-tick window needs 1.5 hits
    assert_eq!(window.important_ids(0.75, 2), ids(&[2]));
}

#[test]
fn test_scheduler_hysteresis_boundary() {
    let scheduler = CapacityScheduler::new(1, 0.1, 100, 0.05).unwrap();

    let close = AggregationWindow::from_records([HitRecord::new(1, 10), HitRecord::new(2, 15)]);
    let schedule = scheduler.schedule(&ids(&[1]), &close);
    assert_eq!(schedule.member_ids(), ids(&[1]));
    assert!(schedule.is_unchanged());

    let clear = AggregationWindow::from_records([HitRecord::new(1, 10), HitRecord::new(2, 16)]);
    let schedule = scheduler.schedule(&ids(&[1]), &clear);
    assert_eq!(schedule.member_ids(), ids(&[2]));
    assert_eq!(schedule.promoted, ids(&[2]));
    assert_eq!(schedule.demoted, ids(&[1]));
}

#[test]
fn test_balancer_drops_silent_members() {
    let scheduler = CapacityScheduler::new(2, 0.5, 2, 0.0).unwrap();
    let mut balancer = Balancer::new(RecencyTracker::new(4), scheduler);

    balancer.add(EndpointId::new(7));
    assert!(balancer.progress().is_none());
    let schedule = balancer.progress().unwrap();
    assert_eq!(schedule.promoted, ids(&[7]));
    assert!(balancer.is_rc(&EndpointId::new(7)));
    assert_eq!(balancer.score(&EndpointId::new(7)), Some(2));

    // the recency window was cleared, so 7 goes unseen
    balancer.add(EndpointId::new(8));
    balancer.progress();
    let schedule = balancer.progress().unwrap();
    assert_eq!(schedule.demoted, ids(&[7]));
    assert_eq!(balancer.members(), ids(&[8]).as_slice());
    assert_eq!(balancer.flushes(), 2);
}

#[test]
fn test_simulation_is_reproducible_with_seed() {
    let settings = SimulationSettings {
        queue_length: 10,
        window_size: 50,
        endpoints: 30,
        ticks: 500,
        rc_capacity: 4,
        rc_threshold: 0.2,
        distribution: Distribution::Gaussian,
        packets_per_tick: 5,
        seed: Some(99),
        ..Default::default()
    };

    let run = || {
        let mut sim = Simulation::new(settings.clone()).unwrap();
        let mut source = traffic::from_settings(sim.settings()).unwrap();
        sim.run(source.as_mut())
    };
    let first = run();
    let second = run();

    assert_eq!(first, second);
    assert_eq!(first.windows, 10);
    assert!(first.rc.len() <= 4);
    let total: u64 = first
        .rc
        .iter()
        .chain(first.dc.iter())
        .map(|usage| usage.messages)
        .sum();
    assert_eq!(total, 500 * 5);
}

#[test]
fn test_round_robin_json_report() {
    let settings = SimulationSettings {
        queue_length: 4,
        window_size: 10,
        endpoints: 4,
        ticks: 20,
        rc_threshold: 0.5,
        rc_capacity: 2,
        distribution: Distribution::RoundRobin,
        packets_per_tick: 1,
        ..Default::default()
    };
    let mut sim = Simulation::new(settings).unwrap();
    let mut source = RoundRobinSource::new(4).unwrap();
    let report = sim.run(&mut source);

    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["windows"], 2);
    assert_eq!(json["dc_to_rc_switches"], 2);
    assert_eq!(json["rc"][0]["id"], 0);
    assert_eq!(json["settings"]["distribution"], "round-robin");
}

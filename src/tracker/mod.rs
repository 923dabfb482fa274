//! Local traffic heuristic: recency tracking, per-window hit aggregation and
//! capacity-bounded RC selection with hysteresis.
use serde::{Deserialize, Serialize};

pub mod aggregation;
pub mod balancer;
pub mod recency;
pub mod scheduler;

pub use aggregation::{AggregationWindow, HitRecord};
pub use balancer::Balancer;
pub use recency::RecencyTracker;
pub use scheduler::{CapacityScheduler, RcSet, Schedule};

const SHARE_SCALE: u128 = 1_000_000;

/// Opaque identifier of a traffic endpoint
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
pub struct EndpointId(u64);

impl EndpointId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for EndpointId {
    fn from(id: u64) -> Self {
        EndpointId::new(id)
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fraction of a window, held in parts per million so hit cutoffs compare
/// exactly against integer hit counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowShare(u64);

impl WindowShare {
    /// Negative and NaN fractions become zero
    pub fn new(fraction: f64) -> Self {
        Self((fraction * SHARE_SCALE as f64).round() as u64)
    }

    /// `hits >= fraction * window_size`
    pub fn reached_by(&self, hits: u64, window_size: u64) -> bool {
        hits as u128 * SHARE_SCALE >= self.0 as u128 * window_size as u128
    }

    /// `hits > fraction * window_size`
    pub fn exceeded_by(&self, hits: u64, window_size: u64) -> bool {
        hits as u128 * SHARE_SCALE > self.0 as u128 * window_size as u128
    }

    /// Cutoff in hits, for display
    pub fn of_window(&self, window_size: u64) -> f64 {
        (self.0 as u128 * window_size as u128) as f64 / SHARE_SCALE as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_boundaries_are_exact() {
        // 0.29 * 100 and 0.07 * 100 are not exact in floating point
        let margin = WindowShare::new(0.29);
        assert!(!margin.exceeded_by(29, 100));
        assert!(margin.exceeded_by(30, 100));

        let threshold = WindowShare::new(0.07);
        assert!(threshold.reached_by(7, 100));
        assert!(!threshold.reached_by(6, 100));

        assert_eq!(WindowShare::new(0.05).of_window(100), 5.0);
        assert_eq!(WindowShare::new(-1.0), WindowShare::new(0.0));
    }
}

//! Synthetic traffic sources
//!
//! Pull-based generators of endpoint ids used to drive the simulation:
//! - `Uniform(n)`: ids drawn uniformly from `[0, n)`
//! - `Gaussian(n)`: normal around `n/2` with standard deviation `n/20`,
//!   truncated and clamped to `[0, n)`
//! - `RoundRobin(n)`: `0, 1, ..., n-1, 0, 1, ...`
//!
//! The random sources take an optional seed so runs can be reproduced.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as RandDistribution, Normal};

use crate::config_error;
use crate::error::Result;
use crate::settings::{Distribution, SimulationSettings};
use crate::tracker::EndpointId;

pub trait TrafficSource: Send {
    /// Next endpoint that sends a packet
    fn next_endpoint(&mut self) -> EndpointId;

    fn name(&self) -> &'static str;
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[derive(Debug)]
pub struct UniformSource {
    n: u64,
    rng: StdRng,
}

impl UniformSource {
    pub fn new(n: u64, seed: Option<u64>) -> Result<Self> {
        if n == 0 {
            return Err(config_error!("uniform traffic needs at least one endpoint"));
        }
        Ok(Self {
            n,
            rng: rng_from(seed),
        })
    }
}

impl TrafficSource for UniformSource {
    fn next_endpoint(&mut self) -> EndpointId {
        EndpointId::new(self.rng.gen_range(0..self.n))
    }

    fn name(&self) -> &'static str {
        "Uniform"
    }
}

#[derive(Debug)]
pub struct GaussianSource {
    n: u64,
    rng: StdRng,
    dist: Normal<f64>,
}

impl GaussianSource {
    pub fn new(n: u64, seed: Option<u64>) -> Result<Self> {
        if n == 0 {
            return Err(config_error!("gaussian traffic needs at least one endpoint"));
        }
        let mean = n as f64 / 2.0;
        let std_dev = n as f64 / 20.0;
        let dist = Normal::new(mean, std_dev)
            .map_err(|e| config_error!("invalid gaussian parameters: {}", e))?;
        Ok(Self {
            n,
            rng: rng_from(seed),
            dist,
        })
    }
}

impl TrafficSource for GaussianSource {
    fn next_endpoint(&mut self) -> EndpointId {
        let sample = self.dist.sample(&mut self.rng);
        // float to int casts saturate, so negatives land on 0
        EndpointId::new((sample as u64).min(self.n - 1))
    }

    fn name(&self) -> &'static str {
        "Gaussian"
    }
}

#[derive(Debug)]
pub struct RoundRobinSource {
    n: u64,
    next: u64,
}

impl RoundRobinSource {
    pub fn new(n: u64) -> Result<Self> {
        if n == 0 {
            return Err(config_error!(
                "round-robin traffic needs at least one endpoint"
            ));
        }
        Ok(Self { n, next: 0 })
    }
}

impl TrafficSource for RoundRobinSource {
    fn next_endpoint(&mut self) -> EndpointId {
        let id = self.next % self.n;
        self.next = self.next.wrapping_add(1);
        EndpointId::new(id)
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }
}

pub fn from_settings(settings: &SimulationSettings) -> Result<Box<dyn TrafficSource>> {
    let n = settings.endpoints;
    let source: Box<dyn TrafficSource> = match settings.distribution {
        Distribution::Uniform => Box::new(UniformSource::new(n, settings.seed)?),
        Distribution::Gaussian => Box::new(GaussianSource::new(n, settings.seed)?),
        Distribution::RoundRobin => Box::new(RoundRobinSource::new(n)?),
    };
    Ok(source)
}

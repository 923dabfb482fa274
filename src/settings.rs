//! rcdc application settings
use std::path::PathBuf;

use serde::Serialize;

use crate::config_error;
use crate::error::Result;

pub const DEFAULT_LOG_FILTER: &str = "rcdc=info";

// Local heuristic
pub const DEFAULT_QUEUE_LENGTH: usize = 20;
pub const DEFAULT_WINDOW_SIZE: u64 = 500;
pub const DEFAULT_ENDPOINTS: u64 = 100;
pub const DEFAULT_TICKS: u64 = 10_000;
pub const DEFAULT_RC_THRESHOLD: f64 = 0.4;
pub const DEFAULT_RC_CAPACITY: usize = 16;
pub const DEFAULT_HYSTERESIS: f64 = 0.05;
pub const DEFAULT_PACKETS_PER_TICK: usize = 20;

// Negotiation
pub const DEFAULT_NODE_CAPACITY: usize = 1;
pub const DEFAULT_ROUNDS: u64 = 1;
pub const DEFAULT_NEGOTIATION_MARGIN: u64 = 0;
pub const DEFAULT_MAX_MESSAGES_PER_ROUND: usize = 100_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Distribution {
    #[default]
    Uniform,
    Gaussian,
    RoundRobin,
}

impl std::fmt::Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Distribution::Uniform => write!(f, "uniform"),
            Distribution::Gaussian => write!(f, "gaussian"),
            Distribution::RoundRobin => write!(f, "round-robin"),
        }
    }
}

impl std::str::FromStr for Distribution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uniform" => Ok(Distribution::Uniform),
            "gaussian" => Ok(Distribution::Gaussian),
            "round-robin" | "roundrobin" => Ok(Distribution::RoundRobin),
            _ => Err(format!("Invalid distribution: {}", s)),
        }
    }
}

/// What a re-touch of an id already in the recency window does
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecencyPolicy {
    /// Entry keeps its position; eviction follows first arrival
    #[default]
    FirstSeen,
    /// Entry moves to the newest end (classic LRU)
    MostRecent,
}

impl std::fmt::Display for RecencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecencyPolicy::FirstSeen => write!(f, "first-seen"),
            RecencyPolicy::MostRecent => write!(f, "most-recent"),
        }
    }
}

impl std::str::FromStr for RecencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first-seen" => Ok(RecencyPolicy::FirstSeen),
            "most-recent" | "lru" => Ok(RecencyPolicy::MostRecent),
            _ => Err(format!("Invalid recency policy: {}", s)),
        }
    }
}

/// External event that starts a negotiation round in a running cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RoundTrigger {
    /// Only explicit `RunRound` commands
    #[default]
    Manual,
    /// Periodic timer, in milliseconds
    Interval(u64),
    /// After this many accepted score updates
    ScoreUpdates(u64),
}

impl std::fmt::Display for RoundTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundTrigger::Manual => write!(f, "manual"),
            RoundTrigger::Interval(ms) => write!(f, "interval:{}", ms),
            RoundTrigger::ScoreUpdates(n) => write!(f, "score-updates:{}", n),
        }
    }
}

impl std::str::FromStr for RoundTrigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        let (kind, arg) = match lower.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (lower.as_str(), None),
        };
        let parse_arg = |arg: Option<&str>| -> std::result::Result<u64, String> {
            arg.ok_or_else(|| format!("Round trigger '{}' needs a value", s))?
                .parse::<u64>()
                .map_err(|e| format!("Invalid round trigger value in '{}': {}", s, e))
        };
        match kind {
            "manual" if arg.is_none() => Ok(RoundTrigger::Manual),
            "interval" => Ok(RoundTrigger::Interval(parse_arg(arg)?)),
            "score-updates" => Ok(RoundTrigger::ScoreUpdates(parse_arg(arg)?)),
            _ => Err(format!("Invalid round trigger: {}", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationSettings {
    // Recency window length N
    pub queue_length: usize,
    // Ticks per aggregation window W
    pub window_size: u64,
    pub endpoints: u64,
    pub ticks: u64,
    // Fraction of W an endpoint must be seen in to count as important
    pub rc_threshold: f64,
    // RC slots A
    pub rc_capacity: usize,
    // Fraction of W a candidate must beat the RC minimum by
    pub hysteresis: f64,
    pub distribution: Distribution,
    pub packets_per_tick: usize,
    pub recency_policy: RecencyPolicy,
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            queue_length: DEFAULT_QUEUE_LENGTH,
            window_size: DEFAULT_WINDOW_SIZE,
            endpoints: DEFAULT_ENDPOINTS,
            ticks: DEFAULT_TICKS,
            rc_threshold: DEFAULT_RC_THRESHOLD,
            rc_capacity: DEFAULT_RC_CAPACITY,
            hysteresis: DEFAULT_HYSTERESIS,
            distribution: Distribution::default(),
            packets_per_tick: DEFAULT_PACKETS_PER_TICK,
            recency_policy: RecencyPolicy::default(),
            seed: None,
        }
    }
}

impl SimulationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.queue_length == 0 {
            return Err(config_error!("queue length must be positive"));
        }
        if self.window_size == 0 {
            return Err(config_error!("window size must be positive"));
        }
        if self.endpoints == 0 {
            return Err(config_error!("endpoint count must be positive"));
        }
        if self.rc_capacity == 0 {
            return Err(config_error!("RC capacity must be positive"));
        }
        if !(self.rc_threshold > 0.0 && self.rc_threshold <= 1.0) {
            return Err(config_error!(
                "RC threshold {} is not in (0, 1]",
                self.rc_threshold
            ));
        }
        if !(0.0..1.0).contains(&self.hysteresis) {
            return Err(config_error!(
                "hysteresis margin {} is not in [0, 1)",
                self.hysteresis
            ));
        }
        Ok(())
    }

    /// Hits an endpoint needs within one window to count as important
    pub fn importance_hits(&self) -> f64 {
        self.rc_threshold * self.window_size as f64
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationSettings {
    // JSON topology file; the built-in demo is used when neither this nor
    // `nodes` is given
    pub topology: Option<PathBuf>,
    // Generate a full mesh of this many nodes instead
    pub nodes: Option<u32>,
    pub capacity: usize,
    pub margin: u64,
    pub rounds: u64,
    pub concurrent: bool,
    pub round_trigger: RoundTrigger,
    pub max_messages_per_round: usize,
    pub script: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            topology: None,
            nodes: None,
            capacity: DEFAULT_NODE_CAPACITY,
            margin: DEFAULT_NEGOTIATION_MARGIN,
            rounds: DEFAULT_ROUNDS,
            concurrent: false,
            round_trigger: RoundTrigger::default(),
            max_messages_per_round: DEFAULT_MAX_MESSAGES_PER_ROUND,
            script: None,
            seed: None,
        }
    }
}

impl NegotiationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(config_error!("node capacity must be positive"));
        }
        if self.max_messages_per_round == 0 {
            return Err(config_error!("max messages per round must be positive"));
        }
        if self.topology.is_some() && self.nodes.is_some() {
            return Err(config_error!("--topology and --nodes are mutually exclusive"));
        }
        if self.nodes == Some(0) {
            return Err(config_error!("a generated mesh needs at least one node"));
        }
        match self.round_trigger {
            RoundTrigger::Manual => {}
            RoundTrigger::Interval(0) | RoundTrigger::ScoreUpdates(0) => {
                return Err(config_error!(
                    "round trigger {} needs a positive value",
                    self.round_trigger
                ));
            }
            _ if !self.concurrent => {
                return Err(config_error!(
                    "round trigger {} requires --concurrent",
                    self.round_trigger
                ));
            }
            _ if self.script.is_some() => {
                return Err(config_error!(
                    "--script is only delivered with the manual round trigger"
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

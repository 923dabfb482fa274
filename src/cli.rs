//! CLI for this application
//!
use std::path::PathBuf;

use crate::settings;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug, clap::Parser)]
#[clap(name = APP_NAME, version = APP_VERSION, about = "RC/DC connection-mode scheduling")]
pub struct Cli {
    // Tracing filter directive, overridden by RUST_LOG
    #[clap(
        long,
        short = 'l',
        global = true,
        env("RCDC_LOG_LEVEL"),
        help = "Log level or filter directive (e.g. debug, rcdc=trace)"
    )]
    pub log_level: Option<String>,

    #[clap(
        long,
        global = true,
        env("RCDC_JSON"),
        help = "Print the final report as JSON"
    )]
    pub json: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Run the local traffic heuristic against a synthetic traffic source
    Simulate(SimulateArgs),
    /// Run RC/DC negotiation rounds over a topology of nodes
    Negotiate(NegotiateArgs),
}

#[derive(Clone, Debug, clap::Args)]
pub struct SimulateArgs {
    #[clap(
        long,
        short = 'n',
        default_value_t = settings::DEFAULT_QUEUE_LENGTH,
        env("RCDC_QUEUE_LENGTH"),
        help = "Length of the recency window"
    )]
    pub queue_length: usize,

    #[clap(
        long,
        short = 'w',
        default_value_t = settings::DEFAULT_WINDOW_SIZE,
        env("RCDC_WINDOW_SIZE"),
        help = "Ticks aggregated before the RC list is recalculated"
    )]
    pub window_size: u64,

    #[clap(
        long,
        short = 'e',
        default_value_t = settings::DEFAULT_ENDPOINTS,
        env("RCDC_ENDPOINTS"),
        help = "Number of endpoints"
    )]
    pub endpoints: u64,

    #[clap(
        long,
        short = 't',
        default_value_t = settings::DEFAULT_TICKS,
        env("RCDC_TICKS"),
        help = "Number of ticks"
    )]
    pub ticks: u64,

    #[clap(
        long,
        short = 'r',
        default_value_t = settings::DEFAULT_RC_THRESHOLD,
        env("RCDC_RC_THRESHOLD"),
        help = "Fraction of the window an endpoint must be seen in to be important"
    )]
    pub rc_threshold: f64,

    #[clap(
        long,
        short = 'a',
        default_value_t = settings::DEFAULT_RC_CAPACITY,
        env("RCDC_RC_CAPACITY"),
        help = "RC resources available"
    )]
    pub rc_capacity: usize,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_HYSTERESIS,
        env("RCDC_HYSTERESIS"),
        help = "Fraction of the window a newcomer must beat the weakest RC endpoint by"
    )]
    pub hysteresis: f64,

    #[clap(
        long,
        short = 'p',
        default_value_t = settings::DEFAULT_PACKETS_PER_TICK,
        env("RCDC_PACKETS_PER_TICK"),
        help = "How many packets are transmitted each tick"
    )]
    pub packets_per_tick: usize,

    #[clap(
        long,
        short = 'd',
        default_value_t = settings::Distribution::Uniform,
        env("RCDC_DISTRIBUTION"),
        help = "Traffic distribution: 'uniform', 'gaussian' or 'round-robin'"
    )]
    pub distribution: settings::Distribution,

    #[clap(
        long,
        default_value_t = settings::RecencyPolicy::FirstSeen,
        env("RCDC_RECENCY_POLICY"),
        help = "Re-touch behaviour of the recency window: 'first-seen' or 'most-recent'"
    )]
    pub recency_policy: settings::RecencyPolicy,

    #[clap(long, env("RCDC_SEED"), help = "Seed for reproducible traffic")]
    pub seed: Option<u64>,
}

impl SimulateArgs {
    pub fn into_settings(self) -> settings::SimulationSettings {
        settings::SimulationSettings {
            queue_length: self.queue_length,
            window_size: self.window_size,
            endpoints: self.endpoints,
            ticks: self.ticks,
            rc_threshold: self.rc_threshold,
            rc_capacity: self.rc_capacity,
            hysteresis: self.hysteresis,
            distribution: self.distribution,
            packets_per_tick: self.packets_per_tick,
            recency_policy: self.recency_policy,
            seed: self.seed,
        }
    }
}

#[derive(Clone, Debug, clap::Args)]
pub struct NegotiateArgs {
    #[clap(
        long,
        env("RCDC_TOPOLOGY"),
        conflicts_with = "nodes",
        help = "JSON topology file. Without this or --nodes a three-node demo is used."
    )]
    pub topology: Option<PathBuf>,

    #[clap(
        long,
        env("RCDC_NODES"),
        help = "Generate a full mesh of this many nodes with random scores"
    )]
    pub nodes: Option<u32>,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_NODE_CAPACITY,
        env("RCDC_CAPACITY"),
        help = "RC capacity for nodes that do not set their own"
    )]
    pub capacity: usize,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_NEGOTIATION_MARGIN,
        env("RCDC_MARGIN"),
        help = "Score a Promote must beat the weakest RC peer by"
    )]
    pub margin: u64,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_ROUNDS,
        env("RCDC_ROUNDS"),
        help = "Number of negotiation rounds"
    )]
    pub rounds: u64,

    #[clap(
        long,
        env("RCDC_CONCURRENT"),
        help = "Run every node in its own task"
    )]
    pub concurrent: bool,

    #[clap(
        long,
        default_value_t = settings::RoundTrigger::Manual,
        env("RCDC_ROUND_TRIGGER"),
        help = "What starts a round with --concurrent: 'manual', 'interval:<ms>' or 'score-updates:<n>'"
    )]
    pub round_trigger: settings::RoundTrigger,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_MAX_MESSAGES_PER_ROUND,
        env("RCDC_MAX_MESSAGES_PER_ROUND"),
        help = "Abort a round that delivers more messages than this"
    )]
    pub max_messages_per_round: usize,

    #[clap(
        long,
        env("RCDC_SCRIPT"),
        help = "JSON file of messages to deliver after the rounds"
    )]
    pub script: Option<PathBuf>,

    #[clap(
        long,
        env("RCDC_SEED"),
        help = "Seed for generated topologies and score updates"
    )]
    pub seed: Option<u64>,
}

impl NegotiateArgs {
    pub fn into_settings(self) -> settings::NegotiationSettings {
        settings::NegotiationSettings {
            topology: self.topology,
            nodes: self.nodes,
            capacity: self.capacity,
            margin: self.margin,
            rounds: self.rounds,
            concurrent: self.concurrent,
            round_trigger: self.round_trigger,
            max_messages_per_round: self.max_messages_per_round,
            script: self.script,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::settings::{Distribution, RoundTrigger};

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["rcdc", "simulate"]).unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(
            args.into_settings(),
            settings::SimulationSettings::default()
        );
    }

    #[test]
    fn test_simulate_flags() {
        let cli = Cli::try_parse_from([
            "rcdc", "simulate", "-n", "8", "-w", "100", "-d", "gaussian", "--seed", "3",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        let settings = args.into_settings();
        assert_eq!(settings.queue_length, 8);
        assert_eq!(settings.window_size, 100);
        assert_eq!(settings.distribution, Distribution::Gaussian);
        assert_eq!(settings.seed, Some(3));
    }

    #[test]
    fn test_negotiate_flags() {
        let cli = Cli::try_parse_from([
            "rcdc",
            "negotiate",
            "--nodes",
            "5",
            "--concurrent",
            "--round-trigger",
            "interval:50",
            "--rounds",
            "4",
        ])
        .unwrap();
        let Command::Negotiate(args) = cli.command else {
            panic!("expected negotiate");
        };
        let settings = args.into_settings();
        assert_eq!(settings.nodes, Some(5));
        assert!(settings.concurrent);
        assert_eq!(settings.round_trigger, RoundTrigger::Interval(50));
        assert_eq!(settings.rounds, 4);
        settings.validate().unwrap();
    }

    #[test]
    fn test_topology_conflicts_with_nodes() {
        assert!(Cli::try_parse_from([
            "rcdc",
            "negotiate",
            "--nodes",
            "5",
            "--topology",
            "mesh.json"
        ])
        .is_err());
    }
}

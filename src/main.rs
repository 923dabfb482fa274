use std::fs;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rcdc::cli::{self, Command};
use rcdc::negotiation::{
    messages::parse_script, Cluster, Graph, NodeId, RoundDriver, RunSummary, Topology,
};
use rcdc::settings::{self, NegotiationSettings, RoundTrigger, SimulationSettings};
use rcdc::simulation::Simulation;
use rcdc::traffic;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args and env vars
    let args = cli::Cli::parse();
    let json = args.json;

    let default_filter = args
        .log_level
        .clone()
        .unwrap_or_else(|| settings::DEFAULT_LOG_FILTER.to_string());
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| default_filter.into()),
    );
    // Logs go to stderr so a JSON report on stdout stays parseable
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if json {
        registry.with(fmt_layer.json()).init();
    } else {
        registry.with(fmt_layer).init();
    }

    match args.command {
        Command::Simulate(sim_args) => simulate(sim_args.into_settings(), json),
        Command::Negotiate(neg_args) => negotiate(neg_args.into_settings(), json).await,
    }
}

fn simulate(settings: SimulationSettings, json: bool) -> anyhow::Result<()> {
    let mut simulation = Simulation::new(settings)?;
    let mut source = traffic::from_settings(simulation.settings())?;
    let report = simulation.run(source.as_mut());
    if json {
        print_json(&report)?;
    } else {
        info!("Simulator state:\n{}", report);
    }
    Ok(())
}

async fn negotiate(settings: NegotiationSettings, json: bool) -> anyhow::Result<()> {
    settings.validate()?;

    let topology = match (&settings.topology, settings.nodes) {
        (Some(path), _) => Topology::load(path)?,
        (None, Some(size)) => Topology::full_mesh(size, settings.seed),
        (None, None) => {
            info!("No topology given, using the three-node demo");
            Topology::demo()
        }
    };
    let script = match &settings.script {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("reading script {}", path.display()))?;
            parse_script(&data)?
        }
        None => Vec::new(),
    };
    let nodes = topology.build_nodes(settings.capacity, settings.margin)?;
    info!(
        "Negotiating over {} nodes: capacity {}, margin {}, {} rounds",
        nodes.len(),
        settings.capacity,
        settings.margin,
        settings.rounds
    );

    let summary = if !settings.concurrent {
        let mut graph = Graph::new(nodes)?.with_message_limit(settings.max_messages_per_round);
        graph.run(settings.rounds, script).await?
    } else {
        let mut cluster =
            Cluster::spawn(nodes)?.with_message_limit(settings.max_messages_per_round);
        match settings.round_trigger {
            RoundTrigger::Manual => {
                let summary = cluster.run(settings.rounds, script).await?;
                cluster.shutdown().await?;
                summary
            }
            trigger => run_triggered(cluster, trigger, &settings, &topology).await?,
        }
    };

    let asymmetric = summary.asymmetric_pairs();
    if !asymmetric.is_empty() {
        warn!("RC lists are not symmetric yet: {:?}", asymmetric);
    }
    if json {
        print_json(&summary)?;
    } else {
        info!("Negotiation state:\n{}", summary);
    }
    Ok(())
}

// Rounds run in the background; with the score-updates trigger this feeds
// seeded random traffic hints until the cluster stops.
async fn run_triggered(
    cluster: Cluster,
    trigger: RoundTrigger,
    settings: &NegotiationSettings,
    topology: &Topology,
) -> anyhow::Result<RunSummary> {
    let (handle, task) = cluster.start(trigger, Some(settings.rounds));

    if let RoundTrigger::ScoreUpdates(_) = trigger {
        let pairs: Vec<(NodeId, NodeId)> = topology
            .nodes
            .iter()
            .flat_map(|spec| spec.peers.iter().map(move |peer| (spec.id, peer.id)))
            .collect();
        if pairs.is_empty() {
            anyhow::bail!("score-updates trigger needs at least one peer link");
        }
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        while !task.is_finished() {
            let (node, peer) = pairs[rng.gen_range(0..pairs.len())];
            let score = rng.gen_range(1..=1000);
            if let Err(e) = handle.update_score(node, peer, score).await {
                info!("Stopped sending score updates: {}", e);
                break;
            }
        }
    }

    let summary = task.await??;
    drop(handle);
    Ok(summary)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use std::path::PathBuf;

use anyhow::Context;
use autheo_nodedp::{
    config::{load_config, ConfigFormat, NodeDpConfig},
    degree::{exact_count, DegreeSequence},
    degree_distribution::{accuracy_bound, DegreeDistributionParams},
    engine::NodeDpEngine,
    generators::{scale_free, seeded_rng, ScaleFreeParams},
    noise::NoiseCalibrator,
    weights::QueryWeights,
};
use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Mechanism {
    EdgeCount,
    Naive,
    KStars,
    DegreeDistribution,
}

#[derive(Parser, Debug)]
#[command(name = "nodedp", about = "Run node-private releases over a synthetic scale-free graph")]
struct Args {
    #[arg(long, default_value_t = 1_000)]
    nodes: usize,

    /// Label the graph and noise streams are derived from.
    #[arg(long, default_value = "nodedp-demo")]
    seed: String,

    #[arg(long, value_enum, default_value = "edge-count")]
    mechanism: Mechanism,

    #[arg(long, default_value_t = 1.0)]
    epsilon: f64,

    #[arg(long, default_value_t = 20)]
    bound: usize,

    #[arg(long, default_value_t = 1.0)]
    beta: f64,

    #[arg(long, default_value_t = 2.0)]
    alpha: f64,

    #[arg(long, default_value_t = 100)]
    trials: u32,

    /// Arms per star for the k-stars query.
    #[arg(long, default_value_t = 2)]
    arms: usize,

    #[arg(long, env = "NODEDP_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "auto")]
    config_format: ConfigFormat,

    #[arg(long, default_value_t = ScaleFreeParams::default().alpha)]
    sf_alpha: f64,

    #[arg(long, default_value_t = ScaleFreeParams::default().beta)]
    sf_beta: f64,

    #[arg(long, default_value_t = ScaleFreeParams::default().gamma)]
    sf_gamma: f64,
}

#[derive(Debug, Serialize)]
struct TrialSummary {
    mechanism: Mechanism,
    nodes: usize,
    edges: usize,
    average_degree: f64,
    max_degree: usize,
    alpha: f64,
    alpha_decay: bool,
    /// Exact scalar being estimated; absent for the distribution release,
    /// whose error is the l1 distance to the exact distribution.
    truth: Option<f64>,
    trials: usize,
    mean_absolute_error: f64,
    p5_error: f64,
    p95_error: f64,
    /// Mean published l1 bound over the sampled thresholds.
    #[serde(skip_serializing_if = "Option::is_none")]
    predicted_error: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path, args.config_format)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeDpConfig::default(),
    };
    let mut engine = NodeDpEngine::new(config.clone());
    let mut noise = NoiseCalibrator::from_label(format!("{}/noise", args.seed))
        .with_max_attempts(config.noise.max_resample_attempts);

    let graph = scale_free(
        args.nodes,
        args.sf_alpha,
        args.sf_beta,
        args.sf_gamma,
        &mut seeded_rng(&args.seed),
    );
    let sequence = DegreeSequence::of(&graph);
    let alpha_decay = engine.alpha_decay_holds(&graph, args.alpha)?;
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        max_degree = sequence.max_degree(),
        alpha_decay,
        "generated scale-free graph"
    );
    if !alpha_decay {
        warn!(alpha = args.alpha, "graph violates alpha-decay; accuracy guarantees do not apply");
    }

    let edges = graph.edge_count() as f64;
    let full_table = QueryWeights::k_stars(args.arms, sequence.max_degree());
    let truth = match args.mechanism {
        Mechanism::EdgeCount | Mechanism::Naive => Some(edges),
        Mechanism::KStars => Some(exact_count(&graph, &full_table)?),
        Mechanism::DegreeDistribution => None,
    };
    let scalar_truth = truth.unwrap_or_default();
    let true_distribution = sequence.distribution(graph.node_count());
    let query = QueryWeights::k_stars(args.arms, args.bound);

    let mut errors = Vec::with_capacity(args.trials as usize);
    let mut predicted = Vec::new();
    // One session per trial: trials are independent repetitions, not a
    // composed sequence of releases.
    for trial in 0..args.trials {
        let session = u64::from(trial);
        let error = match args.mechanism {
            Mechanism::EdgeCount => {
                let release =
                    engine.edge_count(session, &graph, args.bound as f64, args.epsilon, &mut noise)?;
                (release.estimate - scalar_truth).abs()
            }
            Mechanism::Naive => {
                let estimate = engine.naive_edge_count(session, &graph, args.epsilon, &mut noise)?;
                (estimate - scalar_truth).abs()
            }
            Mechanism::KStars => {
                let release =
                    engine.linear_query(session, &graph, &query, args.bound, args.epsilon, &mut noise)?;
                (release.estimate - scalar_truth).abs()
            }
            Mechanism::DegreeDistribution => {
                let params = DegreeDistributionParams {
                    bound: args.bound,
                    epsilon: args.epsilon,
                    beta: args.beta,
                    alpha: Some(args.alpha),
                };
                let release = engine.degree_distribution(session, &graph, &params, &mut noise)?;
                predicted.push(accuracy_bound(
                    sequence.average(),
                    args.alpha,
                    release.truncation_threshold,
                    graph.node_count(),
                ));
                release
                    .distribution
                    .iter()
                    .zip(&true_distribution)
                    .map(|(released, exact)| (released - exact).abs())
                    .sum::<f64>()
            }
        };
        engine.settle_session(session);
        errors.push(error);
    }

    let mut summary = summarize(&args, &graph_stats(&sequence, edges), alpha_decay, truth, &errors)?;
    if !predicted.is_empty() {
        summary.predicted_error = Some(predicted.iter().sum::<f64>() / predicted.len() as f64);
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

struct GraphStats {
    nodes: usize,
    edges: usize,
    average_degree: f64,
    max_degree: usize,
}

fn graph_stats(sequence: &DegreeSequence, edges: f64) -> GraphStats {
    GraphStats {
        nodes: sequence.len(),
        edges: edges as usize,
        average_degree: sequence.average(),
        max_degree: sequence.max_degree(),
    }
}

/// Errors are recorded in micro-units.
const ERROR_SCALE: f64 = 1e6;

fn summarize(
    args: &Args,
    stats: &GraphStats,
    alpha_decay: bool,
    truth: Option<f64>,
    errors: &[f64],
) -> anyhow::Result<TrialSummary> {
    let mut histogram = Histogram::<u64>::new(3)?;
    for error in errors {
        histogram.record(((error * ERROR_SCALE).round() as u64).max(1))?;
    }
    let quantile = |q: f64| {
        if errors.is_empty() {
            0.0
        } else {
            histogram.value_at_quantile(q) as f64 / ERROR_SCALE
        }
    };
    let mean_absolute_error = if errors.is_empty() {
        0.0
    } else {
        errors.iter().sum::<f64>() / errors.len() as f64
    };
    Ok(TrialSummary {
        mechanism: args.mechanism,
        nodes: stats.nodes,
        edges: stats.edges,
        average_degree: stats.average_degree,
        max_degree: stats.max_degree,
        alpha: args.alpha,
        alpha_decay,
        truth,
        trials: errors.len(),
        mean_absolute_error,
        p5_error: quantile(0.05),
        p95_error: quantile(0.95),
        predicted_error: None,
    })
}

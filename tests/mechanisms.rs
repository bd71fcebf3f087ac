use autheo_nodedp::config::{load_config, ConfigFormat, EdgeCountConfig, NodeDpConfig};
use autheo_nodedp::degree::{exact_count, DegreeSequence};
use autheo_nodedp::degree_distribution::{DegreeDistributionMechanism, DegreeDistributionParams};
use autheo_nodedp::edge_count::{fallback_scale, flow_estimate, EdgeCountMechanism, EdgeCountPhase};
use autheo_nodedp::flow::FlowGraph;
use autheo_nodedp::generators::{self, scale_free, seeded_rng};
use autheo_nodedp::solver::{MinilpSolver, SolveLimits};
use autheo_nodedp::{
    AlphaDecayValidator, BudgetError, NodeDpEngine, NodeDpError, NoiseCalibrator,
    QuasiflowOptimizer, QueryWeights,
};
use pretty_assertions::assert_eq;

fn flow_only() -> EdgeCountMechanism {
    EdgeCountMechanism::new(&EdgeCountConfig {
        dense_threshold_multiplier: f64::INFINITY,
    })
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}

#[test]
fn path_of_five_uses_flow_value_eight_and_scale_six() {
    let path = generators::path(5);
    assert_eq!(flow_estimate(&path, 3.0), 8.0);
    assert_eq!(fallback_scale(3.0, 1.0), 6.0);

    let mechanism = flow_only();
    let mut noise = NoiseCalibrator::from_label("path-scenario");
    let trials = 1_000;
    let mut total = 0.0;
    for _ in 0..trials {
        let release = mechanism.release(&path, 3.0, 1.0, &mut noise).unwrap();
        assert_eq!(release.phase, EdgeCountPhase::Flow);
        total += release.estimate;
    }
    // Lap(6): std ~ 8.5, so the mean of 1000 draws has std ~ 0.27.
    let mean = total / trials as f64;
    assert!((mean - 4.0).abs() < 1.2, "mean {mean}");

    assert!(matches!(
        mechanism.release(&path, 0.0, 1.0, &mut noise),
        Err(NodeDpError::BoundNotAboveAverageDegree { .. })
    ));
}

#[test]
fn quasiflow_edge_table_matches_edge_count_when_degrees_fit() {
    let solver = MinilpSolver::default();
    let optimizer = QuasiflowOptimizer::new(&solver, SolveLimits::default());

    let graph = scale_free(150, 0.41, 0.54, 0.05, &mut seeded_rng("quasiflow-edges"));
    let bound = DegreeSequence::of(&graph).max_degree();
    let flow = FlowGraph::build(&graph, bound as f64);
    let value = optimizer
        .optimize(&flow, &QueryWeights::edge_count(bound), bound)
        .unwrap();
    assert!(
        (value - graph.edge_count() as f64).abs() < 1e-4,
        "quasiflow {value} vs {} edges",
        graph.edge_count()
    );

    let k6 = generators::complete(6);
    let value = optimizer
        .optimize(&FlowGraph::build(&k6, 5.0), &QueryWeights::edge_count(5), 5)
        .unwrap();
    assert!((value - 15.0).abs() < 1e-6);
}

#[test]
fn exact_count_agrees_with_star_formula() {
    // Hub of degree 9 contributes C(9, 2) = 36 two-stars; leaves none.
    let star = generators::star(10);
    let table = QueryWeights::k_stars(2, 9);
    assert!((exact_count(&star, &table).unwrap() - 36.0).abs() < 1e-12);
}

#[test]
fn degree_distribution_has_one_entry_per_node() {
    let mechanism = DegreeDistributionMechanism::new(&NodeDpConfig::default().degree_distribution);
    let graph = scale_free(400, 0.41, 0.54, 0.05, &mut seeded_rng("dd-shape"));
    let params = DegreeDistributionParams {
        bound: 40,
        epsilon: 1.0,
        beta: 1.0,
        alpha: None,
    };
    let mut noise = NoiseCalibrator::from_label("dd-shape");
    let release = mechanism.release(&graph, &params, &mut noise).unwrap();
    assert_eq!(release.distribution.len(), graph.node_count());
    assert!(release.distribution.iter().all(|p| p.is_finite()));
}

#[test]
fn degree_distribution_median_recovers_cycle_mass() {
    let mut config = NodeDpConfig::default();
    config.degree_distribution.enforce_accuracy_preconditions = false;
    let mechanism = DegreeDistributionMechanism::new(&config.degree_distribution);
    let graph = generators::cycle(40);
    let params = DegreeDistributionParams {
        bound: 4,
        epsilon: 50.0,
        beta: 1.0,
        alpha: None,
    };
    let mut noise = NoiseCalibrator::from_label("dd-median");
    let mut at_two = Vec::new();
    let mut at_five = Vec::new();
    for _ in 0..1_001 {
        let release = mechanism.release(&graph, &params, &mut noise).unwrap();
        at_two.push(release.distribution[2]);
        at_five.push(release.distribution[5]);
    }
    // Cauchy noise has no mean; the median is stable.
    assert!((median(at_two) - 1.0).abs() < 0.3);
    assert!(median(at_five).abs() < 0.3);
}

#[test]
fn distinct_seeds_give_distinct_releases() {
    let mechanism = flow_only();
    let graph = generators::cycle(30);
    let a = mechanism
        .count(&graph, 3.0, 1.0, &mut NoiseCalibrator::from_label("seed-a"))
        .unwrap();
    let b = mechanism
        .count(&graph, 3.0, 1.0, &mut NoiseCalibrator::from_label("seed-b"))
        .unwrap();
    let a_again = mechanism
        .count(&graph, 3.0, 1.0, &mut NoiseCalibrator::from_label("seed-a"))
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(a, a_again);
}

#[test]
fn alpha_decay_separates_cycle_from_star() {
    assert!(AlphaDecayValidator::holds(&generators::cycle(100), 2.0).unwrap());
    assert!(!AlphaDecayValidator::holds(&generators::star(1_000), 2.0).unwrap());
}

#[test]
fn alpha_decay_accepts_graph_built_to_the_boundary() {
    // Hub of degree 3 among four nodes: P(deg >= 2 * avg) = 2^-2 exactly.
    let star = generators::star(4);
    assert_eq!(DegreeSequence::of(&star).average(), 1.5);
    assert!(AlphaDecayValidator::holds(&star, 2.0).unwrap());
}

#[test]
fn engine_spends_budget_in_sequence() {
    let path = std::env::temp_dir().join(format!("nodedp-budget-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "[budget]\nsession-epsilon = 2.0\nmax-releases-per-session = 5\n",
    )
    .unwrap();
    let config = load_config(&path, ConfigFormat::Auto).unwrap();
    std::fs::remove_file(&path).ok();

    let mut engine = NodeDpEngine::new(config);
    let mut noise = NoiseCalibrator::from_label("engine-flow");
    let graph = generators::cycle(25);

    engine.edge_count(1, &graph, 3.0, 1.0, &mut noise).unwrap();
    engine
        .linear_query(1, &graph, &QueryWeights::edge_count(3), 3, 0.5, &mut noise)
        .unwrap();
    let err = engine
        .naive_edge_count(1, &graph, 1.0, &mut noise)
        .unwrap_err();
    assert!(matches!(
        err,
        NodeDpError::Budget(BudgetError::Exhausted { session_id: 1, .. })
    ));

    let snapshot = engine.budget_snapshot(1);
    assert_eq!(snapshot.releases_seen, 2);
    assert!((snapshot.epsilon_consumed - 1.5).abs() < 1e-12);
}

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::EdgeCountConfig,
    degree::average_degree,
    errors::{NodeDpError, NodeDpResult},
    flow::FlowGraph,
    graph::Graph,
    noise::{validate_epsilon, NoiseCalibrator},
};

pub const DEFAULT_DENSE_THRESHOLD_MULTIPLIER: f64 = 5.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCountPhase {
    /// Zero-node graph, released as exactly zero.
    Empty,
    Coarse,
    Flow,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct EdgeCountRelease {
    pub estimate: f64,
    pub phase: EdgeCountPhase,
}

/// Two-phase edge count: a coarse `m + Lap(2n / eps)` that is kept when it
/// clears the dense threshold, otherwise `F / 2 + Lap(2D / eps)`.
#[derive(Clone, Copy, Debug)]
pub struct EdgeCountMechanism {
    dense_threshold_multiplier: f64,
}

impl Default for EdgeCountMechanism {
    fn default() -> Self {
        Self {
            dense_threshold_multiplier: DEFAULT_DENSE_THRESHOLD_MULTIPLIER,
        }
    }
}

impl EdgeCountMechanism {
    pub fn new(config: &EdgeCountConfig) -> Self {
        Self {
            dense_threshold_multiplier: config.dense_threshold_multiplier,
        }
    }

    pub fn dense_threshold_multiplier(&self) -> f64 {
        self.dense_threshold_multiplier
    }

    pub fn count<R: RngCore>(
        &self,
        graph: &Graph,
        bound: f64,
        epsilon: f64,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<f64> {
        self.release(graph, bound, epsilon, noise)
            .map(|release| release.estimate)
    }

    pub fn release<R: RngCore>(
        &self,
        graph: &Graph,
        bound: f64,
        epsilon: f64,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<EdgeCountRelease> {
        Self::check_preconditions(graph, bound, epsilon)?;
        let n = graph.node_count();
        if n == 0 {
            return Ok(EdgeCountRelease {
                estimate: 0.0,
                phase: EdgeCountPhase::Empty,
            });
        }

        let m = graph.edge_count() as f64;
        let coarse = m + noise.laplace(coarse_scale(n, epsilon))?;
        let threshold = self.dense_threshold_multiplier * dense_threshold(n, epsilon);
        if coarse >= threshold {
            info!(threshold, "coarse edge estimate cleared the dense threshold");
            return Ok(EdgeCountRelease {
                estimate: coarse,
                phase: EdgeCountPhase::Coarse,
            });
        }

        let flow = flow_estimate(graph, bound);
        debug!(flow, bound, "falling back to bounded flow estimate");
        let estimate = flow / 2.0 + noise.laplace(fallback_scale(bound, epsilon))?;
        Ok(EdgeCountRelease {
            estimate,
            phase: EdgeCountPhase::Flow,
        })
    }

    /// Every check the release depends on, run before any noise is drawn.
    pub fn check_preconditions(graph: &Graph, bound: f64, epsilon: f64) -> NodeDpResult<()> {
        validate_epsilon(epsilon)?;
        if graph.is_empty() {
            return Ok(());
        }
        let average = average_degree(graph);
        if !bound.is_finite() || bound <= average {
            info!(bound, "rejecting edge count: bound not above average degree");
            return Err(NodeDpError::BoundNotAboveAverageDegree { bound, average });
        }
        Ok(())
    }
}

/// Baseline release `m + Lap((n + 1) / eps)` with no degree bound.
pub fn naive_edge_count<R: RngCore>(
    graph: &Graph,
    epsilon: f64,
    noise: &mut NoiseCalibrator<R>,
) -> NodeDpResult<f64> {
    validate_epsilon(epsilon)?;
    let n = graph.node_count() as f64;
    Ok(graph.edge_count() as f64 + noise.laplace((n + 1.0) / epsilon)?)
}

/// Noiseless max flow of the `bound`-capacitated flow graph; equals `2|E|`
/// whenever every degree is at most `bound`.
pub fn flow_estimate(graph: &Graph, bound: f64) -> f64 {
    FlowGraph::build(graph, bound).max_flow().value
}

pub fn coarse_scale(n: usize, epsilon: f64) -> f64 {
    2.0 * n as f64 / epsilon
}

pub fn fallback_scale(bound: f64, epsilon: f64) -> f64 {
    2.0 * bound / epsilon
}

/// `n ln(n) / eps`, before the multiplier.
pub fn dense_threshold(n: usize, epsilon: f64) -> f64 {
    let n = n as f64;
    n * n.ln() / epsilon
}

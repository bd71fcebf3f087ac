use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    errors::{NodeDpError, NodeDpResult},
    flow::FlowGraph,
    graph::Graph,
    noise::{validate_epsilon, NoiseCalibrator},
    quasiflow::{assignment_value, QuasiflowOptimizer},
    weights::QueryWeights,
};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinearQueryPath {
    Empty,
    Quasiflow,
    MaxFlowFallback,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LinearQueryRelease {
    pub estimate: f64,
    pub path: LinearQueryPath,
    pub warning: Option<String>,
}

/// Quasiflow optimum plus `Lap(node_sensitivity / eps)`, falling back to the
/// exact max flow when the optimizer does not converge.
pub struct LinearQueryMechanism<'s> {
    optimizer: QuasiflowOptimizer<'s>,
}

impl<'s> LinearQueryMechanism<'s> {
    pub fn new(optimizer: QuasiflowOptimizer<'s>) -> Self {
        Self { optimizer }
    }

    pub fn release<R: RngCore>(
        &self,
        graph: &Graph,
        weights: &QueryWeights,
        bound: usize,
        epsilon: f64,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<LinearQueryRelease> {
        let table = Self::check_preconditions(weights, bound, epsilon)?;
        let sensitivity = table.node_sensitivity(bound)?;
        if graph.is_empty() {
            return Ok(LinearQueryRelease {
                estimate: 0.0,
                path: LinearQueryPath::Empty,
                warning: None,
            });
        }
        if sensitivity == 0.0 {
            // An all-zero table has value zero on every graph.
            return Ok(LinearQueryRelease {
                estimate: 0.0,
                path: LinearQueryPath::Quasiflow,
                warning: None,
            });
        }

        let flow = FlowGraph::build(graph, bound as f64);
        let (value, path, warning) = match self.optimizer.optimize(&flow, &table, bound) {
            Ok(value) => (value, LinearQueryPath::Quasiflow, None),
            Err(NodeDpError::Solver(err)) => {
                warn!(%err, "quasiflow did not converge, using exact max flow");
                let value = max_flow_value(&flow, &table)?;
                let message =
                    format!("quasiflow optimizer failed ({err}); released max-flow value");
                (value, LinearQueryPath::MaxFlowFallback, Some(message))
            }
            Err(other) => return Err(other),
        };
        let estimate = value + noise.laplace(sensitivity / epsilon)?;
        Ok(LinearQueryRelease {
            estimate,
            path,
            warning,
        })
    }

    /// Validates the budget and the weight table, returning the table
    /// restricted to `0..=bound`.
    pub fn check_preconditions(
        weights: &QueryWeights,
        bound: usize,
        epsilon: f64,
    ) -> NodeDpResult<QueryWeights> {
        validate_epsilon(epsilon)?;
        weights.truncated(bound)
    }
}

fn max_flow_value(flow: &FlowGraph, table: &QueryWeights) -> NodeDpResult<f64> {
    let baseline = flow.graph_nodes() as f64 * table.values()[0];
    match table.affine_slope() {
        // A non-increasing table is maximized by the empty flow.
        Some(slope) if slope <= 0.0 => Ok(baseline),
        Some(slope) => Ok(baseline + slope * flow.max_flow().value),
        None => assignment_value(flow, &flow.max_flow(), table),
    }
}

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    alpha_decay::AlphaDecayValidator,
    budget::{BudgetClaim, BudgetLedgerSnapshot, PrivacyBudgetLedger},
    config::NodeDpConfig,
    degree_distribution::{
        DegreeDistributionMechanism, DegreeDistributionParams, DegreeDistributionRelease,
    },
    edge_count::{naive_edge_count, EdgeCountMechanism, EdgeCountRelease},
    errors::NodeDpResult,
    graph::Graph,
    linear_query::{LinearQueryMechanism, LinearQueryRelease},
    noise::{validate_epsilon, NoiseCalibrator},
    quasiflow::QuasiflowOptimizer,
    solver::{ConstrainedSolver, MinilpSolver},
    weights::QueryWeights,
};

/// Released average degree `2 e^ / n^` together with its two components.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AverageDegreeRelease {
    pub edges: EdgeCountRelease,
    pub nodes: f64,
    /// `None` when the released node count is not positive.
    pub average: Option<f64>,
    pub budget_claim: BudgetClaim,
}

/// Entry point that gates every release: parameters and preconditions are
/// checked, then the session budget is claimed, then noise is drawn.
pub struct NodeDpEngine {
    config: NodeDpConfig,
    budgets: PrivacyBudgetLedger,
    solver: Box<dyn ConstrainedSolver>,
}

impl NodeDpEngine {
    pub fn new(config: NodeDpConfig) -> Self {
        let solver = MinilpSolver::new(config.solver.max_workers);
        Self::with_solver(config, Box::new(solver))
    }

    pub fn with_solver(config: NodeDpConfig, solver: Box<dyn ConstrainedSolver>) -> Self {
        Self {
            budgets: PrivacyBudgetLedger::new(config.budget.clone()),
            solver,
            config,
        }
    }

    pub fn config(&self) -> &NodeDpConfig {
        &self.config
    }

    /// Fresh entropy-seeded stream honoring the configured resample limit.
    pub fn noise_calibrator(&self) -> NoiseCalibrator {
        NoiseCalibrator::from_entropy().with_max_attempts(self.config.noise.max_resample_attempts)
    }

    pub fn budget_snapshot(&self, session_id: u64) -> BudgetLedgerSnapshot {
        self.budgets.snapshot(session_id)
    }

    /// Drops a finished session from the ledger.
    pub fn settle_session(&mut self, session_id: u64) -> Option<BudgetLedgerSnapshot> {
        self.budgets.settle(session_id)
    }

    pub fn alpha_decay_holds(&self, graph: &Graph, alpha: f64) -> NodeDpResult<bool> {
        AlphaDecayValidator::holds(graph, alpha)
    }

    pub fn edge_count<R: RngCore>(
        &mut self,
        session_id: u64,
        graph: &Graph,
        bound: f64,
        epsilon: f64,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<EdgeCountRelease> {
        EdgeCountMechanism::check_preconditions(graph, bound, epsilon)?;
        self.budgets.claim(session_id, epsilon)?;
        EdgeCountMechanism::new(&self.config.edge_count).release(graph, bound, epsilon, noise)
    }

    pub fn naive_edge_count<R: RngCore>(
        &mut self,
        session_id: u64,
        graph: &Graph,
        epsilon: f64,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<f64> {
        validate_epsilon(epsilon)?;
        self.budgets.claim(session_id, epsilon)?;
        naive_edge_count(graph, epsilon, noise)
    }

    pub fn linear_query<R: RngCore>(
        &mut self,
        session_id: u64,
        graph: &Graph,
        weights: &QueryWeights,
        bound: usize,
        epsilon: f64,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<LinearQueryRelease> {
        LinearQueryMechanism::check_preconditions(weights, bound, epsilon)?;
        self.budgets.claim(session_id, epsilon)?;
        let optimizer = QuasiflowOptimizer::new(self.solver.as_ref(), self.config.solver.limits());
        let release = LinearQueryMechanism::new(optimizer)
            .release(graph, weights, bound, epsilon, noise)?;
        if let Some(warning) = &release.warning {
            info!(session_id, warning = warning.as_str(), "linear query used fallback");
        }
        Ok(release)
    }

    pub fn degree_distribution<R: RngCore>(
        &mut self,
        session_id: u64,
        graph: &Graph,
        params: &DegreeDistributionParams,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<DegreeDistributionRelease> {
        let mechanism = DegreeDistributionMechanism::new(&self.config.degree_distribution);
        mechanism.check_preconditions(graph, params)?;
        self.budgets.claim(session_id, params.epsilon)?;
        mechanism.release(graph, params, noise)
    }

    /// Splits the claim between a flow-based edge count (`edge_epsilon`) and
    /// a node count `n + Lap(1 / node_epsilon)`; adding or removing one node
    /// moves the node count by one.
    pub fn average_degree<R: RngCore>(
        &mut self,
        session_id: u64,
        graph: &Graph,
        bound: f64,
        edge_epsilon: f64,
        node_epsilon: f64,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<AverageDegreeRelease> {
        EdgeCountMechanism::check_preconditions(graph, bound, edge_epsilon)?;
        validate_epsilon(node_epsilon)?;
        let budget_claim = self
            .budgets
            .claim(session_id, edge_epsilon + node_epsilon)?;
        let edges = EdgeCountMechanism::new(&self.config.edge_count).release(
            graph,
            bound,
            edge_epsilon,
            noise,
        )?;
        let nodes = graph.node_count() as f64 + noise.laplace(1.0 / node_epsilon)?;
        let average = (nodes > 0.0).then(|| 2.0 * edges.estimate / nodes);
        Ok(AverageDegreeRelease {
            edges,
            nodes,
            average,
            budget_claim,
        })
    }
}

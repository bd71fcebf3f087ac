use std::time::Instant;

use tracing::{debug, trace};

use crate::{
    errors::NodeDpResult,
    flow::{ArcKind, FlowGraph, MaxFlow},
    graph::NodeIndex,
    solver::{ConstrainedSolver, LinearProgram, Relation, SolveLimits, SolverError},
    weights::QueryWeights,
};

/// Maximizes `sum_v h~(x_v)` over the D-bounded flows of a [`FlowGraph`],
/// where `x_v` is the flow on the `right(v) -> sink` arc and `h~` the
/// piecewise-linear interpolation of the weight table.
///
/// Once every `x_v` is confined to a unit interval the objective is linear
/// over a network polytope with integral bounds, so an integral optimum
/// exists. The search therefore branches on integer degree ranges
/// `[lo_v, hi_v]` and bounds each range with the concave envelope of
/// `h(lo_v..=hi_v)`, which is exact for concave tables at the root.
pub struct QuasiflowOptimizer<'s> {
    solver: &'s dyn ConstrainedSolver,
    limits: SolveLimits,
}

/// Envelope program for one set of degree ranges.
pub struct Relaxation {
    /// Arc variables come first and share indices with [`FlowGraph::arcs`].
    pub program: LinearProgram,
    /// `sum_v h(lo_v)`, added to the program objective.
    pub offset: f64,
}

struct Branch {
    domains: Vec<(usize, usize)>,
}

impl<'s> QuasiflowOptimizer<'s> {
    pub fn new(solver: &'s dyn ConstrainedSolver, limits: SolveLimits) -> Self {
        Self { solver, limits }
    }

    /// Optimal quasiflow value of `flow` for the table `weights[0..=bound]`.
    pub fn optimize(
        &self,
        flow: &FlowGraph,
        weights: &QueryWeights,
        bound: usize,
    ) -> NodeDpResult<f64> {
        let table = weights.truncated(bound)?;
        if flow.graph_nodes() == 0 {
            return Ok(0.0);
        }
        let started = Instant::now();
        let empty = flow.graph_nodes() as f64 * table.values()[0];
        let mut incumbent = assignment_value(flow, &flow.max_flow(), &table)?.max(empty);

        let mut stack = vec![Branch {
            domains: root_domains(flow, bound),
        }];
        let mut explored = 0usize;
        while let Some(branch) = stack.pop() {
            explored += 1;
            if explored > self.limits.max_branch_nodes {
                return Err(SolverError::BranchLimit {
                    nodes: self.limits.max_branch_nodes,
                }
                .into());
            }
            let remaining = self
                .limits
                .timeout
                .checked_sub(started.elapsed())
                .filter(|left| !left.is_zero())
                .ok_or(SolverError::Timeout {
                    timeout: self.limits.timeout,
                })?;
            let limits = SolveLimits {
                timeout: remaining,
                ..self.limits
            };

            let relaxation = build_program(flow, &table, &branch.domains);
            let solution = match self.solver.maximize(&relaxation.program, &limits) {
                Ok(solution) => solution,
                Err(SolverError::Infeasible) => continue,
                Err(err) => return Err(err.into()),
            };
            let upper = solution.objective + relaxation.offset;
            let tolerance = self.limits.tolerance * (1.0 + upper.abs());
            if upper <= incumbent + tolerance {
                continue;
            }

            let mut value = 0.0;
            let mut widest: Option<(usize, f64, f64)> = None;
            for v in 0..flow.graph_nodes() {
                let x = solution.values[flow.sink_arc(NodeIndex(v))].clamp(0.0, bound as f64);
                let exact = table.interpolate(x)?;
                value += exact;
                // Ranges of width one are interpolated exactly.
                let (lo, hi) = branch.domains[v];
                if hi < lo + 2 {
                    continue;
                }
                let gap = envelope_at(&table, lo, hi, x) - exact;
                if widest.map_or(true, |(_, _, best)| gap > best) {
                    widest = Some((v, x, gap));
                }
            }
            incumbent = incumbent.max(value);
            trace!(explored, upper, value, "quasiflow branch");

            match widest {
                Some((v, x, gap)) if upper - value > tolerance && gap > 0.0 => {
                    let (lo, hi) = branch.domains[v];
                    let split = (x.floor() as usize).clamp(lo, hi - 1);
                    for range in [(lo, split), (split + 1, hi)] {
                        let mut domains = branch.domains.clone();
                        domains[v] = range;
                        stack.push(Branch { domains });
                    }
                }
                _ => {}
            }
        }
        debug!(value = incumbent, explored, "quasiflow optimum");
        Ok(incumbent)
    }
}

/// `[0, min(bound, deg(v))]` for every node; the in-degree of `right(v)`
/// counts the unit arcs that can feed it.
fn root_domains(flow: &FlowGraph, bound: usize) -> Vec<(usize, usize)> {
    let mut feeds = vec![0usize; flow.graph_nodes()];
    let first_right = flow.right(NodeIndex(0)).0;
    for arc in flow.arcs().iter().filter(|arc| arc.kind == ArcKind::Edge) {
        feeds[arc.to.0 - first_right] += 1;
    }
    feeds.into_iter().map(|feed| (0, feed.min(bound))).collect()
}

/// Envelope program for `domains`: each sink arc is bounded by its range
/// and split into one variable per envelope piece above `lo_v`.
pub fn build_program(
    flow: &FlowGraph,
    table: &QueryWeights,
    domains: &[(usize, usize)],
) -> Relaxation {
    let mut program = LinearProgram::default();
    for (idx, arc) in flow.arcs().iter().enumerate() {
        let (lo, hi) = match arc.kind {
            ArcKind::Sink => {
                let (lo, hi) = domains[idx - flow.graph_nodes()];
                (lo as f64, hi as f64)
            }
            _ => (0.0, arc.capacity),
        };
        program.add_variable(0.0, lo, hi);
    }

    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); flow.node_count()];
    for (idx, arc) in flow.arcs().iter().enumerate() {
        rows[arc.to.0].push((idx, 1.0));
        rows[arc.from.0].push((idx, -1.0));
    }
    for node in flow.internal_nodes() {
        let terms = std::mem::take(&mut rows[node.0]);
        program.add_constraint(terms, Relation::Eq, 0.0);
    }

    let mut offset = 0.0;
    let values = table.values();
    for (v, &(lo, hi)) in domains.iter().enumerate() {
        offset += values[lo];
        if hi == lo {
            continue;
        }
        let sink_arc = flow.sink_arc(NodeIndex(v));
        let hull = envelope(table, lo, hi);
        let mut terms = Vec::with_capacity(hull.len());
        for piece in hull.windows(2) {
            let (a, b) = (piece[0], piece[1]);
            let slope = (values[b] - values[a]) / (b - a) as f64;
            let segment = program.add_variable(slope, 0.0, (b - a) as f64);
            terms.push((segment, 1.0));
        }
        terms.push((sink_arc, -1.0));
        program.add_constraint(terms, Relation::Eq, -(lo as f64));
    }
    Relaxation { program, offset }
}

/// Breakpoints of the least concave majorant of `h` over `lo..=hi`.
fn envelope(table: &QueryWeights, lo: usize, hi: usize) -> Vec<usize> {
    let values = table.values();
    let mut hull: Vec<usize> = Vec::with_capacity(hi - lo + 1);
    for k in lo..=hi {
        while let &[.., a, b] = hull.as_slice() {
            let cross = (b - a) as f64 * (values[k] - values[a])
                - (values[b] - values[a]) * (k - a) as f64;
            if cross < 0.0 {
                break;
            }
            hull.pop();
        }
        hull.push(k);
    }
    hull
}

fn envelope_at(table: &QueryWeights, lo: usize, hi: usize, x: f64) -> f64 {
    let values = table.values();
    let hull = envelope(table, lo, hi);
    for piece in hull.windows(2) {
        let (a, b) = (piece[0], piece[1]);
        if x <= b as f64 {
            let t = ((x - a as f64) / (b - a) as f64).clamp(0.0, 1.0);
            return values[a] + t * (values[b] - values[a]);
        }
    }
    values[hi]
}

/// Query value of a concrete flow: `sum_v h~(x_v)` over the right-node
/// inflows of `assignment`.
pub fn assignment_value(
    flow: &FlowGraph,
    assignment: &MaxFlow,
    weights: &QueryWeights,
) -> NodeDpResult<f64> {
    let mut total = 0.0;
    for v in 0..flow.graph_nodes() {
        let inflow = assignment.arc_flows[flow.sink_arc(NodeIndex(v))];
        total += weights.interpolate(inflow)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        degree::exact_count,
        errors::NodeDpError,
        generators,
        graph::Graph,
        solver::MinilpSolver,
    };

    #[test]
    fn edge_weights_recover_edge_count_under_bound() {
        let solver = MinilpSolver::default();
        let optimizer = QuasiflowOptimizer::new(&solver, SolveLimits::default());
        let path = generators::path(5);
        let flow = FlowGraph::build(&path, 3.0);

        let value = optimizer
            .optimize(&flow, &QueryWeights::edge_count(3), 3)
            .unwrap();
        assert_relative_eq!(value, 4.0, epsilon = 1e-6);
    }

    #[test]
    fn edge_weights_match_max_flow_on_capped_hub() {
        let solver = MinilpSolver::default();
        let optimizer = QuasiflowOptimizer::new(&solver, SolveLimits::default());
        let star = generators::star(8);
        let flow = FlowGraph::build(&star, 2.0);

        let value = optimizer
            .optimize(&flow, &QueryWeights::edge_count(2), 2)
            .unwrap();
        assert_relative_eq!(value, flow.max_flow().value / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn star_weights_equal_exact_count_when_degrees_fit() {
        let solver = MinilpSolver::default();
        let optimizer = QuasiflowOptimizer::new(&solver, SolveLimits::default());
        let graph = generators::cycle(6);
        let weights = QueryWeights::k_stars(2, 3);
        let flow = FlowGraph::build(&graph, 3.0);

        let exact = exact_count(&graph, &weights).unwrap();
        let value = optimizer.optimize(&flow, &weights, 3).unwrap();
        assert_relative_eq!(exact, 6.0);
        assert_relative_eq!(value, exact, epsilon = 1e-6);
    }

    #[test]
    fn capped_hub_keeps_only_bound_many_arms() {
        // Hub degree 4 is capped at 2, giving C(2, 2) = 1; leaves add nothing.
        let solver = MinilpSolver::default();
        let optimizer = QuasiflowOptimizer::new(&solver, SolveLimits::default());
        let flow = FlowGraph::build(&generators::star(5), 2.0);
        let value = optimizer
            .optimize(&flow, &QueryWeights::k_stars(2, 2), 2)
            .unwrap();
        assert_relative_eq!(value, 1.0, epsilon = 1e-6);
    }

    /// Best `sum_v h(x_v)` over every integral in-degree vector the flow
    /// graph can route, checked one fixed vector at a time.
    fn enumerate_integral_optimum(
        solver: &MinilpSolver,
        flow: &FlowGraph,
        table: &QueryWeights,
        bound: usize,
    ) -> f64 {
        let caps: Vec<usize> = root_domains(flow, bound).iter().map(|&(_, hi)| hi).collect();
        let mut degrees = vec![0usize; caps.len()];
        let mut best = f64::NEG_INFINITY;
        loop {
            let fixed: Vec<(usize, usize)> = degrees.iter().map(|&k| (k, k)).collect();
            let relaxation = build_program(flow, table, &fixed);
            match solver.maximize(&relaxation.program, &SolveLimits::default()) {
                Ok(_) => best = best.max(relaxation.offset),
                Err(SolverError::Infeasible) => {}
                Err(err) => panic!("unexpected solver error {err}"),
            }
            let Some(v) = (0..degrees.len()).find(|&v| degrees[v] < caps[v]) else {
                break;
            };
            degrees[v] += 1;
            degrees[..v].iter_mut().for_each(|k| *k = 0);
        }
        best
    }

    #[test]
    fn irregular_table_matches_enumerated_optimum() {
        // Triangle with a two-node tail; h is neither concave nor convex and
        // every node prefers degree one unless it can reach three.
        let graph = Graph::from_edges([(0, 1), (1, 2), (2, 0), (2, 3), (3, 4)]).unwrap();
        let table = QueryWeights::new(vec![0.0, 3.0, 1.0, 4.0]).unwrap();
        let flow = FlowGraph::build(&graph, 3.0);
        let solver = MinilpSolver::default();

        let expected = enumerate_integral_optimum(&solver, &flow, &table, 3);
        assert_relative_eq!(expected, 16.0, epsilon = 1e-9);
        let optimizer = QuasiflowOptimizer::new(&solver, SolveLimits::default());
        let value = optimizer.optimize(&flow, &table, 3).unwrap();
        assert_relative_eq!(value, expected, epsilon = 1e-6);
    }

    #[test]
    fn shared_hubs_force_integral_star_centers() {
        // K_{2,3} at D = 2: the hubs feed at most four units into the three
        // leaves, so only two leaves can complete a 2-star. Spreading the
        // flow evenly is optimal for the envelope but not for the count.
        let graph =
            Graph::from_edges([(0, 2), (0, 3), (0, 4), (1, 2), (1, 3), (1, 4)]).unwrap();
        let table = QueryWeights::k_stars(2, 2);
        let flow = FlowGraph::build(&graph, 2.0);
        let solver = MinilpSolver::default();

        let expected = enumerate_integral_optimum(&solver, &flow, &table, 2);
        assert_relative_eq!(expected, 4.0, epsilon = 1e-9);
        let optimizer = QuasiflowOptimizer::new(&solver, SolveLimits::default());
        assert_relative_eq!(optimizer.optimize(&flow, &table, 2).unwrap(), expected, epsilon = 1e-6);
    }

    #[test]
    fn envelope_bridges_convex_runs() {
        let table = QueryWeights::new(vec![0.0, 2.0, 2.0, 5.0]).unwrap();
        assert_eq!(envelope(&table, 0, 3), vec![0, 1, 3]);
        assert_relative_eq!(envelope_at(&table, 0, 3, 2.0), 3.5);
        assert_eq!(envelope(&table, 1, 2), vec![1, 2]);
        assert_relative_eq!(envelope_at(&table, 2, 2, 2.0), 2.0);
    }

    #[test]
    fn branch_limit_is_reported_as_solver_error() {
        let solver = MinilpSolver::default();
        let limits = SolveLimits {
            max_branch_nodes: 0,
            ..SolveLimits::default()
        };
        let optimizer = QuasiflowOptimizer::new(&solver, limits);
        let flow = FlowGraph::build(&generators::path(3), 2.0);
        assert!(matches!(
            optimizer.optimize(&flow, &QueryWeights::edge_count(2), 2),
            Err(NodeDpError::Solver(SolverError::BranchLimit { nodes: 0 }))
        ));
    }

    #[test]
    fn assignment_value_reads_sink_arcs() {
        let path = generators::path(4);
        let flow = FlowGraph::build(&path, 2.0);
        let max_flow = flow.max_flow();
        let value = assignment_value(&flow, &max_flow, &QueryWeights::edge_count(2)).unwrap();
        assert_relative_eq!(value, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn short_tables_are_rejected_before_solving() {
        let solver = MinilpSolver::default();
        let optimizer = QuasiflowOptimizer::new(&solver, SolveLimits::default());
        let flow = FlowGraph::build(&generators::path(3), 4.0);
        assert!(optimizer
            .optimize(&flow, &QueryWeights::edge_count(2), 4)
            .is_err());
    }
}

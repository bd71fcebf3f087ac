use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum SolverError {
    #[error("program is infeasible")]
    Infeasible,
    #[error("program is unbounded")]
    Unbounded,
    #[error("program has {variables} variables, above the limit of {limit}")]
    TooLarge { variables: usize, limit: usize },
    #[error("solver did not finish within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("solver backend still busy with {live} abandoned solve(s)")]
    Busy { live: usize },
    #[error("branch and bound stopped after {nodes} nodes")]
    BranchLimit { nodes: usize },
    #[error("solution violates the program by {residual:e}")]
    Unverified { residual: f64 },
    #[error("solver backend failed: {0}")]
    Backend(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    Eq,
    Le,
    Ge,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub terms: Vec<(usize, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

/// `maximize c.x` subject to the constraint rows and `lower <= x <= upper`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearProgram {
    pub objective: Vec<f64>,
    pub bounds: Vec<(f64, f64)>,
    pub constraints: Vec<LinearConstraint>,
}

impl LinearProgram {
    pub fn add_variable(&mut self, objective: f64, lower: f64, upper: f64) -> usize {
        self.objective.push(objective);
        self.bounds.push((lower, upper));
        self.objective.len() - 1
    }

    pub fn add_constraint(&mut self, terms: Vec<(usize, f64)>, relation: Relation, rhs: f64) {
        self.constraints.push(LinearConstraint {
            terms,
            relation,
            rhs,
        });
    }

    pub fn variable_count(&self) -> usize {
        self.objective.len()
    }

    pub fn objective_value(&self, x: &[f64]) -> f64 {
        self.objective.iter().zip(x).map(|(c, v)| c * v).sum()
    }

    /// Largest bound or constraint violation of `x`.
    pub fn residual(&self, x: &[f64]) -> f64 {
        if x.len() != self.variable_count() {
            return f64::INFINITY;
        }
        let mut worst: f64 = 0.0;
        for (value, (lower, upper)) in x.iter().zip(&self.bounds) {
            worst = worst.max(lower - value).max(value - upper);
        }
        for row in &self.constraints {
            let lhs: f64 = row.terms.iter().map(|(var, coeff)| coeff * x[*var]).sum();
            let violation = match row.relation {
                Relation::Eq => (lhs - row.rhs).abs(),
                Relation::Le => lhs - row.rhs,
                Relation::Ge => row.rhs - lhs,
            };
            worst = worst.max(violation);
        }
        if worst.is_nan() {
            f64::INFINITY
        } else {
            worst
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub objective: f64,
    pub values: Vec<f64>,
    pub elapsed: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveLimits {
    pub timeout: Duration,
    pub max_variables: usize,
    /// Relaxations a branch-and-bound caller may solve before giving up.
    pub max_branch_nodes: usize,
    pub tolerance: f64,
}

impl Default for SolveLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_variables: 250_000,
            max_branch_nodes: 2_000,
            tolerance: 1e-6,
        }
    }
}

pub trait ConstrainedSolver: Send + Sync {
    fn maximize(&self, program: &LinearProgram, limits: &SolveLimits)
        -> Result<Solution, SolverError>;
}

/// Dense simplex backend from the `minilp` crate, run on a worker thread so
/// the caller can stop waiting at the timeout. `minilp` cannot be cancelled,
/// so a timed-out solve keeps its worker slot until it finishes and at most
/// `max_workers` solves ever run at once; further calls fail with
/// [`SolverError::Busy`].
#[derive(Clone, Debug)]
pub struct MinilpSolver {
    max_workers: usize,
    live_workers: Arc<AtomicUsize>,
}

impl Default for MinilpSolver {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MinilpSolver {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            live_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Solver threads still running, including abandoned ones.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    fn claim_worker(&self) -> Result<WorkerSlot, SolverError> {
        self.live_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.max_workers).then_some(live + 1)
            })
            .map_err(|live| SolverError::Busy { live })?;
        Ok(WorkerSlot(Arc::clone(&self.live_workers)))
    }
}

struct WorkerSlot(Arc<AtomicUsize>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConstrainedSolver for MinilpSolver {
    fn maximize(
        &self,
        program: &LinearProgram,
        limits: &SolveLimits,
    ) -> Result<Solution, SolverError> {
        if program.variable_count() > limits.max_variables {
            return Err(SolverError::TooLarge {
                variables: program.variable_count(),
                limit: limits.max_variables,
            });
        }
        let slot = self.claim_worker()?;
        let started = Instant::now();
        let owned = program.clone();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("nodedp-lp".into())
            .spawn(move || {
                let result = solve_with_minilp(&owned);
                // Free the slot before reporting so the caller can reuse it.
                drop(slot);
                let _ = tx.send(result);
            })
            .map_err(|err| SolverError::Backend(err.to_string()))?;
        let values = match rx.recv_timeout(limits.timeout) {
            Ok(result) => result?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(SolverError::Timeout {
                    timeout: limits.timeout,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(SolverError::Backend("solver thread exited".into()))
            }
        };
        let residual = program.residual(&values);
        if residual > limits.tolerance {
            return Err(SolverError::Unverified { residual });
        }
        let elapsed = started.elapsed();
        debug!(
            variables = program.variable_count(),
            constraints = program.constraints.len(),
            ?elapsed,
            "linear program solved"
        );
        Ok(Solution {
            objective: program.objective_value(&values),
            values,
            elapsed,
        })
    }
}

fn solve_with_minilp(program: &LinearProgram) -> Result<Vec<f64>, SolverError> {
    let mut problem = Problem::new(OptimizationDirection::Maximize);
    let vars: Vec<_> = program
        .objective
        .iter()
        .zip(&program.bounds)
        .map(|(coeff, bounds)| problem.add_var(*coeff, *bounds))
        .collect();
    for row in &program.constraints {
        let mut expr = LinearExpr::empty();
        for (var, coeff) in &row.terms {
            expr.add(vars[*var], *coeff);
        }
        let op = match row.relation {
            Relation::Eq => ComparisonOp::Eq,
            Relation::Le => ComparisonOp::Le,
            Relation::Ge => ComparisonOp::Ge,
        };
        problem.add_constraint(expr, op, row.rhs);
    }
    let solution = problem.solve().map_err(|err| match err {
        minilp::Error::Infeasible => SolverError::Infeasible,
        minilp::Error::Unbounded => SolverError::Unbounded,
    })?;
    Ok(vars.iter().map(|var| solution[*var]).collect())
}

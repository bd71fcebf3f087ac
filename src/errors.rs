use thiserror::Error;

use crate::{budget::BudgetError, config::ConfigError, graph::GraphError, solver::SolverError};

pub type NodeDpResult<T> = Result<T, NodeDpError>;

#[derive(Debug, Error)]
pub enum NodeDpError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("epsilon must be finite and > 0 (got {0})")]
    InvalidEpsilon(f64),
    #[error("beta must be finite and > 0 (got {0})")]
    InvalidBeta(f64),
    #[error("alpha must be > 1 (got {0})")]
    InvalidAlpha(f64),
    #[error("noise scale must be finite and > 0 (got {0})")]
    InvalidScale(f64),
    #[error("degree bound {bound} must exceed the average degree {average}")]
    BoundNotAboveAverageDegree { bound: f64, average: f64 },
    #[error("degree bound must be at least 1 to form a truncation range")]
    EmptyTruncationRange,
    #[error("graph does not satisfy alpha-decay for alpha = {alpha}")]
    AlphaDecayViolated { alpha: f64 },
    #[error("truncation threshold {threshold} must exceed (4/epsilon)*ln(n) = {floor}")]
    ThresholdBelowNoiseFloor { threshold: f64, floor: f64 },
    #[error("query weights have {len} entries but {required} are required")]
    WeightsTooShort { len: usize, required: usize },
    #[error("query weights must be finite")]
    NonFiniteWeights,
    #[error("degree {degree} is outside the weight table 0..={max_degree}")]
    DegreeOutOfRange { degree: f64, max_degree: usize },
    #[error("noise draw stayed non-finite after {attempts} attempts")]
    InvalidNoiseDraw { attempts: u32 },
}

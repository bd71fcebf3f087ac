//! Autheo NodeDP – node-level differentially private statistics over
//! undirected graphs. Edge counts go through a degree-bounded max-flow
//! relaxation, linear degree queries through a quasiflow program, and the
//! degree distribution through naive truncation calibrated with a smooth
//! sensitivity bound. Every release is gated by parameter checks and a
//! per-session privacy budget before any noise is drawn.

pub mod alpha_decay;
pub mod budget;
pub mod config;
pub mod degree;
pub mod degree_distribution;
pub mod edge_count;
pub mod engine;
pub mod errors;
pub mod flow;
pub mod generators;
pub mod graph;
pub mod linear_query;
pub mod noise;
pub mod quasiflow;
pub mod solver;
pub mod weights;

pub use alpha_decay::AlphaDecayValidator;
pub use budget::{BudgetClaim, BudgetError, BudgetLedgerSnapshot, PrivacyBudgetLedger};
pub use config::{load_config, parse_config, ConfigError, ConfigFormat, NodeDpConfig};
pub use degree::{average_degree, exact_count, DegreeSequence};
pub use degree_distribution::{
    DegreeDistributionMechanism, DegreeDistributionParams, DegreeDistributionRelease,
};
pub use edge_count::{naive_edge_count, EdgeCountMechanism, EdgeCountPhase, EdgeCountRelease};
pub use engine::{AverageDegreeRelease, NodeDpEngine};
pub use errors::{NodeDpError, NodeDpResult};
pub use flow::{FlowGraph, MaxFlow};
pub use graph::{Graph, GraphError, NodeIndex};
pub use linear_query::{LinearQueryMechanism, LinearQueryPath, LinearQueryRelease};
pub use noise::NoiseCalibrator;
pub use quasiflow::QuasiflowOptimizer;
pub use solver::{ConstrainedSolver, LinearProgram, MinilpSolver, SolveLimits, SolverError};
pub use weights::QueryWeights;

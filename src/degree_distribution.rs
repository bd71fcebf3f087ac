use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    alpha_decay::AlphaDecayValidator,
    config::DegreeDistributionConfig,
    degree::DegreeSequence,
    errors::{NodeDpError, NodeDpResult},
    graph::Graph,
    noise::{validate_epsilon, NoiseCalibrator},
};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DegreeDistributionParams {
    pub bound: usize,
    pub epsilon: f64,
    pub beta: f64,
    /// Decay exponent the caller assumes for the graph. Always validated as
    /// `> 1` when present; the graph is checked against it when accuracy
    /// preconditions are enforced.
    pub alpha: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DegreeDistributionRelease {
    /// One entry per degree `0..n`.
    pub distribution: Vec<f64>,
    /// The sampled truncation threshold `D^`. Drawn independently of the
    /// data, so publishing it costs no budget.
    pub truncation_threshold: f64,
}

/// Naive truncation at a random threshold `D^`, released with Cauchy noise
/// of scale `2 sqrt(2) D^ / eps * S`. The output is left unnormalized.
#[derive(Clone, Copy, Debug)]
pub struct DegreeDistributionMechanism {
    enforce_accuracy_preconditions: bool,
}

impl Default for DegreeDistributionMechanism {
    fn default() -> Self {
        Self {
            enforce_accuracy_preconditions: true,
        }
    }
}

impl DegreeDistributionMechanism {
    pub fn new(config: &DegreeDistributionConfig) -> Self {
        Self {
            enforce_accuracy_preconditions: config.enforce_accuracy_preconditions,
        }
    }

    pub fn release<R: RngCore>(
        &self,
        graph: &Graph,
        params: &DegreeDistributionParams,
        noise: &mut NoiseCalibrator<R>,
    ) -> NodeDpResult<DegreeDistributionRelease> {
        let candidates = self.check_preconditions(graph, params)?;
        let n = graph.node_count();
        if n == 0 {
            return Ok(DegreeDistributionRelease {
                distribution: Vec::new(),
                truncation_threshold: 0.0,
            });
        }

        let sequence = DegreeSequence::of(graph);
        let d_hat = candidates[noise.uniform_index(candidates.len())];
        let truncated = graph.retain_nodes(|v| graph.degree(v) as f64 <= d_hat);
        let smooth = smooth_bound(&sequence, d_hat, params.beta);
        let scale = cauchy_scale(d_hat, params.epsilon, smooth);
        debug!(
            d_hat,
            kept = truncated.node_count(),
            removed = n - truncated.node_count(),
            "naive truncation applied"
        );

        let mut distribution = DegreeSequence::of(&truncated).distribution(n);
        for entry in distribution.iter_mut() {
            *entry += noise.cauchy(scale)?;
        }
        Ok(DegreeDistributionRelease {
            distribution,
            truncation_threshold: d_hat,
        })
    }

    /// Validates every parameter and precondition, returning the truncation
    /// candidates. Runs entirely before the first random draw, so checks on
    /// `D^` use the smallest candidate.
    pub fn check_preconditions(
        &self,
        graph: &Graph,
        params: &DegreeDistributionParams,
    ) -> NodeDpResult<Vec<f64>> {
        validate_epsilon(params.epsilon)?;
        if !params.beta.is_finite() || params.beta <= 0.0 {
            return Err(NodeDpError::InvalidBeta(params.beta));
        }
        if let Some(alpha) = params.alpha {
            if !(alpha > 1.0) || !alpha.is_finite() {
                return Err(NodeDpError::InvalidAlpha(alpha));
            }
        }
        if params.bound == 0 {
            return Err(NodeDpError::EmptyTruncationRange);
        }
        let n = graph.node_count();
        if n == 0 {
            return Ok(Vec::new());
        }

        let candidates = truncation_candidates(params.bound, params.beta, n);
        let smallest = candidates[0];
        let sequence = DegreeSequence::of(graph);
        let average = sequence.average();
        if smallest <= average {
            info!(smallest, average, "rejecting degree distribution: threshold too low");
            return Err(NodeDpError::BoundNotAboveAverageDegree {
                bound: smallest,
                average,
            });
        }
        if self.enforce_accuracy_preconditions {
            let floor = 4.0 / params.epsilon * (n as f64).ln();
            if smallest <= floor {
                return Err(NodeDpError::ThresholdBelowNoiseFloor {
                    threshold: smallest,
                    floor,
                });
            }
            if let Some(alpha) = params.alpha {
                if !AlphaDecayValidator::holds_for(&sequence, alpha)? {
                    return Err(NodeDpError::AlphaDecayViolated { alpha });
                }
            }
        }
        Ok(candidates)
    }
}

/// `{D + ln(n)/beta + i : i = 1..=D}` in ascending order.
pub fn truncation_candidates(bound: usize, beta: f64, n: usize) -> Vec<f64> {
    let offset = bound as f64 + (n as f64).ln() / beta;
    (1..=bound).map(|i| offset + i as f64).collect()
}

/// Smooth bound for naive truncation at `d_hat`:
/// `P(>= d_hat + ln(n)/beta) - P(>= d_hat - ln(n)/beta) + 1/beta + 1`.
pub fn smooth_bound(sequence: &DegreeSequence, d_hat: f64, beta: f64) -> f64 {
    let reach = (sequence.len() as f64).ln() / beta;
    let upper = d_hat + reach;
    let lower = d_hat - reach;
    sequence.tail_fraction(upper) - sequence.tail_fraction(lower) + 1.0 / beta + 1.0
}

pub fn cauchy_scale(d_hat: f64, epsilon: f64, smooth_bound: f64) -> f64 {
    2.0 * std::f64::consts::SQRT_2 * d_hat / epsilon * smooth_bound
}

/// Published l1 error bound `avg^alpha / D^^(alpha - 2) + D^^3 / n`. It
/// reads the true average degree, so it is for offline analysis only.
pub fn accuracy_bound(average_degree: f64, alpha: f64, d_hat: f64, n: usize) -> f64 {
    average_degree.powf(alpha) / d_hat.powf(alpha - 2.0) + d_hat.powi(3) / n as f64
}

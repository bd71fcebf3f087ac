use tracing::{debug, info};

use crate::{
    degree::DegreeSequence,
    errors::{NodeDpError, NodeDpResult},
    graph::Graph,
};

/// Offset checked just past each integer multiple of the average degree.
const BOUNDARY_OFFSET: f64 = 0.001;

/// A graph satisfies alpha-decay when, for every `t >= 1`, the fraction of
/// nodes with degree at least `t * avg_degree` is at most `t^-alpha`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlphaDecayValidator;

impl AlphaDecayValidator {
    pub fn holds(graph: &Graph, alpha: f64) -> NodeDpResult<bool> {
        Self::holds_for(&DegreeSequence::of(graph), alpha)
    }

    pub fn holds_for(sequence: &DegreeSequence, alpha: f64) -> NodeDpResult<bool> {
        if !(alpha > 1.0) || !alpha.is_finite() {
            return Err(NodeDpError::InvalidAlpha(alpha));
        }
        let n = sequence.len();
        let avg = sequence.average();
        if n == 0 || avg == 0.0 {
            debug!(n, "alpha-decay holds trivially on a graph without edges");
            return Ok(true);
        }
        for t in 1..=n {
            let t = t as f64;
            for multiple in [t, t + BOUNDARY_OFFSET] {
                let tail = sequence.tail_fraction(multiple * avg);
                if tail > multiple.powf(-alpha) {
                    info!(alpha, multiple, tail, "alpha-decay violated");
                    return Ok(false);
                }
            }
            // Beyond n no node can reach the threshold, so the tail is zero.
            if t * avg > n as f64 {
                break;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators;

    #[test]
    fn regular_graphs_decay_for_any_alpha() {
        let cycle = generators::cycle(20);
        assert!(AlphaDecayValidator::holds(&cycle, 2.0).unwrap());
        assert!(AlphaDecayValidator::holds(&cycle, 5.0).unwrap());
    }

    #[test]
    fn large_star_violates_decay() {
        let star = generators::star(1000);
        assert!(!AlphaDecayValidator::holds(&star, 1.5).unwrap());
        assert!(!AlphaDecayValidator::holds(&star, 2.0).unwrap());
    }

    #[test]
    fn tail_equal_to_the_bound_still_decays() {
        // star(4): avg 1.5 and P(deg >= 3) = 1/4 = 2^-2 exactly.
        let star = generators::star(4);
        assert!(AlphaDecayValidator::holds(&star, 2.0).unwrap());
        assert!(!AlphaDecayValidator::holds(&star, 2.01).unwrap());
    }

    #[test]
    fn star_violates_mild_decay_only_once_large() {
        // The hub is a 1/n tail out to t ~ n/2, so alpha = 1.1 first fails
        // once (n/2)^1.1 > n, i.e. n above roughly 2^11 = 2048.
        assert!(AlphaDecayValidator::holds(&generators::star(200), 1.1).unwrap());
        assert!(AlphaDecayValidator::holds(&generators::star(200), 1.15).unwrap());
        assert!(!AlphaDecayValidator::holds(&generators::star(10_000), 1.1).unwrap());
    }

    #[test]
    fn rejects_alpha_at_or_below_one() {
        let cycle = generators::cycle(5);
        for alpha in [1.0, 0.5, f64::NAN] {
            assert!(matches!(
                AlphaDecayValidator::holds(&cycle, alpha),
                Err(NodeDpError::InvalidAlpha(_))
            ));
        }
    }

    #[test]
    fn edgeless_graph_is_trivially_decaying() {
        let graph = generators::path(1);
        assert!(AlphaDecayValidator::holds(&graph, 1.2).unwrap());
    }
}

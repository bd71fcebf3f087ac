use serde::{Deserialize, Serialize};

use crate::errors::{NodeDpError, NodeDpResult};

const AFFINE_TOLERANCE: f64 = 1e-12;

/// Table `h` of a query `sum_v h(deg(v))`, interpolated between integer
/// degrees.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueryWeights {
    values: Vec<f64>,
}

impl QueryWeights {
    pub fn new(values: Vec<f64>) -> NodeDpResult<Self> {
        if values.is_empty() {
            return Err(NodeDpError::WeightsTooShort {
                len: 0,
                required: 1,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(NodeDpError::NonFiniteWeights);
        }
        Ok(Self { values })
    }

    /// `h(k) = k / 2` over `0..=bound`; summing over all nodes yields `|E|`.
    pub fn edge_count(bound: usize) -> Self {
        Self {
            values: (0..=bound).map(|k| k as f64 / 2.0).collect(),
        }
    }

    /// `h(k) = C(k, arms)` over `0..=bound`; summing yields the number of
    /// `arms`-stars.
    pub fn k_stars(arms: usize, bound: usize) -> Self {
        Self {
            values: (0..=bound).map(|k| binomial(k, arms)).collect(),
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Largest degree covered by the table.
    pub fn max_degree(&self) -> usize {
        self.values.len() - 1
    }

    /// The table restricted to degrees `0..=bound`.
    pub fn truncated(&self, bound: usize) -> NodeDpResult<Self> {
        let required = bound + 1;
        if self.values.len() < required {
            return Err(NodeDpError::WeightsTooShort {
                len: self.values.len(),
                required,
            });
        }
        Ok(Self {
            values: self.values[..required].to_vec(),
        })
    }

    pub fn interpolate(&self, degree: f64) -> NodeDpResult<f64> {
        let max_degree = self.max_degree();
        if !degree.is_finite() || degree < -AFFINE_TOLERANCE {
            return Err(NodeDpError::DegreeOutOfRange { degree, max_degree });
        }
        let degree = degree.max(0.0);
        if degree > max_degree as f64 + 1e-9 {
            return Err(NodeDpError::DegreeOutOfRange { degree, max_degree });
        }
        let lower = (degree.floor() as usize).min(max_degree);
        if lower == max_degree {
            return Ok(self.values[max_degree]);
        }
        let frac = degree - lower as f64;
        Ok(self.values[lower] + frac * self.slope(lower))
    }

    /// `h(k + 1) - h(k)`.
    pub fn slope(&self, k: usize) -> f64 {
        self.values[k + 1] - self.values[k]
    }

    pub fn max_abs_slope(&self) -> f64 {
        (0..self.max_degree())
            .map(|k| self.slope(k).abs())
            .fold(0.0, f64::max)
    }

    pub fn max_abs_value(&self) -> f64 {
        self.values.iter().map(|v| v.abs()).fold(0.0, f64::max)
    }

    /// `Some(slope)` when every consecutive difference is equal.
    pub fn affine_slope(&self) -> Option<f64> {
        if self.values.len() < 2 {
            return Some(0.0);
        }
        let first = self.slope(0);
        (1..self.max_degree())
            .all(|k| (self.slope(k) - first).abs() <= AFFINE_TOLERANCE * (1.0 + first.abs()))
            .then_some(first)
    }

    /// Node sensitivity of the `bound`-bounded quasiflow value: removing a
    /// node drops its own term (at most `max|h|`) and reroutes at most
    /// `bound` units into and out of its neighbours, each unit moving a
    /// neighbour's term by at most `max|slope|`.
    pub fn node_sensitivity(&self, bound: usize) -> NodeDpResult<f64> {
        let table = self.truncated(bound)?;
        Ok(table.max_abs_value() + 2.0 * bound as f64 * table.max_abs_slope())
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn interpolates_between_integer_degrees() {
        let weights = QueryWeights::new(vec![0.0, 1.0, 4.0]).unwrap();
        assert_relative_eq!(weights.interpolate(0.5).unwrap(), 0.5);
        assert_relative_eq!(weights.interpolate(1.25).unwrap(), 1.75);
        assert_relative_eq!(weights.interpolate(2.0).unwrap(), 4.0);
        assert!(matches!(
            weights.interpolate(2.5),
            Err(NodeDpError::DegreeOutOfRange { max_degree: 2, .. })
        ));
        assert!(weights.interpolate(-1.0).is_err());
    }

    #[test]
    fn truncation_is_bounds_checked() {
        let weights = QueryWeights::edge_count(3);
        assert_eq!(weights.truncated(2).unwrap().values(), &[0.0, 0.5, 1.0]);
        assert!(matches!(
            weights.truncated(5),
            Err(NodeDpError::WeightsTooShort { len: 4, required: 6 })
        ));
    }

    #[test]
    fn rejects_empty_and_non_finite_tables() {
        assert!(QueryWeights::new(vec![]).is_err());
        assert!(matches!(
            QueryWeights::new(vec![0.0, f64::NAN]),
            Err(NodeDpError::NonFiniteWeights)
        ));
    }

    #[test]
    fn star_weights_are_binomials() {
        let weights = QueryWeights::k_stars(2, 5);
        assert_eq!(weights.values(), &[0.0, 0.0, 1.0, 3.0, 6.0, 10.0]);
        assert_eq!(weights.affine_slope(), None);
        assert_eq!(QueryWeights::edge_count(6).affine_slope(), Some(0.5));
    }

    #[test]
    fn edge_count_sensitivity_stays_below_flow_scale() {
        // max|h| = D/2 and slope 1/2: D/2 + D.
        let sensitivity = QueryWeights::edge_count(4).node_sensitivity(4).unwrap();
        assert_relative_eq!(sensitivity, 6.0);
        assert!(sensitivity <= 2.0 * 4.0);
    }
}

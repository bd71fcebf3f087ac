use crate::{errors::NodeDpResult, graph::Graph, weights::QueryWeights};

/// Degree sequence sorted in descending order.
#[derive(Clone, Debug, PartialEq)]
pub struct DegreeSequence {
    degrees: Vec<usize>,
}

impl DegreeSequence {
    pub fn of(graph: &Graph) -> Self {
        let mut degrees: Vec<usize> = graph.nodes().map(|n| graph.degree(n)).collect();
        degrees.sort_unstable_by(|a, b| b.cmp(a));
        Self { degrees }
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.degrees
    }

    pub fn len(&self) -> usize {
        self.degrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.degrees.is_empty()
    }

    pub fn max_degree(&self) -> usize {
        self.degrees.first().copied().unwrap_or(0)
    }

    /// Mean degree, `2|E| / |V|`; zero on an empty sequence.
    pub fn average(&self) -> f64 {
        if self.degrees.is_empty() {
            return 0.0;
        }
        self.degrees.iter().sum::<usize>() as f64 / self.degrees.len() as f64
    }

    /// `p(k)`: fraction of nodes whose degree is exactly `k`.
    pub fn frequency(&self, k: usize) -> f64 {
        if self.degrees.is_empty() {
            return 0.0;
        }
        let count = self.degrees.iter().filter(|&&d| d == k).count();
        count as f64 / self.degrees.len() as f64
    }

    /// `P(k)`: fraction of nodes whose degree is at least `threshold`.
    pub fn tail_fraction(&self, threshold: f64) -> f64 {
        if self.degrees.is_empty() {
            return 0.0;
        }
        // Descending order, so the qualifying nodes form a prefix.
        let count = self.degrees.partition_point(|&d| d as f64 >= threshold);
        count as f64 / self.degrees.len() as f64
    }

    /// Histogram indexed by degree, length `max_degree + 1` (empty for an
    /// empty graph).
    pub fn histogram(&self) -> Vec<usize> {
        if self.degrees.is_empty() {
            return Vec::new();
        }
        let mut histogram = vec![0usize; self.max_degree() + 1];
        for &d in &self.degrees {
            histogram[d] += 1;
        }
        histogram
    }

    /// Empirical degree distribution over buckets `0..buckets`.
    pub fn distribution(&self, buckets: usize) -> Vec<f64> {
        let mut out = vec![0.0; buckets];
        if self.degrees.is_empty() {
            return out;
        }
        let total = self.degrees.len() as f64;
        for &d in &self.degrees {
            if d < buckets {
                out[d] += 1.0;
            }
        }
        out.iter_mut().for_each(|p| *p /= total);
        out
    }
}

pub fn average_degree(graph: &Graph) -> f64 {
    if graph.is_empty() {
        return 0.0;
    }
    2.0 * graph.edge_count() as f64 / graph.node_count() as f64
}

/// Exact value of a degree-linear query: `sum_v h(deg(v))`, using the
/// piecewise-linear interpolation of the weight table.
pub fn exact_count(graph: &Graph, weights: &QueryWeights) -> NodeDpResult<f64> {
    let histogram = DegreeSequence::of(graph).histogram();
    let mut total = 0.0;
    for (degree, count) in histogram.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        total += *count as f64 * weights.interpolate(degree as f64)?;
    }
    Ok(total)
}

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::{graph::Graph, noise::derive_seed};

pub fn path(n: usize) -> Graph {
    let mut graph = Graph::new();
    for v in 0..n as u64 {
        graph.add_node(v);
    }
    for v in 1..n as u64 {
        link(&mut graph, v - 1, v);
    }
    graph
}

pub fn cycle(n: usize) -> Graph {
    let mut graph = path(n);
    if n > 2 {
        link(&mut graph, n as u64 - 1, 0);
    }
    graph
}

/// Node `0` joined to nodes `1..n`.
pub fn star(n: usize) -> Graph {
    let mut graph = Graph::new();
    for v in 0..n as u64 {
        graph.add_node(v);
    }
    for leaf in 1..n as u64 {
        link(&mut graph, 0, leaf);
    }
    graph
}

pub fn complete(n: usize) -> Graph {
    let mut graph = Graph::new();
    for v in 0..n as u64 {
        graph.add_node(v);
    }
    for u in 0..n as u64 {
        for v in (u + 1)..n as u64 {
            link(&mut graph, u, v);
        }
    }
    graph
}

fn link(graph: &mut Graph, u: u64, v: u64) {
    // Generators never produce self-loops, so the error arm is unreachable.
    let _ = graph.add_edge(u, v);
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScaleFreeParams {
    /// Weight of "new node -> existing node chosen by in-degree".
    pub alpha: f64,
    /// Weight of "existing -> existing" chosen by out- and in-degree.
    pub beta: f64,
    /// Weight of "existing node chosen by out-degree -> new node".
    pub gamma: f64,
}

impl Default for ScaleFreeParams {
    fn default() -> Self {
        Self {
            alpha: 0.41,
            beta: 0.54,
            gamma: 0.05,
        }
    }
}

/// Directed preferential-attachment growth seeded with a 3-cycle, collapsed
/// to a simple undirected graph (self-loops and parallel edges dropped).
/// Growth stops once `n` nodes exist.
pub fn scale_free<R: RngCore>(n: usize, alpha: f64, beta: f64, gamma: f64, rng: &mut R) -> Graph {
    let params = ScaleFreeParams { alpha, beta, gamma };
    let mut graph = Graph::new();
    if n == 0 {
        return graph;
    }
    let seed_nodes = n.min(3) as u64;
    for v in 0..seed_nodes {
        graph.add_node(v);
    }
    // Endpoint multisets: sampling uniformly picks proportionally to degree.
    let mut sources: Vec<u64> = Vec::new();
    let mut targets: Vec<u64> = Vec::new();
    if seed_nodes == 3 {
        for (u, v) in [(0, 1), (1, 2), (2, 0)] {
            link(&mut graph, u, v);
            sources.push(u);
            targets.push(v);
        }
    }
    let total = (params.alpha + params.beta + params.gamma).max(f64::MIN_POSITIVE);
    // Without a node-adding branch growth would never reach `n`.
    let grows = params.alpha + params.gamma > 0.0;
    let mut next = seed_nodes;
    while (next as usize) < n {
        let r = rng.gen::<f64>() * total;
        let (u, v) = if r < params.alpha || targets.is_empty() || !grows {
            let fresh = next;
            next += 1;
            let target = pick(&targets, rng).unwrap_or(0);
            (fresh, target)
        } else if r < params.alpha + params.beta {
            let source = pick(&sources, rng).unwrap_or(0);
            let target = pick(&targets, rng).unwrap_or(0);
            (source, target)
        } else {
            let source = pick(&sources, rng).unwrap_or(0);
            let fresh = next;
            next += 1;
            (source, fresh)
        };
        graph.add_node(u);
        graph.add_node(v);
        if u != v {
            link(&mut graph, u, v);
        }
        sources.push(u);
        targets.push(v);
    }
    graph
}

fn pick<R: RngCore>(pool: &[u64], rng: &mut R) -> Option<u64> {
    if pool.is_empty() {
        return None;
    }
    Some(pool[rng.gen_range(0..pool.len())])
}

/// Deterministic generator stream derived from a label.
pub fn seeded_rng(label: impl AsRef<[u8]>) -> ChaCha20Rng {
    ChaCha20Rng::from_seed(derive_seed(b"nodedp/graph/", label.as_ref()))
}

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("self-loop on node {label} is not allowed in a simple graph")]
    SelfLoop { label: u64 },
    #[error("edge references node {label} which is not in the node set")]
    UnknownNode { label: u64 },
}

#[derive(Clone, Debug, Default)]
pub struct Graph {
    labels: Vec<u64>,
    lookup: HashMap<u64, NodeIndex>,
    adjacency: Vec<Vec<NodeIndex>>,
    edges: Vec<(NodeIndex, NodeIndex)>,
    edge_set: HashSet<(NodeIndex, NodeIndex)>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from an explicit node set and edge set. Every edge
    /// endpoint must appear in `nodes`; duplicate edges collapse.
    pub fn from_parts<N, E>(nodes: N, edges: E) -> Result<Self, GraphError>
    where
        N: IntoIterator<Item = u64>,
        E: IntoIterator<Item = (u64, u64)>,
    {
        let mut graph = Self::new();
        for label in nodes {
            graph.add_node(label);
        }
        for (u, v) in edges {
            for label in [u, v] {
                if !graph.lookup.contains_key(&label) {
                    return Err(GraphError::UnknownNode { label });
                }
            }
            graph.add_edge(u, v)?;
        }
        Ok(graph)
    }

    /// Builds a graph from an edge list, creating endpoints on demand.
    pub fn from_edges<E>(edges: E) -> Result<Self, GraphError>
    where
        E: IntoIterator<Item = (u64, u64)>,
    {
        let mut graph = Self::new();
        for (u, v) in edges {
            graph.add_edge(u, v)?;
        }
        Ok(graph)
    }

    pub fn add_node(&mut self, label: u64) -> NodeIndex {
        if let Some(idx) = self.lookup.get(&label) {
            return *idx;
        }
        let idx = NodeIndex(self.labels.len());
        self.labels.push(label);
        self.adjacency.push(Vec::new());
        self.lookup.insert(label, idx);
        idx
    }

    /// Inserts the undirected edge `{u, v}`. Returns `false` when the edge
    /// already existed.
    pub fn add_edge(&mut self, u: u64, v: u64) -> Result<bool, GraphError> {
        if u == v {
            return Err(GraphError::SelfLoop { label: u });
        }
        let a = self.add_node(u);
        let b = self.add_node(v);
        Ok(self.link(a, b))
    }

    fn link(&mut self, a: NodeIndex, b: NodeIndex) -> bool {
        let key = if a < b { (a, b) } else { (b, a) };
        if !self.edge_set.insert(key) {
            return false;
        }
        self.edges.push(key);
        self.adjacency[a.0].push(b);
        self.adjacency[b.0].push(a);
        true
    }

    pub fn node_count(&self) -> usize {
        self.labels.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        (0..self.labels.len()).map(NodeIndex)
    }

    /// Canonical `(low, high)` index pairs in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.edges.iter().copied()
    }

    pub fn neighbors(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.adjacency[node.0]
    }

    pub fn degree(&self, node: NodeIndex) -> usize {
        self.adjacency[node.0].len()
    }

    pub fn label(&self, node: NodeIndex) -> u64 {
        self.labels[node.0]
    }

    pub fn index_of(&self, label: u64) -> Option<NodeIndex> {
        self.lookup.get(&label).copied()
    }

    pub fn contains_edge(&self, u: u64, v: u64) -> bool {
        match (self.index_of(u), self.index_of(v)) {
            (Some(a), Some(b)) => {
                let key = if a < b { (a, b) } else { (b, a) };
                self.edge_set.contains(&key)
            }
            _ => false,
        }
    }

    /// Induced subgraph on the nodes accepted by `keep`. The receiver is
    /// left untouched; the result has a fresh arena.
    pub fn retain_nodes<F>(&self, mut keep: F) -> Graph
    where
        F: FnMut(NodeIndex) -> bool,
    {
        let kept: Vec<bool> = self.nodes().map(&mut keep).collect();
        let mut out = Graph::new();
        for node in self.nodes().filter(|n| kept[n.0]) {
            out.add_node(self.labels[node.0]);
        }
        for (a, b) in self.edges() {
            if kept[a.0] && kept[b.0] {
                let remapped_a = out.lookup[&self.labels[a.0]];
                let remapped_b = out.lookup[&self.labels[b.0]];
                out.link(remapped_a, remapped_b);
            }
        }
        out
    }
}

use std::collections::VecDeque;

use tracing::debug;

use crate::graph::{Graph, NodeIndex};

const FLOW_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowNode(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArcKind {
    Source,
    Sink,
    Edge,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowArc {
    pub from: FlowNode,
    pub to: FlowNode,
    pub capacity: f64,
    pub kind: ArcKind,
}

/// D-bounded projection network. Node `0` is the source, `1` the sink, then
/// a left and a right copy of every graph node. Source and sink arcs carry
/// capacity `D`; each edge `{u, v}` adds unit arcs `left(u) -> right(v)` and
/// `left(v) -> right(u)`.
#[derive(Clone, Debug)]
pub struct FlowGraph {
    graph_nodes: usize,
    capacity: f64,
    arcs: Vec<FlowArc>,
}

impl FlowGraph {
    pub const SOURCE: FlowNode = FlowNode(0);
    pub const SINK: FlowNode = FlowNode(1);

    pub fn build(graph: &Graph, capacity: f64) -> Self {
        let n = graph.node_count();
        let mut arcs = Vec::with_capacity(2 * n + 2 * graph.edge_count());
        for v in graph.nodes() {
            arcs.push(FlowArc {
                from: Self::SOURCE,
                to: left_of(v),
                capacity,
                kind: ArcKind::Source,
            });
        }
        for v in graph.nodes() {
            arcs.push(FlowArc {
                from: right_of(n, v),
                to: Self::SINK,
                capacity,
                kind: ArcKind::Sink,
            });
        }
        for (u, v) in graph.edges() {
            arcs.push(FlowArc {
                from: left_of(u),
                to: right_of(n, v),
                capacity: 1.0,
                kind: ArcKind::Edge,
            });
            arcs.push(FlowArc {
                from: left_of(v),
                to: right_of(n, u),
                capacity: 1.0,
                kind: ArcKind::Edge,
            });
        }
        debug!(nodes = 2 * n + 2, arcs = arcs.len(), capacity, "built flow graph");
        Self {
            graph_nodes: n,
            capacity,
            arcs,
        }
    }

    pub fn node_count(&self) -> usize {
        2 * self.graph_nodes + 2
    }

    pub fn graph_nodes(&self) -> usize {
        self.graph_nodes
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn arcs(&self) -> &[FlowArc] {
        &self.arcs
    }

    pub fn left(&self, v: NodeIndex) -> FlowNode {
        left_of(v)
    }

    pub fn right(&self, v: NodeIndex) -> FlowNode {
        right_of(self.graph_nodes, v)
    }

    /// Index of the `right(v) -> sink` arc.
    pub fn sink_arc(&self, v: NodeIndex) -> usize {
        self.graph_nodes + v.index()
    }

    /// Every node except the source and the sink.
    pub fn internal_nodes(&self) -> impl Iterator<Item = FlowNode> {
        (2..self.node_count()).map(FlowNode)
    }

    /// Exact maximum source-to-sink flow.
    pub fn max_flow(&self) -> MaxFlow {
        Dinic::new(self).run()
    }
}

fn left_of(v: NodeIndex) -> FlowNode {
    FlowNode(2 + v.index())
}

fn right_of(graph_nodes: usize, v: NodeIndex) -> FlowNode {
    FlowNode(2 + graph_nodes + v.index())
}

#[derive(Clone, Debug)]
pub struct MaxFlow {
    pub value: f64,
    /// Flow on each arc, aligned with [`FlowGraph::arcs`].
    pub arc_flows: Vec<f64>,
}

/// Residual edges are stored in pairs: `2i` is arc `i`, `2i + 1` its reverse.
struct Dinic {
    head: Vec<Vec<usize>>,
    to: Vec<usize>,
    residual: Vec<f64>,
    level: Vec<i64>,
    cursor: Vec<usize>,
    source: usize,
    sink: usize,
    arc_count: usize,
}

impl Dinic {
    fn new(flow: &FlowGraph) -> Self {
        let nodes = flow.node_count();
        let mut head = vec![Vec::new(); nodes];
        let mut to = Vec::with_capacity(2 * flow.arcs.len());
        let mut residual = Vec::with_capacity(2 * flow.arcs.len());
        for arc in &flow.arcs {
            head[arc.from.0].push(to.len());
            to.push(arc.to.0);
            residual.push(arc.capacity);
            head[arc.to.0].push(to.len());
            to.push(arc.from.0);
            residual.push(0.0);
        }
        Self {
            head,
            to,
            residual,
            level: vec![-1; nodes],
            cursor: vec![0; nodes],
            source: FlowGraph::SOURCE.0,
            sink: FlowGraph::SINK.0,
            arc_count: flow.arcs.len(),
        }
    }

    fn run(mut self) -> MaxFlow {
        let mut value = 0.0;
        while self.layer() {
            self.cursor.iter_mut().for_each(|c| *c = 0);
            loop {
                let pushed = self.augment(self.source, f64::INFINITY);
                if pushed <= FLOW_EPSILON {
                    break;
                }
                value += pushed;
            }
        }
        // Flow on arc i equals the residual capacity of its reverse edge.
        let arc_flows = (0..self.arc_count)
            .map(|i| self.residual[2 * i + 1])
            .collect();
        MaxFlow { value, arc_flows }
    }

    fn layer(&mut self) -> bool {
        self.level.iter_mut().for_each(|l| *l = -1);
        self.level[self.source] = 0;
        let mut queue = VecDeque::from([self.source]);
        while let Some(node) = queue.pop_front() {
            for &edge in &self.head[node] {
                let next = self.to[edge];
                if self.residual[edge] > FLOW_EPSILON && self.level[next] < 0 {
                    self.level[next] = self.level[node] + 1;
                    queue.push_back(next);
                }
            }
        }
        self.level[self.sink] >= 0
    }

    fn augment(&mut self, node: usize, limit: f64) -> f64 {
        if node == self.sink {
            return limit;
        }
        while self.cursor[node] < self.head[node].len() {
            let edge = self.head[node][self.cursor[node]];
            let next = self.to[edge];
            if self.residual[edge] > FLOW_EPSILON && self.level[next] == self.level[node] + 1 {
                let pushed = self.augment(next, limit.min(self.residual[edge]));
                if pushed > FLOW_EPSILON {
                    self.residual[edge] -= pushed;
                    self.residual[edge ^ 1] += pushed;
                    return pushed;
                }
            }
            self.cursor[node] += 1;
        }
        0.0
    }
}

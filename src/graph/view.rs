//! Graph abstraction used by the path engine and analytics.
//!
//! Callers build a [`GraphView`] from the current graph state (optionally
//! filtered) and run algorithms against it. [`PetgraphView`] is the provided
//! implementation on top of `petgraph`.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences, NodeIndexable};
use petgraph::Direction;

/// Edge payload: one trust relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustEdge {
    /// Relationship backing this edge.
    pub relationship_id: String,
    /// Trust score of the relationship.
    pub trust_score: f64,
}

/// A simple path as parallel node and edge sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgePath {
    /// Entity IDs from source to target.
    pub nodes: Vec<String>,
    /// Edges between consecutive nodes (`nodes.len() - 1` entries).
    pub edges: Vec<TrustEdge>,
}

/// Directed multigraph over entity IDs.
pub trait GraphView {
    /// Add a node; adding an existing node is a no-op.
    fn add_node(&mut self, id: &str);

    /// Add a directed edge, creating missing endpoints.
    fn add_edge(&mut self, source: &str, target: &str, edge: TrustEdge);

    /// Number of nodes.
    fn node_count(&self) -> usize;

    /// Number of edges (parallel edges counted separately).
    fn edge_count(&self) -> usize;

    /// Number of distinct predecessors.
    fn in_degree(&self, id: &str) -> usize;

    /// Number of distinct successors.
    fn out_degree(&self, id: &str) -> usize;

    /// All simple paths from `source` to `target` with at most `max_length`
    /// edges, in depth-first discovery order.
    fn simple_paths(&self, source: &str, target: &str, max_length: usize) -> Vec<EdgePath>;

    /// Normalised betweenness centrality per node.
    fn betweenness(&self) -> HashMap<String, f64>;

    /// Trust-weighted PageRank per node.
    fn rank(&self) -> HashMap<String, f64>;
}

const RANK_DAMPING: f64 = 0.85;
const RANK_MAX_ITERATIONS: usize = 100;
const RANK_TOLERANCE: f64 = 1.0e-6;

/// [`GraphView`] backed by a `petgraph` stable directed graph.
#[derive(Debug, Clone, Default)]
pub struct PetgraphView {
    graph: StableDiGraph<String, TrustEdge>,
    index: HashMap<String, NodeIndex>,
}

impl PetgraphView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.index.insert(id.to_string(), idx);
        idx
    }

    /// Outgoing edges of `node` in insertion order.
    fn ordered_edges(&self, node: NodeIndex) -> Vec<(NodeIndex, &TrustEdge)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), e.weight()))
            .collect();
        edges.sort_by_key(|(id, _, _)| id.index());
        edges.into_iter().map(|(_, t, w)| (t, w)).collect()
    }

    /// Distinct successors of `node`, in first-edge order.
    fn successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        self.ordered_edges(node)
            .into_iter()
            .filter_map(|(t, _)| seen.insert(t).then_some(t))
            .collect()
    }

    fn distinct_neighbors(&self, id: &str, direction: Direction) -> usize {
        self.index
            .get(id)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0)
    }

    fn walk(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        max_length: usize,
        on_path: &mut HashSet<NodeIndex>,
        nodes: &mut Vec<NodeIndex>,
        edges: &mut Vec<TrustEdge>,
        out: &mut Vec<EdgePath>,
    ) {
        if edges.len() >= max_length {
            return;
        }
        for (next, edge) in self.ordered_edges(current) {
            if on_path.contains(&next) {
                continue;
            }
            if next == target {
                let mut path_nodes: Vec<String> =
                    nodes.iter().map(|&n| self.graph[n].clone()).collect();
                path_nodes.push(self.graph[next].clone());
                let mut path_edges = edges.clone();
                path_edges.push(edge.clone());
                out.push(EdgePath {
                    nodes: path_nodes,
                    edges: path_edges,
                });
                continue;
            }
            on_path.insert(next);
            nodes.push(next);
            edges.push(edge.clone());
            self.walk(next, target, max_length, on_path, nodes, edges, out);
            edges.pop();
            nodes.pop();
            on_path.remove(&next);
        }
    }
}

impl GraphView for PetgraphView {
    fn add_node(&mut self, id: &str) {
        self.node(id);
    }

    fn add_edge(&mut self, source: &str, target: &str, edge: TrustEdge) {
        let s = self.node(source);
        let t = self.node(target);
        self.graph.add_edge(s, t, edge);
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn in_degree(&self, id: &str) -> usize {
        self.distinct_neighbors(id, Direction::Incoming)
    }

    fn out_degree(&self, id: &str) -> usize {
        self.distinct_neighbors(id, Direction::Outgoing)
    }

    fn simple_paths(&self, source: &str, target: &str, max_length: usize) -> Vec<EdgePath> {
        let (Some(&s), Some(&t)) = (self.index.get(source), self.index.get(target)) else {
            return Vec::new();
        };
        if s == t || max_length == 0 {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut on_path = HashSet::from([s]);
        let mut nodes = vec![s];
        let mut edges = Vec::new();
        self.walk(s, t, max_length, &mut on_path, &mut nodes, &mut edges, &mut out);
        out
    }

    // Brandes' algorithm over unweighted shortest paths.
    fn betweenness(&self) -> HashMap<String, f64> {
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let n = nodes.len();
        let bound = self.graph.node_bound();
        let mut centrality = vec![0.0_f64; bound];

        for &s in &nodes {
            let mut stack = Vec::with_capacity(n);
            let mut preds: Vec<Vec<NodeIndex>> = vec![Vec::new(); bound];
            let mut sigma = vec![0.0_f64; bound];
            let mut dist = vec![-1_i64; bound];
            sigma[s.index()] = 1.0;
            dist[s.index()] = 0;

            let mut queue = VecDeque::from([s]);
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                for w in self.successors(v) {
                    if dist[w.index()] < 0 {
                        dist[w.index()] = dist[v.index()] + 1;
                        queue.push_back(w);
                    }
                    if dist[w.index()] == dist[v.index()] + 1 {
                        sigma[w.index()] += sigma[v.index()];
                        preds[w.index()].push(v);
                    }
                }
            }

            let mut delta = vec![0.0_f64; bound];
            while let Some(w) = stack.pop() {
                for &v in &preds[w.index()] {
                    delta[v.index()] +=
                        sigma[v.index()] / sigma[w.index()] * (1.0 + delta[w.index()]);
                }
                if w != s {
                    centrality[w.index()] += delta[w.index()];
                }
            }
        }

        let scale = if n > 2 {
            1.0 / ((n - 1) as f64 * (n - 2) as f64)
        } else {
            0.0
        };

        nodes
            .into_iter()
            .map(|idx| (self.graph[idx].clone(), centrality[idx.index()] * scale))
            .collect()
    }

    fn rank(&self) -> HashMap<String, f64> {
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let n = nodes.len();
        if n == 0 {
            return HashMap::new();
        }
        let bound = self.graph.node_bound();
        let n_f = n as f64;

        let mut out_weight = vec![0.0_f64; bound];
        for edge in self.graph.edge_references() {
            out_weight[edge.source().index()] += edge.weight().trust_score;
        }

        let mut rank = vec![0.0_f64; bound];
        for &idx in &nodes {
            rank[idx.index()] = 1.0 / n_f;
        }

        for _ in 0..RANK_MAX_ITERATIONS {
            let previous = rank.clone();
            let dangling: f64 = nodes
                .iter()
                .filter(|idx| out_weight[idx.index()] <= 0.0)
                .map(|idx| previous[idx.index()])
                .sum();
            let base = (1.0 - RANK_DAMPING) / n_f + RANK_DAMPING * dangling / n_f;

            for &idx in &nodes {
                rank[idx.index()] = base;
            }
            for edge in self.graph.edge_references() {
                let source = edge.source().index();
                if out_weight[source] > 0.0 {
                    rank[edge.target().index()] += RANK_DAMPING
                        * previous[source]
                        * edge.weight().trust_score
                        / out_weight[source];
                }
            }

            let error: f64 = nodes
                .iter()
                .map(|idx| (rank[idx.index()] - previous[idx.index()]).abs())
                .sum();
            if error < n_f * RANK_TOLERANCE {
                break;
            }
        }

        nodes
            .into_iter()
            .map(|idx| (self.graph[idx].clone(), rank[idx.index()]))
            .collect()
    }
}

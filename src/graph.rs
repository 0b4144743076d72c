use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::candidates::{CandidatePair, Key, PairKey};
use crate::error::{MatchError, Result};

pub type Scores<S> = BTreeMap<PairKey<S>, f64>;

/// Weight given to edges whose pair has no score.
pub const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    pub weight: f64,
}

impl Edge {
    pub fn other(&self, node: usize) -> usize {
        if self.a == node {
            self.b
        } else {
            self.a
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompatibilityGraph<S> {
    nodes: Vec<S>,
    edges: Vec<Edge>,
    weighted: bool,
    #[serde(skip)]
    index: BTreeMap<S, usize>,
    #[serde(skip)]
    adjacency: Vec<Vec<usize>>,
    #[serde(skip)]
    edge_ids: BTreeMap<(usize, usize), usize>,
}

impl<S: Key> Default for CompatibilityGraph<S> {
    fn default() -> Self {
        CompatibilityGraph {
            nodes: Vec::new(),
            edges: Vec::new(),
            weighted: false,
            index: BTreeMap::new(),
            adjacency: Vec::new(),
            edge_ids: BTreeMap::new(),
        }
    }
}

impl<S: Key> CompatibilityGraph<S> {
    /// Builds the graph for a set of candidates.
    ///
    /// Nodes are inserted in ascending subject order and edges in ascending
    /// pair-key order. A pair's weight comes from `scores` first, then from
    /// the candidate's own score, then [`DEFAULT_WEIGHT`].
    pub fn from_candidates<T>(
        candidates: &[CandidatePair<S, T>],
        scores: Option<&Scores<S>>,
    ) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for candidate in candidates {
            if !seen.insert(&candidate.key) {
                return Err(MatchError::Validation(format!(
                    "pair {:?} appears more than once among the candidates",
                    candidate.key
                )));
            }
        }

        if let Some(scores) = scores {
            if let Some(unknown) = scores.keys().find(|key| !seen.contains(key)) {
                return Err(MatchError::Validation(format!(
                    "score given for {unknown:?}, which is not a candidate pair"
                )));
            }
        }

        let mut graph = CompatibilityGraph::default();
        let subjects: BTreeSet<&S> = candidates
            .iter()
            .flat_map(|c| [c.key.first(), c.key.second()])
            .collect();
        for subject in subjects {
            graph.add_node(subject.clone());
        }

        let mut ordered: Vec<&CandidatePair<S, T>> = candidates.iter().collect();
        ordered.sort_by(|x, y| x.key.cmp(&y.key));
        for candidate in ordered {
            let score = scores
                .and_then(|scores| scores.get(&candidate.key).copied())
                .or(candidate.score);
            if let Some(score) = score {
                if !score.is_finite() {
                    return Err(MatchError::Validation(format!(
                        "score {score} for {:?} is not a finite number",
                        candidate.key
                    )));
                }
                graph.weighted = true;
            }

            let a = graph.require(candidate.key.first())?;
            let b = graph.require(candidate.key.second())?;
            graph.add_edge(a, b, score.unwrap_or(DEFAULT_WEIGHT))?;
        }

        debug!(
            event = "graph_built",
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            weighted = graph.weighted,
        );
        Ok(graph)
    }

    /// Adds a subject, returning its node id. Adding a known subject returns
    /// the existing id.
    pub fn add_node(&mut self, subject: S) -> usize {
        if let Some(&id) = self.index.get(&subject) {
            return id;
        }
        let id = self.nodes.len();
        self.index.insert(subject.clone(), id);
        self.nodes.push(subject);
        self.adjacency.push(Vec::new());
        id
    }

    pub fn add_edge(&mut self, id1: usize, id2: usize, weight: f64) -> Result<usize> {
        if id1 >= self.nodes.len() || id2 >= self.nodes.len() {
            return Err(MatchError::Validation(format!(
                "edge ({id1}, {id2}) refers to a node outside the graph"
            )));
        }
        if id1 == id2 {
            return Err(MatchError::Validation(format!(
                "self-loop on subject {:?}",
                self.nodes[id1]
            )));
        }

        let slot = (id1.min(id2), id1.max(id2));
        if self.edge_ids.contains_key(&slot) {
            return Err(MatchError::Validation(format!(
                "duplicate edge between {:?} and {:?}",
                self.nodes[id1], self.nodes[id2]
            )));
        }

        let id = self.edges.len();
        self.edges.push(Edge {
            a: slot.0,
            b: slot.1,
            weight,
        });
        self.edge_ids.insert(slot, id);
        self.adjacency[id1].push(id);
        self.adjacency[id2].push(id);
        Ok(id)
    }

    fn require(&self, subject: &S) -> Result<usize> {
        self.index_of(subject).ok_or_else(|| {
            MatchError::Validation(format!("subject {subject:?} is not a node of the graph"))
        })
    }

    pub fn nodes(&self) -> &[S] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &S {
        &self.nodes[id]
    }

    pub fn index_of(&self, subject: &S) -> Option<usize> {
        self.index.get(subject).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Weight of the edge between two nodes, if there is one.
    pub fn edge(&self, id1: usize, id2: usize) -> Option<f64> {
        self.edge_ids
            .get(&(id1.min(id2), id1.max(id2)))
            .map(|&e| self.edges[e].weight)
    }

    pub fn edges_for(&self, id: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.adjacency[id].iter().map(move |&e| {
            let edge = &self.edges[e];
            (edge.other(id), edge.weight)
        })
    }

    pub fn pair_key(&self, edge: usize) -> PairKey<S> {
        let Edge { a, b, .. } = self.edges[edge];
        let (first, second) = if self.node(a) < self.node(b) {
            (a, b)
        } else {
            (b, a)
        };
        PairKey::from_ordered(self.node(first).clone(), self.node(second).clone())
    }

    pub fn is_weighted(&self) -> bool {
        self.weighted
    }
}

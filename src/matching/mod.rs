//! Optimal matching with a fixed tie-break: of all optimal matchings the one
//! with the lexicographically smallest sorted pair-key sequence is returned.

mod cardinality;
mod weighted;

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, trace};

use crate::candidates::Key;
use crate::error::{invariant, MatchError, Result};
use crate::graph::CompatibilityGraph;

use self::weighted::WeightedBlossom;

#[derive(Debug, Clone, Copy, Default)]
pub struct SolveOptions {
    /// Maximize the number of pairs first and weight second. When false,
    /// only total weight counts and edges weighing zero or less are never
    /// selected.
    pub max_cardinality: bool,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Matching {
    pub edges: Vec<usize>,
    pub weight: f64,
}

impl Matching {
    pub fn cardinality(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Finds the canonical optimal matching of `graph`.
pub fn solve<S: Key>(graph: &CompatibilityGraph<S>, options: &SolveOptions) -> Result<Matching> {
    let problem = Problem::new(graph, options);
    debug!(
        event = "solver_dispatch",
        nodes = problem.n,
        edges = problem.edges.len(),
        dropped = graph.edge_count() - problem.edges.len(),
        uniform = problem.uniform,
        max_cardinality = options.max_cardinality,
    );

    let (kept, resolves) = canonical(&problem, options.deadline)?;

    let mut edges: Vec<usize> = kept.iter().map(|&k| problem.ids[k]).collect();
    edges.sort_by_cached_key(|&e| graph.pair_key(e));
    let matching = Matching {
        weight: edges.iter().map(|&e| graph.edges()[e].weight).sum(),
        edges,
    };
    debug!(
        event = "matching_solved",
        cardinality = matching.cardinality(),
        weight = matching.weight,
        resolves,
    );
    Ok(matching)
}

/// Walks the edges in key order and keeps each one that some optimal
/// matching shares with every edge kept so far. Returns the kept edges and
/// the number of sub-solves it took.
fn canonical(problem: &Problem, deadline: Option<Instant>) -> Result<(Vec<usize>, usize)> {
    let first = problem.optimum(&vec![false; problem.n], deadline)?;
    let best = problem.score(&first.edges, Score::default());
    let tight = first.tight;
    let mut current = first.edges;

    let mut kept: Vec<usize> = Vec::new();
    let mut kept_score = Score::default();
    let mut used = vec![false; problem.n];
    let mut resolves = 0usize;
    for e in 0..problem.edges.len() {
        let (a, b, w) = problem.edges[e];
        if used[a] || used[b] {
            continue;
        }

        if !current.contains(&e) {
            if !tight[e] {
                continue;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(MatchError::DeadlineExceeded { stages: resolves });
            }
            resolves += 1;

            let mut blocked = used.clone();
            blocked[a] = true;
            blocked[b] = true;
            let rest = if problem.uniform {
                problem.regrow(&blocked, &current, [a, b], deadline)?
            } else {
                problem.optimum(&blocked, deadline)?.edges
            };
            let total = problem.score(&rest, kept_score.add(w));
            if !problem.same_objective(&total, &best) {
                continue;
            }
            trace!(event = "tie_break_swap", edge = e, resolves);
            current = kept.iter().copied().chain([e]).chain(rest).collect();
        }

        kept.push(e);
        kept_score = kept_score.add(w);
        used[a] = true;
        used[b] = true;
    }

    current.sort_unstable();
    invariant(
        kept == current,
        "canonical matching differs from the optimum it was derived from",
    )?;
    Ok((kept, resolves))
}

/// A running total of matched edges, summed with Neumaier compensation so
/// that equal totals reached in different orders compare equal.
#[derive(Debug, Clone, Copy, Default)]
struct Score {
    cardinality: usize,
    sum: f64,
    carry: f64,
    /// Sum of absolute weights; bounds the rounding error of `total`.
    magnitude: f64,
}

impl Score {
    fn add(self, weight: f64) -> Score {
        let sum = self.sum + weight;
        let lost = if self.sum.abs() >= weight.abs() {
            (self.sum - sum) + weight
        } else {
            (weight - sum) + self.sum
        };
        Score {
            cardinality: self.cardinality + 1,
            sum,
            carry: self.carry + lost,
            magnitude: self.magnitude + weight.abs(),
        }
    }

    fn total(&self) -> f64 {
        self.sum + self.carry
    }
}

struct Optimum {
    edges: Vec<usize>,
    /// Whether each edge of the problem may lie in an optimal matching.
    tight: Vec<bool>,
}

/// The usable edges of a graph in ascending pair-key order, as the solvers
/// see them.
struct Problem {
    n: usize,
    edges: Vec<(usize, usize, f64)>,
    /// Graph edge id of each entry in `edges`.
    ids: Vec<usize>,
    lookup: BTreeMap<(usize, usize), usize>,
    uniform: bool,
    max_cardinality: bool,
}

impl Problem {
    fn new<S: Key>(graph: &CompatibilityGraph<S>, options: &SolveOptions) -> Self {
        let mut ids: Vec<usize> = (0..graph.edge_count())
            .filter(|&e| options.max_cardinality || graph.edges()[e].weight > 0.0)
            .collect();
        ids.sort_by_cached_key(|&e| graph.pair_key(e));

        let edges: Vec<(usize, usize, f64)> = ids
            .iter()
            .map(|&e| {
                let edge = graph.edges()[e];
                (edge.a, edge.b, edge.weight)
            })
            .collect();
        let lookup = edges
            .iter()
            .enumerate()
            .map(|(i, &(a, b, _))| ((a.min(b), a.max(b)), i))
            .collect();
        let uniform = edges.windows(2).all(|w| w[0].2 == w[1].2);

        Problem {
            n: graph.node_count(),
            edges,
            ids,
            lookup,
            uniform,
            max_cardinality: options.max_cardinality,
        }
    }

    fn adjacency(&self, blocked: &[bool]) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.n];
        for &(a, b, _) in &self.edges {
            if !blocked[a] && !blocked[b] {
                adjacency[a].push(b);
                adjacency[b].push(a);
            }
        }
        adjacency
    }

    /// An optimal matching of the subgraph without the `blocked` vertices.
    fn optimum(&self, blocked: &[bool], deadline: Option<Instant>) -> Result<Optimum> {
        if self.uniform {
            let mate = cardinality::maximum_cardinality(&self.adjacency(blocked), deadline)?;
            return Ok(Optimum {
                edges: self.chosen(&mate, blocked)?,
                tight: vec![true; self.edges.len()],
            });
        }

        let open: Vec<usize> = (0..self.edges.len())
            .filter(|&k| {
                let (a, b, _) = self.edges[k];
                !blocked[a] && !blocked[b]
            })
            .collect();
        let edges = open.iter().map(|&k| self.edges[k]).collect();
        let solved = WeightedBlossom::new(self.n, edges, self.max_cardinality).solve(deadline)?;

        let mut tight = vec![false; self.edges.len()];
        for (&k, &t) in open.iter().zip(&solved.tight) {
            tight[k] = t;
        }
        Ok(Optimum {
            edges: self.chosen(&solved.mate, blocked)?,
            tight,
        })
    }

    /// Uniform weights only. `current` is a maximum matching of the
    /// subgraph without the vertices blocked before `freed` joined them, so
    /// every augmenting path for what is left of it ends at a former mate of
    /// a `freed` vertex.
    fn regrow(
        &self,
        blocked: &[bool],
        current: &[usize],
        freed: [usize; 2],
        deadline: Option<Instant>,
    ) -> Result<Vec<usize>> {
        let mut mate = vec![None; self.n];
        let mut roots = Vec::new();
        for &k in current {
            let (a, b, _) = self.edges[k];
            if !blocked[a] && !blocked[b] {
                mate[a] = Some(b);
                mate[b] = Some(a);
            } else if freed.contains(&a) && !blocked[b] {
                roots.push(b);
            } else if freed.contains(&b) && !blocked[a] {
                roots.push(a);
            }
        }
        let mate = cardinality::grow(&self.adjacency(blocked), mate, roots, deadline)?;
        self.chosen(&mate, blocked)
    }

    fn chosen(&self, mate: &[Option<usize>], blocked: &[bool]) -> Result<Vec<usize>> {
        let mut chosen = Vec::new();
        for (v, m) in mate.iter().enumerate() {
            let Some(w) = *m else { continue };
            invariant(mate.get(w) == Some(&Some(v)), "mate relation is not symmetric")?;
            if v < w {
                let e = self.lookup.get(&(v, w)).copied().ok_or_else(|| {
                    MatchError::SolverInvariant(format!("vertices {v} and {w} matched without an edge"))
                })?;
                invariant(!blocked[v] && !blocked[w], "blocked vertex was matched")?;
                chosen.push(e);
            }
        }
        chosen.sort_unstable();
        Ok(chosen)
    }

    fn score(&self, chosen: &[usize], start: Score) -> Score {
        chosen.iter().fold(start, |s, &e| s.add(self.edges[e].2))
    }

    fn same_objective(&self, a: &Score, b: &Score) -> bool {
        let rounding = 4.0 * f64::EPSILON * a.magnitude.max(b.magnitude);
        let close = (a.total() - b.total()).abs() <= rounding;
        if self.max_cardinality || self.uniform {
            a.cardinality == b.cardinality && close
        } else {
            close
        }
    }
}

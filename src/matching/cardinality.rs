//! Maximum-cardinality matching for graphs whose edges all weigh the same.
//!
//! Edmonds' blossom search without duals: a breadth-first alternating tree
//! is grown from each free vertex, odd cycles are contracted by pointing
//! their members at a shared base, and the first free vertex reached closes
//! an augmenting path.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::trace;

use crate::error::{MatchError, Result};

struct Search<'a> {
    adjacency: &'a [Vec<usize>],
    mate: Vec<Option<usize>>,
    parent: Vec<Option<usize>>,
    base: Vec<usize>,
    in_tree: Vec<bool>,
    queue: VecDeque<usize>,
}

/// Returns, for every vertex, its partner in a maximum-cardinality matching.
pub(crate) fn maximum_cardinality(
    adjacency: &[Vec<usize>],
    deadline: Option<Instant>,
) -> Result<Vec<Option<usize>>> {
    let n = adjacency.len();
    grow(adjacency, vec![None; n], 0..n, deadline)
}

/// Grows `mate` by searching for augmenting paths from `roots` only.
///
/// The result is maximum whenever every augmenting path for `mate` has an
/// end among `roots`.
pub(crate) fn grow(
    adjacency: &[Vec<usize>],
    mate: Vec<Option<usize>>,
    roots: impl IntoIterator<Item = usize>,
    deadline: Option<Instant>,
) -> Result<Vec<Option<usize>>> {
    let n = adjacency.len();
    let mut search = Search {
        adjacency,
        mate,
        parent: vec![None; n],
        base: (0..n).collect(),
        in_tree: vec![false; n],
        queue: VecDeque::new(),
    };

    let mut augmentations = 0;
    for root in roots {
        if search.mate[root].is_some() {
            continue;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(MatchError::DeadlineExceeded {
                stages: augmentations,
            });
        }
        if let Some(end) = search.find_path(root)? {
            search.augment(end)?;
            augmentations += 1;
        }
    }

    trace!(event = "cardinality_done", augmentations);
    Ok(search.mate)
}

impl Search<'_> {
    fn find_path(&mut self, root: usize) -> Result<Option<usize>> {
        let adjacency = self.adjacency;
        let n = adjacency.len();
        self.parent.iter_mut().for_each(|p| *p = None);
        self.in_tree.iter_mut().for_each(|t| *t = false);
        for (v, b) in self.base.iter_mut().enumerate() {
            *b = v;
        }
        self.queue.clear();

        self.in_tree[root] = true;
        self.queue.push_back(root);

        while let Some(v) = self.queue.pop_front() {
            for &to in &adjacency[v] {
                if self.base[v] == self.base[to] || self.mate[v] == Some(to) {
                    continue;
                }

                let closes_cycle = to == root
                    || self.mate[to].is_some_and(|m| self.parent[m].is_some());
                if closes_cycle {
                    let lca = self.common_base(v, to)?;
                    let mut in_blossom = vec![false; n];
                    self.mark_path(v, lca, to, &mut in_blossom)?;
                    self.mark_path(to, lca, v, &mut in_blossom)?;
                    for i in 0..n {
                        if in_blossom[self.base[i]] {
                            self.base[i] = lca;
                            if !self.in_tree[i] {
                                self.in_tree[i] = true;
                                self.queue.push_back(i);
                            }
                        }
                    }
                } else if self.parent[to].is_none() {
                    self.parent[to] = Some(v);
                    match self.mate[to] {
                        None => return Ok(Some(to)),
                        Some(next) => {
                            self.in_tree[next] = true;
                            self.queue.push_back(next);
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Nearest common base of `a` and `b` along their paths to the root.
    fn common_base(&self, a: usize, b: usize) -> Result<usize> {
        let mut seen = vec![false; self.adjacency.len()];
        let mut a = a;
        loop {
            a = self.base[a];
            seen[a] = true;
            match self.mate[a] {
                None => break,
                Some(m) => a = self.step_back(m)?,
            }
        }

        let mut b = b;
        loop {
            b = self.base[b];
            if seen[b] {
                return Ok(b);
            }
            let m = self.mate[b].ok_or_else(|| {
                MatchError::SolverInvariant(format!("no common base for {a} and {b}"))
            })?;
            b = self.step_back(m)?;
        }
    }

    fn mark_path(
        &mut self,
        mut v: usize,
        lca: usize,
        mut child: usize,
        in_blossom: &mut [bool],
    ) -> Result<()> {
        while self.base[v] != lca {
            let m = self.mate[v].ok_or_else(|| {
                MatchError::SolverInvariant(format!("blossom member {v} is unmatched"))
            })?;
            in_blossom[self.base[v]] = true;
            in_blossom[self.base[m]] = true;
            self.parent[v] = Some(child);
            child = m;
            v = self.step_back(m)?;
        }
        Ok(())
    }

    fn step_back(&self, v: usize) -> Result<usize> {
        self.parent[v]
            .ok_or_else(|| MatchError::SolverInvariant(format!("vertex {v} has no tree parent")))
    }

    /// Flips the alternating path ending at the free vertex `end`.
    fn augment(&mut self, end: usize) -> Result<()> {
        let mut v = Some(end);
        while let Some(cur) = v {
            let pv = self.step_back(cur)?;
            let next = self.mate[pv];
            self.mate[cur] = Some(pv);
            self.mate[pv] = Some(cur);
            v = next;
        }
        Ok(())
    }
}

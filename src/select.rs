//! Selection: candidates in, subject-disjoint matches out.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::candidates::{CandidatePair, Key, PairKey};
use crate::error::{MatchError, Result};
use crate::graph::{CompatibilityGraph, Scores};
use crate::matching::{self, SolveOptions};

#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Requested objective. `None` picks maximum cardinality for unscored
    /// input and pure maximum weight for scored input. Unscored input always
    /// runs with maximum cardinality.
    pub max_cardinality: Option<bool>,
    pub return_graph: bool,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct Selection<S, T> {
    pub matches: Vec<CandidatePair<S, T>>,
    pub graph: Option<CompatibilityGraph<S>>,
}

impl<S: Key, T> Selection<S, T> {
    /// Subjects of `subjects` that appear in no selected pair.
    pub fn unmatched<'a>(&self, subjects: impl IntoIterator<Item = &'a S>) -> Vec<S>
    where
        S: 'a,
    {
        subjects
            .into_iter()
            .filter(|s| !self.matches.iter().any(|m| m.key.contains(s)))
            .cloned()
            .collect()
    }
}

pub fn select_matching<S: Key, T: Clone>(
    candidates: &[CandidatePair<S, T>],
    scores: Option<&Scores<S>>,
    max_cardinality: Option<bool>,
    return_graph: bool,
) -> Result<Selection<S, T>> {
    select_matching_with(
        candidates,
        scores,
        &SelectOptions {
            max_cardinality,
            return_graph,
            deadline: None,
        },
    )
}

/// Picks an optimal subject-disjoint subset of `candidates`.
///
/// Selected pairs carry the weight the solver used as their score whenever
/// any pair was scored.
pub fn select_matching_with<S: Key, T: Clone>(
    candidates: &[CandidatePair<S, T>],
    scores: Option<&Scores<S>>,
    options: &SelectOptions,
) -> Result<Selection<S, T>> {
    info!(
        event = "select_start",
        candidates = candidates.len(),
        scores = scores.map_or(0, |s| s.len()),
    );

    let graph = CompatibilityGraph::from_candidates(candidates, scores)?;
    let max_cardinality = resolve_objective(graph.is_weighted(), options.max_cardinality);

    let matching = matching::solve(
        &graph,
        &SolveOptions {
            max_cardinality,
            deadline: options.deadline,
        },
    )?;

    let by_key: BTreeMap<&PairKey<S>, &CandidatePair<S, T>> =
        candidates.iter().map(|c| (&c.key, c)).collect();
    let mut matches = Vec::with_capacity(matching.cardinality());
    for &e in &matching.edges {
        let key = graph.pair_key(e);
        let candidate = by_key.get(&key).ok_or_else(|| {
            MatchError::SolverInvariant(format!("selected edge {key:?} has no candidate"))
        })?;
        let mut selected = (*candidate).clone();
        if graph.is_weighted() {
            selected.score = Some(graph.edges()[e].weight);
        }
        matches.push(selected);
    }
    matches.sort_by(|a, b| a.key.cmp(&b.key));

    info!(
        event = "select_done",
        matches = matches.len(),
        weight = matching.weight,
        max_cardinality,
    );
    Ok(Selection {
        matches,
        graph: options.return_graph.then_some(graph),
    })
}

fn resolve_objective(weighted: bool, requested: Option<bool>) -> bool {
    let resolved = match (weighted, requested) {
        (false, Some(false)) => {
            warn!(
                event = "objective_forced",
                "no pair is scored, maximum cardinality used instead of the requested pure weight"
            );
            true
        }
        (false, _) => true,
        (true, requested) => requested.unwrap_or(false),
    };
    debug!(event = "objective", weighted, ?requested, max_cardinality = resolved);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::build_candidates;

    fn triangle() -> Vec<CandidatePair<&'static str, u8>> {
        build_candidates(&[("a", 1), ("b", 1), ("c", 1), ("c", 2), ("d", 2)], &[]).unwrap()
    }

    #[test]
    fn unscored_input_forces_cardinality() {
        let candidates = triangle();
        let selection = select_matching(&candidates, None, Some(false), false).unwrap();

        let keys: Vec<_> = selection.matches.iter().map(|m| m.key.clone()).collect();
        assert_eq!(
            keys,
            vec![PairKey::new("a", "b").unwrap(), PairKey::new("c", "d").unwrap()]
        );
        assert!(selection.matches.iter().all(|m| m.score.is_none()));
        assert!(selection.graph.is_none());
    }

    #[test]
    fn scored_input_defaults_to_weight() {
        let candidates = triangle();
        let mut scores = Scores::new();
        scores.insert(PairKey::new("a", "c").unwrap(), 10.0);

        let selection = select_matching(&candidates, Some(&scores), None, true).unwrap();
        assert_eq!(selection.matches.len(), 1);
        assert_eq!(selection.matches[0].key, PairKey::new("a", "c").unwrap());
        assert_eq!(selection.matches[0].score, Some(10.0));
        assert_eq!(selection.matches[0].slots, vec![1]);

        let graph = selection.graph.unwrap();
        assert_eq!(graph.node_count(), 4);
        assert!(graph.is_weighted());

        let both = select_matching(&candidates, Some(&scores), Some(true), false).unwrap();
        assert_eq!(both.matches.len(), 2);
        assert_eq!(both.matches[0].score, Some(1.0));
    }

    #[test]
    fn unmatched_lists_leftover_subjects() {
        let candidates = build_candidates(&[("a", 1), ("b", 1), ("c", 1)], &[]).unwrap();
        let selection = select_matching(&candidates, None, None, false).unwrap();
        assert_eq!(selection.unmatched(&["a", "b", "c", "z"]), vec!["c", "z"]);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let candidates: Vec<CandidatePair<u32, u32>> = Vec::new();
        let selection = select_matching(&candidates, None, None, true).unwrap();
        assert!(selection.matches.is_empty());
        assert_eq!(selection.graph.unwrap().node_count(), 0);
    }
}

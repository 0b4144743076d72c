//! Candidate pairs from `(subject, slot)` availability rows.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MatchError, Result};

pub trait Key: Ord + Clone + fmt::Debug {}

impl<T: Ord + Clone + fmt::Debug> Key for T {}

/// An unordered pair of distinct subjects, stored smallest first.
///
/// Serializes as a two-element sequence. Deserializing a pair of equal
/// subjects fails.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(
    try_from = "(S, S)",
    into = "(S, S)",
    bound(serialize = "S: Serialize + Clone", deserialize = "S: Deserialize<'de> + Key")
)]
pub struct PairKey<S> {
    first: S,
    second: S,
}

impl<S: Key> PairKey<S> {
    pub fn new(a: S, b: S) -> Result<Self> {
        match a.cmp(&b) {
            Ordering::Less => Ok(PairKey { first: a, second: b }),
            Ordering::Greater => Ok(PairKey { first: b, second: a }),
            Ordering::Equal => Err(MatchError::Validation(format!(
                "pair ({a:?}, {b:?}) pairs a subject with itself"
            ))),
        }
    }

    /// Distinct nodes of a graph hold distinct subjects, so callers that
    /// already ordered the pair skip the comparison.
    pub(crate) fn from_ordered(first: S, second: S) -> Self {
        debug_assert!(first < second);
        PairKey { first, second }
    }

    pub fn first(&self) -> &S {
        &self.first
    }

    pub fn second(&self) -> &S {
        &self.second
    }

    pub fn contains(&self, subject: &S) -> bool {
        &self.first == subject || &self.second == subject
    }
}

impl<S: Key> TryFrom<(S, S)> for PairKey<S> {
    type Error = MatchError;

    fn try_from((a, b): (S, S)) -> Result<Self> {
        PairKey::new(a, b)
    }
}

impl<S> From<PairKey<S>> for (S, S) {
    fn from(key: PairKey<S>) -> Self {
        (key.first, key.second)
    }
}

impl<S: fmt::Display> fmt::Display for PairKey<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize + Clone, T: Serialize",
    deserialize = "S: Deserialize<'de> + Key, T: Deserialize<'de>"
))]
pub struct CandidatePair<S, T> {
    pub key: PairKey<S>,
    /// Shared slots, ascending and duplicate free.
    pub slots: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Drops repeated `(subject, slot)` rows, keeping the first occurrence.
pub fn dedup_availability<S: Key, T: Key>(rows: &[(S, T)]) -> Vec<(S, T)> {
    let mut seen = BTreeSet::new();
    rows.iter()
        .filter(|row| seen.insert((*row).clone()))
        .cloned()
        .collect()
}

/// Groups availability by slot, keeping only slots at which two or more
/// subjects are available. Subjects within a slot are sorted.
///
/// Fails with [`MatchError::Data`] if a `(subject, slot)` row repeats.
pub fn subjects_by_slot<S: Key, T: Key>(availability: &[(S, T)]) -> Result<BTreeMap<T, Vec<S>>> {
    let mut by_slot: BTreeMap<T, BTreeSet<S>> = BTreeMap::new();
    for (subject, slot) in availability {
        if !by_slot
            .entry(slot.clone())
            .or_default()
            .insert(subject.clone())
        {
            return Err(MatchError::Data(format!(
                "availability of subject {subject:?} at slot {slot:?} is listed more than once"
            )));
        }
    }

    Ok(by_slot
        .into_iter()
        .filter(|(_, subjects)| subjects.len() > 1)
        .map(|(slot, subjects)| (slot, subjects.into_iter().collect()))
        .collect())
}

/// Builds candidates from availability that is already grouped by slot.
pub fn candidates_from_slots<S: Key, T: Key>(
    groups: &BTreeMap<T, Vec<S>>,
    exclusions: &[(S, S)],
) -> Result<Vec<CandidatePair<S, T>>> {
    let excluded = exclusions
        .iter()
        .map(|(a, b)| PairKey::new(a.clone(), b.clone()))
        .collect::<Result<BTreeSet<_>>>()?;

    let mut shared: BTreeMap<PairKey<S>, BTreeSet<T>> = BTreeMap::new();
    let mut observations = 0usize;
    for (slot, subjects) in groups {
        let mut distinct = BTreeSet::new();
        for subject in subjects {
            if !distinct.insert(subject) {
                return Err(MatchError::Data(format!(
                    "subject {subject:?} is listed more than once at slot {slot:?}"
                )));
            }
        }

        let distinct: Vec<&S> = distinct.into_iter().collect();
        for (i, a) in distinct.iter().enumerate() {
            for b in &distinct[i + 1..] {
                let key = PairKey::new((*a).clone(), (*b).clone())?;
                shared.entry(key).or_default().insert(slot.clone());
                observations += 1;
            }
        }
    }

    let pairs = shared.len();
    let candidates: Vec<CandidatePair<S, T>> = shared
        .into_iter()
        .filter(|(key, _)| !excluded.contains(key))
        .map(|(key, slots)| CandidatePair {
            key,
            slots: slots.into_iter().collect(),
            score: None,
        })
        .collect();

    debug!(
        event = "candidates_built",
        slots = groups.len(),
        observations,
        pairs,
        excluded = pairs - candidates.len(),
    );
    Ok(candidates)
}

/// Derives the exclusion-filtered candidate pairs for an availability
/// snapshot, sorted by pair key.
pub fn build_candidates<S: Key, T: Key>(
    availability: &[(S, T)],
    exclusions: &[(S, S)],
) -> Result<Vec<CandidatePair<S, T>>> {
    let groups = subjects_by_slot(availability)?;
    candidates_from_slots(&groups, exclusions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(a: &str, b: &str) -> PairKey<String> {
        PairKey::new(a.to_owned(), b.to_owned()).unwrap()
    }

    fn rows(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(s, t)| (s.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn pair_key_is_canonical() {
        assert_eq!(key("b", "a"), key("a", "b"));
        assert_eq!(key("b", "a").first(), "a");
        assert!(key("a", "b").contains(&"b".to_owned()));
        assert!(PairKey::new(1, 1).is_err());
    }

    #[test]
    fn pair_key_rejects_self_pair_on_deserialize() {
        let ok: PairKey<u32> = serde_json::from_str("[3, 1]").unwrap();
        assert_eq!(ok, PairKey::new(1, 3).unwrap());
        assert!(serde_json::from_str::<PairKey<u32>>("[2, 2]").is_err());
    }

    #[test]
    fn collects_every_shared_slot() {
        let availability = rows(&[
            ("s1", "B"),
            ("s2", "A"),
            ("s1", "A"),
            ("s2", "B"),
            ("s2", "C"),
            ("s3", "C"),
        ]);
        let candidates = build_candidates(&availability, &[]).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].key, key("s1", "s2"));
        assert_eq!(candidates[0].slots, vec!["A", "B"]);
        assert_eq!(candidates[1].key, key("s2", "s3"));
        assert_eq!(candidates[1].slots, vec!["C"]);
        assert!(candidates.iter().all(|c| c.score.is_none()));
    }

    #[test]
    fn lonely_slots_and_subjects_produce_nothing() {
        let availability = rows(&[("s1", "A"), ("s2", "B"), ("s3", "C")]);
        assert!(build_candidates(&availability, &[]).unwrap().is_empty());
        assert!(subjects_by_slot(&availability).unwrap().is_empty());
    }

    #[test]
    fn exclusions_are_canonicalized() {
        let availability = rows(&[("s1", "A"), ("s3", "A"), ("s5", "A")]);
        let exclusions = vec![("s3".to_owned(), "s1".to_owned())];
        let candidates = build_candidates(&availability, &exclusions).unwrap();

        let keys: Vec<_> = candidates.into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec![key("s1", "s5"), key("s3", "s5")]);
    }

    #[test]
    fn self_exclusion_is_invalid() {
        let availability = rows(&[("s1", "A"), ("s2", "A")]);
        let exclusions = vec![("s1".to_owned(), "s1".to_owned())];
        let err = build_candidates(&availability, &exclusions).unwrap_err();
        assert!(matches!(err, MatchError::Validation(_)));
    }

    #[test]
    fn repeated_rows_are_a_data_error() {
        let availability = rows(&[("s1", "A"), ("s2", "A"), ("s1", "A")]);
        let err = build_candidates(&availability, &[]).unwrap_err();
        assert!(matches!(err, MatchError::Data(ref msg) if msg.contains("\"s1\"")));

        let cleaned = dedup_availability(&availability);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(build_candidates(&cleaned, &[]).unwrap().len(), 1);
    }

    #[test]
    fn pre_grouped_slots_reject_repeats() {
        let mut groups = BTreeMap::new();
        groups.insert("A", vec![1, 2, 1]);
        assert!(matches!(
            candidates_from_slots(&groups, &[]),
            Err(MatchError::Data(_))
        ));

        groups.insert("A", vec![2, 1, 3]);
        let candidates = candidates_from_slots(&groups, &[]).unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].key, PairKey::new(1, 2).unwrap());
    }
}

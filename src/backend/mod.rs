//! Sources of availability data and the pipeline that runs on top of them.

mod sqlite;
mod table;

pub use self::sqlite::Database;
pub use self::table::TableBackend;

use tracing::info;

use crate::candidates::{build_candidates, Key};
use crate::error::Result;
use crate::graph::Scores;
use crate::select::{select_matching_with, SelectOptions, Selection};

/// A store that knows who can be paired and when.
pub trait Backend {
    type Subject: Key;
    type Slot: Key;

    fn get_subjects(&self) -> Result<Vec<Self::Subject>>;

    fn get_availability(&self) -> Result<Vec<(Self::Subject, Self::Slot)>>;

    fn get_exclusions(&self) -> Result<Vec<(Self::Subject, Self::Subject)>>;
}

#[derive(Debug, Clone)]
pub struct Report<S, T> {
    pub subjects: Vec<S>,
    pub candidate_count: usize,
    pub selection: Selection<S, T>,
}

impl<S: Key, T> Report<S, T> {
    pub fn unmatched(&self) -> Vec<S> {
        self.selection.unmatched(&self.subjects)
    }
}

/// Reads `backend` and runs candidate generation and selection over it.
pub fn match_backend<B: Backend>(
    backend: &B,
    scores: Option<&Scores<B::Subject>>,
    options: &SelectOptions,
) -> Result<Report<B::Subject, B::Slot>> {
    let subjects = backend.get_subjects()?;
    let availability = backend.get_availability()?;
    let exclusions = backend.get_exclusions()?;
    info!(
        event = "backend_read",
        subjects = subjects.len(),
        availability = availability.len(),
        exclusions = exclusions.len(),
    );

    let candidates = build_candidates(&availability, &exclusions)?;
    let selection = select_matching_with(&candidates, scores, options)?;
    Ok(Report {
        subjects,
        candidate_count: candidates.len(),
        selection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::PairKey;

    #[test]
    fn runs_the_pipeline_over_a_table() {
        let backend = TableBackend::new(
            vec![("ann", "mon"), ("bob", "mon"), ("cat", "mon"), ("dan", "tue")],
            vec![("bob", "ann")],
        );
        let report = match_backend(&backend, None, &SelectOptions::default()).unwrap();

        assert_eq!(report.candidate_count, 2);
        let keys: Vec<_> = report.selection.matches.iter().map(|m| &m.key).collect();
        assert_eq!(keys, vec![&PairKey::new("ann", "cat").unwrap()]);
        assert_eq!(report.unmatched(), vec!["bob", "dan"]);
    }
}

use std::collections::BTreeSet;

use crate::candidates::Key;
use crate::error::Result;

use super::Backend;

#[derive(Debug, Clone)]
pub struct TableBackend<S, T> {
    subjects: Option<Vec<S>>,
    availability: Vec<(S, T)>,
    exclusions: Vec<(S, S)>,
}

impl<S: Key, T: Key> TableBackend<S, T> {
    pub fn new(availability: Vec<(S, T)>, exclusions: Vec<(S, S)>) -> Self {
        TableBackend {
            subjects: None,
            availability,
            exclusions,
        }
    }

    /// Replaces the subject list derived from availability with an explicit
    /// one, e.g. to report subjects that have no availability at all.
    pub fn with_subjects(mut self, subjects: Vec<S>) -> Self {
        self.subjects = Some(subjects);
        self
    }
}

impl<S: Key, T: Key> Backend for TableBackend<S, T> {
    type Subject = S;
    type Slot = T;

    fn get_subjects(&self) -> Result<Vec<S>> {
        Ok(match &self.subjects {
            Some(subjects) => subjects.clone(),
            None => self
                .availability
                .iter()
                .map(|(s, _)| s)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .cloned()
                .collect(),
        })
    }

    fn get_availability(&self) -> Result<Vec<(S, T)>> {
        Ok(self.availability.clone())
    }

    fn get_exclusions(&self) -> Result<Vec<(S, S)>> {
        Ok(self.exclusions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_default_to_distinct_availability_subjects() {
        let backend = TableBackend::new(vec![(3, 'a'), (1, 'a'), (3, 'b')], vec![]);
        assert_eq!(backend.get_subjects().unwrap(), vec![1, 3]);

        let backend = backend.with_subjects(vec![9, 1, 3]);
        assert_eq!(backend.get_subjects().unwrap(), vec![9, 1, 3]);
        assert_eq!(backend.get_availability().unwrap().len(), 3);
        assert!(backend.get_exclusions().unwrap().is_empty());
    }
}

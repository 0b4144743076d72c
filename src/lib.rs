//! Pairs subjects who share at least one free slot.
//!
//! Availability rows become [`CandidatePair`]s, candidates become a
//! [`CompatibilityGraph`], and a general-graph blossom matcher picks a
//! subject-disjoint set of pairs that is optimal either by cardinality then
//! weight, or by weight alone.
//!
//! ```
//! use slotmatch::{build_candidates, select_matching};
//!
//! let availability = [("ann", "mon"), ("bob", "mon"), ("cat", "tue"), ("dan", "tue")];
//! let candidates = build_candidates(&availability, &[]).unwrap();
//! let selection = select_matching(&candidates, None, None, false).unwrap();
//! assert_eq!(selection.matches.len(), 2);
//! ```

pub mod backend;
pub mod candidates;
pub mod config;
pub mod error;
pub mod graph;
pub mod matching;
pub mod select;
pub mod web;

pub use backend::{match_backend, Backend, Database, Report, TableBackend};
pub use candidates::{
    build_candidates, candidates_from_slots, dedup_availability, subjects_by_slot, CandidatePair,
    Key, PairKey,
};
pub use config::{Config, ConfigError};
pub use error::{MatchError, Result};
pub use graph::{CompatibilityGraph, Edge, Scores, DEFAULT_WEIGHT};
pub use matching::{Matching, SolveOptions};
pub use select::{select_matching, select_matching_with, SelectOptions, Selection};
pub use web::{router, AppState};

use thiserror::Error;

/// Errors raised while building candidates, solving, or reading a backend.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("solver invariant violated: {0}")]
    SolverInvariant(String),

    /// The caller-supplied deadline passed before the solve finished.
    #[error("solve exceeded its deadline after {stages} stages")]
    DeadlineExceeded { stages: usize },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl MatchError {
    /// Whether the error was caused by the input data rather than the solver
    /// or the environment.
    pub fn is_input_error(&self) -> bool {
        matches!(self, MatchError::Validation(_) | MatchError::Data(_))
    }
}

pub type Result<T> = std::result::Result<T, MatchError>;

pub(crate) fn invariant(cond: bool, what: &str) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(MatchError::SolverInvariant(what.to_owned()))
    }
}

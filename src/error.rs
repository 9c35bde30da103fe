use thiserror::Error;

// Unified error type for kryst-dist

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KError {
    #[error("size mismatch in {context}: expected {expected}, found {found}")]
    SizeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("index {index} out of range 0..{bound} ({context})")]
    OutOfRange {
        context: &'static str,
        index: usize,
        bound: usize,
    },
    #[error("new nonzero at ({row}, {col}) caused a malloc")]
    NewNonzero { row: usize, col: usize },
    #[error("numerical breakdown: {0}")]
    Breakdown(String),
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("solve error: {0}")]
    SolveError(String),
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
    #[error("missing diagonal entry in row {0}")]
    MissingDiagonal(usize),
    #[error("communication failure: {0}")]
    Communication(String),
    #[error("invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },
    #[error("object not in a usable state: {0}")]
    InvalidState(&'static str),
    #[error("internal error: {0}")]
    Fatal(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl KError {
    /// Communication failures abort the enclosing collective and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KError::Communication(_) | KError::Fatal(_))
    }
}

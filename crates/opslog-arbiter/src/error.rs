use thiserror::Error;

/// Failure of an arbitrated call.
///
/// `Operation` carries the wrapped operation's own error untouched; the
/// other variants are produced by the arbiter itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError<E> {
    /// The concurrency ceiling was reached. The operation was not invoked.
    #[error("Too many concurrent requests")]
    TooManyConcurrent,

    #[error("{0}")]
    Operation(E),

    /// The operation panicked, or its task was torn down before settling.
    #[error("operation aborted: {0}")]
    Aborted(String),
}

impl<E> ArbiterError<E> {
    pub fn is_ceiling(&self) -> bool {
        matches!(self, ArbiterError::TooManyConcurrent)
    }

    /// The wrapped operation's error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            ArbiterError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

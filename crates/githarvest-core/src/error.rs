use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("work unit failed permanently: {0}")]
    Permanent(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure classification driving the retry policy.
///
/// Transient failures are retried with backoff, permanent failures mark the
/// owning work unit failed immediately, configuration failures abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
    Config,
}

/// Implemented by every error type that can surface inside a worker, so the
/// retry loop never pattern-matches on concrete error variants.
pub trait Classify {
    fn classify(&self) -> FailureKind;
}

impl Classify for Error {
    fn classify(&self) -> FailureKind {
        match self {
            Error::Config(_) => FailureKind::Config,
            // Storage errors during a flush are connection-level and worth
            // retrying; the transaction has already rolled back.
            Error::Storage(_) | Error::Cache(_) => FailureKind::Transient,
            Error::Permanent(_) => FailureKind::Permanent,
            Error::Other(_) => FailureKind::Permanent,
        }
    }
}

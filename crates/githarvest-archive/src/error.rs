use githarvest_core::{Classify, FailureKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("warehouse query error: HTTP {status}: {message}")]
    QueryError { status: u16, message: String },

    /// Cost protection: the query would scan more bytes than the configured
    /// ceiling allows. Carries what the warehouse said it needs.
    #[error("query exceeded byte ceiling: required {required}, limit {limit}")]
    ByteCeilingExceeded { required: u64, limit: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn classify(&self) -> FailureKind {
        match self {
            Error::QueryError { status, .. } if *status >= 500 || *status == 429 => {
                FailureKind::Transient
            }
            Error::QueryError { .. } => FailureKind::Permanent,
            // Retrying cannot shrink the scan; the unit must be split instead.
            Error::ByteCeilingExceeded { .. } => FailureKind::Permanent,
            Error::Http(e) if e.is_timeout() || e.is_connect() => FailureKind::Transient,
            Error::Http(_) => FailureKind::Permanent,
            Error::Json(_) => FailureKind::Permanent,
            Error::Other(_) => FailureKind::Permanent,
        }
    }
}

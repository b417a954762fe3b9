use githarvest_core::{Classify, FailureKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("GitHub API error: HTTP {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("no API credentials configured")]
    NoCredentials,

    #[error("malformed payload: {0}")]
    Malformed(String),

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
            Error::RateLimited => FailureKind::Transient,
            Error::ApiError { status, .. } if *status >= 500 => FailureKind::Transient,
            Error::ApiError { .. } => FailureKind::Permanent,
            Error::NoCredentials => FailureKind::Config,
            Error::Http(e) if e.is_timeout() || e.is_connect() => FailureKind::Transient,
            Error::Http(_) => FailureKind::Permanent,
            Error::Json(_) | Error::Malformed(_) => FailureKind::Permanent,
            Error::Other(_) => FailureKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transient() {
        assert_eq!(Error::RateLimited.classify(), FailureKind::Transient);
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = Error::ApiError {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.classify(), FailureKind::Transient);
    }

    #[test]
    fn test_client_errors_are_permanent() {
        let err = Error::ApiError {
            status: 422,
            message: "validation failed".to_string(),
        };
        assert_eq!(err.classify(), FailureKind::Permanent);
    }

    #[test]
    fn test_missing_credentials_is_config() {
        assert_eq!(Error::NoCredentials.classify(), FailureKind::Config);
    }
}

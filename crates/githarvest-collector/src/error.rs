use githarvest_core::{Classify, FailureKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("GitHub error: {0}")]
    Github(#[from] githarvest_github::Error),

    #[error("archive error: {0}")]
    Archive(#[from] githarvest_archive::Error),

    #[error("core error: {0}")]
    Core(#[from] githarvest_core::Error),

    #[error("geocoder error: {0}")]
    Geocoder(String),

    #[error("run aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Classify for Error {
    fn classify(&self) -> FailureKind {
        match self {
            Error::Github(e) => e.classify(),
            Error::Archive(e) => e.classify(),
            Error::Core(e) => e.classify(),
            // A flaky geocoder should not fail the run; callers treat
            // unresolved as a non-error, so what is left is transient.
            Error::Geocoder(_) => FailureKind::Transient,
            Error::Aborted(_) => FailureKind::Config,
            Error::Other(_) => FailureKind::Permanent,
        }
    }
}

use serde::Deserialize;

use crate::error::{Error, Result};

/// Runtime settings, loaded from `GITHARVEST_*` environment variables
/// (optionally via a `.env` file loaded by the binary).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Comma-separated API tokens.
    pub github_tokens: String,
    pub database_url: String,

    /// Worker pool size; defaults to the number of credentials when unset.
    #[serde(default)]
    pub parallelism: Option<usize>,

    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    #[serde(default = "defaults::flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "defaults::cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "defaults::cache_ttl_secs")]
    pub cache_ttl_secs: i64,

    /// Hard result ceiling the upstream search enforces per query.
    #[serde(default = "defaults::result_ceiling")]
    pub result_ceiling: u64,

    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "defaults::base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "defaults::max_delay_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "defaults::max_contributors_per_repo")]
    pub max_contributors_per_repo: usize,

    #[serde(default)]
    pub geocoder_url: Option<String>,

    #[serde(default)]
    pub archive_url: Option<String>,
    /// Cost protection for archive count/fetch queries.
    #[serde(default = "defaults::max_scanned_bytes")]
    pub max_scanned_bytes: u64,
}

mod defaults {
    pub fn batch_size() -> usize {
        500
    }
    pub fn flush_interval_secs() -> u64 {
        30
    }
    pub fn cache_capacity() -> usize {
        2048
    }
    pub fn cache_ttl_secs() -> i64 {
        86_400
    }
    pub fn result_ceiling() -> u64 {
        1000
    }
    pub fn max_attempts() -> u32 {
        5
    }
    pub fn base_delay_secs() -> u64 {
        1
    }
    pub fn max_delay_secs() -> u64 {
        60
    }
    pub fn max_contributors_per_repo() -> usize {
        30
    }
    pub fn max_scanned_bytes() -> u64 {
        1_000_000_000
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("GITHARVEST"))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tokens().is_empty() {
            return Err(Error::Config(
                "GITHARVEST_GITHUB_TOKENS must contain at least one token".to_string(),
            ));
        }
        if self.database_url.is_empty() {
            return Err(Error::Config(
                "GITHARVEST_DATABASE_URL must be set".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn tokens(&self) -> Vec<String> {
        self.github_tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: std::time::Duration::from_secs(self.base_delay_secs),
            max_delay: std::time::Duration::from_secs(self.max_delay_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            github_tokens: "ghp_a, ghp_b".to_string(),
            database_url: "postgres://localhost/githarvest".to_string(),
            parallelism: None,
            batch_size: defaults::batch_size(),
            flush_interval_secs: defaults::flush_interval_secs(),
            cache_capacity: defaults::cache_capacity(),
            cache_ttl_secs: defaults::cache_ttl_secs(),
            result_ceiling: defaults::result_ceiling(),
            max_attempts: defaults::max_attempts(),
            base_delay_secs: defaults::base_delay_secs(),
            max_delay_secs: defaults::max_delay_secs(),
            max_contributors_per_repo: defaults::max_contributors_per_repo(),
            geocoder_url: None,
            archive_url: None,
            max_scanned_bytes: defaults::max_scanned_bytes(),
        }
    }

    #[test]
    fn test_tokens_split_and_trimmed() {
        let settings = base_settings();
        assert_eq!(settings.tokens(), vec!["ghp_a", "ghp_b"]);
    }

    #[test]
    fn test_empty_tokens_rejected() {
        let mut settings = base_settings();
        settings.github_tokens = " , ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(base_settings().validate().is_ok());
    }
}

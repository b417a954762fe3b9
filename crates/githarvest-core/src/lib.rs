pub mod cache;
pub mod error;
pub mod record;
pub mod retry;
pub mod settings;
pub mod shutdown;
pub mod summary;
pub mod unit;

// Re-exports
pub use cache::{fingerprint, CacheStore, NoopStore, SharedCache, TieredCache};
pub use error::{Classify, Error, FailureKind, Result};
pub use record::{
    Contributor, EntityKind, OrgMembership, Organization, Record, RepoContribution, Repository,
};
pub use retry::RetryPolicy;
pub use settings::Settings;
pub use shutdown::Shutdown;
pub use summary::{CredentialUsage, GeocodeStats, Phase, RunSummary, UnitFailure};
pub use unit::{UnitRange, UnitStatus, WorkUnit};

use std::collections::HashSet;

/// Target of a pending geocoding update: which entity, its natural key and
/// the raw location string to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoTarget {
    pub kind: EntityKind,
    pub github_id: i64,
    pub location: String,
}

/// Persistent store for normalized records, consumed by the batch writer and
/// the enrichment pass. Implementations must provide insert-or-update
/// semantics keyed by the remote identifier.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert a homogeneous batch of records inside one transaction.
    /// Either every record in the batch is committed or none are.
    async fn upsert_batch(&self, kind: EntityKind, records: &[Record]) -> Result<u64>;

    /// Entities of `kind` that carry a location string but no resolved
    /// country code yet.
    async fn pending_geocode(&self, kind: EntityKind, limit: i64) -> Result<Vec<GeoTarget>>;

    /// Apply a geocoding result (or record that resolution was attempted and
    /// came back empty) to one entity.
    async fn apply_geocode(
        &self,
        target: &GeoTarget,
        country_code: Option<&str>,
        region: Option<&str>,
    ) -> Result<()>;
}

/// Durable progress ledger keyed by work-unit id.
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    async fn mark_pending(&self, unit: &WorkUnit) -> Result<()>;
    async fn mark_in_progress(&self, unit_id: &str) -> Result<()>;
    async fn mark_done(&self, unit_id: &str) -> Result<()>;
    async fn mark_failed(&self, unit_id: &str, reason: &str) -> Result<()>;

    /// Unit ids already completed for `phase`; resumed runs skip these.
    async fn done_unit_ids(&self, phase: &str) -> Result<HashSet<String>>;

    /// Units that still need work: pending, failed, and in_progress rows
    /// left behind by an interrupted run (at-least-once semantics).
    async fn resumable_units(&self, phase: &str) -> Result<Vec<WorkUnit>>;
}

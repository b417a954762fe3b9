use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::EntityKind;

/// Orchestrator lifecycle. A run that finishes with failed units still ends
/// in `Complete`; `Aborted` is reserved for configuration failures and
/// shutdown before the final flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Collecting,
    Enriching,
    Persisting,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeocodeStats {
    pub attempted: u64,
    pub resolved: u64,
    pub unresolved: u64,
    pub filtered: u64,
    pub cache_hits: u64,
}

/// Per-credential usage surfaced at end of run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialUsage {
    pub credential_id: usize,
    pub requests: u64,
    pub remaining: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub units_done: u64,
    pub units_failed: Vec<UnitFailure>,
    /// Records found per unit id, kept for by-period reporting.
    pub unit_counts: HashMap<String, u64>,
    pub records_written: HashMap<EntityKind, u64>,
    pub geocode: GeocodeStats,
    pub credentials: Vec<CredentialUsage>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phase: Phase::Collecting,
            started_at: Utc::now(),
            finished_at: None,
            units_done: 0,
            units_failed: Vec::new(),
            unit_counts: HashMap::new(),
            records_written: HashMap::new(),
            geocode: GeocodeStats::default(),
            credentials: Vec::new(),
        }
    }

    pub fn record_unit_done(&mut self, unit_id: &str, records: u64) {
        self.units_done += 1;
        self.unit_counts.insert(unit_id.to_string(), records);
    }

    pub fn record_unit_failed(&mut self, unit_id: &str, reason: &str) {
        self.units_failed.push(UnitFailure {
            unit_id: unit_id.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn record_written(&mut self, kind: EntityKind, count: u64) {
        *self.records_written.entry(kind).or_insert(0) += count;
    }

    pub fn finish(&mut self, phase: Phase) {
        self.phase = phase;
        self.finished_at = Some(Utc::now());
    }

    pub fn elapsed_secs(&self) -> i64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds()
    }

    pub fn completed_with_failures(&self) -> bool {
        self.phase == Phase::Complete && !self.units_failed.is_empty()
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_accumulates() {
        let mut summary = RunSummary::new();
        summary.record_unit_done("u1", 120);
        summary.record_unit_done("u2", 30);
        summary.record_unit_failed("u3", "HTTP 422");
        summary.record_written(EntityKind::Repository, 150);
        summary.record_written(EntityKind::Repository, 10);
        summary.finish(Phase::Complete);

        assert_eq!(summary.units_done, 2);
        assert_eq!(summary.unit_counts["u1"], 120);
        assert_eq!(summary.units_failed.len(), 1);
        assert_eq!(summary.records_written[&EntityKind::Repository], 160);
        assert!(summary.completed_with_failures());
    }
}

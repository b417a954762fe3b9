use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::enrich::{enrich_locations, Geocoder};
use crate::error::{Error, Result};
use crate::partition::{partition, CountProbe};
use crate::worker::{run_units, CollectContext};
use githarvest_archive::{records_from_events, EventFilters, EventWarehouse};
use githarvest_core::{
    Classify, FailureKind, GeocodeStats, Phase, RecordStore, RunSummary, UnitRange, WorkUnit,
};
use githarvest_github::CredentialPool;

const COLLECT_PHASE: &str = "collect";
const ARCHIVE_PHASE: &str = "archive";

/// Probe backed by the live search API's `total_count`.
pub struct SearchProbe {
    pub client: Arc<githarvest_github::GitHubClient>,
}

#[async_trait]
impl CountProbe for SearchProbe {
    async fn count(&self, range: &UnitRange) -> Result<u64> {
        Ok(self.client.search_count(&range.query_fragment()).await?)
    }
}

/// Probe backed by the event warehouse's count query.
pub struct WarehouseProbe {
    pub warehouse: Arc<dyn EventWarehouse>,
    pub filters: EventFilters,
}

#[async_trait]
impl CountProbe for WarehouseProbe {
    async fn count(&self, range: &UnitRange) -> Result<u64> {
        Ok(self.warehouse.count_events(range, &self.filters).await?)
    }
}

/// Drives a full run: partition, collect, enrich, final flush. Owns nothing
/// the workers do not share; all state lives behind the context handles.
pub struct Orchestrator {
    ctx: CollectContext,
    store: Arc<dyn RecordStore>,
    pool: Arc<CredentialPool>,
    geocoder: Option<Arc<dyn Geocoder>>,
    warehouse: Option<Arc<dyn EventWarehouse>>,
    parallelism: usize,
}

impl Orchestrator {
    pub fn new(
        ctx: CollectContext,
        store: Arc<dyn RecordStore>,
        pool: Arc<CredentialPool>,
        geocoder: Option<Arc<dyn Geocoder>>,
        warehouse: Option<Arc<dyn EventWarehouse>>,
        parallelism: Option<usize>,
    ) -> Self {
        let parallelism = parallelism.unwrap_or_else(|| pool.len());
        Self {
            ctx,
            store,
            pool,
            geocoder,
            warehouse,
            parallelism,
        }
    }

    /// Collect from the live search API over `root`, then enrich and flush.
    pub async fn run(&self, root: UnitRange, ceiling: u64) -> Result<RunSummary> {
        let mut summary = RunSummary::new();
        info!(parallelism = self.parallelism, "run starting");

        let probe = SearchProbe {
            client: Arc::clone(&self.ctx.client),
        };
        let units = match self.plan_units(COLLECT_PHASE, root, ceiling, &probe).await {
            Ok(units) => units,
            Err(err) => return self.abort(summary, err).await,
        };
        info!(units = units.len(), "collection plan ready");

        let report = run_units(self.ctx.clone(), units, self.parallelism).await?;
        for (unit_id, count) in &report.done {
            summary.record_unit_done(unit_id, *count);
        }
        for (unit_id, reason) in &report.failed {
            summary.record_unit_failed(unit_id, reason);
        }

        if report.interrupted {
            return self.wind_down(summary, Phase::Aborted).await;
        }

        summary.phase = Phase::Enriching;
        summary.geocode = self.enrich().await?;

        self.wind_down(summary, Phase::Complete).await
    }

    /// Collect historical windows from the event warehouse instead of the
    /// live API. Warehouse queries are few and expensive, so units run
    /// sequentially; the byte ceiling fails a unit permanently and the
    /// partitioner's smaller slices are the remedy.
    pub async fn run_archive(&self, root: UnitRange, ceiling: u64) -> Result<RunSummary> {
        let warehouse = self
            .warehouse
            .as_ref()
            .ok_or_else(|| Error::Aborted("no event warehouse configured".to_string()))?
            .clone();
        let filters = EventFilters::default();
        let mut summary = RunSummary::new();

        let probe = WarehouseProbe {
            warehouse: Arc::clone(&warehouse),
            filters: filters.clone(),
        };
        let units = match self.plan_units(ARCHIVE_PHASE, root, ceiling, &probe).await {
            Ok(units) => units,
            Err(err) => return self.abort(summary, err).await,
        };
        info!(units = units.len(), "archive plan ready");

        for unit in units {
            if self.ctx.shutdown.is_requested() {
                return self.wind_down(summary, Phase::Aborted).await;
            }
            match self.archive_unit(&warehouse, &filters, &unit).await {
                Ok(count) => summary.record_unit_done(&unit.id, count),
                Err(err) => summary.record_unit_failed(&unit.id, &err.to_string()),
            }
        }

        self.wind_down(summary, Phase::Complete).await
    }

    /// Run only the enrichment pass, for profiles ingested by earlier runs.
    pub async fn enrich(&self) -> Result<GeocodeStats> {
        match &self.geocoder {
            Some(geocoder) => {
                enrich_locations(
                    Arc::clone(&self.store),
                    Arc::clone(geocoder),
                    &self.ctx.shutdown,
                )
                .await
            }
            None => {
                info!("no geocoder configured, skipping enrichment");
                Ok(GeocodeStats::default())
            }
        }
    }

    /// Partition the range, drop units the ledger already marks done, and
    /// pull in leftovers from interrupted earlier runs.
    async fn plan_units(
        &self,
        phase: &str,
        root: UnitRange,
        ceiling: u64,
        probe: &dyn CountProbe,
    ) -> Result<Vec<WorkUnit>> {
        let planned = partition(phase, root, ceiling, probe).await?;
        let finished = self.ctx.ledger.done_unit_ids(phase).await?;
        let leftovers = self.ctx.ledger.resumable_units(phase).await?;
        let units = select_open_units(planned, &finished, leftovers);

        for unit in &units {
            self.ctx.ledger.mark_pending(unit).await?;
        }
        Ok(units)
    }

    async fn archive_unit(
        &self,
        warehouse: &Arc<dyn EventWarehouse>,
        filters: &EventFilters,
        unit: &WorkUnit,
    ) -> Result<u64> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.ctx.ledger.mark_in_progress(&unit.id).await?;

            let fetched = warehouse
                .fetch_events(&unit.range, filters)
                .await
                .map_err(Error::from);
            match fetched {
                Ok(rows) => {
                    let records = records_from_events(&rows);
                    let count = records.len() as u64;
                    for record in records {
                        self.ctx.writer.submit(record).await?;
                    }
                    self.ctx.ledger.mark_done(&unit.id).await?;
                    return Ok(count);
                }
                Err(err) => match err.classify() {
                    FailureKind::Transient if !self.ctx.policy.exhausted(attempt) => {
                        let delay = self.ctx.policy.delay_for(attempt);
                        warn!(unit = %unit.id, attempt, error = %err, "archive fetch failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    _ => {
                        self.ctx.ledger.mark_failed(&unit.id, &err.to_string()).await?;
                        return Err(err);
                    }
                },
            }
        }
    }

    async fn wind_down(&self, mut summary: RunSummary, phase: Phase) -> Result<RunSummary> {
        summary.phase = Phase::Persisting;
        let written = self.ctx.writer.flush_all().await?;
        for (kind, count) in written {
            summary.record_written(kind, count);
        }
        summary.credentials = self.pool.stats();
        summary.finish(phase);

        info!(
            phase = ?summary.phase,
            units_done = summary.units_done,
            units_failed = summary.units_failed.len(),
            elapsed_secs = summary.elapsed_secs(),
            "run finished"
        );
        if summary.completed_with_failures() {
            warn!("run completed with failures");
        }
        Ok(summary)
    }

    async fn abort(&self, mut summary: RunSummary, err: Error) -> Result<RunSummary> {
        error!(error = %err, "aborting run");
        if let Err(flush_err) = self.ctx.writer.flush_all().await {
            error!(error = %flush_err, "final flush failed during abort");
        }
        summary.finish(Phase::Aborted);
        Err(err)
    }
}

/// What still needs processing: the planned units minus those already done,
/// plus open units left behind by earlier runs that the fresh plan did not
/// regenerate.
pub fn select_open_units(
    planned: Vec<WorkUnit>,
    finished: &std::collections::HashSet<String>,
    leftovers: Vec<WorkUnit>,
) -> Vec<WorkUnit> {
    let mut units: Vec<WorkUnit> = planned
        .into_iter()
        .filter(|unit| !finished.contains(&unit.id))
        .collect();

    let known: std::collections::HashSet<String> = units.iter().map(|u| u.id.clone()).collect();
    for leftover in leftovers {
        if !known.contains(&leftover.id) {
            info!(unit = %leftover.id, "resuming unit from earlier run");
            units.push(leftover);
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashSet;

    fn daily_units(n: u32) -> Vec<WorkUnit> {
        (0..n)
            .map(|i| {
                let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::days(i as i64);
                WorkUnit::new(
                    COLLECT_PHASE,
                    UnitRange::Created {
                        start,
                        end: start + Duration::days(1),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_resume_reprocesses_only_open_units() {
        let planned = daily_units(10);
        let finished: HashSet<String> =
            planned.iter().take(3).map(|u| u.id.clone()).collect();

        let units = select_open_units(planned, &finished, Vec::new());
        assert_eq!(units.len(), 7);
        for unit in &units {
            assert!(!finished.contains(&unit.id));
        }
    }

    #[test]
    fn test_leftovers_merge_without_duplicates() {
        let planned = daily_units(4);
        // One leftover overlaps the plan, one is from an older wider run.
        let mut leftovers = vec![planned[0].clone()];
        leftovers.push(WorkUnit::new(
            COLLECT_PHASE,
            UnitRange::Stars { min: 0, max: 50 },
        ));

        let units = select_open_units(planned, &HashSet::new(), leftovers);
        assert_eq!(units.len(), 5);
    }
}

//! Durable progress ledger over the `work_units` table. Implements the core
//! `ProgressStore` seam so the orchestrator never sees SQL.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::Row;

use crate::store::Store;
use crate::Result;
use githarvest_core::{ProgressStore, UnitRange, UnitStatus, WorkUnit};

impl Store {
    /// Insert the unit as pending. A row that already exists is left alone,
    /// so re-partitioning on resume never clobbers a finished unit.
    pub async fn insert_pending(&self, unit: &WorkUnit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO work_units (id, phase, range, status, attempts)
            VALUES ($1, $2, $3, 'pending', 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&unit.id)
        .bind(&unit.phase)
        .bind(serde_json::to_value(&unit.range)?)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_in_progress(&self, unit_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE work_units SET status = 'in_progress', attempts = attempts + 1, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(unit_id)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_done(&self, unit_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE work_units SET status = 'done', last_error = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(unit_id)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_failed(&self, unit_id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE work_units SET status = 'failed', last_error = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(unit_id)
        .bind(reason)
        .execute(&self.pool())
        .await?;
        Ok(())
    }

    pub async fn done_ids(&self, phase: &str) -> Result<HashSet<String>> {
        let rows =
            sqlx::query("SELECT id FROM work_units WHERE phase = $1 AND status = 'done'")
                .bind(phase)
                .fetch_all(&self.pool())
                .await?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    /// Unit counts per status for one phase, for the status display.
    pub async fn status_counts(&self, phase: &str) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM work_units WHERE phase = $1 \
             GROUP BY status ORDER BY status",
        )
        .bind(phase)
        .fetch_all(&self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("status"), row.get("n")))
            .collect())
    }

    /// Everything that still needs work: pending, failed, and in_progress
    /// rows left behind by a crashed run.
    pub async fn open_units(&self, phase: &str) -> Result<Vec<WorkUnit>> {
        let rows = sqlx::query(
            "SELECT id, phase, range, status, attempts, last_error FROM work_units \
             WHERE phase = $1 AND status != 'done' ORDER BY id",
        )
        .bind(phase)
        .fetch_all(&self.pool())
        .await?;

        let mut units = Vec::with_capacity(rows.len());
        for row in rows {
            let range: UnitRange = serde_json::from_value(row.get("range"))?;
            let status: String = row.get("status");
            units.push(WorkUnit {
                id: row.get("id"),
                phase: row.get("phase"),
                range,
                status: UnitStatus::parse(&status).unwrap_or(UnitStatus::Pending),
                attempts: row.get::<i32, _>("attempts") as u32,
                last_error: row.get("last_error"),
            });
        }
        Ok(units)
    }
}

#[async_trait]
impl ProgressStore for Store {
    async fn mark_pending(&self, unit: &WorkUnit) -> githarvest_core::Result<()> {
        Ok(self.insert_pending(unit).await?)
    }

    async fn mark_in_progress(&self, unit_id: &str) -> githarvest_core::Result<()> {
        Ok(self.set_in_progress(unit_id).await?)
    }

    async fn mark_done(&self, unit_id: &str) -> githarvest_core::Result<()> {
        Ok(self.set_done(unit_id).await?)
    }

    async fn mark_failed(&self, unit_id: &str, reason: &str) -> githarvest_core::Result<()> {
        Ok(self.set_failed(unit_id, reason).await?)
    }

    async fn done_unit_ids(&self, phase: &str) -> githarvest_core::Result<HashSet<String>> {
        Ok(self.done_ids(phase).await?)
    }

    async fn resumable_units(&self, phase: &str) -> githarvest_core::Result<Vec<WorkUnit>> {
        Ok(self.open_units(phase).await?)
    }
}

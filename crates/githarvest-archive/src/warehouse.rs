use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use githarvest_core::{Record, RepoContribution, Repository, UnitRange};

/// Event types worth ingesting; everything else is noise for this pipeline.
pub const RELEVANT_EVENTS: [&str; 5] = [
    "PushEvent",
    "PullRequestEvent",
    "IssuesEvent",
    "CreateEvent",
    "ReleaseEvent",
];

#[derive(Debug, Clone, Serialize)]
pub struct EventFilters {
    pub event_types: Vec<String>,
    pub min_stars: Option<u32>,
    pub language: Option<String>,
}

impl Default for EventFilters {
    fn default() -> Self {
        Self {
            event_types: RELEVANT_EVENTS.iter().map(|s| s.to_string()).collect(),
            min_stars: None,
            language: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRow {
    pub event_type: String,
    pub repo_id: i64,
    pub repo_name: String,
    pub actor_id: i64,
    pub actor_login: String,
    pub created_at: DateTime<Utc>,
}

/// Bulk historical event source. Counts drive the partitioner for windows
/// older than what the live search API covers; fetches stream the actual
/// rows.
#[async_trait]
pub trait EventWarehouse: Send + Sync {
    async fn count_events(&self, range: &UnitRange, filters: &EventFilters) -> Result<u64>;
    async fn fetch_events(&self, range: &UnitRange, filters: &EventFilters)
        -> Result<Vec<EventRow>>;
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    range: &'a UnitRange,
    filters: &'a EventFilters,
    max_scanned_bytes: u64,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
    scanned_bytes: u64,
}

#[derive(Deserialize)]
struct EventsResponse {
    rows: Vec<EventRow>,
    scanned_bytes: u64,
}

#[derive(Deserialize)]
struct CeilingError {
    required_bytes: u64,
}

/// HTTP client for the event warehouse. Every query carries the configured
/// scanned-bytes ceiling; the warehouse rejects queries that would exceed it
/// with the bytes it actually needs, which we surface verbatim.
pub struct HttpWarehouse {
    http: reqwest::Client,
    base_url: String,
    max_scanned_bytes: u64,
}

impl HttpWarehouse {
    pub fn new(base_url: String, max_scanned_bytes: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url,
            max_scanned_bytes,
        })
    }

    async fn post_query(&self, endpoint: &str, request: &QueryRequest<'_>) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() == 413 {
            // Warehouse refused the scan; body tells us what it would cost.
            let required = serde_json::from_str::<CeilingError>(&body)
                .map(|e| e.required_bytes)
                .unwrap_or(0);
            warn!(
                required,
                limit = self.max_scanned_bytes,
                "warehouse query over byte ceiling"
            );
            return Err(Error::ByteCeilingExceeded {
                required,
                limit: self.max_scanned_bytes,
            });
        }
        if !status.is_success() {
            return Err(Error::QueryError {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl EventWarehouse for HttpWarehouse {
    async fn count_events(&self, range: &UnitRange, filters: &EventFilters) -> Result<u64> {
        let request = QueryRequest {
            range,
            filters,
            max_scanned_bytes: self.max_scanned_bytes,
        };
        let body = self.post_query("count", &request).await?;
        let parsed: CountResponse = serde_json::from_str(&body)?;
        info!(
            count = parsed.count,
            scanned_bytes = parsed.scanned_bytes,
            "warehouse count"
        );
        Ok(parsed.count)
    }

    async fn fetch_events(
        &self,
        range: &UnitRange,
        filters: &EventFilters,
    ) -> Result<Vec<EventRow>> {
        let request = QueryRequest {
            range,
            filters,
            max_scanned_bytes: self.max_scanned_bytes,
        };
        let body = self.post_query("events", &request).await?;
        let parsed: EventsResponse = serde_json::from_str(&body)?;
        info!(
            rows = parsed.rows.len(),
            scanned_bytes = parsed.scanned_bytes,
            "warehouse fetch"
        );
        Ok(parsed.rows)
    }
}

/// Fold event rows into the standard record set: repository stubs (one per
/// repo seen) and per-actor contribution counts. Stubs carry only what the
/// event stream knows; the live API fills in the rest on a later pass.
pub fn records_from_events(rows: &[EventRow]) -> Vec<Record> {
    let mut repos: HashMap<i64, Repository> = HashMap::new();
    let mut contributions: HashMap<(i64, i64), i64> = HashMap::new();

    for row in rows {
        repos.entry(row.repo_id).or_insert_with(|| Repository {
            github_id: row.repo_id,
            name: row
                .repo_name
                .rsplit('/')
                .next()
                .unwrap_or(&row.repo_name)
                .to_string(),
            full_name: row.repo_name.clone(),
            description: None,
            language: None,
            stars: 0,
            forks: 0,
            watchers: 0,
            open_issues: 0,
            created_at: None,
            updated_at: None,
            owner_login: row
                .repo_name
                .split('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            owner_id: 0,
            owner_type: "User".to_string(),
            license: None,
            topics: Vec::new(),
            is_fork: false,
            is_archived: false,
            homepage: None,
        });

        if row.event_type == "PushEvent" {
            *contributions
                .entry((row.actor_id, row.repo_id))
                .or_insert(0) += 1;
        }
    }

    let mut records: Vec<Record> = repos.into_values().map(Record::Repository).collect();
    records.extend(contributions.into_iter().map(
        |((contributor_id, repository_id), commit_count)| {
            Record::RepoContribution(RepoContribution {
                contributor_id,
                repository_id,
                commit_count,
            })
        },
    ));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use githarvest_core::EntityKind;

    fn range() -> UnitRange {
        UnitRange::Created {
            start: Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2023, 6, 2, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_count_round_trip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/count")
            .with_status(200)
            .with_body(r#"{"count": 812, "scanned_bytes": 52428800}"#)
            .create_async()
            .await;

        let warehouse = HttpWarehouse::new(server.url(), 1_000_000_000).unwrap();
        let count = warehouse
            .count_events(&range(), &EventFilters::default())
            .await
            .unwrap();
        assert_eq!(count, 812);
    }

    #[tokio::test]
    async fn test_byte_ceiling_surfaces_required_bytes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/events")
            .with_status(413)
            .with_body(r#"{"required_bytes": 2386558976}"#)
            .create_async()
            .await;

        let warehouse = HttpWarehouse::new(server.url(), 1_000_000_000).unwrap();
        match warehouse
            .fetch_events(&range(), &EventFilters::default())
            .await
        {
            Err(Error::ByteCeilingExceeded { required, limit }) => {
                assert_eq!(required, 2_386_558_976);
                assert_eq!(limit, 1_000_000_000);
            }
            other => panic!("expected ByteCeilingExceeded, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_records_from_events_folds_push_counts() {
        let at = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let rows = vec![
            EventRow {
                event_type: "PushEvent".to_string(),
                repo_id: 10,
                repo_name: "acme/widget".to_string(),
                actor_id: 7,
                actor_login: "alice".to_string(),
                created_at: at,
            },
            EventRow {
                event_type: "PushEvent".to_string(),
                repo_id: 10,
                repo_name: "acme/widget".to_string(),
                actor_id: 7,
                actor_login: "alice".to_string(),
                created_at: at,
            },
            EventRow {
                event_type: "IssuesEvent".to_string(),
                repo_id: 10,
                repo_name: "acme/widget".to_string(),
                actor_id: 8,
                actor_login: "bob".to_string(),
                created_at: at,
            },
        ];

        let records = records_from_events(&rows);
        let repos: Vec<_> = records
            .iter()
            .filter(|r| r.kind() == EntityKind::Repository)
            .collect();
        assert_eq!(repos.len(), 1);

        let contribution = records
            .iter()
            .find_map(|r| match r {
                Record::RepoContribution(c) => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(contribution.contributor_id, 7);
        assert_eq!(contribution.commit_count, 2);
    }
}

//! End-to-end collection flow against a mock API, with in-memory stores.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use githarvest_collector::enrich::{enrich_locations, GeoResult, Geocoder};
use githarvest_collector::worker::{run_units, CollectContext};
use githarvest_core::{
    CacheStore, EntityKind, GeoTarget, NoopStore, ProgressStore, Record, RecordStore, Result,
    RetryPolicy, Shutdown, TieredCache, UnitRange, UnitStatus, WorkUnit,
};
use githarvest_db::BatchWriter;
use githarvest_github::{CredentialPool, GitHubClient};

#[derive(Default)]
struct MemStore {
    records: Mutex<Vec<Record>>,
    pending: Mutex<Vec<GeoTarget>>,
    applied: Mutex<Vec<(i64, Option<String>, Option<String>)>>,
}

#[async_trait]
impl RecordStore for MemStore {
    async fn upsert_batch(&self, _kind: EntityKind, records: &[Record]) -> Result<u64> {
        let mut stored = self.records.lock().unwrap();
        stored.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn pending_geocode(&self, kind: EntityKind, limit: i64) -> Result<Vec<GeoTarget>> {
        let pending = self.pending.lock().unwrap();
        Ok(pending
            .iter()
            .filter(|t| t.kind == kind)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn apply_geocode(
        &self,
        target: &GeoTarget,
        country_code: Option<&str>,
        region: Option<&str>,
    ) -> Result<()> {
        self.pending
            .lock()
            .unwrap()
            .retain(|t| t.github_id != target.github_id || t.kind != target.kind);
        self.applied.lock().unwrap().push((
            target.github_id,
            country_code.map(str::to_string),
            region.map(str::to_string),
        ));
        Ok(())
    }
}

#[derive(Default)]
struct MemLedger {
    statuses: Mutex<HashMap<String, (UnitStatus, Option<String>)>>,
}

#[async_trait]
impl ProgressStore for MemLedger {
    async fn mark_pending(&self, unit: &WorkUnit) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .entry(unit.id.clone())
            .or_insert((UnitStatus::Pending, None));
        Ok(())
    }

    async fn mark_in_progress(&self, unit_id: &str) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .insert(unit_id.to_string(), (UnitStatus::InProgress, None));
        Ok(())
    }

    async fn mark_done(&self, unit_id: &str) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .insert(unit_id.to_string(), (UnitStatus::Done, None));
        Ok(())
    }

    async fn mark_failed(&self, unit_id: &str, reason: &str) -> Result<()> {
        self.statuses.lock().unwrap().insert(
            unit_id.to_string(),
            (UnitStatus::Failed, Some(reason.to_string())),
        );
        Ok(())
    }

    async fn done_unit_ids(&self, _phase: &str) -> Result<HashSet<String>> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (status, _))| *status == UnitStatus::Done)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn resumable_units(&self, _phase: &str) -> Result<Vec<WorkUnit>> {
        Ok(Vec::new())
    }
}

fn context(
    server_url: String,
    store: Arc<MemStore>,
    ledger: Arc<MemLedger>,
) -> CollectContext {
    let pool = Arc::new(CredentialPool::new(vec!["test-token".to_string()]).unwrap());
    let client = Arc::new(GitHubClient::with_base_url(pool, server_url).unwrap());
    let cache = Arc::new(TieredCache::new(
        64,
        Box::new(NoopStore) as Box<dyn CacheStore>,
    ));
    let writer = Arc::new(BatchWriter::new(
        store,
        100,
        Duration::from_secs(3600),
    ));
    CollectContext {
        client,
        cache,
        writer,
        ledger,
        policy: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        shutdown: Shutdown::new(),
        result_ceiling: 1000,
        max_contributors_per_repo: 10,
    }
}

fn one_day_unit() -> WorkUnit {
    WorkUnit::new(
        "collect",
        UnitRange::Created {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        },
    )
}

const SEARCH_BODY: &str = r#"{
    "total_count": 1,
    "incomplete_results": false,
    "items": [{
        "id": 101,
        "name": "widget",
        "full_name": "acme/widget",
        "description": "A widget",
        "language": "Rust",
        "stargazers_count": 42,
        "forks_count": 3,
        "watchers_count": 42,
        "open_issues_count": 1,
        "created_at": "2024-01-01T10:00:00Z",
        "updated_at": "2024-01-02T10:00:00Z",
        "owner": {"login": "alice", "id": 7, "type": "User"},
        "fork": false,
        "archived": false,
        "topics": ["tools"]
    }]
}"#;

#[tokio::test]
async fn test_collect_unit_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/search/repositories")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("x-ratelimit-remaining", "29")
        .with_body(SEARCH_BODY)
        .create_async()
        .await;
    server
        .mock("GET", "/repos/acme/widget/contributors")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("x-ratelimit-remaining", "28")
        .with_body(r#"[{"id": 7, "login": "alice", "contributions": 5}]"#)
        .create_async()
        .await;
    server
        .mock("GET", "/users/alice")
        .with_status(200)
        .with_header("x-ratelimit-remaining", "27")
        .with_body(r#"{"id": 7, "login": "alice", "location": "Berlin", "followers": 10}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/users/alice/orgs")
        .with_status(200)
        .with_header("x-ratelimit-remaining", "26")
        .with_body("[]")
        .create_async()
        .await;

    let store = Arc::new(MemStore::default());
    let ledger = Arc::new(MemLedger::default());
    let ctx = context(server.url(), Arc::clone(&store), Arc::clone(&ledger));

    let unit = one_day_unit();
    let unit_id = unit.id.clone();
    let report = run_units(ctx.clone(), vec![unit], 2).await.unwrap();

    assert_eq!(report.done.len(), 1);
    assert!(report.failed.is_empty());
    assert!(!report.interrupted);

    let written = ctx.writer.flush_all().await.unwrap();
    assert_eq!(written[&EntityKind::Repository], 1);
    assert_eq!(written[&EntityKind::Contributor], 1);
    assert_eq!(written[&EntityKind::RepoContribution], 1);

    let statuses = ledger.statuses.lock().unwrap();
    assert_eq!(statuses[&unit_id].0, UnitStatus::Done);

    let records = store.records.lock().unwrap();
    let repo = records
        .iter()
        .find_map(|r| match r {
            Record::Repository(repo) => Some(repo),
            _ => None,
        })
        .unwrap();
    assert_eq!(repo.full_name, "acme/widget");
    assert_eq!(repo.stars, 42);
}

#[tokio::test]
async fn test_permanent_failure_marks_unit_failed() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/search/repositories")
        .match_query(mockito::Matcher::Any)
        .with_status(422)
        .with_header("x-ratelimit-remaining", "29")
        .with_body(r#"{"message": "Validation Failed"}"#)
        .create_async()
        .await;

    let store = Arc::new(MemStore::default());
    let ledger = Arc::new(MemLedger::default());
    let ctx = context(server.url(), store, Arc::clone(&ledger));

    let unit = one_day_unit();
    let unit_id = unit.id.clone();
    let report = run_units(ctx, vec![unit], 1).await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("422"));

    let statuses = ledger.statuses.lock().unwrap();
    assert_eq!(statuses[&unit_id].0, UnitStatus::Failed);
}

#[tokio::test]
async fn test_shutdown_dispatches_nothing() {
    let server = mockito::Server::new_async().await;
    let store = Arc::new(MemStore::default());
    let ledger = Arc::new(MemLedger::default());
    let ctx = context(server.url(), store, Arc::clone(&ledger));

    ctx.shutdown.request();
    let report = run_units(ctx, vec![one_day_unit()], 2).await.unwrap();

    assert!(report.interrupted);
    assert!(report.done.is_empty());
    assert!(ledger.statuses.lock().unwrap().is_empty());
}

struct FixedGeocoder {
    calls: Mutex<u32>,
}

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn resolve(
        &self,
        location: &str,
    ) -> githarvest_collector::Result<Option<GeoResult>> {
        *self.calls.lock().unwrap() += 1;
        if location == "Berlin" {
            Ok(Some(GeoResult {
                country_code: "DE".to_string(),
                region: Some("Europe".to_string()),
            }))
        } else {
            Ok(None)
        }
    }
}

#[tokio::test]
async fn test_enrichment_resolves_filters_and_caches() {
    let store = Arc::new(MemStore::default());
    {
        let mut pending = store.pending.lock().unwrap();
        pending.push(GeoTarget {
            kind: EntityKind::Contributor,
            github_id: 1,
            location: "Berlin".to_string(),
        });
        pending.push(GeoTarget {
            kind: EntityKind::Contributor,
            github_id: 2,
            location: "remote".to_string(),
        });
        pending.push(GeoTarget {
            kind: EntityKind::Organization,
            github_id: 3,
            location: "Berlin".to_string(),
        });
    }

    let geocoder = Arc::new(FixedGeocoder {
        calls: Mutex::new(0),
    });
    let shutdown = Shutdown::new();
    let stats = enrich_locations(
        Arc::clone(&store) as Arc<dyn RecordStore>,
        Arc::clone(&geocoder) as Arc<dyn Geocoder>,
        &shutdown,
    )
    .await
    .unwrap();

    assert_eq!(stats.attempted, 3);
    assert_eq!(stats.resolved, 2);
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.cache_hits, 1);
    // "Berlin" resolved once, then served from the run-local cache.
    assert_eq!(*geocoder.calls.lock().unwrap(), 1);

    let applied = store.applied.lock().unwrap();
    assert!(applied
        .iter()
        .any(|(id, cc, _)| *id == 1 && cc.as_deref() == Some("DE")));
    assert!(applied
        .iter()
        .any(|(id, cc, _)| *id == 2 && cc.is_none()));
}

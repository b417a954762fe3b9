use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use githarvest_core::{
    fingerprint, Classify, FailureKind, Organization, ProgressStore, Record, RepoContribution,
    OrgMembership, RetryPolicy, SharedCache, Shutdown, WorkUnit,
};
use githarvest_db::BatchWriter;
use githarvest_github::{normalize, GitHubClient, SearchPage};

const PER_PAGE: u32 = 100;

/// Everything a worker needs to process one unit. Cheap to clone into tasks.
#[derive(Clone)]
pub struct CollectContext {
    pub client: Arc<GitHubClient>,
    pub cache: Arc<SharedCache>,
    pub writer: Arc<BatchWriter>,
    pub ledger: Arc<dyn ProgressStore>,
    pub policy: RetryPolicy,
    pub shutdown: Shutdown,
    pub result_ceiling: u64,
    pub max_contributors_per_repo: usize,
}

#[derive(Debug, Default)]
pub struct WorkReport {
    pub done: Vec<(String, u64)>,
    pub failed: Vec<(String, String)>,
    pub interrupted: bool,
}

enum UnitOutcome {
    Done(u64),
    Failed(String),
    Interrupted,
}

/// Run the worker pool over the given units with bounded parallelism.
/// Interrupted units stay `in_progress` in the ledger for the next run.
pub async fn run_units(
    ctx: CollectContext,
    units: Vec<WorkUnit>,
    parallelism: usize,
) -> Result<WorkReport> {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut tasks = JoinSet::new();
    let mut report = WorkReport::default();

    for unit in units {
        if ctx.shutdown.is_requested() {
            report.interrupted = true;
            break;
        }
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("worker pool closed: {e}")))?;
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let outcome = run_unit(&ctx, &unit).await;
            (unit.id, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (unit_id, outcome) =
            joined.map_err(|e| Error::Other(anyhow::anyhow!("worker panicked: {e}")))?;
        match outcome {
            UnitOutcome::Done(count) => report.done.push((unit_id, count)),
            UnitOutcome::Failed(reason) => report.failed.push((unit_id, reason)),
            UnitOutcome::Interrupted => report.interrupted = true,
        }
    }

    info!(
        done = report.done.len(),
        failed = report.failed.len(),
        interrupted = report.interrupted,
        "worker pool finished"
    );
    Ok(report)
}

async fn run_unit(ctx: &CollectContext, unit: &WorkUnit) -> UnitOutcome {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if let Err(err) = ctx.ledger.mark_in_progress(&unit.id).await {
            return UnitOutcome::Failed(format!("ledger claim failed: {err}"));
        }

        match process_unit(ctx, unit).await {
            Ok(Some(count)) => {
                if let Err(err) = ctx.ledger.mark_done(&unit.id).await {
                    return UnitOutcome::Failed(format!("ledger completion failed: {err}"));
                }
                debug!(unit = %unit.id, records = count, "unit done");
                return UnitOutcome::Done(count);
            }
            Ok(None) => return UnitOutcome::Interrupted,
            Err(err) => match err.classify() {
                FailureKind::Transient if !ctx.policy.exhausted(attempt) => {
                    let delay = ctx.policy.delay_for(attempt);
                    warn!(unit = %unit.id, attempt, error = %err, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                FailureKind::Config => {
                    let reason = err.to_string();
                    let _ = ctx.ledger.mark_failed(&unit.id, &reason).await;
                    ctx.shutdown.request();
                    return UnitOutcome::Failed(reason);
                }
                _ => {
                    let reason = err.to_string();
                    let _ = ctx.ledger.mark_failed(&unit.id, &reason).await;
                    return UnitOutcome::Failed(reason);
                }
            },
        }
    }
}

/// Page through one unit's search results. `Ok(None)` means shutdown was
/// requested between pages; the unit is left claimed for the next run.
async fn process_unit(ctx: &CollectContext, unit: &WorkUnit) -> Result<Option<u64>> {
    let query = unit.range.query_fragment();
    let max_pages = (ctx.result_ceiling / PER_PAGE as u64).max(1) as u32;
    let mut page = 1u32;
    let mut records = 0u64;

    loop {
        if ctx.shutdown.is_requested() {
            return Ok(None);
        }

        let key = fingerprint("github_search", &query, &format!("page={page}"));
        let body = match ctx.cache.get(&key).await? {
            Some(hit) => hit,
            None => {
                let fresh = ctx.client.search_repositories(&query, page, PER_PAGE).await?;
                ctx.cache.put(&key, &fresh).await?;
                fresh
            }
        };

        let parsed = SearchPage::parse(&body)?;
        let item_count = parsed.items.len();
        for item in &parsed.items {
            records += ingest_item(ctx, item).await?;
        }

        let seen = page as u64 * PER_PAGE as u64;
        if item_count < PER_PAGE as usize || seen >= parsed.total_count || page >= max_pages {
            break;
        }
        page += 1;
    }

    Ok(Some(records))
}

/// One search item: the repository itself, its owning organization, its top
/// contributors with their profiles, and the link records tying them all
/// together.
async fn ingest_item(ctx: &CollectContext, item: &serde_json::Value) -> Result<u64> {
    let repo = normalize::repository(item)?;
    let repo_id = repo.github_id;
    let full_name = repo.full_name.clone();
    let owner_login = repo.owner_login.clone();
    let owner_id = repo.owner_id;
    let owner_is_org = repo.owner_type == "Organization";

    ctx.writer.submit(Record::Repository(repo)).await?;
    let mut written = 1u64;

    if owner_is_org && !owner_login.is_empty() {
        match cached_fetch(ctx, "github_org", &owner_login, || {
            ctx.client.get_org(&owner_login)
        })
        .await
        {
            Ok(body) => {
                let value: serde_json::Value = serde_json::from_str(&body)
                    .map_err(githarvest_github::Error::from)?;
                ctx.writer
                    .submit(Record::Organization(normalize::organization(&value)?))
                    .await?;
                written += 1;
            }
            Err(err) if err.classify() == FailureKind::Permanent => {
                warn!(org = %owner_login, error = %err, "skipping unfetchable organization");
            }
            Err(err) => return Err(err),
        }
    }

    let contributors_body = match cached_fetch(ctx, "github_contributors", &full_name, || {
        ctx.client.list_contributors(&full_name, PER_PAGE)
    })
    .await
    {
        Ok(body) => body,
        // Empty and disabled repos 4xx their contributor listing; the
        // repository record itself is still worth keeping.
        Err(err) if err.classify() == FailureKind::Permanent => {
            warn!(repo = %full_name, error = %err, "skipping contributors");
            return Ok(written);
        }
        Err(err) => return Err(err),
    };
    if contributors_body.trim().is_empty() {
        return Ok(written);
    }

    let stubs = normalize::contributor_stubs(&contributors_body)?;
    for (contributor_id, login, commit_count) in
        stubs.into_iter().take(ctx.max_contributors_per_repo)
    {
        let user_body =
            match cached_fetch(ctx, "github_user", &login, || ctx.client.get_user(&login)).await {
                Ok(body) => body,
                Err(err) if err.classify() == FailureKind::Permanent => {
                    warn!(user = %login, error = %err, "skipping unfetchable user");
                    continue;
                }
                Err(err) => return Err(err),
            };
        let value: serde_json::Value =
            serde_json::from_str(&user_body).map_err(githarvest_github::Error::from)?;
        ctx.writer
            .submit(Record::Contributor(normalize::contributor(&value)?))
            .await?;
        ctx.writer
            .submit(Record::RepoContribution(RepoContribution {
                contributor_id,
                repository_id: repo_id,
                commit_count,
            }))
            .await?;
        written += 2;

        written += ingest_user_orgs(ctx, contributor_id, &login).await?;

        if owner_is_org && owner_id > 0 {
            ctx.writer
                .submit(Record::OrgMembership(OrgMembership {
                    contributor_id,
                    organization_id: owner_id,
                }))
                .await?;
            written += 1;
        }
    }

    Ok(written)
}

async fn ingest_user_orgs(ctx: &CollectContext, contributor_id: i64, login: &str) -> Result<u64> {
    let body = match cached_fetch(ctx, "github_user_orgs", login, || {
        ctx.client.list_user_orgs(login)
    })
    .await
    {
        Ok(body) => body,
        Err(err) if err.classify() == FailureKind::Permanent => return Ok(0),
        Err(err) => return Err(err),
    };
    if body.trim().is_empty() {
        return Ok(0);
    }

    let mut written = 0u64;
    for (org_id, org_login) in normalize::org_stubs(&body)? {
        // Stub row; the COALESCE upsert keeps any richer profile already
        // stored for this organization.
        ctx.writer
            .submit(Record::Organization(Organization {
                github_id: org_id,
                login: org_login,
                name: None,
                email: None,
                blog: None,
                location: None,
                country_code: None,
                region: None,
                description: None,
                followers: 0,
                public_repos: 0,
                is_verified: false,
                created_at: None,
                updated_at: None,
            }))
            .await?;
        ctx.writer
            .submit(Record::OrgMembership(OrgMembership {
                contributor_id,
                organization_id: org_id,
            }))
            .await?;
        written += 2;
    }
    Ok(written)
}

async fn cached_fetch<F, Fut>(
    ctx: &CollectContext,
    source: &str,
    param: &str,
    fetch: F,
) -> Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = githarvest_github::Result<String>>,
{
    let key = fingerprint(source, param, "");
    if let Some(hit) = ctx.cache.get(&key).await? {
        return Ok(hit);
    }
    let body = fetch().await?;
    ctx.cache.put(&key, &body).await?;
    Ok(body)
}

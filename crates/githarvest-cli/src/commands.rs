use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use tracing::info;

use githarvest_archive::{EventWarehouse, HttpWarehouse};
use githarvest_collector::{CollectContext, Geocoder, HttpGeocoder, Orchestrator};
use githarvest_core::{
    CacheStore, ProgressStore, RecordStore, RunSummary, Settings, Shutdown, TieredCache, UnitRange,
};
use githarvest_db::{BatchWriter, PgCacheStore, Store};
use githarvest_github::{CredentialPool, GitHubClient};

pub struct App {
    pub store: Arc<Store>,
    pub orchestrator: Orchestrator,
    pub settings: Settings,
}

pub async fn build(settings: Settings) -> Result<App> {
    let store = Arc::new(
        Store::new(&settings.database_url)
            .await
            .context("connecting to database")?,
    );
    store.init_schema().await.context("initializing schema")?;

    let pool = Arc::new(CredentialPool::new(settings.tokens())?);
    let client = Arc::new(GitHubClient::new(Arc::clone(&pool))?);

    let slow_tier: Box<dyn CacheStore> =
        Box::new(PgCacheStore::new(store.pool(), settings.cache_ttl_secs));
    let cache = Arc::new(TieredCache::new(settings.cache_capacity, slow_tier));

    let writer = Arc::new(BatchWriter::new(
        Arc::clone(&store) as Arc<dyn RecordStore>,
        settings.batch_size,
        Duration::from_secs(settings.flush_interval_secs),
    ));

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.request();
            }
        });
    }

    let ctx = CollectContext {
        client,
        cache,
        writer,
        ledger: Arc::clone(&store) as Arc<dyn ProgressStore>,
        policy: settings.retry_policy(),
        shutdown,
        result_ceiling: settings.result_ceiling,
        max_contributors_per_repo: settings.max_contributors_per_repo,
    };

    let geocoder: Option<Arc<dyn Geocoder>> = match &settings.geocoder_url {
        Some(url) => Some(Arc::new(HttpGeocoder::new(url.clone())?)),
        None => None,
    };
    let warehouse: Option<Arc<dyn EventWarehouse>> = match &settings.archive_url {
        Some(url) => Some(Arc::new(HttpWarehouse::new(
            url.clone(),
            settings.max_scanned_bytes,
        )?)),
        None => None,
    };

    let orchestrator = Orchestrator::new(
        ctx,
        Arc::clone(&store) as Arc<dyn RecordStore>,
        pool,
        geocoder,
        warehouse,
        settings.parallelism,
    );

    Ok(App {
        store,
        orchestrator,
        settings,
    })
}

pub async fn init_db(settings: Settings) -> Result<()> {
    let store = Store::new(&settings.database_url)
        .await
        .context("connecting to database")?;
    store.init_schema().await.context("initializing schema")?;
    info!("schema initialized");
    Ok(())
}

pub async fn collect(
    app: &App,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
    stars_min: Option<u32>,
    stars_max: Option<u32>,
) -> Result<()> {
    let root = match (since, until, stars_min, stars_max) {
        (Some(since), Some(until), None, None) => date_range(since, until)?,
        (None, None, Some(min), Some(max)) if min <= max => UnitRange::Stars { min, max },
        (None, None, Some(_), Some(_)) => bail!("--stars-min must not exceed --stars-max"),
        _ => bail!("specify either --since/--until or --stars-min/--stars-max"),
    };

    let summary = app
        .orchestrator
        .run(root, app.settings.result_ceiling)
        .await?;
    print_summary(&summary)
}

pub async fn archive(app: &App, since: NaiveDate, until: NaiveDate) -> Result<()> {
    let root = date_range(since, until)?;
    let summary = app
        .orchestrator
        .run_archive(root, app.settings.result_ceiling)
        .await?;
    print_summary(&summary)
}

pub async fn enrich(app: &App) -> Result<()> {
    let stats = app.orchestrator.enrich().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub async fn status(app: &App, phase: &str) -> Result<()> {
    let counts = app.store.status_counts(phase).await?;
    if counts.is_empty() {
        println!("no work units recorded for phase '{}'", phase);
        return Ok(());
    }
    for (status, count) in counts {
        println!("{:>12}  {}", status, count);
    }
    Ok(())
}

fn date_range(since: NaiveDate, until: NaiveDate) -> Result<UnitRange> {
    if since >= until {
        bail!("--since must be before --until");
    }
    let start = Utc
        .from_local_datetime(&since.and_hms_opt(0, 0, 0).context("invalid date")?)
        .single()
        .context("invalid start date")?;
    let end = Utc
        .from_local_datetime(&until.and_hms_opt(0, 0, 0).context("invalid date")?)
        .single()
        .context("invalid end date")?;
    Ok(UnitRange::Created { start, end })
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

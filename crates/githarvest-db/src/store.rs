use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, Row, Transaction};

use crate::Result;
use githarvest_core::{EntityKind, GeoTarget, Record, RecordStore};

#[derive(Clone)]
pub struct Store {
    pool: Pool<Postgres>,
}

impl Store {
    /// Create new database connection
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> Pool<Postgres> {
        self.pool.clone()
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                github_id BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                full_name TEXT NOT NULL,
                description TEXT,
                language VARCHAR(100),
                stars BIGINT NOT NULL DEFAULT 0,
                forks BIGINT NOT NULL DEFAULT 0,
                watchers BIGINT NOT NULL DEFAULT 0,
                open_issues BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ,
                owner_login VARCHAR(255) NOT NULL,
                owner_id BIGINT NOT NULL DEFAULT 0,
                owner_type VARCHAR(50) NOT NULL DEFAULT 'User',
                license VARCHAR(100),
                topics TEXT[] NOT NULL DEFAULT '{}',
                is_fork BOOLEAN NOT NULL DEFAULT FALSE,
                is_archived BOOLEAN NOT NULL DEFAULT FALSE,
                homepage TEXT,
                ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contributors (
                github_id BIGINT PRIMARY KEY,
                login VARCHAR(255) NOT NULL,
                name TEXT,
                email TEXT,
                company TEXT,
                blog TEXT,
                location TEXT,
                country_code VARCHAR(2),
                region VARCHAR(100),
                geocode_attempted BOOLEAN NOT NULL DEFAULT FALSE,
                bio TEXT,
                followers BIGINT NOT NULL DEFAULT 0,
                following BIGINT NOT NULL DEFAULT 0,
                public_repos BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ,
                ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS organizations (
                github_id BIGINT PRIMARY KEY,
                login VARCHAR(255) NOT NULL,
                name TEXT,
                email TEXT,
                blog TEXT,
                location TEXT,
                country_code VARCHAR(2),
                region VARCHAR(100),
                geocode_attempted BOOLEAN NOT NULL DEFAULT FALSE,
                description TEXT,
                followers BIGINT NOT NULL DEFAULT 0,
                public_repos BIGINT NOT NULL DEFAULT 0,
                is_verified BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ,
                ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repo_contributions (
                contributor_id BIGINT NOT NULL,
                repository_id BIGINT NOT NULL,
                commit_count BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (contributor_id, repository_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS org_memberships (
                contributor_id BIGINT NOT NULL,
                organization_id BIGINT NOT NULL,
                PRIMARY KEY (contributor_id, organization_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS work_units (
                id VARCHAR(255) PRIMARY KEY,
                phase VARCHAR(50) NOT NULL,
                range JSONB NOT NULL,
                status VARCHAR(50) NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fetch_cache (
                key VARCHAR(64) PRIMARY KEY,
                value TEXT NOT NULL,
                inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_work_units_phase_status ON work_units(phase, status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_contributors_geocode \
             ON contributors(geocode_attempted) WHERE location IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_repositories_stars ON repositories(stars DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// One transaction per batch; any failure rolls the whole batch back.
    pub async fn upsert_records(&self, records: &[Record]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            upsert_one(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.len() as u64)
    }

    async fn geocode_targets(&self, kind: EntityKind, limit: i64) -> Result<Vec<GeoTarget>> {
        let table = geocodable_table(kind)?;
        let rows = sqlx::query(&format!(
            "SELECT github_id, location FROM {} \
             WHERE location IS NOT NULL AND geocode_attempted = FALSE \
             ORDER BY github_id LIMIT $1",
            table
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| GeoTarget {
                kind,
                github_id: row.get("github_id"),
                location: row.get("location"),
            })
            .collect())
    }

    async fn write_geocode(
        &self,
        target: &GeoTarget,
        country_code: Option<&str>,
        region: Option<&str>,
    ) -> Result<()> {
        let table = geocodable_table(target.kind)?;
        sqlx::query(&format!(
            "UPDATE {} SET country_code = $1, region = $2, geocode_attempted = TRUE \
             WHERE github_id = $3",
            table
        ))
        .bind(country_code)
        .bind(region)
        .bind(target.github_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn geocodable_table(kind: EntityKind) -> Result<&'static str> {
    match kind {
        EntityKind::Contributor => Ok("contributors"),
        EntityKind::Organization => Ok("organizations"),
        other => Err(crate::Error::Query(format!(
            "entity kind {} has no location column",
            other.as_str()
        ))),
    }
}

async fn upsert_one(tx: &mut Transaction<'_, Postgres>, record: &Record) -> Result<()> {
    match record {
        Record::Repository(repo) => {
            sqlx::query(
                r#"
                INSERT INTO repositories (
                    github_id, name, full_name, description, language,
                    stars, forks, watchers, open_issues, created_at, updated_at,
                    owner_login, owner_id, owner_type, license, topics,
                    is_fork, is_archived, homepage
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                          $12, $13, $14, $15, $16, $17, $18, $19)
                ON CONFLICT (github_id) DO UPDATE SET
                    name = $2,
                    full_name = $3,
                    description = COALESCE($4, repositories.description),
                    language = COALESCE($5, repositories.language),
                    stars = GREATEST($6, repositories.stars),
                    forks = GREATEST($7, repositories.forks),
                    watchers = GREATEST($8, repositories.watchers),
                    open_issues = $9,
                    created_at = COALESCE($10, repositories.created_at),
                    updated_at = COALESCE($11, repositories.updated_at),
                    owner_login = $12,
                    owner_id = GREATEST($13, repositories.owner_id),
                    owner_type = $14,
                    license = COALESCE($15, repositories.license),
                    topics = CASE WHEN cardinality($16) = 0 THEN repositories.topics ELSE $16 END,
                    is_fork = $17,
                    is_archived = $18,
                    homepage = COALESCE($19, repositories.homepage),
                    ingested_at = NOW()
                "#,
            )
            .bind(repo.github_id)
            .bind(&repo.name)
            .bind(&repo.full_name)
            .bind(&repo.description)
            .bind(&repo.language)
            .bind(repo.stars)
            .bind(repo.forks)
            .bind(repo.watchers)
            .bind(repo.open_issues)
            .bind(repo.created_at)
            .bind(repo.updated_at)
            .bind(&repo.owner_login)
            .bind(repo.owner_id)
            .bind(&repo.owner_type)
            .bind(&repo.license)
            .bind(&repo.topics)
            .bind(repo.is_fork)
            .bind(repo.is_archived)
            .bind(&repo.homepage)
            .execute(&mut **tx)
            .await?;
        }
        Record::Contributor(user) => {
            sqlx::query(
                r#"
                INSERT INTO contributors (
                    github_id, login, name, email, company, blog, location,
                    country_code, region, bio, followers, following,
                    public_repos, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (github_id) DO UPDATE SET
                    login = $2,
                    name = COALESCE($3, contributors.name),
                    email = COALESCE($4, contributors.email),
                    company = COALESCE($5, contributors.company),
                    blog = COALESCE($6, contributors.blog),
                    location = COALESCE($7, contributors.location),
                    country_code = COALESCE($8, contributors.country_code),
                    region = COALESCE($9, contributors.region),
                    bio = COALESCE($10, contributors.bio),
                    followers = $11,
                    following = $12,
                    public_repos = $13,
                    created_at = COALESCE($14, contributors.created_at),
                    updated_at = COALESCE($15, contributors.updated_at),
                    ingested_at = NOW()
                "#,
            )
            .bind(user.github_id)
            .bind(&user.login)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.company)
            .bind(&user.blog)
            .bind(&user.location)
            .bind(&user.country_code)
            .bind(&user.region)
            .bind(&user.bio)
            .bind(user.followers)
            .bind(user.following)
            .bind(user.public_repos)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&mut **tx)
            .await?;
        }
        Record::Organization(org) => {
            sqlx::query(
                r#"
                INSERT INTO organizations (
                    github_id, login, name, email, blog, location,
                    country_code, region, description, followers,
                    public_repos, is_verified, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (github_id) DO UPDATE SET
                    login = $2,
                    name = COALESCE($3, organizations.name),
                    email = COALESCE($4, organizations.email),
                    blog = COALESCE($5, organizations.blog),
                    location = COALESCE($6, organizations.location),
                    country_code = COALESCE($7, organizations.country_code),
                    region = COALESCE($8, organizations.region),
                    description = COALESCE($9, organizations.description),
                    followers = $10,
                    public_repos = $11,
                    is_verified = $12,
                    created_at = COALESCE($13, organizations.created_at),
                    updated_at = COALESCE($14, organizations.updated_at),
                    ingested_at = NOW()
                "#,
            )
            .bind(org.github_id)
            .bind(&org.login)
            .bind(&org.name)
            .bind(&org.email)
            .bind(&org.blog)
            .bind(&org.location)
            .bind(&org.country_code)
            .bind(&org.region)
            .bind(&org.description)
            .bind(org.followers)
            .bind(org.public_repos)
            .bind(org.is_verified)
            .bind(org.created_at)
            .bind(org.updated_at)
            .execute(&mut **tx)
            .await?;
        }
        Record::RepoContribution(link) => {
            sqlx::query(
                r#"
                INSERT INTO repo_contributions (contributor_id, repository_id, commit_count)
                VALUES ($1, $2, $3)
                ON CONFLICT (contributor_id, repository_id) DO UPDATE SET
                    commit_count = GREATEST($3, repo_contributions.commit_count)
                "#,
            )
            .bind(link.contributor_id)
            .bind(link.repository_id)
            .bind(link.commit_count)
            .execute(&mut **tx)
            .await?;
        }
        Record::OrgMembership(link) => {
            sqlx::query(
                r#"
                INSERT INTO org_memberships (contributor_id, organization_id)
                VALUES ($1, $2)
                ON CONFLICT (contributor_id, organization_id) DO NOTHING
                "#,
            )
            .bind(link.contributor_id)
            .bind(link.organization_id)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl RecordStore for Store {
    async fn upsert_batch(
        &self,
        _kind: EntityKind,
        records: &[Record],
    ) -> githarvest_core::Result<u64> {
        Ok(self.upsert_records(records).await?)
    }

    async fn pending_geocode(
        &self,
        kind: EntityKind,
        limit: i64,
    ) -> githarvest_core::Result<Vec<GeoTarget>> {
        Ok(self.geocode_targets(kind, limit).await?)
    }

    async fn apply_geocode(
        &self,
        target: &GeoTarget,
        country_code: Option<&str>,
        region: Option<&str>,
    ) -> githarvest_core::Result<()> {
        Ok(self.write_geocode(target, country_code, region).await?)
    }
}

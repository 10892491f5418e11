//! Database layer for Leadguard.
//!
//! Uses PostgreSQL for job storage with sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{ErrorContext, GuardError, Result};
use crate::jobs::{Job, JobFilter, JobId, JobStatus, JobStore, JobUpdate, TaskHandle};

const JOB_COLUMNS: &str =
    "id, status, pause_reason, task_handle, error, payload, created_at, updated_at";

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("pipeline_jobs migration failed")
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round trip used by readiness probes.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn job_store(&self) -> PgJobStore {
        PgJobStore::new(self.pool.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Store
// ═══════════════════════════════════════════════════════════════════════════════

/// `pipeline_jobs` table access.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Appends `updated_at = NOW()` and one assignment per field set in `update`.
fn push_assignments(qb: &mut QueryBuilder<'_, Postgres>, update: &JobUpdate) {
    qb.push("updated_at = NOW()");

    if let Some(status) = update.status {
        qb.push(", status = ").push_bind(status.as_str());
    }
    if let Some(reason) = &update.pause_reason {
        qb.push(", pause_reason = ").push_bind(reason.clone());
    }
    if let Some(handle) = &update.task_handle {
        qb.push(", task_handle = ")
            .push_bind(handle.as_ref().map(|h| h.as_str().to_string()));
    }
    if let Some(error) = &update.error {
        qb.push(", error = ").push_bind(error.clone());
    }
}

/// Appends the WHERE clause for the filter. An empty status list matches any
/// status, as in [`JobFilter::matches`].
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
    qb.push(" WHERE TRUE");

    if !filter.statuses.is_empty() {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        qb.push(" AND status = ANY(").push_bind(statuses).push(")");
    }

    if let Some(ids) = &filter.ids {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        qb.push(" AND id = ANY(").push_bind(ids).push(")");
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn bulk_transition(
        &self,
        filter: &JobFilter,
        new_status: JobStatus,
        update: &JobUpdate,
    ) -> Result<u64> {
        let update = JobUpdate {
            status: Some(new_status),
            ..update.clone()
        };

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE pipeline_jobs SET ");
        push_assignments(&mut qb, &update);
        push_filter(&mut qb, filter);

        // Dropping the transaction without commit rolls it back.
        let mut tx = self.pool.begin().await?;
        let result = qb.build().execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    async fn update_one(&self, id: JobId, update: &JobUpdate) -> Result<()> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE pipeline_jobs SET ");
        push_assignments(&mut qb, update);
        qb.push(" WHERE id = ").push_bind(id.0);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(GuardError::job_not_found(id.0));
        }
        Ok(())
    }

    async fn snapshot(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM pipeline_jobs", JOB_COLUMNS));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at, id");

        let rows: Vec<JobRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM pipeline_jobs");
        push_filter(&mut qb, filter);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_jobs (id, status, pause_reason, task_handle, error, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id.0)
        .bind(job.status.as_str())
        .bind(&job.pause_reason)
        .bind(job.task_handle.as_ref().map(|h| h.as_str()))
        .bind(&job.error)
        .bind(&job.payload)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM pipeline_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub status: String,
    pub pause_reason: Option<String>,
    pub task_handle: Option<String>,
    pub error: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = GuardError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: JobId(row.id),
            status: row.status.parse()?,
            pause_reason: row.pause_reason,
            task_handle: row.task_handle.map(TaskHandle),
            error: row.error,
            payload: row.payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

//! Job Store (spec §4.A).
//!
//! Durable mapping from job id to `Job`, with a trait so downstream crates
//! depend on the contract rather than the Postgres implementation —
//! mirroring how `ob-workflow::engine::WorkflowEngine` sits on top of a
//! `WorkflowRepository` it only talks to through method calls, and how the
//! teacher's `TaskQueueListener` uses `FOR UPDATE SKIP LOCKED` for safe
//! concurrent polling.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{ContainerState, Job, UploadState};

/// Contract every Job Store implementation must satisfy (spec §4.A).
///
/// Implementations must guarantee that concurrent updates to the *same*
/// job serialize, while different jobs update in parallel.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<(), CoreError>;

    async fn get(&self, id: Uuid) -> Result<Job, CoreError>;

    async fn find_by_container_ref(&self, container_ref: &str) -> Result<Job, CoreError>;

    /// Apply `mutator` to the current record under an exclusive per-record
    /// guard. `mutator` receives the latest record and returns the record
    /// it wants persisted, or a `CoreError` (typically
    /// `InvariantViolation`) to abort without persisting anything.
    async fn update(
        &self,
        id: Uuid,
        mutator: Box<dyn FnOnce(Job) -> Result<Job, CoreError> + Send>,
    ) -> Result<Job, CoreError>;

    /// Candidates for the Uploader to claim: COMPLETED with upload_state in
    /// {PENDING, FAILED}, ordered by `upload_state_updated` ascending.
    ///
    /// This does not mean every returned job is ready to submit — PENDING
    /// only means "not yet scheduled", not "has a result payload" (a
    /// SUCCEEDED container with no callback yet is COMPLETED+PENDING with
    /// nothing to send). The Uploader is responsible for both checking
    /// `Job::ready_for_upload` and performing the PENDING/FAILED -> SCHEDULED
    /// transition itself, under this store's per-record `update` guard,
    /// before it dispatches (spec §5: at most one Uploader worker is active
    /// on a given job at a time).
    async fn list_pending_upload(&self) -> Result<Vec<Job>, CoreError>;
}

/// Postgres-backed Job Store. The whole `Job` is kept as a JSONB blob: the
/// shape is stable, but storing it as one document avoids a wide,
/// constantly-migrated table while still letting the three fields we need
/// to filter/order/unique-index on live as projected columns.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the Job Store's migration. Exposed as a method (rather than a
    /// `migrations/` directory processed by `sqlx::migrate!`) because this
    /// crate is consumed standalone by `grader-server`'s startup, which
    /// owns the single migration runner for the whole orchestrator.
    pub const CREATE_TABLE_SQL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS grader.jobs (
            id uuid PRIMARY KEY,
            container_ref text UNIQUE,
            container_state text NOT NULL,
            upload_state text NOT NULL,
            upload_state_updated timestamptz,
            data jsonb NOT NULL
        )
    "#;
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, CoreError> {
    let data: serde_json::Value = row.try_get("data")?;
    serde_json::from_value(data)
        .map_err(|e| CoreError::InvariantViolation(format!("corrupt job row: {e}")))
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: Job) -> Result<(), CoreError> {
        let data = serde_json::to_value(&job)
            .map_err(|e| CoreError::InvariantViolation(format!("cannot serialize job: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO grader.jobs (id, container_ref, container_state, upload_state, upload_state_updated, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id)
        .bind(&job.container_ref)
        .bind(container_state_str(job.container_state))
        .bind(upload_state_str(job.upload_state))
        .bind(job.upload_state_updated)
        .bind(&data)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                CoreError::Conflict(job.container_ref.unwrap_or_default()),
            ),
            Err(e) => Err(CoreError::Database(e)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Job, CoreError> {
        let row = sqlx::query("SELECT data FROM grader.jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreError::NotFound(id))?;
        row_to_job(&row)
    }

    async fn find_by_container_ref(&self, container_ref: &str) -> Result<Job, CoreError> {
        let row = sqlx::query("SELECT data FROM grader.jobs WHERE container_ref = $1")
            .bind(container_ref)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(Uuid::nil()))?;
        row_to_job(&row)
    }

    async fn update(
        &self,
        id: Uuid,
        mutator: Box<dyn FnOnce(Job) -> Result<Job, CoreError> + Send>,
    ) -> Result<Job, CoreError> {
        let mut tx = self.pool.begin().await?;

        // SELECT ... FOR UPDATE is the per-record exclusive guard: a second
        // `update` for the same job blocks here until this transaction
        // commits, serializing concurrent mutations as spec §4.A requires.
        let row = sqlx::query("SELECT data FROM grader.jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoreError::NotFound(id))?;

        let current = row_to_job(&row)?;
        let updated = mutator(current)?;

        let data = serde_json::to_value(&updated)
            .map_err(|e| CoreError::InvariantViolation(format!("cannot serialize job: {e}")))?;

        sqlx::query(
            r#"
            UPDATE grader.jobs
            SET container_ref = $2,
                container_state = $3,
                upload_state = $4,
                upload_state_updated = $5,
                data = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&updated.container_ref)
        .bind(container_state_str(updated.container_state))
        .bind(upload_state_str(updated.upload_state))
        .bind(updated.upload_state_updated)
        .bind(&data)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn list_pending_upload(&self) -> Result<Vec<Job>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM grader.jobs
            WHERE container_state = 'COMPLETED'
              AND upload_state IN ('PENDING', 'FAILED')
            ORDER BY upload_state_updated ASC NULLS FIRST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }
}

fn container_state_str(state: ContainerState) -> &'static str {
    match state {
        ContainerState::Created => "CREATED",
        ContainerState::Ordered => "ORDERED",
        ContainerState::Scheduled => "SCHEDULED",
        ContainerState::Running => "RUNNING",
        ContainerState::Completed => "COMPLETED",
    }
}

fn upload_state_str(state: UploadState) -> &'static str {
    match state {
        UploadState::Pending => "PENDING",
        UploadState::Scheduled => "SCHEDULED",
        UploadState::Succeeded => "SUCCEEDED",
        UploadState::Failed => "FAILED",
    }
}

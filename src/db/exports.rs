use crate::db::RepoResult;
use crate::domain::models::{ExportJob, ExportType};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, user_id, export_type, status, params, result_url, error, \
     started_at, completed_at, created_at, updated_at";

pub async fn create(
    pool: &PgPool,
    owner: Uuid,
    kind: ExportType,
    params: &serde_json::Value,
) -> RepoResult<ExportJob> {
    let row = sqlx::query_as::<_, ExportJob>(&format!(
        r#"
        INSERT INTO export_jobs (id, user_id, export_type, params)
        VALUES ($1, $2, $3, $4)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(owner)
    .bind(kind)
    .bind(params)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn list(pool: &PgPool, owner: Uuid) -> RepoResult<Vec<ExportJob>> {
    let rows = sqlx::query_as::<_, ExportJob>(&format!(
        "SELECT {JOB_COLUMNS} FROM export_jobs WHERE user_id = $1 ORDER BY created_at DESC LIMIT 100"
    ))
    .bind(owner)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_scoped(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<Option<ExportJob>> {
    let row = sqlx::query_as::<_, ExportJob>(&format!(
        "SELECT {JOB_COLUMNS} FROM export_jobs WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Takes the oldest pending job; concurrent workers never get the same row.
pub async fn claim_next(pool: &PgPool) -> RepoResult<Option<ExportJob>> {
    let row = sqlx::query_as::<_, ExportJob>(&format!(
        r#"
        UPDATE export_jobs SET status = 'PROCESSING', started_at = now(), updated_at = now()
        WHERE id = (
            SELECT id FROM export_jobs
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Records success for the claim that started at `claimed_at`; false when the job was
/// requeued or reclaimed in the meantime.
pub async fn complete(
    pool: &PgPool,
    id: Uuid,
    claimed_at: Option<DateTime<Utc>>,
    result_url: &str,
) -> RepoResult<bool> {
    let res = sqlx::query(
        r#"
        UPDATE export_jobs
        SET status = 'COMPLETED', result_url = $3, error = NULL, completed_at = now(), updated_at = now()
        WHERE id = $1 AND status = 'PROCESSING' AND started_at IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(id)
    .bind(claimed_at)
    .bind(result_url)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Failure counterpart of [`complete`], guarded the same way.
pub async fn fail(
    pool: &PgPool,
    id: Uuid,
    claimed_at: Option<DateTime<Utc>>,
    error: &str,
) -> RepoResult<bool> {
    let res = sqlx::query(
        r#"
        UPDATE export_jobs
        SET status = 'FAILED', error = $3, completed_at = now(), updated_at = now()
        WHERE id = $1 AND status = 'PROCESSING' AND started_at IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(id)
    .bind(claimed_at)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Puts jobs stuck in PROCESSING (crashed worker) back in the queue.
pub async fn requeue_stale(pool: &PgPool, older_than_minutes: i32) -> RepoResult<u64> {
    let res = sqlx::query(
        r#"
        UPDATE export_jobs SET status = 'PENDING', started_at = NULL, updated_at = now()
        WHERE status = 'PROCESSING' AND started_at < now() - make_interval(mins => $1)
        "#,
    )
    .bind(older_than_minutes)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

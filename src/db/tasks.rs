use crate::db::{Page, Paging, RepoResult};
use crate::domain::models::{Task, TaskStatus, DEFAULT_PRIORITY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, user_id, lead_id, title, description, due_date, priority, status, \
     completed_at, due_notified_at, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub lead_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub lead_id: Option<Uuid>,
    pub due_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct StatusCount {
    pub status: TaskStatus,
    pub count: i64,
}

/// Overdue task claimed for a due notification.
#[derive(Debug, FromRow)]
pub struct DueTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub due_date: Option<DateTime<Utc>>,
}

pub async fn list(pool: &PgPool, owner: Option<Uuid>, filter: &TaskFilter) -> RepoResult<Page<Task>> {
    let paging = Paging {
        limit: filter.limit,
        offset: filter.offset,
    };
    let (limit, offset) = (paging.limit(), paging.offset());

    const WHERE: &str = r#"
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::task_status IS NULL OR status = $2)
          AND ($3::uuid IS NULL OR lead_id = $3)
          AND ($4::timestamptz IS NULL OR due_date <= $4)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM tasks {WHERE}"))
        .bind(owner)
        .bind(filter.status)
        .bind(filter.lead_id)
        .bind(filter.due_before)
        .fetch_one(pool)
        .await?;

    let items = sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks {WHERE} \
         ORDER BY due_date ASC NULLS LAST, priority ASC, created_at ASC LIMIT $5 OFFSET $6"
    ))
    .bind(owner)
    .bind(filter.status)
    .bind(filter.lead_id)
    .bind(filter.due_before)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(Page {
        items,
        total,
        limit,
        offset,
    })
}

pub async fn find_scoped(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<Option<Task>> {
    let row = sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn insert(conn: &mut PgConnection, owner: Uuid, new: &NewTask) -> RepoResult<Task> {
    let row = sqlx::query_as::<_, Task>(&format!(
        r#"
        INSERT INTO tasks (id, user_id, lead_id, title, description, due_date, priority)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(owner)
    .bind(new.lead_id)
    .bind(new.title.trim())
    .bind(&new.description)
    .bind(new.due_date)
    .bind(new.priority.unwrap_or(DEFAULT_PRIORITY))
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn create(pool: &PgPool, owner: Uuid, new: &NewTask) -> RepoResult<Task> {
    let mut conn = pool.acquire().await?;
    insert(&mut conn, owner, new).await
}

/// Status changes keep `completed_at` consistent; a moved due date re-arms the reminder.
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    owner: Option<Uuid>,
    patch: &TaskPatch,
) -> RepoResult<Option<Task>> {
    let row = sqlx::query_as::<_, Task>(&format!(
        r#"
        UPDATE tasks SET
            title = COALESCE($3, title),
            description = COALESCE($4, description),
            due_date = COALESCE($5, due_date),
            due_notified_at = CASE WHEN $5::timestamptz IS NULL THEN due_notified_at ELSE NULL END,
            priority = COALESCE($6, priority),
            status = COALESCE($7, status),
            completed_at = CASE
                WHEN $7::task_status = 'COMPLETED' THEN COALESCE(completed_at, now())
                WHEN $7::task_status IS NULL THEN completed_at
                ELSE NULL
            END,
            updated_at = now()
        WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(owner)
    .bind(patch.title.as_deref().map(str::trim))
    .bind(&patch.description)
    .bind(patch.due_date)
    .bind(patch.priority)
    .bind(patch.status)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn delete(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<bool> {
    let res = sqlx::query("DELETE FROM tasks WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn claim_overdue(pool: &PgPool, now: DateTime<Utc>) -> RepoResult<Vec<DueTask>> {
    let rows = sqlx::query_as::<_, DueTask>(
        r#"
        UPDATE tasks SET due_notified_at = $1
        WHERE status IN ('PENDING', 'IN_PROGRESS')
          AND due_date <= $1
          AND due_notified_at IS NULL
        RETURNING id, user_id, title, due_date
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_by_status(pool: &PgPool, owner: Option<Uuid>) -> RepoResult<Vec<StatusCount>> {
    let rows = sqlx::query_as::<_, StatusCount>(
        r#"
        SELECT status, COUNT(*) AS count FROM tasks
        WHERE ($1::uuid IS NULL OR user_id = $1)
        GROUP BY status
        ORDER BY status
        "#,
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_overdue(pool: &PgPool, owner: Option<Uuid>, now: DateTime<Utc>) -> RepoResult<i64> {
    let n: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM tasks
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND status IN ('PENDING', 'IN_PROGRESS')
          AND due_date < $2
        "#,
    )
    .bind(owner)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

pub async fn count_completed_in_window(
    pool: &PgPool,
    owner: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> RepoResult<i64> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tasks WHERE user_id = $1 AND completed_at >= $2 AND completed_at < $3",
    )
    .bind(owner)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

/// Every task in scope, for data exports.
pub async fn list_all(pool: &PgPool, owner: Option<Uuid>) -> RepoResult<Vec<Task>> {
    let rows = sqlx::query_as::<_, Task>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE ($1::uuid IS NULL OR user_id = $1) ORDER BY created_at ASC"
    ))
    .bind(owner)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

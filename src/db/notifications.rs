use crate::db::{Page, Paging, RepoResult};
use crate::domain::models::{Notification, NotificationType};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, notification_type, title, message, link, is_read, read_at, created_at";

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

pub async fn insert(conn: &mut PgConnection, new: &NewNotification) -> RepoResult<Notification> {
    let row = sqlx::query_as::<_, Notification>(&format!(
        r#"
        INSERT INTO notifications (id, user_id, notification_type, title, message, link)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {NOTIFICATION_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(new.user_id)
    .bind(new.kind)
    .bind(&new.title)
    .bind(&new.message)
    .bind(&new.link)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn create(pool: &PgPool, new: &NewNotification) -> RepoResult<Notification> {
    let mut conn = pool.acquire().await?;
    insert(&mut conn, new).await
}

pub async fn list(
    pool: &PgPool,
    user_id: Uuid,
    unread_only: bool,
    paging: Paging,
) -> RepoResult<Page<Notification>> {
    let (limit, offset) = (paging.limit(), paging.offset());

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND (NOT $2 OR NOT is_read)",
    )
    .bind(user_id)
    .bind(unread_only)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as::<_, Notification>(&format!(
        r#"
        SELECT {NOTIFICATION_COLUMNS} FROM notifications
        WHERE user_id = $1 AND (NOT $2 OR NOT is_read)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(user_id)
    .bind(unread_only)
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

pub async fn unread_count(pool: &PgPool, user_id: Uuid) -> RepoResult<i64> {
    let n: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    Ok(n)
}

pub async fn mark_read(pool: &PgPool, id: Uuid, user_id: Uuid) -> RepoResult<Option<Notification>> {
    let row = sqlx::query_as::<_, Notification>(&format!(
        r#"
        UPDATE notifications SET is_read = TRUE, read_at = COALESCE(read_at, now())
        WHERE id = $1 AND user_id = $2
        RETURNING {NOTIFICATION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn mark_all_read(pool: &PgPool, user_id: Uuid) -> RepoResult<u64> {
    let res = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = now() WHERE user_id = $1 AND NOT is_read",
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

pub async fn delete(pool: &PgPool, id: Uuid, user_id: Uuid) -> RepoResult<bool> {
    let res = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

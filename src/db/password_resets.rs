use crate::db::RepoResult;
use crate::domain::models::PasswordReset;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn create(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> RepoResult<PasswordReset> {
    let row = sqlx::query_as::<_, PasswordReset>(
        r#"
        INSERT INTO password_resets (id, user_id, token_hash, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, token_hash, expires_at, used_at, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Atomically consumes an unused, unexpired token; `None` if it was invalid.
pub async fn consume(pool: &PgPool, token_hash: &str, now: DateTime<Utc>) -> RepoResult<Option<PasswordReset>> {
    let row = sqlx::query_as::<_, PasswordReset>(
        r#"
        UPDATE password_resets SET used_at = $2
        WHERE token_hash = $1 AND used_at IS NULL AND expires_at > $2
        RETURNING id, user_id, token_hash, expires_at, used_at, created_at
        "#,
    )
    .bind(token_hash)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Invalidates every other outstanding token of the user.
pub async fn revoke_for_user(pool: &PgPool, user_id: Uuid) -> RepoResult<u64> {
    let res = sqlx::query("DELETE FROM password_resets WHERE user_id = $1 AND used_at IS NULL")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn purge_expired(pool: &PgPool, now: DateTime<Utc>) -> RepoResult<u64> {
    let res = sqlx::query("DELETE FROM password_resets WHERE expires_at < $1 OR used_at IS NOT NULL")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

use crate::db::RepoResult;
use crate::domain::models::{User, UserRole};
use sqlx::PgPool;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, email, name, password_hash, role, preferences, is_active, created_at, updated_at";

pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub role: UserRole,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> RepoResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> RepoResult<Option<User>> {
    let user =
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await?;
    Ok(user)
}

pub async fn list(pool: &PgPool) -> RepoResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY is_active DESC, created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn list_active(pool: &PgPool) -> RepoResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE is_active ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn create(pool: &PgPool, new: NewUser<'_>) -> RepoResult<User> {
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (id, email, name, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(normalize_email(new.email))
    .bind(new.name.trim())
    .bind(new.password_hash)
    .bind(new.role)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

// Serialises self-registration so only one concurrent signup can be the first user.
const REGISTRATION_LOCK: i64 = 0x4c50_5245_4749_5354;

/// Role a self-registered account gets; `None` when signup is closed.
pub fn registration_role(existing_users: i64, allow_signup: bool) -> Option<UserRole> {
    match (existing_users, allow_signup) {
        (0, _) => Some(UserRole::Admin),
        (_, true) => Some(UserRole::User),
        (_, false) => None,
    }
}

/// Self-registration: the first account becomes ADMIN. Returns `None` when signup is closed.
pub async fn register(
    pool: &PgPool,
    email: &str,
    name: &str,
    password_hash: &str,
    allow_signup: bool,
) -> RepoResult<Option<User>> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(REGISTRATION_LOCK)
        .execute(&mut *tx)
        .await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    let Some(role) = registration_role(existing, allow_signup) else {
        return Ok(None);
    };

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (id, email, name, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(normalize_email(email))
    .bind(name.trim())
    .bind(password_hash)
    .bind(role)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(Some(user))
}

/// Inserts unless the email is taken; returns `None` when the row already existed.
pub async fn create_if_absent(pool: &PgPool, new: NewUser<'_>) -> RepoResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (id, email, name, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO NOTHING
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(normalize_email(new.email))
    .bind(new.name.trim())
    .bind(new.password_hash)
    .bind(new.role)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn set_password_hash(pool: &PgPool, id: Uuid, hash: &str) -> RepoResult<()> {
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(hash)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_role(pool: &PgPool, id: Uuid, role: UserRole) -> RepoResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
    ))
    .bind(id)
    .bind(role)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn set_active(pool: &PgPool, id: Uuid, active: bool) -> RepoResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
    ))
    .bind(id)
    .bind(active)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Shallow JSON merge: top-level keys in `patch` replace existing ones.
pub async fn merge_preferences(
    pool: &PgPool,
    id: Uuid,
    patch: &serde_json::Value,
) -> RepoResult<Option<serde_json::Value>> {
    let prefs: Option<serde_json::Value> = sqlx::query_scalar(
        r#"
        UPDATE users
        SET preferences = preferences || $2::jsonb, updated_at = now()
        WHERE id = $1
        RETURNING preferences
        "#,
    )
    .bind(id)
    .bind(patch)
    .fetch_optional(pool)
    .await?;
    Ok(prefs)
}

pub async fn delete(pool: &PgPool, id: Uuid) -> RepoResult<bool> {
    let res = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_registration_is_admin() {
        assert_eq!(registration_role(0, false), Some(UserRole::Admin));
        assert_eq!(registration_role(0, true), Some(UserRole::Admin));
        assert_eq!(registration_role(1, true), Some(UserRole::User));
        assert_eq!(registration_role(7, false), None);
    }

    #[test]
    fn emails_are_compared_lowercased() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}

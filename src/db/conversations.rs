use crate::db::RepoResult;
use crate::domain::models::{Conversation, ConversationType};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "id, lead_id, user_id, conversation_type, subject, content, \
     occurred_at, follow_up_required, follow_up_date, follow_up_notified_at, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub conversation_type: ConversationType,
    pub subject: Option<String>,
    pub content: String,
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub follow_up_required: bool,
    pub follow_up_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationPatch {
    pub subject: Option<String>,
    pub content: Option<String>,
    pub follow_up_required: Option<bool>,
    pub follow_up_date: Option<DateTime<Utc>>,
}

impl ConversationPatch {
    /// Whether applying the patch can move the lead's next follow-up.
    pub fn touches_follow_up(&self) -> bool {
        self.follow_up_required.is_some() || self.follow_up_date.is_some()
    }
}

#[derive(Debug, Serialize, FromRow)]
pub struct TypeCount {
    pub conversation_type: ConversationType,
    pub count: i64,
}

/// Due follow-up joined with the lead it belongs to.
#[derive(Debug, Serialize, FromRow)]
pub struct DueFollowUp {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub lead_name: String,
    pub recipient_id: Option<Uuid>,
    pub subject: Option<String>,
    pub follow_up_date: Option<DateTime<Utc>>,
}

pub async fn insert(
    conn: &mut PgConnection,
    lead_id: Uuid,
    author: Uuid,
    new: &NewConversation,
) -> RepoResult<Conversation> {
    let conversation = sqlx::query_as::<_, Conversation>(&format!(
        r#"
        INSERT INTO conversations (id, lead_id, user_id, conversation_type, subject, content,
                                   occurred_at, follow_up_required, follow_up_date)
        VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, now()), $8, $9)
        RETURNING {CONVERSATION_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(lead_id)
    .bind(author)
    .bind(new.conversation_type)
    .bind(&new.subject)
    .bind(&new.content)
    .bind(new.occurred_at)
    .bind(new.follow_up_required || new.follow_up_date.is_some())
    .bind(new.follow_up_date)
    .fetch_one(&mut *conn)
    .await?;
    Ok(conversation)
}

pub async fn list_for_lead(pool: &PgPool, lead_id: Uuid) -> RepoResult<Vec<Conversation>> {
    let rows = sqlx::query_as::<_, Conversation>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE lead_id = $1 ORDER BY occurred_at DESC"
    ))
    .bind(lead_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn recent_for_lead(pool: &PgPool, lead_id: Uuid, limit: i64) -> RepoResult<Vec<Conversation>> {
    let rows = sqlx::query_as::<_, Conversation>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE lead_id = $1 \
         ORDER BY occurred_at DESC LIMIT $2"
    ))
    .bind(lead_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// `(type, occurred_at)` pairs used for lead scoring.
pub async fn activity_for_lead(
    conn: &mut PgConnection,
    lead_id: Uuid,
) -> RepoResult<Vec<(ConversationType, DateTime<Utc>)>> {
    let rows = sqlx::query_as::<_, (ConversationType, DateTime<Utc>)>(
        "SELECT conversation_type, occurred_at FROM conversations WHERE lead_id = $1",
    )
    .bind(lead_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Conversation visible to `owner` (through its lead); `None` sees all.
pub async fn find_scoped(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<Option<Conversation>> {
    let row = sqlx::query_as::<_, Conversation>(
        r#"
        SELECT c.id, c.lead_id, c.user_id, c.conversation_type, c.subject, c.content,
               c.occurred_at, c.follow_up_required, c.follow_up_date, c.follow_up_notified_at,
               c.created_at, c.updated_at
        FROM conversations c
        JOIN leads l ON l.id = c.lead_id
        WHERE c.id = $1 AND ($2::uuid IS NULL OR l.user_id = $2)
        "#,
    )
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Points the lead's `next_follow_up_at` at its earliest follow-up that has not fired yet.
pub async fn sync_lead_follow_up(conn: &mut PgConnection, lead_id: Uuid) -> RepoResult<()> {
    sqlx::query(
        r#"
        UPDATE leads SET next_follow_up_at = (
            SELECT MIN(follow_up_date) FROM conversations
            WHERE lead_id = $1 AND follow_up_required AND follow_up_notified_at IS NULL
        ), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(lead_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update(pool: &PgPool, id: Uuid, patch: &ConversationPatch) -> RepoResult<Option<Conversation>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, Conversation>(&format!(
        r#"
        UPDATE conversations SET
            subject = COALESCE($2, subject),
            content = COALESCE($3, content),
            follow_up_required = COALESCE($4, follow_up_required),
            follow_up_date = COALESCE($5, follow_up_date),
            follow_up_notified_at = CASE WHEN $5::timestamptz IS NULL THEN follow_up_notified_at ELSE NULL END,
            updated_at = now()
        WHERE id = $1
        RETURNING {CONVERSATION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&patch.subject)
    .bind(&patch.content)
    .bind(patch.follow_up_required)
    .bind(patch.follow_up_date)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(conversation) = &row {
        if patch.touches_follow_up() {
            sync_lead_follow_up(&mut tx, conversation.lead_id).await?;
        }
    }
    tx.commit().await?;
    Ok(row)
}

pub async fn delete(pool: &PgPool, id: Uuid) -> RepoResult<bool> {
    let mut tx = pool.begin().await?;
    let removed: Option<(Uuid, bool)> = sqlx::query_as(
        "DELETE FROM conversations WHERE id = $1 RETURNING lead_id, follow_up_required",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((lead_id, true)) = removed {
        sync_lead_follow_up(&mut tx, lead_id).await?;
    }
    tx.commit().await?;
    Ok(removed.is_some())
}

pub async fn count_due_follow_ups(
    pool: &PgPool,
    owner: Option<Uuid>,
    until: DateTime<Utc>,
) -> RepoResult<i64> {
    let n: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM conversations c
        JOIN leads l ON l.id = c.lead_id
        WHERE c.follow_up_required
          AND c.follow_up_date <= $2
          AND ($1::uuid IS NULL OR l.user_id = $1)
        "#,
    )
    .bind(owner)
    .bind(until)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

/// Open follow-ups due before `until`, soonest first.
pub async fn list_due_follow_ups(
    pool: &PgPool,
    owner: Option<Uuid>,
    until: DateTime<Utc>,
    limit: i64,
) -> RepoResult<Vec<DueFollowUp>> {
    let rows = sqlx::query_as::<_, DueFollowUp>(
        r#"
        SELECT c.id, c.lead_id,
               trim(l.first_name || ' ' || COALESCE(l.last_name, '')) AS lead_name,
               COALESCE(l.user_id, c.user_id) AS recipient_id,
               c.subject, c.follow_up_date
        FROM conversations c
        JOIN leads l ON l.id = c.lead_id
        WHERE c.follow_up_required
          AND c.follow_up_date <= $2
          AND ($1::uuid IS NULL OR l.user_id = $1)
        ORDER BY c.follow_up_date ASC
        LIMIT $3
        "#,
    )
    .bind(owner)
    .bind(until)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Marks due, un-notified follow-ups as notified and returns them, so each fires once.
pub async fn claim_due_follow_ups(pool: &PgPool, now: DateTime<Utc>) -> RepoResult<Vec<DueFollowUp>> {
    let rows = sqlx::query_as::<_, DueFollowUp>(
        r#"
        WITH due AS (
            UPDATE conversations
            SET follow_up_notified_at = $1
            WHERE follow_up_required
              AND follow_up_date <= $1
              AND follow_up_notified_at IS NULL
            RETURNING id, lead_id, user_id, subject, follow_up_date
        )
        SELECT due.id, due.lead_id,
               trim(l.first_name || ' ' || COALESCE(l.last_name, '')) AS lead_name,
               COALESCE(l.user_id, due.user_id) AS recipient_id,
               due.subject, due.follow_up_date
        FROM due
        JOIN leads l ON l.id = due.lead_id
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_by_type_in_window(
    pool: &PgPool,
    owner: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> RepoResult<Vec<TypeCount>> {
    let rows = sqlx::query_as::<_, TypeCount>(
        r#"
        SELECT c.conversation_type, COUNT(*) AS count
        FROM conversations c
        JOIN leads l ON l.id = c.lead_id
        WHERE l.user_id = $1 AND c.occurred_at >= $2 AND c.occurred_at < $3
        GROUP BY c.conversation_type
        ORDER BY c.conversation_type
        "#,
    )
    .bind(owner)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Streams every conversation in scope, oldest first.
pub fn stream_for_export<'a>(
    pool: &'a PgPool,
    owner: Option<Uuid>,
) -> BoxStream<'a, Result<Conversation, sqlx::Error>> {
    sqlx::query_as::<_, Conversation>(
        r#"
        SELECT c.id, c.lead_id, c.user_id, c.conversation_type, c.subject, c.content,
               c.occurred_at, c.follow_up_required, c.follow_up_date, c.follow_up_notified_at,
               c.created_at, c.updated_at
        FROM conversations c
        JOIN leads l ON l.id = c.lead_id
        WHERE ($1::uuid IS NULL OR l.user_id = $1)
        ORDER BY c.occurred_at ASC
        "#,
    )
    .bind(owner)
    .fetch(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_follow_up_fields_resync_the_lead() {
        let text_only = ConversationPatch {
            subject: Some("Re: pricing".into()),
            content: Some("Updated notes".into()),
            ..Default::default()
        };
        assert!(!text_only.touches_follow_up());

        let rescheduled = ConversationPatch {
            follow_up_date: Some(Utc::now()),
            ..Default::default()
        };
        assert!(rescheduled.touches_follow_up());

        let dropped = ConversationPatch {
            follow_up_required: Some(false),
            ..Default::default()
        };
        assert!(dropped.touches_follow_up());
    }
}

//! Repository tests against a real PostgreSQL. Each test gets a fresh database with
//! `migrations/` applied; run them with `DATABASE_URL` set and `cargo test -- --ignored`.
use super::conversations::{self, ConversationPatch, NewConversation};
use super::exports;
use super::leads::{self, LeadFilter, LeadPatch, NewLead};
use super::users::{self, NewUser};
use crate::domain::models::{ConversationType, ExportType, Lead, LeadStage, User, UserRole};
use chrono::{Duration, Utc};
use sqlx::{Pool, Postgres};

async fn owner(pool: &Pool<Postgres>) -> anyhow::Result<User> {
    let user = users::create(
        pool,
        NewUser {
            email: "owner@example.com",
            name: "Owner",
            password_hash: "not-a-real-hash",
            role: UserRole::User,
        },
    )
    .await?;
    Ok(user)
}

async fn ada(pool: &Pool<Postgres>, owner: &User) -> anyhow::Result<Lead> {
    let new = NewLead {
        first_name: "Ada".into(),
        email: Some("ada@example.com".into()),
        ..Default::default()
    };
    Ok(leads::create(pool, owner.id, &new).await?)
}

fn with_email(first_name: &str, email: Option<&str>) -> NewLead {
    NewLead {
        first_name: first_name.into(),
        email: email.map(Into::into),
        ..Default::default()
    }
}

#[sqlx::test]
#[ignore = "needs DATABASE_URL"]
async fn import_skips_emails_the_owner_already_has(pool: Pool<Postgres>) -> anyhow::Result<()> {
    let owner = owner(&pool).await?;

    let first = vec![
        with_email("Ada", Some("ada@example.com")),
        with_email("Ada again", Some(" ADA@example.com ")),
        with_email("Grace", Some("grace@example.com")),
        with_email("No email", None),
    ];
    assert_eq!(leads::create_many(&pool, owner.id, &first).await?, 3);

    let second = vec![
        with_email("Grace", Some("grace@example.com")),
        with_email("Linus", Some("linus@example.com")),
    ];
    assert_eq!(leads::create_many(&pool, owner.id, &second).await?, 1);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE user_id = $1")
        .bind(owner.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(total, 4);
    Ok(())
}

#[sqlx::test]
#[ignore = "needs DATABASE_URL"]
async fn stage_change_loses_to_a_concurrent_move(pool: Pool<Postgres>) -> anyhow::Result<()> {
    let owner = owner(&pool).await?;
    let lead = ada(&pool, &owner).await?;

    assert!(leads::set_stage(&pool, lead.id, LeadStage::New, LeadStage::Contacted).await?);
    // A second writer still believes the lead is NEW.
    assert!(!leads::set_stage(&pool, lead.id, LeadStage::New, LeadStage::Lost).await?);

    let stored = leads::find_by_id(&pool, lead.id, None).await?.expect("lead exists");
    assert_eq!(stored.stage, LeadStage::Contacted);

    let moved = leads::set_stage_many(
        &pool,
        &[(lead.id, LeadStage::New)],
        Some(owner.id),
        LeadStage::Qualified,
    )
    .await?;
    assert!(moved.is_empty());
    Ok(())
}

#[sqlx::test]
#[ignore = "needs DATABASE_URL"]
async fn follow_up_reminders_are_claimed_once(pool: Pool<Postgres>) -> anyhow::Result<()> {
    let owner = owner(&pool).await?;
    let lead = ada(&pool, &owner).await?;
    let now = Utc::now();

    let mut conn = pool.acquire().await?;
    for days in [-1, 3] {
        let new = NewConversation {
            conversation_type: ConversationType::Call,
            subject: Some(format!("follow up {days}")),
            content: "Talked pricing".into(),
            occurred_at: None,
            follow_up_required: true,
            follow_up_date: Some(now + Duration::days(days)),
        };
        conversations::insert(&mut conn, lead.id, owner.id, &new).await?;
    }
    drop(conn);

    let claimed = conversations::claim_due_follow_ups(&pool, now).await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].recipient_id, Some(owner.id));
    assert_eq!(claimed[0].lead_name, "Ada");

    assert!(conversations::claim_due_follow_ups(&pool, now).await?.is_empty());
    Ok(())
}

#[sqlx::test]
#[ignore = "needs DATABASE_URL"]
async fn clearing_a_follow_up_resyncs_the_lead(pool: Pool<Postgres>) -> anyhow::Result<()> {
    let owner = owner(&pool).await?;
    let lead = ada(&pool, &owner).await?;
    let due = Utc::now() + Duration::days(2);

    let mut conn = pool.acquire().await?;
    let new = NewConversation {
        conversation_type: ConversationType::Email,
        subject: None,
        content: "Sent the deck".into(),
        occurred_at: None,
        follow_up_required: true,
        follow_up_date: Some(due),
    };
    let conversation = conversations::insert(&mut conn, lead.id, owner.id, &new).await?;
    conversations::sync_lead_follow_up(&mut conn, lead.id).await?;
    drop(conn);

    let stored = leads::find_by_id(&pool, lead.id, None).await?.expect("lead exists");
    assert!(stored.next_follow_up_at.is_some());
    assert_eq!(
        conversations::count_due_follow_ups(&pool, Some(owner.id), due).await?,
        1
    );

    let patch = ConversationPatch {
        follow_up_required: Some(false),
        ..Default::default()
    };
    conversations::update(&pool, conversation.id, &patch).await?;

    let stored = leads::find_by_id(&pool, lead.id, None).await?.expect("lead exists");
    assert_eq!(stored.next_follow_up_at, None);
    Ok(())
}

#[sqlx::test]
#[ignore = "needs DATABASE_URL"]
async fn only_the_first_registration_becomes_admin(pool: Pool<Postgres>) -> anyhow::Result<()> {
    let first = users::register(&pool, "first@example.com", "First", "hash", false).await?;
    assert_eq!(first.map(|u| u.role), Some(UserRole::Admin));

    let closed = users::register(&pool, "second@example.com", "Second", "hash", false).await?;
    assert!(closed.is_none());

    let open = users::register(&pool, "third@example.com", "Third", "hash", true).await?;
    assert_eq!(open.map(|u| u.role), Some(UserRole::User));
    Ok(())
}

#[sqlx::test]
#[ignore = "needs DATABASE_URL"]
async fn requeued_export_ignores_the_stale_worker(pool: Pool<Postgres>) -> anyhow::Result<()> {
    let owner = owner(&pool).await?;
    exports::create(&pool, owner.id, ExportType::Leads, &serde_json::json!({})).await?;

    let stale = exports::claim_next(&pool).await?.expect("job is pending");
    assert_eq!(exports::requeue_stale(&pool, -1).await?, 1);
    let fresh = exports::claim_next(&pool).await?.expect("job was requeued");
    assert_ne!(stale.started_at, fresh.started_at);

    assert!(!exports::complete(&pool, stale.id, stale.started_at, "/stale.csv").await?);
    assert!(exports::complete(&pool, fresh.id, fresh.started_at, "/fresh.csv").await?);
    assert!(!exports::fail(&pool, fresh.id, fresh.started_at, "too late").await?);
    Ok(())
}

#[sqlx::test]
#[ignore = "needs DATABASE_URL"]
async fn tag_filter_ignores_case(pool: Pool<Postgres>) -> anyhow::Result<()> {
    let owner = owner(&pool).await?;
    let new = NewLead {
        first_name: "Ada".into(),
        tags: vec![" VIP ".into()],
        ..Default::default()
    };
    leads::create(&pool, owner.id, &new).await?;

    let filter = LeadFilter {
        tag: Some("Vip".into()),
        ..Default::default()
    };
    let page = leads::list(&pool, Some(owner.id), &filter).await?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].tags, vec!["vip".to_string()]);
    Ok(())
}

#[sqlx::test]
#[ignore = "needs DATABASE_URL"]
async fn stage_window_counts_stage_changes_not_edits(pool: Pool<Postgres>) -> anyhow::Result<()> {
    let owner = owner(&pool).await?;
    let lead = ada(&pool, &owner).await?;
    assert!(leads::set_stage(&pool, lead.id, LeadStage::New, LeadStage::Converted).await?);

    let now = Utc::now();
    let (from, to) = (now - Duration::days(1), now + Duration::days(1));
    let converted = leads::count_stage_in_window(&pool, owner.id, LeadStage::Converted, from, to).await?;
    assert_eq!(converted, 1);

    sqlx::query("UPDATE leads SET stage_changed_at = now() - interval '30 days' WHERE id = $1")
        .bind(lead.id)
        .execute(&pool)
        .await?;
    let patch = LeadPatch {
        notes: Some("renewal next year".into()),
        ..Default::default()
    };
    leads::update(&pool, lead.id, Some(owner.id), &patch).await?;

    // A recent edit does not make an old conversion count again.
    let converted = leads::count_stage_in_window(&pool, owner.id, LeadStage::Converted, from, to).await?;
    assert_eq!(converted, 0);
    Ok(())
}

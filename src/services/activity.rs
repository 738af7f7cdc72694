use crate::db::conversations::{self, NewConversation};
use crate::db::{leads, RepoResult};
use crate::domain::models::{Conversation, ConversationType, Lead, LeadStage};
use crate::domain::scoring::LeadScorer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct RecordedConversation {
    pub conversation: Conversation,
    pub stage: LeadStage,
    pub score: i32,
}

/// Logs an interaction and applies its effects on the lead in one transaction.
/// `None` when the lead disappeared in the meantime.
pub async fn record_conversation(
    pool: &PgPool,
    lead_id: Uuid,
    author: Uuid,
    new: &NewConversation,
) -> RepoResult<Option<RecordedConversation>> {
    let mut tx = pool.begin().await?;

    let Some(lead) = leads::lock(&mut tx, lead_id).await? else {
        return Ok(None);
    };

    let conversation = conversations::insert(&mut tx, lead.id, author, new).await?;
    let (stage, contacted_at, follow_up) = contact_effects(&lead, &conversation);
    leads::apply_contact(&mut tx, lead.id, stage, contacted_at, follow_up).await?;

    let activity = conversations::activity_for_lead(&mut tx, lead.id).await?;
    let score = LeadScorer::new().score(stage, &activity, Utc::now());
    leads::set_score(&mut tx, lead.id, score).await?;

    tx.commit().await?;

    if stage != lead.stage {
        tracing::info!("Lead {} moved {:?} -> {:?} after contact", lead.id, lead.stage, stage);
    }
    Ok(Some(RecordedConversation {
        conversation,
        stage,
        score,
    }))
}

/// New stage, contact timestamp and follow-up date implied by a logged interaction.
fn contact_effects(
    lead: &Lead,
    conversation: &Conversation,
) -> (LeadStage, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let stage = lead.stage.after_contact(conversation.conversation_type);
    let contacted_at = (conversation.conversation_type != ConversationType::Note)
        .then_some(conversation.occurred_at);
    let follow_up = if conversation.follow_up_required {
        conversation.follow_up_date
    } else {
        None
    };
    (stage, contacted_at, follow_up)
}

/// Recomputes one lead's score; `None` if the lead no longer exists.
pub async fn refresh_score(pool: &PgPool, lead_id: Uuid) -> RepoResult<Option<i32>> {
    let mut tx = pool.begin().await?;
    let Some(lead) = leads::lock(&mut tx, lead_id).await? else {
        return Ok(None);
    };
    let activity = conversations::activity_for_lead(&mut tx, lead.id).await?;
    let score = LeadScorer::new().score(lead.stage, &activity, Utc::now());
    leads::set_score(&mut tx, lead.id, score).await?;
    tx.commit().await?;
    Ok(Some(score))
}

/// Nightly pass so activity decay shows up in scores of untouched leads.
pub async fn rescore_all(pool: &PgPool) -> anyhow::Result<usize> {
    let ids = leads::list_ids_open(pool).await?;
    let mut rescored = 0;
    for id in ids {
        match refresh_score(pool, id).await {
            Ok(Some(_)) => rescored += 1,
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to rescore lead {}: {}", id, e),
        }
    }
    Ok(rescored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lead(stage: LeadStage) -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: Some("Lovelace".into()),
            email: None,
            phone: None,
            company: None,
            title: None,
            linkedin_url: None,
            source: None,
            notes: None,
            stage,
            tags: vec![],
            score: 0,
            user_id: None,
            campaign_id: None,
            campaign_step: None,
            campaign_step_at: None,
            campaign_finished_at: None,
            last_contacted_at: None,
            next_follow_up_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn conversation(kind: ConversationType, follow_up: Option<DateTime<Utc>>) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            user_id: None,
            conversation_type: kind,
            subject: None,
            content: "hi".into(),
            occurred_at: now,
            follow_up_required: follow_up.is_some(),
            follow_up_date: follow_up,
            follow_up_notified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn call_on_new_lead_marks_contacted() {
        let c = conversation(ConversationType::Call, None);
        let (stage, contacted, follow_up) = contact_effects(&lead(LeadStage::New), &c);
        assert_eq!(stage, LeadStage::Contacted);
        assert_eq!(contacted, Some(c.occurred_at));
        assert!(follow_up.is_none());
    }

    #[test]
    fn note_does_not_count_as_contact() {
        let due = Utc::now() + Duration::days(2);
        let c = conversation(ConversationType::Note, Some(due));
        let (stage, contacted, follow_up) = contact_effects(&lead(LeadStage::New), &c);
        assert_eq!(stage, LeadStage::New);
        assert!(contacted.is_none());
        assert_eq!(follow_up, Some(due));
    }
}

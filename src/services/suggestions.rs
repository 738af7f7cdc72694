use crate::db::notifications::{self, NewNotification};
use crate::db::suggestions::{self, NewSuggestion};
use crate::db::{conversations, leads, templates};
use crate::domain::models::{AiSuggestion, Lead, NotificationType};
use crate::services::ai::{HeuristicEngine, LeadContext, SuggestionDraft, SuggestionEngine, STALE_AFTER_DAYS};
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;

const CONTEXT_CONVERSATIONS: i64 = 20;

async fn load_context(pool: &PgPool, lead: &Lead) -> Result<LeadContext> {
    let recent = conversations::recent_for_lead(pool, lead.id, CONTEXT_CONVERSATIONS).await?;
    let templates = match lead.user_id {
        Some(owner) => templates::list(pool, Some(owner), None).await?,
        None => Vec::new(),
    };
    Ok(LeadContext {
        lead: lead.clone(),
        recent,
        templates,
        now: Utc::now(),
    })
}

/// Links each draft to the owner's first template of the requested type.
fn resolve(ctx: &LeadContext, drafts: Vec<SuggestionDraft>) -> Vec<NewSuggestion> {
    drafts
        .into_iter()
        .map(|d| NewSuggestion {
            template_id: d
                .template_type
                .and_then(|kind| ctx.template_for(kind))
                .map(|t| t.id),
            title: d.title,
            content: d.content,
            priority: d.priority,
        })
        .collect()
}

/// Asks the engine for suggestions, stores them and notifies the lead owner.
pub async fn generate_for_lead(
    pool: &PgPool,
    engine: &dyn SuggestionEngine,
    lead: &Lead,
) -> Result<Vec<AiSuggestion>> {
    let ctx = load_context(pool, lead).await?;
    let drafts = engine.suggest(&ctx).await?;
    if drafts.is_empty() {
        return Ok(Vec::new());
    }

    let created = suggestions::insert_many(pool, lead.id, &resolve(&ctx, drafts)).await?;

    if let Some(owner) = lead.user_id {
        let note = NewNotification {
            user_id: owner,
            kind: NotificationType::AiSuggestion,
            title: format!("New suggestions for {}", lead.full_name()),
            message: format!("{} next steps proposed ({})", created.len(), engine.name()),
            link: Some(format!("/leads/{}/suggestions", lead.id)),
        };
        if let Err(e) = notifications::create(pool, &note).await {
            tracing::error!("Failed to notify {} about suggestions: {}", owner, e);
        }
    }

    tracing::info!(
        "Generated {} suggestions for lead {} via {}",
        created.len(),
        lead.id,
        engine.name()
    );
    Ok(created)
}

/// Nightly: rule-based suggestions for stale leads with nothing open.
pub async fn sweep_stale(pool: &PgPool) -> Result<usize> {
    let stale = leads::list_stale_without_suggestion(pool, STALE_AFTER_DAYS as i32).await?;
    let engine = HeuristicEngine;
    let mut generated = 0;
    for lead in &stale {
        match generate_for_lead(pool, &engine, lead).await {
            Ok(created) => generated += created.len(),
            Err(e) => tracing::error!("Suggestion sweep failed for lead {}: {}", lead.id, e),
        }
    }
    Ok(generated)
}

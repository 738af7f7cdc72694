use crate::db::templates::NewTemplate;
use crate::domain::models::{
    Conversation, ConversationType, Lead, LeadStage, MessageTemplate, TemplateType, PRIORITY_RANGE,
};
use anyhow::{anyhow, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
    CreateChatCompletionRequestArgs, Role,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

/// Days without contact after which a CONTACTED/ENGAGED lead counts as stale.
pub const STALE_AFTER_DAYS: i64 = 7;
pub const MAX_SUGGESTIONS: usize = 5;

/// Everything an engine may look at when advising on one lead.
#[derive(Debug, Clone)]
pub struct LeadContext {
    pub lead: Lead,
    /// Most recent first.
    pub recent: Vec<Conversation>,
    pub templates: Vec<MessageTemplate>,
    pub now: DateTime<Utc>,
}

impl LeadContext {
    pub fn template_for(&self, kind: TemplateType) -> Option<&MessageTemplate> {
        self.templates.iter().find(|t| t.template_type == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionDraft {
    pub title: String,
    pub content: String,
    pub priority: i32,
    #[serde(default)]
    pub template_type: Option<TemplateType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    pub subject: Option<String>,
    pub content: String,
}

#[async_trait]
pub trait SuggestionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn suggest(&self, ctx: &LeadContext) -> Result<Vec<SuggestionDraft>>;

    async fn draft_template(&self, kind: TemplateType, brief: &str) -> Result<TemplateDraft>;
}

/// Rule-based engine; also the fallback when the model is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicEngine;

impl HeuristicEngine {
    pub fn rules(&self, ctx: &LeadContext) -> Vec<SuggestionDraft> {
        let lead = &ctx.lead;
        if lead.stage.is_terminal() {
            return Vec::new();
        }

        let name = lead.full_name();
        let mut candidates: Vec<SuggestionDraft> = Vec::new();

        if ctx.recent.is_empty() {
            candidates.push(SuggestionDraft {
                title: format!("Reach out to {name}"),
                content: format!(
                    "No interaction has been logged with {name} yet. Send a short introduction{}.",
                    company_suffix(lead)
                ),
                priority: 2,
                template_type: Some(TemplateType::ColdOutreach),
            });
        }

        let overdue = follow_up_overdue(ctx);
        if let Some(due) = overdue {
            candidates.push(SuggestionDraft {
                title: format!("Overdue follow-up with {name}"),
                content: format!(
                    "A follow-up was due on {}. Get back to {name} today.",
                    due.format("%Y-%m-%d")
                ),
                priority: 1,
                template_type: Some(TemplateType::FollowUp),
            });
        }

        if overdue.is_none() && matches!(lead.stage, LeadStage::Contacted | LeadStage::Engaged) {
            if let Some(days) = days_since_contact(lead, ctx.now).filter(|d| *d > STALE_AFTER_DAYS) {
                candidates.push(SuggestionDraft {
                    title: format!("Re-engage {name}"),
                    content: format!("Last contact was {days} days ago. Send a follow-up to keep momentum."),
                    priority: 2,
                    template_type: Some(TemplateType::FollowUp),
                });
            }
        }

        if lead.stage == LeadStage::Engaged
            && !ctx
                .recent
                .iter()
                .any(|c| c.conversation_type == ConversationType::Meeting)
        {
            candidates.push(SuggestionDraft {
                title: format!("Book a meeting with {name}"),
                content: format!("{name} is engaged but no meeting has happened yet. Propose a call slot."),
                priority: 2,
                template_type: Some(TemplateType::MeetingRequest),
            });
        }

        match lead.stage {
            LeadStage::Qualified => candidates.push(SuggestionDraft {
                title: format!("Send a proposal to {name}"),
                content: "The lead is qualified. Prepare and send a tailored proposal.".into(),
                priority: 2,
                template_type: Some(TemplateType::Proposal),
            }),
            LeadStage::Negotiation => candidates.push(SuggestionDraft {
                title: format!("Schedule a closing call with {name}"),
                content: "Negotiation is under way. Address the open points on a call and ask for the decision."
                    .into(),
                priority: 1,
                template_type: None,
            }),
            _ => {}
        }

        candidates.sort_by_key(|d| d.priority);
        candidates.truncate(MAX_SUGGESTIONS);
        candidates
    }
}

#[async_trait]
impl SuggestionEngine for HeuristicEngine {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn suggest(&self, ctx: &LeadContext) -> Result<Vec<SuggestionDraft>> {
        Ok(self.rules(ctx))
    }

    async fn draft_template(&self, kind: TemplateType, brief: &str) -> Result<TemplateDraft> {
        let starter = starter_template(kind);
        let brief = brief.trim();
        let content = if brief.is_empty() {
            starter.content
        } else {
            format!("{}\n\n{}", brief, starter.content)
        };
        Ok(TemplateDraft {
            name: starter.name,
            subject: starter.subject,
            content,
        })
    }
}

fn company_suffix(lead: &Lead) -> String {
    match lead.company.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => format!(" mentioning {c}"),
        _ => String::new(),
    }
}

fn days_since_contact(lead: &Lead, now: DateTime<Utc>) -> Option<i64> {
    lead.last_contacted_at.map(|at| (now - at).num_days())
}

fn follow_up_overdue(ctx: &LeadContext) -> Option<DateTime<Utc>> {
    let from_lead = ctx.lead.next_follow_up_at.filter(|d| *d <= ctx.now);
    let from_conversations = ctx
        .recent
        .iter()
        .filter(|c| c.follow_up_required)
        .filter_map(|c| c.follow_up_date)
        .filter(|d| *d <= ctx.now)
        .min();
    match (from_lead, from_conversations) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Canned skeleton per template type, used for seeding and offline drafting.
pub fn starter_template(kind: TemplateType) -> NewTemplate {
    let (name, subject, content) = match kind {
        TemplateType::ColdOutreach => (
            "Cold outreach",
            "Quick idea for {{company}}",
            "Hi {{firstName}},\n\nI work with teams like {{company}} on growing their pipeline. \
             Would a 15 minute call next week be useful?\n\nBest,\n{{senderName}}",
        ),
        TemplateType::FollowUp => (
            "Follow-up",
            "Following up",
            "Hi {{firstName}},\n\nJust following up on my last message. \
             Is this still a priority for you?\n\nBest,\n{{senderName}}",
        ),
        TemplateType::Proposal => (
            "Proposal",
            "Proposal for {{company}}",
            "Hi {{firstName}},\n\nAs discussed, please find our proposal attached. \
             Happy to walk you through it.\n\nBest,\n{{senderName}}",
        ),
        TemplateType::MeetingRequest => (
            "Meeting request",
            "Time for a quick call?",
            "Hi {{firstName}},\n\nWould you have 30 minutes this week to go over next steps? \
             Let me know what works.\n\nBest,\n{{senderName}}",
        ),
        TemplateType::Other => (
            "General note",
            "Hello from {{senderName}}",
            "Hi {{firstName}},\n\n\n\nBest,\n{{senderName}}",
        ),
    };
    NewTemplate {
        name: name.to_string(),
        template_type: kind,
        subject: Some(subject.to_string()),
        content: content.to_string(),
        is_ai_generated: false,
    }
}

const MAX_RETRIES: u64 = 3;

/// Linear backoff before retry number `retries`; `None` once the retries are spent.
fn retry_delay(retries: u64) -> Option<std::time::Duration> {
    (retries <= MAX_RETRIES).then(|| std::time::Duration::from_millis(500 * retries))
}

/// Chat-completion engine; degrades to [`HeuristicEngine`] on any failure.
#[derive(Clone)]
pub struct OpenAiEngine {
    client: Client<OpenAIConfig>,
    model: String,
    fallback: HeuristicEngine,
}

impl OpenAiEngine {
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);
        Self {
            client,
            model,
            fallback: HeuristicEngine,
        }
    }

    async fn complete(&self, system_prompt: &str, user_prompt: String) -> Result<String> {
        let mut retries = 0;
        loop {
            let messages = vec![
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    role: Role::System,
                    content: system_prompt.to_string(),
                    name: None,
                }),
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    role: Role::User,
                    content: ChatCompletionRequestUserMessageContent::Text(user_prompt.clone()),
                    name: None,
                }),
            ];

            let request = CreateChatCompletionRequestArgs::default()
                .model(self.model.as_str())
                .messages(messages)
                .build()?;

            match self.client.chat().create(request).await {
                Ok(resp) => {
                    return Ok(resp
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default());
                }
                Err(err) => {
                    retries += 1;
                    let Some(delay) = retry_delay(retries) else {
                        return Err(anyhow!("OpenAI error after {} attempts: {err}", retries));
                    };
                    tracing::warn!("OpenAI request failed (retry {}/{}): {}", retries, MAX_RETRIES, err);
                    sleep(delay).await;
                }
            }
        }
    }
}

const SUGGEST_PROMPT: &str = r#"You are a B2B sales assistant inside a CRM.
Input: one lead with its pipeline stage and recent interactions.
Return ONLY a JSON object: {"suggestions": [{"title": str, "content": str, "priority": 1-5, "template_type": "COLD_OUTREACH"|"FOLLOW_UP"|"PROPOSAL"|"MEETING_REQUEST"|"OTHER"|null}]}
Priority 1 is most urgent. At most 5 suggestions. Concrete next actions only."#;

const TEMPLATE_PROMPT: &str = r#"You write short sales email templates.
Placeholders available: {{firstName}}, {{lastName}}, {{fullName}}, {{company}}, {{title}}, {{email}}, {{senderName}}.
Return ONLY a JSON object: {"name": str, "subject": str, "content": str}"#;

#[async_trait]
impl SuggestionEngine for OpenAiEngine {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn suggest(&self, ctx: &LeadContext) -> Result<Vec<SuggestionDraft>> {
        match self.complete(SUGGEST_PROMPT, describe_lead(ctx)).await {
            Ok(content) => match parse_suggestions(&content) {
                Some(drafts) if !drafts.is_empty() => return Ok(drafts),
                _ => tracing::warn!("Unusable suggestion payload for lead {}", ctx.lead.id),
            },
            Err(e) => tracing::error!("Suggestion request failed for lead {}: {}", ctx.lead.id, e),
        }
        self.fallback.suggest(ctx).await
    }

    async fn draft_template(&self, kind: TemplateType, brief: &str) -> Result<TemplateDraft> {
        let prompt = format!("Template type: {kind:?}\nBrief: {}", brief.trim());
        match self.complete(TEMPLATE_PROMPT, prompt).await {
            Ok(content) => {
                if let Some(draft) = parse_template(&content) {
                    return Ok(draft);
                }
                tracing::warn!("Unusable template payload, using starter for {:?}", kind);
            }
            Err(e) => tracing::error!("Template request failed: {}", e),
        }
        self.fallback.draft_template(kind, brief).await
    }
}

fn describe_lead(ctx: &LeadContext) -> String {
    let lead = &ctx.lead;
    let mut out = format!(
        "Lead: {}\nCompany: {}\nTitle: {}\nStage: {:?}\nScore: {}\nTags: {}\n",
        lead.full_name(),
        lead.company.as_deref().unwrap_or("-"),
        lead.title.as_deref().unwrap_or("-"),
        lead.stage,
        lead.score,
        lead.tags.join(", "),
    );
    if let Some(days) = days_since_contact(lead, ctx.now) {
        out.push_str(&format!("Days since last contact: {days}\n"));
    }
    if let Some(due) = follow_up_overdue(ctx) {
        out.push_str(&format!("Overdue follow-up since: {}\n", due.format("%Y-%m-%d")));
    }
    out.push_str("Recent interactions:\n");
    for c in ctx.recent.iter().take(10) {
        let snippet: String = c.content.chars().take(200).collect();
        out.push_str(&format!(
            "- {} {:?}: {}\n",
            c.occurred_at.format("%Y-%m-%d"),
            c.conversation_type,
            snippet
        ));
    }
    out
}

/// Models like to wrap JSON in markdown fences.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub fn parse_suggestions(raw: &str) -> Option<Vec<SuggestionDraft>> {
    #[derive(Deserialize)]
    struct Envelope {
        suggestions: Vec<SuggestionDraft>,
    }

    let body = strip_fences(raw);
    let drafts = serde_json::from_str::<Envelope>(body)
        .map(|e| e.suggestions)
        .or_else(|_| serde_json::from_str::<Vec<SuggestionDraft>>(body))
        .ok()?;

    Some(
        drafts
            .into_iter()
            .filter(|d| !d.title.trim().is_empty())
            .map(|mut d| {
                d.title = d.title.trim().to_string();
                d.priority = d.priority.clamp(*PRIORITY_RANGE.start(), *PRIORITY_RANGE.end());
                d
            })
            .take(MAX_SUGGESTIONS)
            .collect(),
    )
}

pub fn parse_template(raw: &str) -> Option<TemplateDraft> {
    let draft: TemplateDraft = serde_json::from_str(strip_fences(raw)).ok()?;
    if draft.name.trim().is_empty() || draft.content.trim().is_empty() {
        return None;
    }
    Some(draft)
}

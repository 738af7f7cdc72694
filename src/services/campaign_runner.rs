//! Drives active campaigns: every enrolled lead advances through the step list,
//! turning due steps into tasks for a human to carry out.
use crate::db::notifications::{self, NewNotification};
use crate::db::tasks::{self, NewTask};
use crate::db::{campaigns, leads, templates, users};
use crate::domain::models::{
    Campaign, CampaignStep, Lead, LeadStage, MessageTemplate, NotificationType, Sender, StepType,
    DEFAULT_PRIORITY,
};
use crate::domain::render::render;
use crate::domain::sequencing::{next_action, NextAction};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub campaigns: usize,
    pub executed: usize,
    pub skipped: usize,
    pub finished: usize,
}

pub async fn run_once(pool: &PgPool) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    for campaign in campaigns::list_active(pool).await? {
        match run_campaign(pool, &campaign, Utc::now()).await {
            Ok(part) => {
                summary.campaigns += 1;
                summary.executed += part.executed;
                summary.skipped += part.skipped;
                summary.finished += part.finished;
            }
            Err(e) => tracing::error!("Campaign {} run failed: {}", campaign.id, e),
        }
    }
    Ok(summary)
}

async fn run_campaign(pool: &PgPool, campaign: &Campaign, now: DateTime<Utc>) -> Result<RunSummary> {
    let steps = campaigns::steps(pool, campaign.id).await?;
    let mut enrolled = leads::list_by_campaign(pool, campaign.id).await?;

    let template_ids: Vec<Uuid> = steps.iter().filter_map(|s| s.template_id).collect();
    let by_id: HashMap<Uuid, MessageTemplate> = templates::find_many(pool, &template_ids)
        .await?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    let sender = match users::find_by_id(pool, campaign.user_id).await? {
        Some(u) => Sender {
            name: u.name,
            email: u.email,
        },
        None => Sender {
            name: String::new(),
            email: String::new(),
        },
    };

    let mut summary = RunSummary::default();
    for lead in enrolled.iter_mut() {
        let plan = plan_lead(&steps, lead, now);
        let mut applied = true;
        for step_move in &plan.moves {
            let step = step_move.step();
            let mut tx = pool.begin().await?;
            if !leads::advance_cursor(&mut tx, lead.id, campaign.id, step.order_index, now).await? {
                // Another run or an unenroll got there first.
                tx.rollback().await?;
                applied = false;
                break;
            }
            if let StepMove::Execute(step) = step_move {
                let template = step.template_id.and_then(|id| by_id.get(&id));
                let assignee = lead.user_id.unwrap_or(campaign.user_id);
                if let Some(task) = task_for_step(step, lead, template, &sender, campaign, now) {
                    tasks::insert(&mut tx, assignee, &task).await?;
                }
            }
            tx.commit().await?;

            match step_move {
                StepMove::Execute(_) => summary.executed += 1,
                StepMove::Skip(_) => summary.skipped += 1,
            }
            lead.campaign_step = Some(step.order_index);
            lead.campaign_step_at = Some(now);
        }

        if applied
            && plan.finished
            && lead.campaign_finished_at.is_none()
            && leads::finish_campaign(pool, lead.id, campaign.id).await?
        {
            lead.campaign_finished_at = Some(now);
            summary.finished += 1;
            notify_finished(pool, campaign, lead).await;
        }
    }

    let stats = campaign_stats(&enrolled, &campaign.stats, summary.executed, now);
    campaigns::set_stats(pool, campaign.id, &stats).await?;

    if summary.executed + summary.skipped + summary.finished > 0 {
        tracing::info!(
            "Campaign {}: {} executed, {} skipped, {} finished",
            campaign.id,
            summary.executed,
            summary.skipped,
            summary.finished
        );
    }
    Ok(summary)
}

/// One cursor move a run makes for a lead.
#[derive(Debug, PartialEq)]
enum StepMove<'a> {
    Execute(&'a CampaignStep),
    Skip(&'a CampaignStep),
}

impl<'a> StepMove<'a> {
    fn step(&self) -> &'a CampaignStep {
        match self {
            StepMove::Execute(step) | StepMove::Skip(step) => step,
        }
    }
}

#[derive(Debug, PartialEq)]
struct LeadPlan<'a> {
    moves: Vec<StepMove<'a>>,
    finished: bool,
}

/// Every move due for `lead` at `now`, in order. Zero-wait steps chain off the
/// cursor the previous move leaves behind, so one run can walk several steps.
fn plan_lead<'a>(steps: &'a [CampaignStep], lead: &Lead, now: DateTime<Utc>) -> LeadPlan<'a> {
    let mut cursor = lead.clone();
    let mut moves = Vec::new();
    // A step is visited at most once; the bound stops runaway loops.
    for _ in 0..=steps.len() {
        let step = match next_action(steps, &cursor, now) {
            NextAction::Waiting { .. } => break,
            NextAction::Finished => return LeadPlan { moves, finished: true },
            NextAction::Skip(step) => {
                moves.push(StepMove::Skip(step));
                step
            }
            NextAction::Execute(step) => {
                moves.push(StepMove::Execute(step));
                step
            }
        };
        cursor.campaign_step = Some(step.order_index);
        cursor.campaign_step_at = Some(now);
    }
    LeadPlan { moves, finished: false }
}

async fn notify_finished(pool: &PgPool, campaign: &Campaign, lead: &Lead) {
    let note = NewNotification {
        user_id: campaign.user_id,
        kind: NotificationType::CampaignAlert,
        title: format!("{} completed \"{}\"", lead.full_name(), campaign.name),
        message: format!(
            "{} reached the end of the campaign at stage {:?}.",
            lead.full_name(),
            lead.stage
        ),
        link: Some(format!("/leads/{}", lead.id)),
    };
    if let Err(e) = notifications::create(pool, &note).await {
        tracing::error!("Failed to send campaign alert for lead {}: {}", lead.id, e);
    }
}

/// Task a human should carry out for a step; `WAIT` steps only move the cursor.
fn task_for_step(
    step: &CampaignStep,
    lead: &Lead,
    template: Option<&MessageTemplate>,
    sender: &Sender,
    campaign: &Campaign,
    now: DateTime<Utc>,
) -> Option<NewTask> {
    let name = lead.full_name();
    let (title, priority) = match step.step_type {
        StepType::Wait => return None,
        StepType::Email => (format!("Send email to {name}"), DEFAULT_PRIORITY),
        StepType::Call => (format!("Call {name}"), 2),
        StepType::LinkedinMessage => (format!("Send LinkedIn message to {name}"), DEFAULT_PRIORITY),
        StepType::Task => (format!("Follow up with {name}"), DEFAULT_PRIORITY),
    };

    let mut description = format!("Campaign \"{}\", step {}.", campaign.name, step.order_index + 1);
    if let Some(t) = template {
        if let Some(subject) = t.subject.as_deref().filter(|s| !s.trim().is_empty()) {
            description.push_str(&format!("\n\nSubject: {}", render(subject, lead, sender)));
        }
        description.push_str("\n\n");
        description.push_str(&render(&t.content, lead, sender));
    }

    Some(NewTask {
        lead_id: Some(lead.id),
        title,
        description: Some(description),
        due_date: Some(now),
        priority: Some(priority),
    })
}

fn campaign_stats(
    enrolled: &[Lead],
    previous: &serde_json::Value,
    executed: usize,
    now: DateTime<Utc>,
) -> serde_json::Value {
    let finished = enrolled
        .iter()
        .filter(|l| l.campaign_finished_at.is_some())
        .count();
    let count_stage = |stage: LeadStage| enrolled.iter().filter(|l| l.stage == stage).count();
    let executed_before = previous
        .get("actionsExecuted")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    json!({
        "enrolled": enrolled.len(),
        "active": enrolled.len() - finished,
        "finished": finished,
        "converted": count_stage(LeadStage::Converted),
        "lost": count_stage(LeadStage::Lost),
        "actionsExecuted": executed_before + executed as u64,
        "lastRunAt": now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(stage: LeadStage) -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: Some("Lovelace".into()),
            email: Some("ada@example.com".into()),
            phone: None,
            company: Some("Analytical Engines".into()),
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

    fn campaign() -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Spring push".into(),
            description: None,
            is_active: true,
            stats: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    fn step(kind: StepType, order_index: i32) -> CampaignStep {
        waiting_step(kind, order_index, 0)
    }

    fn waiting_step(kind: StepType, order_index: i32, wait_days: i32) -> CampaignStep {
        let now = Utc::now();
        CampaignStep {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            step_type: kind,
            wait_days,
            order_index,
            template_id: None,
            conditions: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    fn sender() -> Sender {
        Sender {
            name: "Sam".into(),
            email: "sam@example.com".into(),
        }
    }

    #[test]
    fn email_step_renders_template_into_task() {
        let now = Utc::now();
        let template = MessageTemplate {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "intro".into(),
            template_type: crate::domain::models::TemplateType::ColdOutreach,
            subject: Some("Hello {{company}}".into()),
            content: "Hi {{firstName}}, {{senderName}} here.".into(),
            is_ai_generated: false,
            created_at: now,
            updated_at: now,
        };
        let l = lead(LeadStage::New);
        let task = task_for_step(
            &step(StepType::Email, 0),
            &l,
            Some(&template),
            &sender(),
            &campaign(),
            now,
        )
        .unwrap();
        assert_eq!(task.title, "Send email to Ada Lovelace");
        let description = task.description.unwrap();
        assert!(description.contains("Subject: Hello Analytical Engines"));
        assert!(description.contains("Hi Ada, Sam here."));
        assert_eq!(task.lead_id, Some(l.id));
        assert_eq!(task.due_date, Some(now));
    }

    #[test]
    fn wait_step_creates_no_task() {
        let now = Utc::now();
        assert!(task_for_step(&step(StepType::Wait, 1), &lead(LeadStage::New), None, &sender(), &campaign(), now).is_none());
        let call = task_for_step(&step(StepType::Call, 2), &lead(LeadStage::New), None, &sender(), &campaign(), now).unwrap();
        assert_eq!(call.title, "Call Ada Lovelace");
        assert_eq!(call.priority, Some(2));
        assert!(call.description.unwrap().contains("step 3"));
    }

    #[test]
    fn stats_accumulate_executed_actions() {
        let now = Utc::now();
        let mut done = lead(LeadStage::Converted);
        done.campaign_finished_at = Some(now);
        let leads = vec![done, lead(LeadStage::Contacted), lead(LeadStage::Lost)];
        let stats = campaign_stats(&leads, &json!({"actionsExecuted": 4}), 3, now);
        assert_eq!(stats["enrolled"], 3);
        assert_eq!(stats["active"], 2);
        assert_eq!(stats["finished"], 1);
        assert_eq!(stats["converted"], 1);
        assert_eq!(stats["lost"], 1);
        assert_eq!(stats["actionsExecuted"], 7);
    }

    #[test]
    fn zero_wait_steps_chain_in_one_run() {
        let fresh = lead(LeadStage::New);
        let now = fresh.updated_at;
        let steps = vec![
            step(StepType::Email, 0),
            step(StepType::Wait, 1),
            step(StepType::Call, 2),
        ];
        let plan = plan_lead(&steps, &fresh, now);
        assert_eq!(
            plan.moves,
            vec![
                StepMove::Execute(&steps[0]),
                StepMove::Execute(&steps[1]),
                StepMove::Execute(&steps[2]),
            ]
        );
        assert!(plan.finished);
    }

    #[test]
    fn chain_stops_at_first_step_still_waiting() {
        let fresh = lead(LeadStage::New);
        let now = fresh.updated_at;
        let steps = vec![
            step(StepType::Email, 0),
            waiting_step(StepType::Call, 1, 2),
            step(StepType::Task, 2),
        ];
        let plan = plan_lead(&steps, &fresh, now);
        assert_eq!(plan.moves, vec![StepMove::Execute(&steps[0])]);
        assert!(!plan.finished);
    }

    #[test]
    fn unmet_conditions_skip_and_keep_chaining() {
        let fresh = lead(LeadStage::New);
        let now = fresh.updated_at;
        let mut gated = step(StepType::Call, 1);
        gated.conditions = json!({"onlyStages": ["QUALIFIED"]});
        let steps = vec![step(StepType::Email, 0), gated, step(StepType::Task, 2)];
        let plan = plan_lead(&steps, &fresh, now);
        assert_eq!(
            plan.moves,
            vec![
                StepMove::Execute(&steps[0]),
                StepMove::Skip(&steps[1]),
                StepMove::Execute(&steps[2]),
            ]
        );
        assert!(plan.finished);
    }

    #[test]
    fn resumes_after_cursor_and_finishes_terminal_leads() {
        let now = Utc::now();
        let steps = vec![step(StepType::Email, 0), step(StepType::Call, 1)];

        let mut midway = lead(LeadStage::Contacted);
        midway.campaign_step = Some(0);
        midway.campaign_step_at = Some(now);
        let plan = plan_lead(&steps, &midway, now);
        assert_eq!(plan.moves, vec![StepMove::Execute(&steps[1])]);
        assert!(plan.finished);

        let plan = plan_lead(&steps, &lead(LeadStage::Lost), now);
        assert!(plan.moves.is_empty());
        assert!(plan.finished);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn run_commits_cursor_and_tasks_for_a_zero_wait_chain(
        pool: sqlx::Pool<sqlx::Postgres>,
    ) -> anyhow::Result<()> {
        use crate::db::campaigns::{NewCampaign, StepInput};
        use crate::db::leads::NewLead;
        use crate::db::users::NewUser;
        use crate::domain::models::UserRole;

        let owner = users::create(
            &pool,
            NewUser {
                email: "owner@example.com",
                name: "Owner",
                password_hash: "not-a-real-hash",
                role: UserRole::User,
            },
        )
        .await?;
        let step_input = |step_type, wait_days| StepInput {
            step_type,
            wait_days,
            template_id: None,
            conditions: json!({}),
        };
        let created = campaigns::create(
            &pool,
            owner.id,
            &NewCampaign {
                name: "Spring push".into(),
                description: None,
                is_active: true,
                steps: vec![
                    step_input(StepType::Email, 0),
                    step_input(StepType::Wait, 0),
                    step_input(StepType::Call, 0),
                    step_input(StepType::Task, 3),
                ],
            },
        )
        .await?;
        let new = NewLead {
            first_name: "Ada".into(),
            ..Default::default()
        };
        let lead = leads::create(&pool, owner.id, &new).await?;
        leads::enroll(&pool, created.campaign.id, &[lead.id], Some(owner.id)).await?;

        let now = Utc::now() + chrono::Duration::minutes(1);
        let summary = run_campaign(&pool, &created.campaign, now).await?;
        assert_eq!(summary.executed, 3);
        assert_eq!(summary.finished, 0);

        let stored = leads::find_by_id(&pool, lead.id, None).await?.expect("lead exists");
        assert_eq!(stored.campaign_step, Some(2));
        let titles: Vec<String> = tasks::list_all(&pool, Some(owner.id))
            .await?
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Send email to Ada".to_string(), "Call Ada".to_string()]);

        // Nothing new is due until the three-day step.
        let again = run_campaign(&pool, &created.campaign, now).await?;
        assert_eq!(again.executed, 0);
        assert_eq!(tasks::list_all(&pool, Some(owner.id)).await?.len(), 2);
        Ok(())
    }
}

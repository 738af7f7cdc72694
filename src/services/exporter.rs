use crate::config::Config;
use crate::db::notifications::{self, NewNotification};
use crate::db::{campaigns, conversations, exports, leads, tasks, templates, users};
use crate::domain::models::{
    Conversation, ExportJob, ExportType, Lead, NotificationType, UserRole,
};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use serde_json::json;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Jobs left in PROCESSING longer than this are assumed orphaned.
pub const STALE_JOB_MINUTES: i32 = 30;
const JOBS_PER_TICK: usize = 5;

pub fn file_extension(kind: ExportType) -> &'static str {
    match kind {
        ExportType::Leads | ExportType::Conversations => "csv",
        ExportType::CampaignData | ExportType::AllData => "json",
    }
}

pub fn content_type(kind: ExportType) -> &'static str {
    match kind {
        ExportType::Leads | ExportType::Conversations => "text/csv; charset=utf-8",
        ExportType::CampaignData | ExportType::AllData => "application/json",
    }
}

pub fn export_path(dir: &Path, job_id: Uuid, kind: ExportType) -> PathBuf {
    dir.join(format!("{}.{}", job_id, file_extension(kind)))
}

pub fn download_url(base_url: &str, job_id: Uuid) -> String {
    format!("{}/exports/{}/download", base_url.trim_end_matches('/'), job_id)
}

/// Requeues orphans, then works through a few pending jobs.
pub async fn run_once(pool: &PgPool, config: &Config) -> Result<usize> {
    let requeued = exports::requeue_stale(pool, STALE_JOB_MINUTES).await?;
    if requeued > 0 {
        tracing::warn!("Requeued {} stale export jobs", requeued);
    }

    let mut processed = 0;
    while processed < JOBS_PER_TICK {
        let Some(job) = exports::claim_next(pool).await? else {
            break;
        };
        process(pool, config, &job).await;
        processed += 1;
    }
    Ok(processed)
}

async fn process(pool: &PgPool, config: &Config, job: &ExportJob) {
    tracing::info!("Processing export {} ({:?})", job.id, job.export_type);

    let outcome = async {
        let bytes = build(pool, job).await?;
        tokio::fs::create_dir_all(&config.export_dir)
            .await
            .with_context(|| format!("creating {}", config.export_dir.display()))?;
        let path = export_path(&config.export_dir, job.id, job.export_type);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok::<usize, anyhow::Error>(bytes.len())
    }
    .await;

    let recorded = match &outcome {
        Ok(_) => {
            let url = download_url(&config.public_base_url, job.id);
            exports::complete(pool, job.id, job.started_at, &url).await
        }
        Err(err) => exports::fail(pool, job.id, job.started_at, &format!("{err:#}")).await,
    };
    let recorded = match recorded {
        Ok(recorded) => recorded,
        Err(e) => {
            tracing::error!("Failed to record outcome of export {}: {}", job.id, e);
            return;
        }
    };

    match &outcome {
        Ok(size) if recorded => tracing::info!("Export {} completed ({} bytes)", job.id, size),
        Err(err) if recorded => tracing::error!("Export {} failed: {:#}", job.id, err),
        _ => tracing::warn!("Export {} was requeued while processing; result discarded", job.id),
    }

    let Some(note) = outcome_notification(job, &outcome, &config.public_base_url, recorded) else {
        return;
    };
    if let Err(e) = notifications::create(pool, &note).await {
        tracing::error!("Failed to notify export owner {}: {}", job.user_id, e);
    }
}

/// Notification for the job owner; none when the outcome was not recorded.
fn outcome_notification(
    job: &ExportJob,
    outcome: &Result<usize>,
    base_url: &str,
    recorded: bool,
) -> Option<NewNotification> {
    if !recorded {
        return None;
    }
    let note = match outcome {
        Ok(_) => NewNotification {
            user_id: job.user_id,
            kind: NotificationType::System,
            title: "Export ready".to_string(),
            message: format!("Your {:?} export is ready to download.", job.export_type),
            link: Some(download_url(base_url, job.id)),
        },
        Err(err) => NewNotification {
            user_id: job.user_id,
            kind: NotificationType::System,
            title: "Export failed".to_string(),
            message: format!("Your {:?} export could not be generated: {err}", job.export_type),
            link: Some(format!("/exports/{}", job.id)),
        },
    };
    Some(note)
}

async fn build(pool: &PgPool, job: &ExportJob) -> Result<Vec<u8>> {
    let owner = users::find_by_id(pool, job.user_id)
        .await?
        .ok_or_else(|| anyhow!("export owner no longer exists"))?;
    let scope = match owner.role {
        UserRole::Admin => None,
        UserRole::User => Some(owner.id),
    };

    match job.export_type {
        ExportType::Leads => {
            let mut writer = csv::Writer::from_writer(vec![]);
            writer.write_record(LEAD_HEADER)?;
            let mut rows = leads::stream_for_export(pool, scope);
            while let Some(lead) = rows.try_next().await? {
                writer.write_record(lead_record(&lead))?;
            }
            Ok(writer.into_inner()?)
        }
        ExportType::Conversations => {
            let mut writer = csv::Writer::from_writer(vec![]);
            writer.write_record(CONVERSATION_HEADER)?;
            let mut rows = conversations::stream_for_export(pool, scope);
            while let Some(conversation) = rows.try_next().await? {
                writer.write_record(conversation_record(&conversation))?;
            }
            Ok(writer.into_inner()?)
        }
        ExportType::CampaignData => {
            let campaign_id = campaign_param(&job.params)?;
            let campaign = campaigns::find_scoped(pool, campaign_id, scope)
                .await?
                .ok_or_else(|| anyhow!("campaign {campaign_id} not found"))?;
            let steps = campaigns::steps(pool, campaign.id).await?;
            let enrolled = leads::list_by_campaign(pool, campaign.id).await?;
            let doc = json!({
                "exportedAt": Utc::now(),
                "campaign": campaign,
                "steps": steps,
                "leads": enrolled,
            });
            Ok(serde_json::to_vec_pretty(&doc)?)
        }
        ExportType::AllData => {
            let all_leads: Vec<Lead> = leads::stream_for_export(pool, scope).try_collect().await?;
            let all_conversations: Vec<Conversation> =
                conversations::stream_for_export(pool, scope).try_collect().await?;
            let mut all_campaigns = Vec::new();
            for campaign in campaigns::list(pool, scope).await? {
                let steps = campaigns::steps(pool, campaign.id).await?;
                all_campaigns.push(json!({ "campaign": campaign, "steps": steps }));
            }
            let doc = json!({
                "exportedAt": Utc::now(),
                "leads": all_leads,
                "conversations": all_conversations,
                "campaigns": all_campaigns,
                "templates": templates::list(pool, scope, None).await?,
                "tasks": tasks::list_all(pool, scope).await?,
            });
            Ok(serde_json::to_vec_pretty(&doc)?)
        }
    }
}

fn campaign_param(params: &serde_json::Value) -> Result<Uuid> {
    let raw = params
        .get("campaignId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("params.campaignId is required for CAMPAIGN_DATA exports"))?;
    Uuid::parse_str(raw).map_err(|_| anyhow!("params.campaignId is not a valid id"))
}

const LEAD_HEADER: [&str; 15] = [
    "ID",
    "First name",
    "Last name",
    "Email",
    "Phone",
    "Company",
    "Title",
    "LinkedIn",
    "Source",
    "Stage",
    "Score",
    "Tags",
    "Last contacted",
    "Next follow-up",
    "Created",
];

fn lead_record(lead: &Lead) -> [String; 15] {
    [
        lead.id.to_string(),
        lead.first_name.clone(),
        lead.last_name.clone().unwrap_or_default(),
        lead.email.clone().unwrap_or_default(),
        lead.phone.clone().unwrap_or_default(),
        lead.company.clone().unwrap_or_default(),
        lead.title.clone().unwrap_or_default(),
        lead.linkedin_url.clone().unwrap_or_default(),
        lead.source.clone().unwrap_or_default(),
        format!("{:?}", lead.stage).to_uppercase(),
        lead.score.to_string(),
        lead.tags.join(";"),
        lead.last_contacted_at.map(|d| d.to_rfc3339()).unwrap_or_default(),
        lead.next_follow_up_at.map(|d| d.to_rfc3339()).unwrap_or_default(),
        lead.created_at.to_rfc3339(),
    ]
}

const CONVERSATION_HEADER: [&str; 8] = [
    "ID",
    "Lead ID",
    "Type",
    "Subject",
    "Content",
    "Occurred",
    "Follow-up required",
    "Follow-up date",
];

fn conversation_record(c: &Conversation) -> [String; 8] {
    [
        c.id.to_string(),
        c.lead_id.to_string(),
        format!("{:?}", c.conversation_type).to_uppercase(),
        c.subject.clone().unwrap_or_default(),
        c.content.clone(),
        c.occurred_at.to_rfc3339(),
        c.follow_up_required.to_string(),
        c.follow_up_date.map(|d| d.to_rfc3339()).unwrap_or_default(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConversationType, LeadStage};

    #[test]
    fn paths_and_urls() {
        let id = Uuid::nil();
        assert_eq!(
            export_path(Path::new("/tmp/exports"), id, ExportType::Leads),
            PathBuf::from(format!("/tmp/exports/{id}.csv"))
        );
        assert_eq!(file_extension(ExportType::AllData), "json");
        assert_eq!(
            download_url("https://crm.example.com/", id),
            format!("https://crm.example.com/exports/{id}/download")
        );
    }

    #[test]
    fn campaign_param_is_required_and_parsed() {
        assert!(campaign_param(&json!({})).is_err());
        assert!(campaign_param(&json!({"campaignId": "nope"})).is_err());
        let id = Uuid::new_v4();
        assert_eq!(campaign_param(&json!({"campaignId": id.to_string()})).unwrap(), id);
    }

    #[test]
    fn lead_rows_are_quoted_by_csv_writer() {
        let now = Utc::now();
        let lead = Lead {
            id: Uuid::nil(),
            first_name: "Ada".into(),
            last_name: Some("Lovelace, Countess".into()),
            email: None,
            phone: None,
            company: Some("Analytical \"Engines\"".into()),
            title: None,
            linkedin_url: None,
            source: None,
            notes: None,
            stage: LeadStage::Qualified,
            tags: vec!["math".into(), "vip".into()],
            score: 58,
            user_id: None,
            campaign_id: None,
            campaign_step: None,
            campaign_step_at: None,
            campaign_finished_at: None,
            last_contacted_at: None,
            next_follow_up_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.write_record(LEAD_HEADER).unwrap();
        writer.write_record(lead_record(&lead)).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("ID,First name,Last name"));
        let row = lines.next().unwrap();
        assert!(row.contains("\"Lovelace, Countess\""));
        assert!(row.contains("\"Analytical \"\"Engines\"\"\""));
        assert!(row.contains(",QUALIFIED,58,math;vip,"));
    }

    #[test]
    fn conversation_type_is_screaming_case() {
        let now = Utc::now();
        let c = Conversation {
            id: Uuid::nil(),
            lead_id: Uuid::nil(),
            user_id: None,
            conversation_type: ConversationType::Linkedin,
            subject: None,
            content: "ping".into(),
            occurred_at: now,
            follow_up_required: false,
            follow_up_date: None,
            follow_up_notified_at: None,
            created_at: now,
            updated_at: now,
        };
        let record = conversation_record(&c);
        assert_eq!(record[2], "LINKEDIN");
        assert_eq!(record[6], "false");
    }

    fn job() -> ExportJob {
        let now = Utc::now();
        ExportJob {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            export_type: ExportType::Leads,
            status: crate::domain::models::JobStatus::Processing,
            params: json!({}),
            result_url: None,
            error: None,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn owner_is_notified_only_for_recorded_outcomes() {
        let job = job();
        let done: Result<usize> = Ok(128);
        let note = outcome_notification(&job, &done, "https://crm.example.com", true).unwrap();
        assert_eq!(note.user_id, job.user_id);
        assert_eq!(note.title, "Export ready");
        assert_eq!(note.link, Some(download_url("https://crm.example.com", job.id)));

        let failed: Result<usize> = Err(anyhow!("disk full"));
        let note = outcome_notification(&job, &failed, "https://crm.example.com", true).unwrap();
        assert_eq!(note.title, "Export failed");
        assert!(note.message.contains("disk full"));

        assert!(outcome_notification(&job, &done, "https://crm.example.com", false).is_none());
        assert!(outcome_notification(&job, &failed, "https://crm.example.com", false).is_none());
    }
}

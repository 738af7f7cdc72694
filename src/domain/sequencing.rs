//! Campaign drip sequencing: which step a lead enrolled in a campaign runs next.

use crate::domain::models::{CampaignStep, Lead, LeadStage};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Optional gates stored in `campaign_steps.conditions`.
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StepConditions {
    pub only_stages: Vec<LeadStage>,
    pub skip_stages: Vec<LeadStage>,
    pub min_score: Option<i32>,
    pub require_tags: Vec<String>,
}

impl StepConditions {
    /// Malformed condition blobs are treated as "no conditions".
    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn holds_for(&self, lead: &Lead) -> bool {
        if !self.only_stages.is_empty() && !self.only_stages.contains(&lead.stage) {
            return false;
        }
        if self.skip_stages.contains(&lead.stage) {
            return false;
        }
        if let Some(min) = self.min_score {
            if lead.score < min {
                return false;
            }
        }
        self.require_tags.iter().all(|tag| {
            lead.tags
                .iter()
                .any(|have| have.eq_ignore_ascii_case(tag))
        })
    }
}

#[derive(Debug, PartialEq)]
pub enum NextAction<'a> {
    Execute(&'a CampaignStep),
    Skip(&'a CampaignStep),
    Waiting { step: &'a CampaignStep, due_at: DateTime<Utc> },
    Finished,
}

/// `steps` must be sorted by `order_index`.
pub fn next_action<'a>(steps: &'a [CampaignStep], lead: &Lead, now: DateTime<Utc>) -> NextAction<'a> {
    if lead.stage.is_terminal() {
        return NextAction::Finished;
    }

    let next = match lead.campaign_step {
        Some(cursor) => steps.iter().find(|s| s.order_index > cursor),
        None => steps.first(),
    };
    let Some(step) = next else {
        return NextAction::Finished;
    };

    let anchor = lead.campaign_step_at.unwrap_or(lead.updated_at);
    let due_at = anchor + Duration::days(step.wait_days.max(0) as i64);
    if now < due_at {
        return NextAction::Waiting { step, due_at };
    }

    if StepConditions::from_json(&step.conditions).holds_for(lead) {
        NextAction::Execute(step)
    } else {
        NextAction::Skip(step)
    }
}

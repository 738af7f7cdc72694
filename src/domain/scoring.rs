use crate::domain::models::{ConversationType, LeadStage};
use chrono::{DateTime, Utc};

const STAGE_SHARE: f32 = 0.6;
const ACTIVITY_CAP: f32 = 40.0;

#[derive(Clone)]
pub struct LeadScorer {
    decay_days: f32,
}

impl Default for LeadScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl LeadScorer {
    pub fn new() -> Self {
        Self { decay_days: 14.0 }
    }

    /// Score in 0..=100 from pipeline stage plus recency-weighted activity.
    pub fn score(
        &self,
        stage: LeadStage,
        activity: &[(ConversationType, DateTime<Utc>)],
        now: DateTime<Utc>,
    ) -> i32 {
        match stage {
            LeadStage::Converted => return 100,
            LeadStage::Lost => return 0,
            _ => {}
        }

        let base = stage.weight() as f32 * STAGE_SHARE;
        let mut engagement = 0.0;
        for (kind, at) in activity {
            let age_days = ((now - *at).num_seconds().max(0)) as f32 / 86_400.0;
            engagement += type_weight(*kind) * self.decay_weight(age_days);
        }

        (base + engagement.min(ACTIVITY_CAP)).round().clamp(0.0, 100.0) as i32
    }

    fn decay_weight(&self, age_days: f32) -> f32 {
        (-age_days / self.decay_days).exp()
    }
}

fn type_weight(kind: ConversationType) -> f32 {
    match kind {
        ConversationType::Meeting => 10.0,
        ConversationType::Call => 8.0,
        ConversationType::Email | ConversationType::Linkedin => 4.0,
        ConversationType::Other => 2.0,
        ConversationType::Note => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_stages_are_fixed() {
        let scorer = LeadScorer::new();
        let now = Utc::now();
        let busy = vec![(ConversationType::Meeting, now); 10];
        assert_eq!(scorer.score(LeadStage::Converted, &[], now), 100);
        assert_eq!(scorer.score(LeadStage::Lost, &busy, now), 0);
    }

    #[test]
    fn stage_only_score() {
        let scorer = LeadScorer::new();
        let now = Utc::now();
        assert_eq!(scorer.score(LeadStage::New, &[], now), 3);
        assert_eq!(scorer.score(LeadStage::Negotiation, &[], now), 48);
    }

    #[test]
    fn recent_activity_outweighs_old() {
        let scorer = LeadScorer::new();
        let now = Utc::now();
        let fresh = scorer.score(LeadStage::Engaged, &[(ConversationType::Call, now)], now);
        let stale = scorer.score(
            LeadStage::Engaged,
            &[(ConversationType::Call, now - Duration::days(60))],
            now,
        );
        assert!(fresh > stale);
        assert_eq!(fresh, 18 + 8);
    }

    #[test]
    fn activity_is_capped() {
        let scorer = LeadScorer::new();
        let now = Utc::now();
        let flood = vec![(ConversationType::Meeting, now); 50];
        assert_eq!(scorer.score(LeadStage::Negotiation, &flood, now), 88);
    }

    #[test]
    fn future_activity_counts_as_now() {
        let scorer = LeadScorer::new();
        let now = Utc::now();
        let ahead = scorer.score(
            LeadStage::New,
            &[(ConversationType::Meeting, now + Duration::days(3))],
            now,
        );
        assert_eq!(ahead, 13);
    }
}

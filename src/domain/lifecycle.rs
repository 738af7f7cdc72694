use crate::domain::models::{ConversationType, JobStatus, LeadStage, SuggestionStatus, TaskStatus};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("lead stage cannot move from {from:?} to {to:?}")]
    Stage { from: LeadStage, to: LeadStage },
    #[error("suggestion status cannot move from {from:?} to {to:?}")]
    Suggestion {
        from: SuggestionStatus,
        to: SuggestionStatus,
    },
    #[error("export job cannot move from {from:?} to {to:?}")]
    Job { from: JobStatus, to: JobStatus },
}

impl LeadStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStage::Converted | LeadStage::Lost)
    }

    /// Weight of the stage in the 0..=100 lead score.
    pub fn weight(&self) -> i32 {
        match self {
            LeadStage::New => 5,
            LeadStage::Contacted => 15,
            LeadStage::Engaged => 30,
            LeadStage::Qualified => 50,
            LeadStage::Proposal => 65,
            LeadStage::Negotiation => 80,
            LeadStage::Converted => 100,
            LeadStage::Lost => 0,
        }
    }

    pub fn can_transition_to(&self, next: LeadStage) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (LeadStage::Converted, _) => false,
            (LeadStage::Lost, LeadStage::New) => true,
            (LeadStage::Lost, _) => false,
            (_, LeadStage::Converted) => matches!(
                self,
                LeadStage::Qualified | LeadStage::Proposal | LeadStage::Negotiation
            ),
            _ => true,
        }
    }

    pub fn transition(self, next: LeadStage) -> Result<LeadStage, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError::Stage {
                from: self,
                to: next,
            })
        }
    }

    /// Stage a lead moves to after an interaction of the given kind was logged.
    pub fn after_contact(self, kind: ConversationType) -> LeadStage {
        match (self, kind) {
            (_, ConversationType::Note) => self,
            (LeadStage::New, _) => LeadStage::Contacted,
            (LeadStage::Contacted, ConversationType::Call | ConversationType::Meeting) => {
                LeadStage::Engaged
            }
            _ => self,
        }
    }
}

impl SuggestionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SuggestionStatus::Rejected | SuggestionStatus::Completed)
    }

    pub fn transition(self, next: SuggestionStatus) -> Result<SuggestionStatus, LifecycleError> {
        let allowed = match (self, next) {
            (SuggestionStatus::New, SuggestionStatus::Accepted | SuggestionStatus::Rejected) => true,
            (
                SuggestionStatus::Accepted,
                SuggestionStatus::Completed | SuggestionStatus::Rejected,
            ) => true,
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(LifecycleError::Suggestion {
                from: self,
                to: next,
            })
        }
    }
}

impl JobStatus {
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, LifecycleError> {
        let allowed = matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Pending)
        );
        if allowed {
            Ok(next)
        } else {
            Err(LifecycleError::Job {
                from: self,
                to: next,
            })
        }
    }
}

impl TaskStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converted_is_final() {
        for next in [LeadStage::New, LeadStage::Lost, LeadStage::Negotiation] {
            assert!(LeadStage::Converted.transition(next).is_err());
        }
        assert_eq!(
            LeadStage::Converted.transition(LeadStage::Converted),
            Ok(LeadStage::Converted)
        );
    }

    #[test]
    fn lost_only_reopens_to_new() {
        assert_eq!(LeadStage::Lost.transition(LeadStage::New), Ok(LeadStage::New));
        assert!(LeadStage::Lost.transition(LeadStage::Qualified).is_err());
        assert!(LeadStage::Lost.transition(LeadStage::Converted).is_err());
    }

    #[test]
    fn conversion_requires_qualification() {
        assert!(LeadStage::New.transition(LeadStage::Converted).is_err());
        assert!(LeadStage::Engaged.transition(LeadStage::Converted).is_err());
        assert!(LeadStage::Qualified.transition(LeadStage::Converted).is_ok());
        assert!(LeadStage::Negotiation.transition(LeadStage::Converted).is_ok());
    }

    #[test]
    fn open_stages_move_freely() {
        assert!(LeadStage::New.transition(LeadStage::Proposal).is_ok());
        assert!(LeadStage::Proposal.transition(LeadStage::Contacted).is_ok());
        assert!(LeadStage::Engaged.transition(LeadStage::Lost).is_ok());
    }

    #[test]
    fn contact_nudges_stage_forward() {
        assert_eq!(
            LeadStage::New.after_contact(ConversationType::Email),
            LeadStage::Contacted
        );
        assert_eq!(LeadStage::New.after_contact(ConversationType::Note), LeadStage::New);
        assert_eq!(
            LeadStage::Contacted.after_contact(ConversationType::Meeting),
            LeadStage::Engaged
        );
        assert_eq!(
            LeadStage::Contacted.after_contact(ConversationType::Email),
            LeadStage::Contacted
        );
        assert_eq!(
            LeadStage::Qualified.after_contact(ConversationType::Call),
            LeadStage::Qualified
        );
    }

    #[test]
    fn suggestion_lifecycle() {
        assert!(SuggestionStatus::New.transition(SuggestionStatus::Accepted).is_ok());
        assert!(SuggestionStatus::New.transition(SuggestionStatus::Completed).is_err());
        assert!(SuggestionStatus::Accepted
            .transition(SuggestionStatus::Completed)
            .is_ok());
        assert!(SuggestionStatus::Rejected
            .transition(SuggestionStatus::Accepted)
            .is_err());
        assert!(SuggestionStatus::Completed.is_terminal());
    }

    #[test]
    fn job_lifecycle() {
        assert!(JobStatus::Pending.transition(JobStatus::Processing).is_ok());
        assert!(JobStatus::Pending.transition(JobStatus::Completed).is_err());
        assert!(JobStatus::Processing.transition(JobStatus::Failed).is_ok());
        assert!(JobStatus::Completed.transition(JobStatus::Processing).is_err());
    }
}

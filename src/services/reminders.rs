use crate::db::conversations::{self, DueFollowUp};
use crate::db::notifications::{self, NewNotification};
use crate::db::tasks::{self, DueTask};
use crate::domain::models::NotificationType;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Emits FOLLOW_UP and TASK_DUE notifications; each item is claimed so it fires once.
pub async fn run_once(pool: &PgPool, now: DateTime<Utc>) -> Result<(usize, usize)> {
    let mut follow_ups = 0;
    for due in conversations::claim_due_follow_ups(pool, now).await? {
        let Some(note) = follow_up_notification(&due) else {
            continue;
        };
        match notifications::create(pool, &note).await {
            Ok(_) => follow_ups += 1,
            Err(e) => tracing::error!("Failed to notify follow-up {}: {}", due.id, e),
        }
    }

    let mut overdue = 0;
    for task in tasks::claim_overdue(pool, now).await? {
        match notifications::create(pool, &task_notification(&task)).await {
            Ok(_) => overdue += 1,
            Err(e) => tracing::error!("Failed to notify task {}: {}", task.id, e),
        }
    }

    Ok((follow_ups, overdue))
}

fn follow_up_notification(due: &DueFollowUp) -> Option<NewNotification> {
    let recipient = due.recipient_id?;
    let message = match due.subject.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(subject) => format!("Follow-up on \"{}\" is due.", subject.trim()),
        None => "A follow-up you planned is due.".to_string(),
    };
    Some(NewNotification {
        user_id: recipient,
        kind: NotificationType::FollowUp,
        title: format!("Follow up with {}", due.lead_name),
        message,
        link: Some(format!("/leads/{}", due.lead_id)),
    })
}

fn task_notification(task: &DueTask) -> NewNotification {
    let message = match task.due_date {
        Some(due) => format!("\"{}\" was due {}.", task.title, due.format("%Y-%m-%d %H:%M UTC")),
        None => format!("\"{}\" is due.", task.title),
    };
    NewNotification {
        user_id: task.user_id,
        kind: NotificationType::TaskDue,
        title: "Task due".to_string(),
        message,
        link: Some(format!("/tasks/{}", task.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn follow_up_without_recipient_is_dropped() {
        let due = DueFollowUp {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            lead_name: "Ada Lovelace".into(),
            recipient_id: None,
            subject: None,
            follow_up_date: None,
        };
        assert!(follow_up_notification(&due).is_none());
    }

    #[test]
    fn follow_up_names_lead_and_subject() {
        let owner = Uuid::new_v4();
        let due = DueFollowUp {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            lead_name: "Ada Lovelace".into(),
            recipient_id: Some(owner),
            subject: Some(" Pricing ".into()),
            follow_up_date: None,
        };
        let note = follow_up_notification(&due).unwrap();
        assert_eq!(note.user_id, owner);
        assert_eq!(note.title, "Follow up with Ada Lovelace");
        assert_eq!(note.message, "Follow-up on \"Pricing\" is due.");
        assert_eq!(note.link, Some(format!("/leads/{}", due.lead_id)));
    }

    #[test]
    fn task_notification_shows_due_time() {
        let task = DueTask {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Send deck".into(),
            due_date: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()),
        };
        let note = task_notification(&task);
        assert_eq!(note.kind, NotificationType::TaskDue);
        assert_eq!(note.message, "\"Send deck\" was due 2024-03-01 09:30 UTC.");
    }
}

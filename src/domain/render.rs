use crate::domain::models::{Lead, Sender};

/// Fills `{{placeholder}}` slots in template text from the lead and sender.
/// Unknown placeholders are kept verbatim so typos stay visible to the author.
pub fn render(text: &str, lead: &Lead, sender: &Sender) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match lookup(key, lead, sender) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn lookup(key: &str, lead: &Lead, sender: &Sender) -> Option<String> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let value = match key {
        "firstName" => lead.first_name.clone(),
        "lastName" => opt(&lead.last_name),
        "fullName" => lead.full_name(),
        "company" => opt(&lead.company),
        "title" => opt(&lead.title),
        "email" => opt(&lead.email),
        "senderName" => sender.name.clone(),
        "senderEmail" => sender.email.clone(),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::LeadStage;
    use chrono::Utc;
    use uuid::Uuid;

    fn lead() -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            first_name: "Grace".into(),
            last_name: Some("Hopper".into()),
            email: Some("grace@navy.mil".into()),
            phone: None,
            company: Some("US Navy".into()),
            title: None,
            linkedin_url: None,
            source: None,
            notes: None,
            stage: LeadStage::New,
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

    fn sender() -> Sender {
        Sender {
            name: "Sam".into(),
            email: "sam@example.com".into(),
        }
    }

    #[test]
    fn substitutes_known_fields() {
        let text = "Hi {{firstName}}, how is {{ company }}? - {{senderName}}";
        assert_eq!(render(text, &lead(), &sender()), "Hi Grace, how is US Navy? - Sam");
        assert_eq!(render("{{fullName}}", &lead(), &sender()), "Grace Hopper");
    }

    #[test]
    fn missing_values_render_empty() {
        assert_eq!(render("[{{title}}]", &lead(), &sender()), "[]");
    }

    #[test]
    fn unknown_and_unterminated_placeholders_survive() {
        assert_eq!(render("{{budget}} ok", &lead(), &sender()), "{{budget}} ok");
        assert_eq!(render("Dear {{firstName", &lead(), &sender()), "Dear {{firstName");
    }
}

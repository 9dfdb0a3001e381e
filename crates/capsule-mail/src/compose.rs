//! Message composition. Pure string building, no I/O.

use capsule_core::{Capsule, Owner};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

const NOT_SPECIFIED: &str = "Not specified";
const LONG_DATE: &str = "%B %-d, %Y";
const LONG_DATE_TIME: &str = "%B %-d, %Y at %-I:%M %p";

/// Subject and HTML body of an outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub subject: String,
    pub body: String,
}

/// Escape the five HTML-significant characters in one pass.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn or_not_specified(value: Option<&str>) -> String {
    value.map(escape_html).unwrap_or_else(|| NOT_SPECIFIED.to_string())
}

fn long_date(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format(LONG_DATE).to_string()
}

fn long_date_time(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format(LONG_DATE_TIME).to_string()
}

/// Wrap `content` in the shared document shell.
fn page(heading: &str, content: &str, footer: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: Helvetica, Arial, sans-serif; color: #2d2d2d; line-height: 1.6; max-width: 600px; margin: 0 auto; padding: 16px;">
  <div style="background: #3d5a80; color: #ffffff; padding: 24px; border-radius: 8px 8px 0 0; text-align: center;">
    <h1 style="margin: 0; font-size: 24px;">{heading}</h1>
  </div>
  <div style="background: #f7f7f7; padding: 24px; border: 1px solid #e3e3e3; border-radius: 0 0 8px 8px;">
{content}
  </div>
  <p style="text-align: center; font-size: 12px; color: #8a8a8a; margin-top: 16px;">{footer}</p>
</body>
</html>
"#
    )
}

/// Build the delivery email for `capsule`, addressed to its `owner`.
///
/// Every user-supplied field is escaped; absent category and mood render as
/// "Not specified". The capsule's `created_at` appears twice: as a long date
/// in the introduction and with the time of day in the details block, both
/// rendered in `tz`.
pub fn compose(owner: &Owner, capsule: &Capsule, tz: Tz) -> ComposedMessage {
    let content = format!(
        r#"    <p>Hi <strong>{name}</strong>,</p>
    <p>On <strong>{written_on}</strong> you wrote a message to your future self. Here it is:</p>
    <div style="background: #ffffff; padding: 20px; border-left: 4px solid #3d5a80; margin: 16px 0;">
      <h2 style="margin-top: 0; color: #3d5a80;">{title}</h2>
      <p style="white-space: pre-wrap;">{message}</p>
    </div>
    <ul style="list-style: none; padding: 0; font-size: 14px; color: #5c5c5c;">
      <li><strong>Category:</strong> {category}</li>
      <li><strong>Mood when written:</strong> {mood}</li>
      <li><strong>Written on:</strong> {written_at}</li>
    </ul>
    <p>How much has changed since then?</p>"#,
        name = escape_html(&owner.name),
        written_on = long_date(capsule.created_at, tz),
        title = escape_html(&capsule.title),
        message = escape_html(&capsule.message),
        category = or_not_specified(capsule.category.as_deref()),
        mood = or_not_specified(capsule.mood.as_deref()),
        written_at = long_date_time(capsule.created_at, tz),
    );

    ComposedMessage {
        subject: format!("Time Capsule: {}", capsule.title),
        body: page(
            "Your time capsule has arrived",
            &content,
            "You are receiving this because you scheduled a time capsule for today.",
        ),
    }
}

/// Message sent by `send-test` to check SMTP settings end to end.
pub fn compose_test_message() -> ComposedMessage {
    ComposedMessage {
        subject: "Time Capsule: SMTP configuration test".to_string(),
        body: page(
            "SMTP configuration test",
            "    <p>If you can read this, outgoing mail is configured correctly.</p>",
            "Sent by the capsule delivery service.",
        ),
    }
}

/// Onboarding email for a newly registered owner.
pub fn compose_welcome(owner: &Owner) -> ComposedMessage {
    let content = format!(
        "    <p>Hi <strong>{}</strong>,</p>\n    \
         <p>Your account is ready. Write a capsule today and it will arrive in \
         this inbox on the date you choose.</p>",
        escape_html(&owner.name)
    );
    ComposedMessage {
        subject: "Welcome to Time Capsule".to_string(),
        body: page(
            "Welcome",
            &content,
            "You are receiving this because you registered an account.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::CapsuleStatus;
    use chrono::TimeZone;

    fn owner() -> Owner {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Owner {
            id: 1,
            name: "Ada <Lovelace>".into(),
            email: "ada@example.com".into(),
            timezone: "UTC".into(),
            created_at: at,
            updated_at: at,
        }
    }

    fn capsule(message: &str) -> Capsule {
        let created = Utc.with_ymd_and_hms(2025, 3, 5, 14, 7, 0).unwrap();
        Capsule {
            id: 7,
            owner_id: 1,
            title: "Q1 \"goals\"".into(),
            message: message.into(),
            due_at: Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap(),
            delivery_method: "email".into(),
            status: CapsuleStatus::Pending,
            category: None,
            mood: Some("it's fine".into()),
            image_url: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn escapes_all_five_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }

    #[test]
    fn escaping_is_single_pass() {
        assert_eq!(escape_html("&lt;"), "&amp;lt;");
    }

    #[test]
    fn script_tag_never_reaches_body() {
        let msg = compose(&owner(), &capsule("<script>alert(1)</script>"), Tz::UTC);
        assert!(msg.body.contains("&lt;script&gt;"));
        assert!(!msg.body.contains("<script>"));
    }

    #[test]
    fn subject_uses_raw_title() {
        let msg = compose(&owner(), &capsule("hi"), Tz::UTC);
        assert_eq!(msg.subject, "Time Capsule: Q1 \"goals\"");
        assert!(msg.body.contains("Q1 &quot;goals&quot;"));
    }

    #[test]
    fn absent_fields_render_not_specified() {
        let msg = compose(&owner(), &capsule("hi"), Tz::UTC);
        assert!(msg.body.contains("<strong>Category:</strong> Not specified"));
        assert!(msg.body.contains("<strong>Mood when written:</strong> it&#39;s fine"));
        assert!(msg.body.contains("Ada &lt;Lovelace&gt;"));
    }

    #[test]
    fn created_at_rendered_twice() {
        let msg = compose(&owner(), &capsule("hi"), Tz::UTC);
        assert!(msg.body.contains("<strong>March 5, 2025</strong>"));
        assert!(msg.body.contains("March 5, 2025 at 2:07 PM"));
    }

    #[test]
    fn created_at_follows_delivery_timezone() {
        // 20:07 UTC is 03:07 the next day in Jakarta.
        let mut late = capsule("hi");
        late.created_at = Utc.with_ymd_and_hms(2025, 3, 5, 20, 7, 0).unwrap();
        let msg = compose(&owner(), &late, chrono_tz::Asia::Jakarta);
        assert!(msg.body.contains("<strong>March 6, 2025</strong>"));
        assert!(msg.body.contains("March 6, 2025 at 3:07 AM"));
        assert!(!msg.body.contains("March 5, 2025"));
    }

    #[test]
    fn compose_is_deterministic() {
        assert_eq!(compose(&owner(), &capsule("x"), Tz::UTC), compose(&owner(), &capsule("x"), Tz::UTC));
    }

    #[test]
    fn welcome_escapes_name() {
        let msg = compose_welcome(&owner());
        assert!(msg.body.contains("Ada &lt;Lovelace&gt;"));
        assert!(compose_test_message().subject.contains("SMTP"));
    }
}

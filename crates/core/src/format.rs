use chrono::{DateTime, Local, Utc};

use crate::types::{ScheduleDefinition, Session};

/// Format seconds as MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let mins = (seconds / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    format!("{:02}:{:02}", mins, secs)
}

pub fn format_session_readable(session: &Session) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "# Briefing {}\n\n",
        format_local(session.created_at)
    ));
    output.push_str(&format!(
        "**Topics:** {} | **Articles:** {}\n\n",
        session.sections.len(),
        session.articles.len()
    ));

    if !session.summary_text.trim().is_empty() {
        output.push_str("## Summary\n\n");
        output.push_str(session.summary_text.trim());
        output.push_str("\n\n");
    }

    for (index, section) in session.sections.iter().enumerate() {
        output.push_str(&format!("## {}. {}\n\n", index + 1, section.topic));
        output.push_str(&format!("{}\n\n", section.summary_text.trim()));
        for article in &section.articles {
            output.push_str(&format!(
                "• {} ({})\n  {}\n",
                article.title, article.source, article.url
            ));
        }
        output.push('\n');
    }

    output
}

/// One line per schedule: id, time, days, topics.
pub fn format_schedule_line(definition: &ScheduleDefinition) -> String {
    let days = if definition.days_of_week.is_empty() {
        "every day".to_string()
    } else {
        definition
            .days_of_week
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };
    let topics = definition
        .selection()
        .into_iter()
        .collect::<Vec<_>>()
        .join(", ");
    let state = if definition.enabled { "" } else { " (disabled)" };

    format!(
        "{}  {}  {}  [{}] {}{}",
        definition.id,
        definition.time.format("%H:%M"),
        days,
        topics,
        definition.name,
        state
    )
}

fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

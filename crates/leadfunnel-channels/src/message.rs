//! Hand-off message text.

use leadfunnel_types::lead::{GoalTemplate, Timeframe};

/// Funnel answers that go into the hand-off message.
///
/// `timeframe` and `goal` are the raw stored values; unknown values are
/// printed as-is rather than dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandoffAnswers<'a> {
    pub page_context: &'a str,
    pub timeframe: Option<&'a str>,
    pub goal: Option<&'a str>,
    pub details: Option<&'a str>,
    pub lead_id: &'a str,
}

fn timeframe_label(raw: &str) -> &str {
    raw.parse::<Timeframe>().map(|t| t.label()).unwrap_or(raw)
}

fn goal_label(raw: &str) -> &str {
    raw.parse::<GoalTemplate>().map(|g| g.label()).unwrap_or(raw)
}

/// Build the message the visitor sends to the clinic.
///
/// ```text
/// Hi, I'm interested in Rhinoplasty in Istanbul.
/// Timeframe: As soon as possible
/// Goal: Improve my appearance
/// Ref: abc123
/// ```
pub fn build_handoff_message(answers: &HandoffAnswers<'_>) -> String {
    let context = answers.page_context.trim();
    let mut lines = Vec::with_capacity(5);
    if context.is_empty() {
        lines.push("Hi, I'm interested in your treatments.".to_string());
    } else {
        lines.push(format!("Hi, I'm interested in {context}."));
    }
    if let Some(tf) = answers.timeframe.map(str::trim).filter(|s| !s.is_empty()) {
        lines.push(format!("Timeframe: {}", timeframe_label(tf)));
    }
    if let Some(goal) = answers.goal.map(str::trim).filter(|s| !s.is_empty()) {
        lines.push(format!("Goal: {}", goal_label(goal)));
    }
    if let Some(details) = answers.details.map(str::trim).filter(|s| !s.is_empty()) {
        lines.push(format!("Details: {details}"));
    }
    lines.push(format!("Ref: {}", answers.lead_id));
    lines.join("\n")
}

//! Human-readable receipt summaries.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::types::{EntityType, Operation};

/// Memory summaries quote at most this many characters of the text.
const MEMORY_SNIPPET_CHARS: usize = 60;

/// One-line summary for a ledger receipt.
///
/// Reads the after-snapshot first and falls back to the before-snapshot, so a
/// delete with an empty after-snapshot still names what was removed.
pub fn summarize(
    entity_type: EntityType,
    entity_id: &str,
    operation: Operation,
    before: Option<&Value>,
    after: &Value,
) -> String {
    let verb = operation.verb();
    let field = |keys: &[&str]| field_of(before, after, keys);

    let specific = match entity_type {
        EntityType::Reminder => field(&["message", "text"][..]).map(|message| {
            match field(&["due_at", "due"][..]).and_then(|v| date_of(&v)) {
                Some(date) => format!("{verb} reminder: \"{}\" due {date}", text_of(&message)),
                None => format!("{verb} reminder: \"{}\"", text_of(&message)),
            }
        }),
        EntityType::Goal => field(&["title", "text"][..])
            .map(|title| format!("{verb} goal: \"{}\"", text_of(&title))),
        EntityType::Memory => field(&["text", "content"][..])
            .map(|text| format!("{verb} memory: \"{}\"", snippet(&text_of(&text)))),
        EntityType::Briefing => field(&["date", "briefing_date"][..])
            .and_then(|v| date_of(&v))
            .map(|date| format!("{verb} briefing for {date}")),
    };

    specific.unwrap_or_else(|| format!("{verb} {entity_type} {entity_id}"))
}

fn field_of(before: Option<&Value>, after: &Value, keys: &[&str]) -> Option<Value> {
    lookup(after, keys).or_else(|| before.and_then(|b| lookup(b, keys)))
}

fn lookup(snapshot: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|k| snapshot.get(*k))
        .find(|v| !v.is_null())
        .cloned()
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `YYYY-MM-DD` from an epoch-seconds number or a date/datetime string.
fn date_of(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.format("%Y-%m-%d").to_string()),
        Value::String(s) if s.len() >= 10 && s.is_char_boundary(10) => Some(s[..10].to_owned()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= MEMORY_SNIPPET_CHARS {
        return text.to_owned();
    }
    let cut: String = text.chars().take(MEMORY_SNIPPET_CHARS).collect();
    format!("{cut}...")
}

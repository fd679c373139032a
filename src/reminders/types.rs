//! Reminder types, enums, limits, and channel normalization helpers.

use serde::{Deserialize, Serialize};

use super::store::StoreError;

// ---------------------------------------------------------------------------
// Limits / constants
// ---------------------------------------------------------------------------

/// Audit entries retained per reminder; oldest entries are dropped first.
pub const MAX_AUDIT_ENTRIES: usize = 100;

/// Push-notification channel, used when no channel is given.
pub const CHANNEL_NTFY: &str = "ntfy";

/// Local speech channel.
pub const CHANNEL_VOICE: &str = "voice";

/// Legacy sentinel meaning "every channel".
pub const LEGACY_CHANNEL_BOTH: &str = "both";

/// Channel names accepted at creation time.
pub const KNOWN_CHANNELS: &[&str] = &[CHANNEL_NTFY, CHANNEL_VOICE];

pub(crate) const SNOOZE_30_SECS: u64 = 30 * 60;
pub(crate) const DELAY_2H_SECS: u64 = 120 * 60;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Med,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "med" | "medium" => Ok(Self::Med),
            "high" => Ok(Self::High),
            other => Err(StoreError::Validation(format!("unknown priority '{other}'"))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    #[default]
    Scheduled,
    Fired,
    Acknowledged,
    Snoozed,
    Canceled,
    Error,
}

impl ReminderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Fired => "fired",
            Self::Acknowledged => "acknowledged",
            Self::Snoozed => "snoozed",
            Self::Canceled => "canceled",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "fired" => Ok(Self::Fired),
            "acknowledged" => Ok(Self::Acknowledged),
            "snoozed" => Ok(Self::Snoozed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "error" => Ok(Self::Error),
            other => Err(StoreError::Validation(format!("unknown status '{other}'"))),
        }
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which subsystem created a reminder.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderSource {
    #[default]
    User,
    Goal,
    Briefing,
    System,
}

impl ReminderSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Goal => "goal",
            Self::Briefing => "briefing",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for ReminderSource {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "goal" => Ok(Self::Goal),
            "briefing" => Ok(Self::Briefing),
            "system" => Ok(Self::System),
            other => Err(StoreError::Validation(format!("unknown source '{other}'"))),
        }
    }
}

/// Action a user can take on a fired reminder (rendered as notification buttons).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReminderAction {
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "SNOOZE_30")]
    Snooze30,
    #[serde(rename = "DELAY_2H")]
    Delay2h,
}

impl ReminderAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Snooze30 => "SNOOZE_30",
            Self::Delay2h => "DELAY_2H",
        }
    }

    /// Seconds to push `due_at` forward, or `None` when the action does not reschedule.
    pub fn reschedule_secs(self) -> Option<u64> {
        match self {
            Self::Done => None,
            Self::Snooze30 => Some(SNOOZE_30_SECS),
            Self::Delay2h => Some(DELAY_2H_SECS),
        }
    }
}

impl std::str::FromStr for ReminderAction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DONE" => Ok(Self::Done),
            "SNOOZE_30" => Ok(Self::Snooze30),
            "DELAY_2H" => Ok(Self::Delay2h),
            _ => Err(StoreError::Validation(format!("unknown action '{}'", s.trim()))),
        }
    }
}

impl std::fmt::Display for ReminderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Core structs
// ---------------------------------------------------------------------------

/// One entry of a reminder's bounded audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub ts: u64,
    pub action: String,
    pub actor: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        ts: u64,
        action: impl Into<String>,
        actor: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            ts,
            action: action.into(),
            actor: actor.into(),
            details,
        }
    }
}

/// A scheduled, at-most-once notification task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub id: i64,
    pub kind: String,
    pub message: String,
    pub due_at: u64,
    pub created_at: u64,
    pub updated_at: u64,
    pub sent_at: Option<u64>,
    pub canceled_at: Option<u64>,
    /// Set while a scheduler tick owns the reminder; cleared on re-arm.
    pub claimed_at: Option<u64>,
    pub timezone: String,
    pub channels: Vec<String>,
    pub priority: Priority,
    pub status: ReminderStatus,
    pub actions: Vec<String>,
    pub source: ReminderSource,
    pub context_ref: Option<String>,
    pub audit_log: Vec<AuditEntry>,
    pub last_error: Option<String>,
}

impl Reminder {
    /// Due, unsent and not canceled at `now`.
    #[must_use]
    pub fn is_due(&self, now: u64) -> bool {
        self.due_at <= now && self.sent_at.is_none() && self.canceled_at.is_none()
    }
}

/// Parameters for creating a reminder.
///
/// Defaults: kind `reminder`, timezone `UTC`, channels `[ntfy]`, priority `med`,
/// actions `[DONE, SNOOZE_30]`, source `user`.
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub kind: String,
    pub due_at: u64,
    pub message: String,
    pub timezone: String,
    pub channels: Vec<String>,
    pub priority: Priority,
    pub actions: Vec<String>,
    pub source: ReminderSource,
    pub context_ref: Option<String>,
}

impl NewReminder {
    pub fn new(message: impl Into<String>, due_at: u64) -> Self {
        Self {
            kind: "reminder".to_owned(),
            due_at,
            message: message.into(),
            timezone: "UTC".to_owned(),
            channels: vec![CHANNEL_NTFY.to_owned()],
            priority: Priority::default(),
            actions: default_actions(),
            source: ReminderSource::default(),
            context_ref: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Accepts the legacy single-string form (`"ntfy"`, `"voice"`, `"both"`).
    pub fn with_legacy_channel(mut self, channel: &str) -> Self {
        self.channels = vec![channel.to_owned()];
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: ReminderSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_context_ref(mut self, context_ref: impl Into<String>) -> Self {
        self.context_ref = Some(context_ref.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn default_actions() -> Vec<String> {
    vec![
        ReminderAction::Done.label().to_owned(),
        ReminderAction::Snooze30.label().to_owned(),
    ]
}

/// Lenient channel expansion used for stored rows.
///
/// Lowercases, expands `both`, drops blanks and duplicates (first occurrence wins),
/// and falls back to `[ntfy]` when nothing is left. Unknown names are kept so the
/// router can report them per channel.
pub fn expand_channels<I, S>(channels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !out.iter().any(|c| c == name) {
            out.push(name.to_owned());
        }
    };
    for raw in channels {
        let name = raw.as_ref().trim().to_ascii_lowercase();
        match name.as_str() {
            "" => {}
            LEGACY_CHANNEL_BOTH => {
                push(CHANNEL_NTFY);
                push(CHANNEL_VOICE);
            }
            other => push(other),
        }
    }
    if out.is_empty() {
        out.push(CHANNEL_NTFY.to_owned());
    }
    out
}

/// Strict channel normalization for new reminders: expands like
/// [`expand_channels`] and rejects names outside [`KNOWN_CHANNELS`].
pub fn normalize_channel_list<I, S>(channels: I) -> Result<Vec<String>, StoreError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let expanded = expand_channels(channels);
    if let Some(bad) = expanded
        .iter()
        .find(|c| !KNOWN_CHANNELS.contains(&c.as_str()))
    {
        return Err(StoreError::Validation(format!("unknown channel '{bad}'")));
    }
    Ok(expanded)
}

/// Parse a persisted `channels` column value.
///
/// Accepts the current JSON-array form and the legacy bare-string form.
pub fn parse_stored_channels(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<String>>(trimmed) {
            Ok(list) => expand_channels(list),
            Err(_) => expand_channels(std::iter::empty::<&str>()),
        }
    } else {
        expand_channels([trimmed])
    }
}

/// Validate and canonicalize action labels (order kept, duplicates dropped).
pub fn normalize_actions<I, S>(actions: I) -> Result<Vec<String>, StoreError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for raw in actions {
        let action: ReminderAction = raw.as_ref().parse()?;
        let label = action.label().to_owned();
        if !out.contains(&label) {
            out.push(label);
        }
    }
    Ok(out)
}

/// Append `entries` and drop the oldest so at most [`MAX_AUDIT_ENTRIES`] remain.
pub fn push_bounded(log: &mut Vec<AuditEntry>, entries: impl IntoIterator<Item = AuditEntry>) {
    log.extend(entries);
    if log.len() > MAX_AUDIT_ENTRIES {
        let drop_count = log.len() - MAX_AUDIT_ENTRIES;
        log.drain(0..drop_count);
    }
}

pub fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

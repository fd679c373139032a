//! Ledger record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::LedgerError;
use super::summary::summarize;

/// Default undo window: 30 minutes.
pub const DEFAULT_UNDO_WINDOW_SECS: u64 = 30 * 60;

/// Ledger tuning, read from the `[ledger]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Seconds after recording during which an action can be undone.
    pub undo_window_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            undo_window_secs: DEFAULT_UNDO_WINDOW_SECS,
        }
    }
}

/// Kind of entity an action touched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Goal,
    Reminder,
    Briefing,
    Memory,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Goal => "goal",
            Self::Reminder => "reminder",
            Self::Briefing => "briefing",
            Self::Memory => "memory",
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "goal" => Ok(Self::Goal),
            "reminder" => Ok(Self::Reminder),
            "briefing" => Ok(Self::Briefing),
            "memory" => Ok(Self::Memory),
            other => Err(LedgerError::Invalid(format!("unknown entity type '{other}'"))),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Written by the ledger itself when an earlier action is undone.
    Undo,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Undo => "undo",
        }
    }

    /// Capitalized verb used in receipt summaries.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Undo => "Undo",
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "undo" => Ok(Self::Undo),
            other => Err(LedgerError::Invalid(format!("unknown operation '{other}'"))),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    pub action_id: String,
    pub session_id: String,
    /// When the action happened (epoch seconds).
    pub timestamp: u64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: Operation,
    pub before_snapshot: Option<serde_json::Value>,
    pub after_snapshot: serde_json::Value,
    /// Last second (inclusive) at which the action may be undone.
    pub undo_expiry: u64,
    pub undo_token: String,
    pub undone_at: Option<DateTime<Utc>>,
    pub created_at: u64,
}

impl ActionRecord {
    pub fn is_undone(&self) -> bool {
        self.undone_at.is_some()
    }

    /// The receipt for this record.
    pub fn receipt(&self) -> ActionReceipt {
        ActionReceipt {
            action_id: self.action_id.clone(),
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            operation: self.operation,
            summary: summarize(
                self.entity_type,
                &self.entity_id,
                self.operation,
                self.before_snapshot.as_ref(),
                &self.after_snapshot,
            ),
            undo_token: self.undo_token.clone(),
            undo_expiry: self.undo_expiry,
            timestamp: self.timestamp,
        }
    }
}

/// What a caller gets back right after recording an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionReceipt {
    pub action_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: Operation,
    /// Human-readable one-liner, e.g. `Update reminder: "X" due 2026-01-15`.
    pub summary: String,
    pub undo_token: String,
    pub undo_expiry: u64,
    pub timestamp: u64,
}

/// Input to [`super::ActionLedger::record`].
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub session_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: Operation,
    pub before: Option<serde_json::Value>,
    pub after: serde_json::Value,
}

impl RecordParams {
    pub fn new(
        session_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: Operation,
        after: serde_json::Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            before: None,
            after,
        }
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }
}

/// Format an epoch timestamp the way undo denials show it.
pub(crate) fn format_utc(epoch_secs: u64) -> String {
    i64::try_from(epoch_secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| epoch_secs.to_string())
}

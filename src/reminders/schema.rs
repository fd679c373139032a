//! SQLite DDL for the reminder store.
//!
//! Table creation lives here so it is reviewable in isolation; column
//! additions and data rewrites are versioned steps in `migrate.rs`.

/// Version key for the reminder tables in `schema_meta`.
pub(crate) const SCHEMA_KEY: &str = "reminders_schema_version";

/// Initial reminder table (version 1).
///
/// `channels`, `actions` and `audit_log` hold JSON arrays. Older databases may
/// carry a bare channel string here; migration 2 rewrites those.
pub(crate) const REMINDERS_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS reminders (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL DEFAULT 'reminder',
    message     TEXT NOT NULL,
    due_at      INTEGER NOT NULL,
    created_at  INTEGER NOT NULL DEFAULT 0,
    updated_at  INTEGER NOT NULL DEFAULT 0,
    sent_at     INTEGER,
    canceled_at INTEGER,
    timezone    TEXT NOT NULL DEFAULT 'UTC',
    channels    TEXT NOT NULL DEFAULT '["ntfy"]',
    priority    TEXT NOT NULL DEFAULT 'med',
    status      TEXT NOT NULL DEFAULT 'scheduled',
    actions     TEXT NOT NULL DEFAULT '["DONE","SNOOZE_30"]',
    source      TEXT NOT NULL DEFAULT 'user',
    context_ref TEXT,
    audit_log   TEXT NOT NULL DEFAULT '[]',
    last_error  TEXT
);

CREATE INDEX IF NOT EXISTS idx_reminders_due    ON reminders(due_at);
CREATE INDEX IF NOT EXISTS idx_reminders_status ON reminders(status);
"#;

/// Claim ownership column (version 2).
pub(crate) const ADD_CLAIMED_AT_SQL: &str = "ALTER TABLE reminders ADD COLUMN claimed_at INTEGER";

/// Partial index that keeps the due-scan cheap once most rows are sent.
pub(crate) const PENDING_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_reminders_pending \
     ON reminders(due_at) WHERE sent_at IS NULL AND canceled_at IS NULL";

/// Column list shared by every reminder SELECT / RETURNING clause.
pub(crate) const REMINDER_COLUMNS: &str = "id, kind, message, due_at, created_at, updated_at, \
     sent_at, canceled_at, claimed_at, timezone, channels, priority, status, actions, source, \
     context_ref, audit_log, last_error";

//! SQLite-backed reminder store.
//!
//! One `Mutex<Connection>` per store: every mutating call runs inside a short
//! transaction while holding the lock, so writers are serialized. WAL mode lets
//! other connections to the same file keep reading during a write.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use super::migrate::run_migrations;
use super::schema::{REMINDER_COLUMNS, SCHEMA_KEY};
use super::types::{
    AuditEntry, NewReminder, Priority, Reminder, ReminderAction, ReminderSource, ReminderStatus,
    expand_channels, normalize_actions, normalize_channel_list, now_epoch_secs,
    parse_stored_channels, push_bounded,
};
use crate::db::{OpenError, open_file, open_memory, read_version};

/// Default number of reminders claimed per scheduler tick.
pub const DEFAULT_CLAIM_BATCH_SIZE: usize = 50;

/// Default age after which an unsent claim is considered abandoned.
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 600;

/// Bounds applied by [`ReminderStore::claim_due_reminders`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPolicy {
    /// Maximum reminders returned by one claim.
    pub batch_size: usize,
    /// A claim older than this that was never marked fired may be taken again.
    pub lease_secs: u64,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_CLAIM_BATCH_SIZE,
            lease_secs: DEFAULT_CLAIM_LEASE_SECS,
        }
    }
}

/// Field overrides applied when restoring a reminder from a ledger snapshot.
///
/// Absent fields are left untouched. Nullable fields distinguish "absent"
/// (`None`) from an explicit JSON `null` (`Some(None)`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReminderPatch {
    #[serde(default, alias = "text")]
    pub message: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub due_at: Option<u64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<ReminderStatus>,
    #[serde(default)]
    pub actions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub context_ref: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub sent_at: Option<Option<u64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub canceled_at: Option<Option<u64>>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A reminder as it was before and after [`ReminderStore::apply_action`],
/// both read inside the same transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAction {
    pub before: Reminder,
    pub after: Reminder,
}

/// Durable table of scheduled reminders with atomic claim semantics.
pub struct ReminderStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    claim_policy: ClaimPolicy,
}

impl ReminderStore {
    /// Open (or create) the store at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_file(path)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = open_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        let report = run_migrations(&conn)?;
        if !report.applied.is_empty() {
            info!(
                from = report.from_version,
                to = report.to_version,
                "reminder store schema migrated"
            );
        }
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            claim_policy: ClaimPolicy::default(),
        })
    }

    /// Override batch size and lease used by [`Self::claim_due_reminders`].
    #[must_use]
    pub fn with_claim_policy(mut self, policy: ClaimPolicy) -> Self {
        self.claim_policy = ClaimPolicy {
            batch_size: policy.batch_size.max(1),
            lease_secs: policy.lease_secs.max(1),
        };
        self
    }

    /// Database file path (`None` for in-memory stores).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        Ok(read_version(&conn, SCHEMA_KEY)?)
    }

    /// Validate and persist a new reminder. Returns its id.
    pub fn add_reminder(&self, new: NewReminder) -> Result<i64, StoreError> {
        let message = new.message.trim();
        if message.is_empty() {
            return Err(StoreError::Validation("message must not be empty".into()));
        }
        let kind = new.kind.trim();
        if kind.is_empty() {
            return Err(StoreError::Validation("kind must not be empty".into()));
        }
        let timezone = match new.timezone.trim() {
            "" => "UTC",
            tz => tz,
        };
        let channels = normalize_channel_list(&new.channels)?;
        let actions = normalize_actions(&new.actions)?;

        let now = now_epoch_secs();
        let created = AuditEntry::new(
            now,
            "created",
            new.source.as_str(),
            serde_json::json!({ "due_at": new.due_at, "channels": channels }),
        );

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reminders \
             (kind, message, due_at, created_at, updated_at, timezone, channels, priority, \
              status, actions, source, context_ref, audit_log) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?7, 'scheduled', ?8, ?9, ?10, ?11)",
            params![
                kind,
                message,
                new.due_at,
                now,
                timezone,
                to_json(&channels)?,
                new.priority.as_str(),
                to_json(&actions)?,
                new.source.as_str(),
                new.context_ref,
                to_json(&vec![created])?,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, due_at = new.due_at, "reminder added");
        Ok(id)
    }

    pub fn get_reminder(&self, id: i64) -> Result<Option<Reminder>, StoreError> {
        let conn = self.lock()?;
        load(&conn, id)
    }

    /// List reminders ordered by `due_at` ascending.
    pub fn list_reminders(
        &self,
        include_sent: bool,
        include_canceled: bool,
    ) -> Result<Vec<Reminder>, StoreError> {
        let mut filters = Vec::new();
        if !include_sent {
            filters.push("sent_at IS NULL");
        }
        if !include_canceled {
            filters.push("canceled_at IS NULL");
        }
        let where_clause = if filters.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", filters.join(" AND "))
        };
        let sql =
            format!("SELECT {REMINDER_COLUMNS} FROM reminders{where_clause} ORDER BY due_at, id");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_reminder)?;
        let mut reminders = Vec::new();
        for r in rows {
            reminders.push(r?);
        }
        Ok(reminders)
    }

    /// Atomically take ownership of reminders that are due, unsent and not canceled.
    ///
    /// A single conditional `UPDATE ... RETURNING` stamps `claimed_at`, so a row
    /// handed to one caller is invisible to the next claim until its lease lapses.
    pub fn claim_due_reminders(&self, now: u64) -> Result<Vec<Reminder>, StoreError> {
        let policy = self.claim_policy;
        let stale_before = now.saturating_sub(policy.lease_secs);
        let batch = i64::try_from(policy.batch_size).unwrap_or(i64::MAX);

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut claimed = {
            let mut stmt = tx.prepare(&format!(
                "UPDATE reminders SET claimed_at = ?1, updated_at = ?1 \
                 WHERE id IN ( \
                     SELECT id FROM reminders \
                     WHERE due_at <= ?1 AND sent_at IS NULL AND canceled_at IS NULL \
                       AND (claimed_at IS NULL OR claimed_at <= ?2) \
                     ORDER BY due_at, id LIMIT ?3) \
                 RETURNING {REMINDER_COLUMNS}"
            ))?;
            let rows = stmt.query_map(params![now, stale_before, batch], row_to_reminder)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        claimed.sort_by_key(|r| (r.due_at, r.id));
        if !claimed.is_empty() {
            debug!(count = claimed.len(), now, "claimed due reminders");
        }
        Ok(claimed)
    }

    /// Stamp `sent_at` and `status` on a batch. Rows already sent are skipped.
    ///
    /// Returns the number of rows flipped.
    pub fn mark_sent(
        &self,
        ids: &[i64],
        sent_at: u64,
        status: ReminderStatus,
    ) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut flipped = 0;
        for id in ids {
            flipped += tx.execute(
                "UPDATE reminders SET sent_at = ?1, status = ?2, updated_at = ?1 \
                 WHERE id = ?3 AND sent_at IS NULL",
                params![sent_at, status.as_str(), id],
            )?;
        }
        tx.commit()?;
        Ok(flipped)
    }

    /// Mark a claimed reminder fired, but only while `claimed_at` still owns it.
    ///
    /// A reminder canceled, snoozed or acknowledged since the claim is left
    /// untouched. Returns whether the row flipped.
    pub fn mark_fired(&self, id: i64, claimed_at: u64, sent_at: u64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let flipped = conn.execute(
            "UPDATE reminders SET sent_at = ?1, status = ?2, updated_at = ?1 \
             WHERE id = ?3 AND sent_at IS NULL AND canceled_at IS NULL AND claimed_at = ?4",
            params![sent_at, ReminderStatus::Fired.as_str(), id, claimed_at],
        )?;
        Ok(flipped > 0)
    }

    /// Record a delivery failure. Does not mark the reminder sent.
    pub fn mark_error(&self, id: i64, message: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE reminders SET last_error = ?1, updated_at = ?2 WHERE id = ?3",
            params![message, now_epoch_secs(), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Append audit entries, keeping only the newest 100.
    pub fn append_audit_log(&self, id: i64, entries: Vec<AuditEntry>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT audit_log FROM reminders WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(StoreError::NotFound(id));
        };
        let mut log: Vec<AuditEntry> = serde_json::from_str(&raw).unwrap_or_default();
        push_bounded(&mut log, entries);
        tx.execute(
            "UPDATE reminders SET audit_log = ?1 WHERE id = ?2",
            params![to_json(&log)?, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Cancel an unsent, uncanceled reminder.
    ///
    /// Returns `false` when the reminder already fired or was canceled.
    pub fn cancel_reminder(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let Some(mut reminder) = load(&tx, id)? else {
            return Err(StoreError::NotFound(id));
        };
        if reminder.sent_at.is_some() || reminder.canceled_at.is_some() {
            return Ok(false);
        }
        let now = now_epoch_secs();
        reminder.canceled_at = Some(now);
        reminder.status = ReminderStatus::Canceled;
        push_bounded(
            &mut reminder.audit_log,
            [AuditEntry::new(now, "canceled", "user", serde_json::Value::Null)],
        );
        write_row(&tx, &reminder, now)?;
        tx.commit()?;
        debug!(id, "reminder canceled");
        Ok(true)
    }

    /// Apply a notification action (`DONE`, `SNOOZE_30`, `DELAY_2H`).
    ///
    /// Snooze and delay move `due_at` forward from `now` and re-arm the reminder
    /// by clearing `sent_at` and its claim. `DONE` on a reminder whose delivery
    /// is still in flight stamps `sent_at`, so the scheduler leaves it alone.
    pub fn apply_action(
        &self,
        id: i64,
        action: ReminderAction,
        now: u64,
    ) -> Result<AppliedAction, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let Some(before) = load(&tx, id)? else {
            return Err(StoreError::NotFound(id));
        };
        if before.canceled_at.is_some() {
            return Err(StoreError::Conflict(format!("reminder {id} is canceled")));
        }

        let mut reminder = before.clone();
        match action.reschedule_secs() {
            None => {
                reminder.status = ReminderStatus::Acknowledged;
                if reminder.sent_at.is_none() && self.claim_is_live(reminder.claimed_at, now) {
                    reminder.sent_at = Some(now);
                }
            }
            Some(delay) => {
                reminder.status = ReminderStatus::Snoozed;
                reminder.due_at = now.saturating_add(delay);
                reminder.sent_at = None;
                reminder.claimed_at = None;
            }
        }
        push_bounded(
            &mut reminder.audit_log,
            [AuditEntry::new(
                now,
                format!("action:{}", action.label()),
                "user",
                serde_json::json!({ "due_at": reminder.due_at }),
            )],
        );
        write_row(&tx, &reminder, now)?;
        tx.commit()?;
        reminder.updated_at = now;
        info!(id, action = action.label(), "reminder action applied");
        Ok(AppliedAction {
            before,
            after: reminder,
        })
    }

    /// Take a reminder out of circulation without deleting its row.
    ///
    /// Unlike [`Self::cancel_reminder`] this also applies to reminders that
    /// already fired; it backs the undo of a create.
    pub fn retire_reminder(&self, id: i64, now: u64) -> Result<Reminder, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let Some(mut reminder) = load(&tx, id)? else {
            return Err(StoreError::NotFound(id));
        };
        reminder.canceled_at.get_or_insert(now);
        reminder.status = ReminderStatus::Canceled;
        push_bounded(
            &mut reminder.audit_log,
            [AuditEntry::new(now, "retired", "undo", serde_json::Value::Null)],
        );
        write_row(&tx, &reminder, now)?;
        tx.commit()?;
        reminder.updated_at = now;
        Ok(reminder)
    }

    /// Overwrite the fields present in `patch`.
    pub fn restore_reminder(
        &self,
        id: i64,
        patch: &ReminderPatch,
        now: u64,
    ) -> Result<Reminder, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let Some(mut reminder) = load(&tx, id)? else {
            return Err(StoreError::NotFound(id));
        };

        if let Some(message) = &patch.message {
            if message.trim().is_empty() {
                return Err(StoreError::Validation("message must not be empty".into()));
            }
            reminder.message = message.trim().to_owned();
        }
        if let Some(kind) = &patch.kind {
            reminder.kind = kind.clone();
        }
        if let Some(due_at) = patch.due_at {
            reminder.due_at = due_at;
        }
        if let Some(timezone) = &patch.timezone {
            reminder.timezone = timezone.clone();
        }
        if let Some(channels) = &patch.channels {
            reminder.channels = expand_channels(channels);
        }
        if let Some(priority) = patch.priority {
            reminder.priority = priority;
        }
        if let Some(status) = patch.status {
            reminder.status = status;
        }
        if let Some(actions) = &patch.actions {
            reminder.actions = normalize_actions(actions)?;
        }
        if let Some(context_ref) = &patch.context_ref {
            reminder.context_ref = context_ref.clone();
        }
        if let Some(sent_at) = patch.sent_at {
            reminder.sent_at = sent_at;
            if sent_at.is_none() {
                reminder.claimed_at = None;
            }
        }
        if let Some(canceled_at) = patch.canceled_at {
            reminder.canceled_at = canceled_at;
        }

        push_bounded(
            &mut reminder.audit_log,
            [AuditEntry::new(now, "restored", "undo", serde_json::Value::Null)],
        );
        write_row(&tx, &reminder, now)?;
        tx.commit()?;
        reminder.updated_at = now;
        Ok(reminder)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Whether a claim stamped at `claimed_at` is still within its lease at `now`.
    fn claim_is_live(&self, claimed_at: Option<u64>, now: u64) -> bool {
        claimed_at.is_some_and(|at| at > now.saturating_sub(self.claim_policy.lease_secs))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

fn load(conn: &Connection, id: i64) -> Result<Option<Reminder>, StoreError> {
    let reminder = conn
        .query_row(
            &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
            params![id],
            row_to_reminder,
        )
        .optional()?;
    Ok(reminder)
}

/// Persist every mutable column of `reminder`.
fn write_row(conn: &Connection, reminder: &Reminder, now: u64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE reminders SET kind = ?1, message = ?2, due_at = ?3, updated_at = ?4, \
         sent_at = ?5, canceled_at = ?6, claimed_at = ?7, timezone = ?8, channels = ?9, \
         priority = ?10, status = ?11, actions = ?12, context_ref = ?13, audit_log = ?14, \
         last_error = ?15 WHERE id = ?16",
        params![
            reminder.kind,
            reminder.message,
            reminder.due_at,
            now,
            reminder.sent_at,
            reminder.canceled_at,
            reminder.claimed_at,
            reminder.timezone,
            to_json(&reminder.channels)?,
            reminder.priority.as_str(),
            reminder.status.as_str(),
            to_json(&reminder.actions)?,
            reminder.context_ref,
            to_json(&reminder.audit_log)?,
            reminder.last_error,
            reminder.id,
        ],
    )?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the reminder store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("reminder not found: {0}")]
    NotFound(i64),

    #[error("invalid reminder: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl From<OpenError> for StoreError {
    fn from(e: OpenError) -> Self {
        match e {
            OpenError::Sqlite(e) => Self::Sqlite(e),
            OpenError::Io(e) => Self::Io(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let channels_raw: String = row.get(10)?;
    let priority_str: String = row.get(11)?;
    let status_str: String = row.get(12)?;
    let actions_json: String = row.get(13)?;
    let source_str: String = row.get(14)?;
    let audit_json: String = row.get(16)?;

    Ok(Reminder {
        id: row.get(0)?,
        kind: row.get(1)?,
        message: row.get(2)?,
        due_at: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        sent_at: row.get(6)?,
        canceled_at: row.get(7)?,
        claimed_at: row.get(8)?,
        timezone: row.get(9)?,
        channels: parse_stored_channels(&channels_raw),
        priority: priority_str.parse().unwrap_or_default(),
        status: status_str.parse().unwrap_or_default(),
        actions: serde_json::from_str(&actions_json).unwrap_or_default(),
        source: source_str.parse::<ReminderSource>().unwrap_or_default(),
        context_ref: row.get(15)?,
        audit_log: serde_json::from_str(&audit_json).unwrap_or_default(),
        last_error: row.get(17)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::reminders::migrate::CURRENT_SCHEMA_VERSION;
    use crate::reminders::types::MAX_AUDIT_ENTRIES;

    fn store() -> ReminderStore {
        ReminderStore::open_in_memory().expect("open in-memory store")
    }

    fn add(store: &ReminderStore, message: &str, due_at: u64) -> i64 {
        store
            .add_reminder(NewReminder::new(message, due_at))
            .expect("add reminder")
    }

    #[test]
    fn add_and_get_uses_defaults() {
        let store = store();
        let id = add(&store, "Stretch", 100);
        let r = store.get_reminder(id).unwrap().expect("reminder exists");

        assert_eq!(r.message, "Stretch");
        assert_eq!(r.kind, "reminder");
        assert_eq!(r.channels, vec!["ntfy"]);
        assert_eq!(r.actions, vec!["DONE", "SNOOZE_30"]);
        assert_eq!(r.priority, Priority::Med);
        assert_eq!(r.status, ReminderStatus::Scheduled);
        assert!(r.sent_at.is_none());
        assert_eq!(r.audit_log.len(), 1);
        assert_eq!(r.audit_log[0].action, "created");
    }

    #[test]
    fn validation_rejects_before_persisting() {
        let store = store();
        assert!(matches!(
            store.add_reminder(NewReminder::new("   ", 1)),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.add_reminder(NewReminder::new("x", 1).with_channels(["fax"])),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.add_reminder(NewReminder::new("x", 1).with_actions(["LATER"])),
            Err(StoreError::Validation(_))
        ));
        assert!(store.list_reminders(true, true).unwrap().is_empty());
    }

    #[test]
    fn legacy_channel_is_normalized_on_create() {
        let store = store();
        let both = store
            .add_reminder(NewReminder::new("a", 1).with_legacy_channel("both"))
            .unwrap();
        let ntfy = store
            .add_reminder(NewReminder::new("b", 1).with_legacy_channel("ntfy"))
            .unwrap();
        assert_eq!(
            store.get_reminder(both).unwrap().unwrap().channels,
            vec!["ntfy", "voice"]
        );
        assert_eq!(store.get_reminder(ntfy).unwrap().unwrap().channels, vec!["ntfy"]);
    }

    #[test]
    fn list_orders_by_due_and_filters() {
        let store = store();
        let late = add(&store, "late", 300);
        let early = add(&store, "early", 100);
        let sent = add(&store, "sent", 200);
        store.mark_sent(&[sent], 250, ReminderStatus::Fired).unwrap();

        let pending: Vec<i64> = store
            .list_reminders(false, false)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(pending, vec![early, late]);

        let all: Vec<i64> = store
            .list_reminders(true, true)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(all, vec![early, sent, late]);
    }

    #[test]
    fn claim_takes_only_due_unsent_uncanceled() {
        let store = store();
        let due = add(&store, "due", 100);
        let _future = add(&store, "future", 500);
        let canceled = add(&store, "canceled", 50);
        assert!(store.cancel_reminder(canceled).unwrap());

        let claimed = store.claim_due_reminders(200).unwrap();
        assert_eq!(claimed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![due]);
        assert_eq!(claimed[0].claimed_at, Some(200));
    }

    #[test]
    fn claimed_rows_are_not_claimed_again_within_lease() {
        let store = store();
        add(&store, "due", 100);

        assert_eq!(store.claim_due_reminders(200).unwrap().len(), 1);
        assert!(store.claim_due_reminders(200).unwrap().is_empty());
        assert!(store.claim_due_reminders(300).unwrap().is_empty());
    }

    #[test]
    fn abandoned_claim_is_recoverable_after_lease() {
        let store = store().with_claim_policy(ClaimPolicy {
            batch_size: 10,
            lease_secs: 60,
        });
        let id = add(&store, "due", 100);

        assert_eq!(store.claim_due_reminders(200).unwrap().len(), 1);
        assert!(store.claim_due_reminders(259).unwrap().is_empty());
        let again = store.claim_due_reminders(260).unwrap();
        assert_eq!(again.iter().map(|r| r.id).collect::<Vec<_>>(), vec![id]);
    }

    #[test]
    fn claim_respects_batch_size_in_due_order() {
        let store = store().with_claim_policy(ClaimPolicy {
            batch_size: 2,
            lease_secs: 600,
        });
        let c = add(&store, "c", 30);
        let a = add(&store, "a", 10);
        let b = add(&store, "b", 20);

        let first: Vec<i64> = store
            .claim_due_reminders(100)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(first, vec![a, b]);
        let second: Vec<i64> = store
            .claim_due_reminders(100)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(second, vec![c]);
    }

    #[test]
    fn mark_sent_flips_once() {
        let store = store();
        let id = add(&store, "x", 1);
        assert_eq!(store.mark_sent(&[id], 10, ReminderStatus::Fired).unwrap(), 1);
        assert_eq!(store.mark_sent(&[id], 20, ReminderStatus::Fired).unwrap(), 0);
        let r = store.get_reminder(id).unwrap().unwrap();
        assert_eq!(r.sent_at, Some(10));
        assert_eq!(r.status, ReminderStatus::Fired);
    }

    #[test]
    fn mark_fired_requires_the_claim_to_still_own_the_row() {
        let store = store();
        let snoozed = add(&store, "snoozed", 1);
        let canceled = add(&store, "canceled", 1);
        let kept = add(&store, "kept", 1);
        assert_eq!(store.claim_due_reminders(10).unwrap().len(), 3);

        store.apply_action(snoozed, ReminderAction::Snooze30, 12).unwrap();
        store.cancel_reminder(canceled).unwrap();

        assert!(!store.mark_fired(snoozed, 10, 15).unwrap());
        assert!(!store.mark_fired(canceled, 10, 15).unwrap());
        assert!(!store.mark_fired(kept, 9, 15).unwrap());
        assert!(store.mark_fired(kept, 10, 15).unwrap());
        assert!(!store.mark_fired(kept, 10, 16).unwrap());

        let r = store.get_reminder(snoozed).unwrap().unwrap();
        assert_eq!(r.status, ReminderStatus::Snoozed);
        assert_eq!(r.due_at, 12 + 30 * 60);
        assert!(r.sent_at.is_none());

        let r = store.get_reminder(canceled).unwrap().unwrap();
        assert_eq!(r.status, ReminderStatus::Canceled);
        assert!(r.sent_at.is_none());

        let r = store.get_reminder(kept).unwrap().unwrap();
        assert_eq!(r.status, ReminderStatus::Fired);
        assert_eq!(r.sent_at, Some(15));
    }

    #[test]
    fn done_during_delivery_counts_as_sent() {
        let store = store();
        let id = add(&store, "x", 1);
        store.claim_due_reminders(10).unwrap();

        let done = store.apply_action(id, ReminderAction::Done, 12).unwrap().after;
        assert_eq!(done.status, ReminderStatus::Acknowledged);
        assert_eq!(done.sent_at, Some(12));

        assert!(!store.mark_fired(id, 10, 13).unwrap());
        let r = store.get_reminder(id).unwrap().unwrap();
        assert_eq!(r.status, ReminderStatus::Acknowledged);
        assert!(store.claim_due_reminders(10 + DEFAULT_CLAIM_LEASE_SECS).unwrap().is_empty());
    }

    #[test]
    fn done_after_a_lapsed_claim_leaves_the_reminder_due() {
        let store = store();
        let id = add(&store, "x", 1);
        store.claim_due_reminders(10).unwrap();

        let done = store
            .apply_action(id, ReminderAction::Done, 10 + DEFAULT_CLAIM_LEASE_SECS)
            .unwrap()
            .after;
        assert!(done.sent_at.is_none());
    }

    #[test]
    fn mark_error_does_not_mark_sent() {
        let store = store();
        let id = add(&store, "x", 1);
        store.mark_error(id, "ntfy: HTTP 500").unwrap();
        let r = store.get_reminder(id).unwrap().unwrap();
        assert_eq!(r.last_error.as_deref(), Some("ntfy: HTTP 500"));
        assert!(r.sent_at.is_none());
        assert!(matches!(store.mark_error(999, "x"), Err(StoreError::NotFound(999))));
    }

    #[test]
    fn audit_log_is_bounded() {
        let store = store();
        let id = add(&store, "x", 1);
        let entries: Vec<AuditEntry> = (0..120)
            .map(|i| AuditEntry::new(i, "deliver", "scheduler", serde_json::Value::Null))
            .collect();
        store.append_audit_log(id, entries).unwrap();

        let log = store.get_reminder(id).unwrap().unwrap().audit_log;
        assert_eq!(log.len(), MAX_AUDIT_ENTRIES);
        assert_eq!(log.last().map(|e| e.ts), Some(119));
        assert!(log.iter().all(|e| e.action == "deliver"));
    }

    #[test]
    fn cancel_only_succeeds_when_unsent_and_uncanceled() {
        let store = store();
        let id = add(&store, "x", 1);
        assert!(store.cancel_reminder(id).unwrap());
        assert!(!store.cancel_reminder(id).unwrap());

        let sent = add(&store, "y", 1);
        store.mark_sent(&[sent], 5, ReminderStatus::Fired).unwrap();
        assert!(!store.cancel_reminder(sent).unwrap());

        assert!(matches!(store.cancel_reminder(404), Err(StoreError::NotFound(404))));
    }

    #[test]
    fn snooze_rearms_reminder() {
        let store = store();
        let id = add(&store, "x", 1);
        store.claim_due_reminders(10).unwrap();
        store.mark_sent(&[id], 10, ReminderStatus::Fired).unwrap();

        let r = store.apply_action(id, ReminderAction::Snooze30, 1_000).unwrap().after;
        assert_eq!(r.status, ReminderStatus::Snoozed);
        assert_eq!(r.due_at, 1_000 + 30 * 60);
        assert!(r.sent_at.is_none());
        assert!(r.claimed_at.is_none());

        assert!(store.claim_due_reminders(1_000 + 30 * 60 - 1).unwrap().is_empty());
        assert_eq!(store.claim_due_reminders(1_000 + 30 * 60).unwrap().len(), 1);
    }

    #[test]
    fn delay_and_done_actions() {
        let store = store();
        let id = add(&store, "x", 1);
        let delayed = store.apply_action(id, ReminderAction::Delay2h, 50).unwrap().after;
        assert_eq!(delayed.due_at, 50 + 120 * 60);

        let applied = store.apply_action(id, ReminderAction::Done, 60).unwrap();
        assert_eq!(applied.before, delayed);
        let done = applied.after;
        assert_eq!(done.status, ReminderStatus::Acknowledged);
        assert!(done.sent_at.is_none());
        assert_eq!(done.due_at, delayed.due_at);
        assert_eq!(
            done.audit_log.last().map(|e| e.action.as_str()),
            Some("action:DONE")
        );
    }

    #[test]
    fn action_on_canceled_reminder_conflicts() {
        let store = store();
        let id = add(&store, "x", 1);
        store.cancel_reminder(id).unwrap();
        assert!(matches!(
            store.apply_action(id, ReminderAction::Done, 5),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn restore_overwrites_only_present_fields() {
        let store = store();
        let id = store
            .add_reminder(NewReminder::new("B", 100).with_priority(Priority::High))
            .unwrap();
        let patch: ReminderPatch =
            serde_json::from_value(serde_json::json!({ "text": "A", "context_ref": null }))
                .unwrap();
        let r = store.restore_reminder(id, &patch, 7).unwrap();
        assert_eq!(r.message, "A");
        assert_eq!(r.priority, Priority::High);
        assert_eq!(r.due_at, 100);
        assert!(r.context_ref.is_none());
    }

    #[test]
    fn retire_cancels_even_after_firing() {
        let store = store();
        let id = add(&store, "x", 1);
        store.mark_sent(&[id], 2, ReminderStatus::Fired).unwrap();
        let r = store.retire_reminder(id, 3).unwrap();
        assert_eq!(r.status, ReminderStatus::Canceled);
        assert_eq!(r.canceled_at, Some(3));
        assert!(store.get_reminder(id).unwrap().is_some());
    }

    #[test]
    fn file_store_persists_and_reports_version() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("nudge.db");
        let id = {
            let store = ReminderStore::open(&path).expect("open");
            add(&store, "persisted", 42)
        };
        let store = ReminderStore::open(&path).expect("reopen");
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(
            store.get_reminder(id).unwrap().map(|r| r.message),
            Some("persisted".to_owned())
        );
    }

    #[test]
    fn concurrent_claims_never_share_a_reminder() {
        let store = std::sync::Arc::new(store());
        for i in 0..40 {
            add(&store, &format!("r{i}"), 10);
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let s = std::sync::Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                s.claim_due_reminders(100)
                    .expect("claim")
                    .into_iter()
                    .map(|r| r.id)
                    .collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("join"))
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(total, 40);
        assert_eq!(all.len(), 40);
    }
}

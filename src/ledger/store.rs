//! SQLite-backed action ledger.
//!
//! Rows are append-only. The only mutation is the one-time flip of
//! `undone_at`, which happens in the same transaction that appends the
//! matching `undo` record.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{debug, info, warn};

use super::instruction::{UndoInstruction, UndoRegistry};
use super::schema::{LEDGER_COLUMNS, ensure_schema};
use super::token::{generate_token, normalize_token};
use super::types::{
    ActionReceipt, ActionRecord, EntityType, LedgerConfig, Operation, RecordParams, format_utc,
};
use crate::db::{OpenError, open_file, open_memory};

/// Attempts at drawing a token not held by another live record.
const TOKEN_ATTEMPTS: usize = 16;

/// Append-only log of state-changing operations with time-bounded undo.
pub struct ActionLedger {
    conn: Mutex<Connection>,
    config: LedgerConfig,
}

impl ActionLedger {
    /// Open (or create) the ledger at `path`. May share a file with the reminder store.
    pub fn open(path: &Path, config: LedgerConfig) -> Result<Self, LedgerError> {
        let conn = open_file(path)?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory(config: LedgerConfig) -> Result<Self, LedgerError> {
        let conn = open_memory()?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: LedgerConfig) -> Result<Self, LedgerError> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Append one action and return its receipt.
    pub fn record(&self, params: &RecordParams, now: u64) -> Result<ActionReceipt, LedgerError> {
        if params.session_id.trim().is_empty() {
            return Err(LedgerError::Invalid("session_id must not be empty".into()));
        }
        if params.entity_id.trim().is_empty() {
            return Err(LedgerError::Invalid("entity_id must not be empty".into()));
        }
        if params.operation == Operation::Undo {
            return Err(LedgerError::Invalid(
                "undo records are written by the ledger itself".into(),
            ));
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let record = insert_record(
            &tx,
            params,
            now,
            now.saturating_add(self.config.undo_window_secs),
        )?;
        tx.commit()?;

        let receipt = record.receipt();
        debug!(
            action_id = %receipt.action_id,
            session = %params.session_id,
            "recorded action: {}",
            receipt.summary
        );
        Ok(receipt)
    }

    /// Undo an action and return the instruction the caller must apply.
    ///
    /// With a `token`, targets that record in `session_id`; otherwise the most
    /// recent record of the session that is neither undone nor itself an undo.
    /// An undo at exactly `undo_expiry` still succeeds.
    pub fn undo(
        &self,
        session_id: &str,
        token: Option<&str>,
        now: u64,
    ) -> Result<UndoInstruction, LedgerError> {
        self.undo_inner(session_id, token, now, None)
    }

    /// Like [`Self::undo`], but applies the instruction through `registry`
    /// first. The record is flagged undone only if the apply succeeds.
    pub fn undo_with(
        &self,
        session_id: &str,
        token: Option<&str>,
        now: u64,
        registry: &UndoRegistry,
    ) -> Result<UndoInstruction, LedgerError> {
        self.undo_inner(session_id, token, now, Some(registry))
    }

    fn undo_inner(
        &self,
        session_id: &str,
        token: Option<&str>,
        now: u64,
        registry: Option<&UndoRegistry>,
    ) -> Result<UndoInstruction, LedgerError> {
        // No ledger transaction may be open while the applier writes through
        // its own connection to the same file.
        let conn = self.lock()?;

        let target = match locate_target(&conn, session_id, token) {
            Ok(record) => record,
            Err(e) => {
                info!(session = session_id, "undo denied: {e}");
                return Err(e);
            }
        };
        if now > target.undo_expiry {
            let err = LedgerError::Expired {
                until: format_utc(target.undo_expiry),
            };
            info!(session = session_id, action_id = %target.action_id, "undo denied: {err}");
            return Err(err);
        }

        let instruction = instruction_for(&target)?;
        if let Some(registry) = registry
            && let Err(e) = registry.apply(&instruction, now)
        {
            warn!(action_id = %target.action_id, "undo apply failed: {e}");
            return Err(e);
        }

        let tx = conn.unchecked_transaction()?;
        let undone_at = epoch_to_datetime(now).to_rfc3339();
        let flipped = tx.execute(
            "UPDATE action_ledger SET undone_at = ?1 WHERE action_id = ?2 AND undone_at IS NULL",
            params![undone_at, target.action_id],
        )?;
        if flipped == 0 {
            return Err(LedgerError::AlreadyUndone {
                action_id: target.action_id,
            });
        }

        let marker = RecordParams {
            session_id: target.session_id.clone(),
            entity_type: target.entity_type,
            entity_id: target.entity_id.clone(),
            operation: Operation::Undo,
            before: Some(target.after_snapshot.clone()),
            after: serde_json::json!({
                "undone_action_id": target.action_id,
                "instruction": instruction.to_string(),
            }),
        };
        insert_record(&tx, &marker, now, now)?;
        tx.commit()?;

        info!(
            session = session_id,
            action_id = %target.action_id,
            "undo succeeded: {instruction}"
        );
        Ok(instruction)
    }

    pub fn get_action(&self, action_id: &str) -> Result<Option<ActionRecord>, LedgerError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {LEDGER_COLUMNS} FROM action_ledger WHERE action_id = ?1"),
                params![action_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent action in a session. Undone rows are skipped unless
    /// `include_undone` is set.
    pub fn get_last_action(
        &self,
        session_id: &str,
        include_undone: bool,
    ) -> Result<Option<ActionRecord>, LedgerError> {
        let undone_filter = if include_undone {
            ""
        } else {
            " AND undone_at IS NULL"
        };
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {LEDGER_COLUMNS} FROM action_ledger \
                     WHERE session_id = ?1{undone_filter} \
                     ORDER BY timestamp DESC, rowid DESC LIMIT 1"
                ),
                params![session_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Actions with `start <= timestamp < end`, oldest first.
    pub fn get_actions_by_date(
        &self,
        session_id: &str,
        start: u64,
        end: u64,
        include_undone: bool,
    ) -> Result<Vec<ActionRecord>, LedgerError> {
        let undone_filter = if include_undone {
            ""
        } else {
            " AND undone_at IS NULL"
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LEDGER_COLUMNS} FROM action_ledger \
             WHERE session_id = ?1 AND timestamp >= ?2 AND timestamp < ?3{undone_filter} \
             ORDER BY timestamp ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![session_id, start, end], row_to_record)?;
        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Lock(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn insert_record(
    tx: &Transaction<'_>,
    params: &RecordParams,
    now: u64,
    undo_expiry: u64,
) -> Result<ActionRecord, LedgerError> {
    let record = ActionRecord {
        action_id: uuid::Uuid::new_v4().to_string(),
        session_id: params.session_id.clone(),
        timestamp: now,
        entity_type: params.entity_type,
        entity_id: params.entity_id.clone(),
        operation: params.operation,
        before_snapshot: params.before.clone(),
        after_snapshot: params.after.clone(),
        undo_expiry,
        undo_token: unused_token(tx, now)?,
        undone_at: None,
        created_at: now,
    };

    let before_json = record
        .before_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| LedgerError::Serialization(e.to_string()))?;
    let after_json = serde_json::to_string(&record.after_snapshot)
        .map_err(|e| LedgerError::Serialization(e.to_string()))?;

    tx.execute(
        "INSERT INTO action_ledger \
         (action_id, session_id, timestamp, entity_type, entity_id, operation, \
          before_snapshot, after_snapshot, undo_expiry, undo_token, undone_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11)",
        params![
            record.action_id,
            record.session_id,
            record.timestamp,
            record.entity_type.as_str(),
            record.entity_id,
            record.operation.as_str(),
            before_json,
            after_json,
            record.undo_expiry,
            record.undo_token,
            record.created_at,
        ],
    )?;
    Ok(record)
}

/// Draw a token that no live (not undone, unexpired) record holds.
fn unused_token(tx: &Transaction<'_>, now: u64) -> Result<String, LedgerError> {
    for _ in 0..TOKEN_ATTEMPTS {
        let token = generate_token();
        let taken: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM action_ledger \
                 WHERE undo_token = ?1 AND undone_at IS NULL AND undo_expiry >= ?2 LIMIT 1",
                params![token, now],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_none() {
            return Ok(token);
        }
        debug!("undo token collision, drawing again");
    }
    Err(LedgerError::Invalid(
        "could not allocate a unique undo token".into(),
    ))
}

fn locate_target(
    conn: &Connection,
    session_id: &str,
    token: Option<&str>,
) -> Result<ActionRecord, LedgerError> {
    match token {
        Some(raw) => {
            let token = normalize_token(raw);
            // Prefer a live record; fall back to an undone one to report it.
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {LEDGER_COLUMNS} FROM action_ledger \
                         WHERE session_id = ?1 AND undo_token = ?2 AND operation != 'undo' \
                         ORDER BY undone_at IS NOT NULL, timestamp DESC, rowid DESC LIMIT 1"
                    ),
                    params![session_id, token],
                    row_to_record,
                )
                .optional()?;
            match record {
                None => Err(LedgerError::NotFound {
                    token: raw.trim().to_owned(),
                }),
                Some(r) if r.is_undone() => Err(LedgerError::AlreadyUndone {
                    action_id: r.action_id,
                }),
                Some(r) => Ok(r),
            }
        }
        None => conn
            .query_row(
                &format!(
                    "SELECT {LEDGER_COLUMNS} FROM action_ledger \
                     WHERE session_id = ?1 AND undone_at IS NULL AND operation != 'undo' \
                     ORDER BY timestamp DESC, rowid DESC LIMIT 1"
                ),
                params![session_id],
                row_to_record,
            )
            .optional()?
            .ok_or(LedgerError::NothingToUndo),
    }
}

fn instruction_for(record: &ActionRecord) -> Result<UndoInstruction, LedgerError> {
    match record.operation {
        Operation::Create => Ok(UndoInstruction::Delete {
            entity_type: record.entity_type,
            entity_id: record.entity_id.clone(),
        }),
        Operation::Update | Operation::Delete => {
            let snapshot =
                record
                    .before_snapshot
                    .clone()
                    .ok_or_else(|| LedgerError::MissingSnapshot {
                        action_id: record.action_id.clone(),
                    })?;
            Ok(UndoInstruction::Restore {
                entity_type: record.entity_type,
                entity_id: record.entity_id.clone(),
                snapshot,
            })
        }
        Operation::Undo => Err(LedgerError::NothingToUndo),
    }
}

fn epoch_to_datetime(epoch_secs: u64) -> DateTime<Utc> {
    i64::try_from(epoch_secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Ledger errors. Undo denials render as user-facing sentences.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("No undoable action found with token '{token}'.")]
    NotFound { token: String },

    #[error("No recent action to undo.")]
    NothingToUndo,

    #[error("Action {action_id} was already undone.")]
    AlreadyUndone { action_id: String },

    #[error("Undo expired (was valid until {until}).")]
    Expired { until: String },

    #[error("Action {action_id} has no snapshot to restore.")]
    MissingSnapshot { action_id: String },

    #[error("No undo handler registered for {entity_type}.")]
    NoHandler { entity_type: EntityType },

    #[error("Undo could not be applied: {0}")]
    Apply(String),

    #[error("invalid ledger input: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<OpenError> for LedgerError {
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

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionRecord> {
    let entity_str: String = row.get(3)?;
    let op_str: String = row.get(5)?;
    let before_json: Option<String> = row.get(6)?;
    let after_json: String = row.get(7)?;
    let undone_str: Option<String> = row.get(10)?;

    Ok(ActionRecord {
        action_id: row.get(0)?,
        session_id: row.get(1)?,
        timestamp: row.get(2)?,
        entity_type: entity_str.parse().map_err(|e: LedgerError| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        entity_id: row.get(4)?,
        operation: op_str.parse().map_err(|e: LedgerError| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        before_snapshot: before_json.and_then(|s| serde_json::from_str(&s).ok()),
        after_snapshot: serde_json::from_str(&after_json).unwrap_or(serde_json::Value::Null),
        undo_expiry: row.get(8)?,
        undo_token: row.get(9)?,
        undone_at: undone_str.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }),
        created_at: row.get(11)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

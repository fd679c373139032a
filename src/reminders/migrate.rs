//! Versioned, idempotent schema migrations for the reminder store.
//!
//! Runs once when the store opens. Each step executes in its own transaction
//! and bumps `reminders_schema_version` on commit, so a crash mid-way resumes
//! at the failed step on the next open.

use rusqlite::{Connection, params};
use tracing::info;

use super::schema::{ADD_CLAIMED_AT_SQL, PENDING_INDEX_SQL, REMINDERS_V1_SQL, SCHEMA_KEY};
use super::types::parse_stored_channels;
use crate::db::{has_column, read_version, write_version};

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    name: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create reminders table",
        apply: create_reminders,
    },
    Migration {
        version: 2,
        name: "claim column and channel list normalization",
        apply: claim_and_channels,
    },
];

/// Summary of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
}

/// Bring the reminder tables up to [`CURRENT_SCHEMA_VERSION`].
pub(crate) fn run_migrations(conn: &Connection) -> rusqlite::Result<MigrationReport> {
    let from_version = read_version(conn, SCHEMA_KEY)?;
    let mut applied = Vec::new();

    for step in MIGRATIONS.iter().filter(|m| m.version > from_version) {
        let tx = conn.unchecked_transaction()?;
        (step.apply)(&tx)?;
        write_version(&tx, SCHEMA_KEY, step.version)?;
        tx.commit()?;
        info!(version = step.version, "applied reminder migration: {}", step.name);
        applied.push(step.version);
    }

    Ok(MigrationReport {
        from_version,
        to_version: read_version(conn, SCHEMA_KEY)?,
        applied,
    })
}

fn create_reminders(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(REMINDERS_V1_SQL)
}

fn claim_and_channels(conn: &Connection) -> rusqlite::Result<()> {
    if !has_column(conn, "reminders", "claimed_at")? {
        conn.execute(ADD_CLAIMED_AT_SQL, [])?;
    }
    conn.execute(PENDING_INDEX_SQL, [])?;
    rewrite_legacy_channels(conn)?;
    Ok(())
}

/// Rewrite every `channels` value into the canonical JSON list.
///
/// Returns the number of rows changed.
pub(crate) fn rewrite_legacy_channels(conn: &Connection) -> rusqlite::Result<usize> {
    let rows: Vec<(i64, String)> = {
        let mut stmt = conn.prepare("SELECT id, channels FROM reminders")?;
        let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        mapped.collect::<rusqlite::Result<_>>()?
    };

    let mut changed = 0;
    for (id, raw) in rows {
        let canonical = parse_stored_channels(&raw);
        let json = serde_json::to_string(&canonical)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        if json != raw {
            conn.execute(
                "UPDATE reminders SET channels = ?1 WHERE id = ?2",
                params![json, id],
            )?;
            changed += 1;
        }
    }
    Ok(changed)
}

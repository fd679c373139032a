//! SQLite DDL for the action ledger.

use rusqlite::Connection;
use tracing::info;

use crate::db::{read_version, write_version};

pub(crate) const LEDGER_SCHEMA_KEY: &str = "ledger_schema_version";

pub(crate) const LEDGER_SCHEMA_VERSION: u32 = 1;

const LEDGER_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS action_ledger (
    action_id       TEXT PRIMARY KEY,
    session_id      TEXT NOT NULL,
    timestamp       INTEGER NOT NULL,
    entity_type     TEXT NOT NULL,
    entity_id       TEXT NOT NULL,
    operation       TEXT NOT NULL,
    before_snapshot TEXT,
    after_snapshot  TEXT NOT NULL,
    undo_expiry     INTEGER NOT NULL,
    undo_token      TEXT NOT NULL,
    undone_at       TEXT,
    created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_session_ts ON action_ledger(session_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_ledger_token      ON action_ledger(undo_token);
"#;

/// Column list shared by every ledger SELECT.
pub(crate) const LEDGER_COLUMNS: &str = "action_id, session_id, timestamp, entity_type, \
     entity_id, operation, before_snapshot, after_snapshot, undo_expiry, undo_token, undone_at, \
     created_at";

/// Create the ledger tables if this database has never held them.
pub(crate) fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    let version = read_version(conn, LEDGER_SCHEMA_KEY)?;
    if version >= LEDGER_SCHEMA_VERSION {
        return Ok(());
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(LEDGER_V1_SQL)?;
    write_version(&tx, LEDGER_SCHEMA_KEY, LEDGER_SCHEMA_VERSION)?;
    tx.commit()?;
    info!(version = LEDGER_SCHEMA_VERSION, "action ledger schema created");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::db::open_memory;

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = open_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(
            read_version(&conn, LEDGER_SCHEMA_KEY).unwrap(),
            LEDGER_SCHEMA_VERSION
        );
        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' \
                 AND tbl_name = 'action_ledger' AND name LIKE 'idx_ledger_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 2);
    }
}

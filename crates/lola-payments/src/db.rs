use rusqlite::Connection;

use crate::error::Result;

/// Initialise the subscribers table.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS subscribers (
            email      TEXT PRIMARY KEY,
            plan       TEXT NOT NULL DEFAULT '',
            status     TEXT NOT NULL DEFAULT '',
            mp_id      TEXT NOT NULL DEFAULT '',
            phone      TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscribers_updated
            ON subscribers(updated_at DESC);",
    )?;
    Ok(())
}

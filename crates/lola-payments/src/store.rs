use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::Result;

/// Phone numbers are matched on this many trailing digits, so local and
/// international spellings of the same number agree.
const PHONE_MATCH_DIGITS: usize = 8;

/// One subscription as last reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    pub plan: String,
    pub status: String,
    pub mp_id: String,
    pub phone: String,
    /// RFC3339 timestamp of the last upsert.
    pub updated_at: String,
}

/// SQLite-backed table of subscribers, keyed by payer email.
pub struct SubscriberStore {
    db: Mutex<Connection>,
}

impl SubscriberStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            // Best effort: the open below reports the real error.
            let _ = std::fs::create_dir_all(parent);
        }
        Self::new(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Insert or replace the row for `sub.email`.
    #[instrument(skip(self, sub), fields(email = %sub.email, plan = %sub.plan, status = %sub.status))]
    pub fn upsert(&self, sub: &Subscriber) -> Result<()> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        db.execute(
            "INSERT INTO subscribers (email, plan, status, mp_id, phone, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(email) DO UPDATE SET
                plan = excluded.plan,
                status = excluded.status,
                mp_id = excluded.mp_id,
                phone = excluded.phone,
                updated_at = excluded.updated_at",
            rusqlite::params![sub.email, sub.plan, sub.status, sub.mp_id, sub.phone, sub.updated_at],
        )?;
        debug!("subscriber upserted");
        Ok(())
    }

    /// All subscribers, most recently updated first.
    pub fn list(&self) -> Result<Vec<Subscriber>> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = db.prepare(
            "SELECT email, plan, status, mp_id, phone, updated_at
             FROM subscribers
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_subscriber)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = db.prepare(
            "SELECT email, plan, status, mp_id, phone, updated_at
             FROM subscribers
             WHERE email = ?1",
        )?;
        let mut rows = stmt.query_map([email.trim()], row_to_subscriber)?;
        let found = rows.next().transpose()?;
        Ok(found)
    }

    /// Set the status of every row carrying preapproval `mp_id`.
    /// Returns the number of rows changed.
    #[instrument(skip(self))]
    pub fn set_status(&self, mp_id: &str, status: &str, updated_at: &str) -> Result<usize> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = db.execute(
            "UPDATE subscribers SET status = ?2, updated_at = ?3 WHERE mp_id = ?1",
            rusqlite::params![mp_id, status, updated_at],
        )?;
        debug!(changed, "subscriber status set");
        Ok(changed)
    }

    /// Most recently updated subscriber whose phone ends with the last
    /// eight digits of `phone`.
    #[instrument(skip(self))]
    pub fn find_by_phone(&self, phone: &str) -> Result<Option<Subscriber>> {
        let suffix = phone_suffix(phone);
        if suffix.is_empty() {
            return Ok(None);
        }
        Ok(self
            .list()?
            .into_iter()
            .find(|s| !s.phone.is_empty() && s.phone.ends_with(suffix)))
    }

    pub fn count(&self) -> Result<usize> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let n: i64 = db.query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn phone_suffix(phone: &str) -> &str {
    let phone = phone.trim();
    let start = phone
        .char_indices()
        .rev()
        .nth(PHONE_MATCH_DIGITS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &phone[start..]
}

fn row_to_subscriber(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscriber> {
    Ok(Subscriber {
        email: row.get(0)?,
        plan: row.get(1)?,
        status: row.get(2)?,
        mp_id: row.get(3)?,
        phone: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

use std::path::Path;

use capsule_core::{Capsule, CapsuleStatus, Owner};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, Row};
use tracing::info;

use crate::error::Result;

/// Column list shared by every capsule SELECT; `row_to_capsule` depends on
/// this order.
pub(crate) const CAPSULE_COLUMNS: &str = "id, user_id, title, message, due_at, delivery_method, \
     status, category, mood, image_url, sent_at, created_at, updated_at";

pub(crate) const OWNER_COLUMNS: &str = "id, name, email, timezone, created_at, updated_at";

/// Open (or create) the database file and apply connection pragmas.
pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    info!(path = %path.display(), "opening SQLite database");
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    init_db(&conn)?;
    Ok(conn)
}

/// In-memory database with the full schema. Used by tests and dry runs.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    init_db(&conn)?;
    Ok(conn)
}

/// Create the `users` and `capsules` tables. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL,
            email       TEXT    NOT NULL UNIQUE,
            timezone    TEXT    NOT NULL DEFAULT 'UTC',
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS capsules (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id          INTEGER NOT NULL REFERENCES users(id),
            title            TEXT    NOT NULL,
            message          TEXT    NOT NULL,
            due_at           TEXT    NOT NULL,
            delivery_method  TEXT    NOT NULL,
            status           TEXT    NOT NULL DEFAULT 'pending'
                             CHECK (status IN ('pending', 'sent', 'canceled')),
            category         TEXT,
            mood             TEXT,
            image_url        TEXT,
            sent_at          TEXT,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL,
            CHECK ((status = 'sent') = (sent_at IS NOT NULL))
        );

        -- Due-today scan: WHERE status = 'pending' AND due_at in [start, end)
        CREATE INDEX IF NOT EXISTS idx_capsules_status_due ON capsules (status, due_at);
        CREATE INDEX IF NOT EXISTS idx_capsules_user ON capsules (user_id);
        ",
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 so string order equals time order in SQL comparisons.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(idx, &row.get::<_, String>(idx)?)
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_ts(idx, &raw))
        .transpose()
}

/// Map a row selected with [`CAPSULE_COLUMNS`] to a Capsule.
pub(crate) fn row_to_capsule(row: &Row<'_>) -> rusqlite::Result<Capsule> {
    let status_raw: String = row.get(6)?;
    let sent_at = get_opt_ts(row, 10)?;
    let status = CapsuleStatus::from_columns(&status_raw, sent_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?;
    Ok(Capsule {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        due_at: get_ts(row, 4)?,
        delivery_method: row.get(5)?,
        status,
        category: row.get(7)?,
        mood: row.get(8)?,
        image_url: row.get(9)?,
        created_at: get_ts(row, 11)?,
        updated_at: get_ts(row, 12)?,
    })
}

/// Map a row selected with [`OWNER_COLUMNS`] to an Owner.
pub(crate) fn row_to_owner(row: &Row<'_>) -> rusqlite::Result<Owner> {
    Ok(Owner {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        timezone: row.get(3)?,
        created_at: get_ts(row, 4)?,
        updated_at: get_ts(row, 5)?,
    })
}

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use capsule_core::{Capsule, CapsuleEvent, CapsuleId, CapsuleStatus, Clock, Owner, OwnerId};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::db::{fmt_ts, row_to_capsule, row_to_owner, CAPSULE_COLUMNS, OWNER_COLUMNS};
use crate::error::{Result, StoreError};

/// What the delivery cycle needs from persistence.
///
/// Each call is an independent unit of work; nothing is held open between
/// calls, so a slow cycle never blocks other users of the database.
#[async_trait]
pub trait CapsuleStore: Send + Sync {
    /// Pending capsules whose `due_at` falls on the current calendar day in
    /// the store timezone, oldest-created first. Empty when none are due.
    async fn find_due_today(&self) -> Result<Vec<Capsule>>;

    /// Transition a pending capsule to `sent`, stamping `sent_at = now`.
    ///
    /// Requires the row to still be pending: a second call for the same id
    /// returns [`StoreError::NotFound`] and leaves the first `sent_at` intact.
    async fn mark_sent(&self, id: CapsuleId) -> Result<()>;

    async fn get_owner(&self, owner_id: OwnerId) -> Result<Owner>;
}

/// SQLite-backed store.
///
/// Cloning is cheap and shares the connection, so the CRUD path and the
/// scheduler can hold their own handle.
#[derive(Clone)]
pub struct SqliteCapsuleStore {
    conn: Arc<Mutex<Connection>>,
    tz: Tz,
    clock: Arc<dyn Clock>,
}

impl SqliteCapsuleStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection, tz: Tz, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            tz,
            clock,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn today(&self) -> NaiveDate {
        self.clock.today_in(self.tz)
    }

    /// First instant of `day` in the store timezone, as UTC.
    pub(crate) fn start_of_day(&self, day: NaiveDate) -> Result<DateTime<Utc>> {
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| StoreError::Validation(format!("invalid date {day}")))?;
        // A DST jump at midnight can make 00:00 nonexistent; the day then
        // starts at the first valid local instant, which is an hour later.
        let local = match self.tz.from_local_datetime(&midnight) {
            chrono::LocalResult::Single(t) => t,
            chrono::LocalResult::Ambiguous(earliest, _) => earliest,
            chrono::LocalResult::None => self
                .tz
                .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                .earliest()
                .ok_or_else(|| StoreError::Validation(format!("no local midnight on {day}")))?,
        };
        Ok(local.with_timezone(&Utc))
    }

    /// Half-open UTC window `[start, end)` covering `day` in the store timezone.
    pub(crate) fn day_window(&self, day: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let next = day
            .succ_opt()
            .ok_or_else(|| StoreError::Validation(format!("no day after {day}")))?;
        Ok((self.start_of_day(day)?, self.start_of_day(next)?))
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// The lock is held for the duration of `f` only.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Pending capsules due on an arbitrary calendar day. `find_due_today`
    /// is this with the clock's current day.
    #[instrument(skip(self))]
    pub async fn find_due_on(&self, day: NaiveDate) -> Result<Vec<Capsule>> {
        let (start, end) = self.day_window(day)?;
        let (start, end) = (fmt_ts(start), fmt_ts(end));
        let capsules = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {CAPSULE_COLUMNS} FROM capsules
                     WHERE status = 'pending' AND due_at >= ?1 AND due_at < ?2
                     ORDER BY created_at ASC, id ASC"
                ))?;
                let due = stmt
                    .query_map(rusqlite::params![start, end], row_to_capsule)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(StoreError::from_row)?;
                Ok(due)
            })
            .await?;
        debug!(count = capsules.len(), "due capsules loaded");
        Ok(capsules)
    }
}

#[async_trait]
impl CapsuleStore for SqliteCapsuleStore {
    async fn find_due_today(&self) -> Result<Vec<Capsule>> {
        self.find_due_on(self.today()).await
    }

    #[instrument(skip(self))]
    async fn mark_sent(&self, id: CapsuleId) -> Result<()> {
        let now = self.now();
        // The WHERE clause enforces the pending precondition in SQL.
        let sent = CapsuleStatus::Pending
            .apply(CapsuleEvent::Deliver { at: now })
            .map_err(StoreError::Validation)?;
        let now_str = fmt_ts(now);
        let changed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE capsules SET status = ?1, sent_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND status = 'pending'",
                    rusqlite::params![sent.as_str(), now_str, id],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "pending capsule",
                id,
            });
        }
        debug!(capsule_id = id, "capsule marked sent");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_owner(&self, owner_id: OwnerId) -> Result<Owner> {
        self.with_conn(move |conn| {
            match conn.query_row(
                &format!("SELECT {OWNER_COLUMNS} FROM users WHERE id = ?1"),
                [owner_id],
                row_to_owner,
            ) {
                Ok(owner) => Ok(owner),
                Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                    entity: "owner",
                    id: owner_id,
                }),
                Err(e) => Err(StoreError::from_row(e)),
            }
        })
        .await
    }
}

//! User-facing capsule CRUD. Every write here respects the lifecycle rules the
//! delivery cycle relies on: new capsules start `pending`, and only `pending`
//! capsules can be edited or canceled.

use capsule_core::{Capsule, CapsuleEvent, CapsuleId, CapsuleStatus, OwnerId};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::db::{fmt_ts, row_to_capsule, CAPSULE_COLUMNS};
use crate::error::{Result, StoreError};
use crate::store::{CapsuleStore, SqliteCapsuleStore};

/// A capsule due on the current day is pushed this far past "now" so it is
/// still strictly in the future when stored.
const SAME_DAY_OFFSET_MINUTES: i64 = 10;

/// Input for [`SqliteCapsuleStore::create_capsule`], as it arrives from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCapsule {
    pub title: String,
    pub message: String,
    /// `YYYY-MM-DD`, interpreted in the store timezone.
    pub due_date: String,
    pub delivery_method: String,
    pub category: Option<String>,
    pub mood: Option<String>,
    pub image_url: Option<String>,
}

/// Partial update; `None` (or an empty string) keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCapsule {
    pub title: Option<String>,
    pub message: Option<String>,
    pub due_date: Option<String>,
    pub delivery_method: Option<String>,
    pub category: Option<String>,
    pub mood: Option<String>,
}

/// A fully resolved row, inserted as-is with status `pending`.
#[derive(Debug, Clone)]
pub struct NewCapsule {
    pub owner_id: OwnerId,
    pub title: String,
    pub message: String,
    pub due_at: DateTime<Utc>,
    pub delivery_method: String,
    pub category: Option<String>,
    pub mood: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Empty and whitespace-only strings mean "absent".
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn fetch_capsule(conn: &Connection, id: CapsuleId, owner_id: OwnerId) -> Result<Capsule> {
    conn.query_row(
        &format!("SELECT {CAPSULE_COLUMNS} FROM capsules WHERE id = ?1 AND user_id = ?2"),
        rusqlite::params![id, owner_id],
        row_to_capsule,
    )
    .optional()
    .map_err(StoreError::from_row)?
    .ok_or(StoreError::NotFound {
        entity: "capsule",
        id,
    })
}

fn invalid_state(capsule: &Capsule) -> StoreError {
    StoreError::InvalidState {
        id: capsule.id,
        status: capsule.status.to_string(),
    }
}

impl SqliteCapsuleStore {
    /// Turn a `YYYY-MM-DD` string into the instant the capsule becomes due.
    ///
    /// Today's date maps to `now + 10 minutes`; any other date maps to the
    /// start of that day and must lie in the future.
    pub fn resolve_due_date(&self, raw: &str) -> Result<DateTime<Utc>> {
        let day = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
            StoreError::Validation("invalid due date format, use YYYY-MM-DD".to_string())
        })?;
        let now = self.now();
        if day == self.today() {
            return Ok(now + Duration::minutes(SAME_DAY_OFFSET_MINUTES));
        }
        let due_at = self.start_of_day(day)?;
        if due_at <= now {
            return Err(StoreError::Validation(
                "due date must be in the future".to_string(),
            ));
        }
        Ok(due_at)
    }

    /// Persist a pre-validated capsule and return the stored row.
    #[instrument(skip(self, capsule), fields(owner_id = capsule.owner_id))]
    pub async fn insert_capsule(&self, capsule: NewCapsule) -> Result<Capsule> {
        self.with_conn(move |conn| {
            let created = fmt_ts(capsule.created_at);
            conn.execute(
                "INSERT INTO capsules
                 (user_id, title, message, due_at, delivery_method, status,
                  category, mood, image_url, sent_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)",
                rusqlite::params![
                    capsule.owner_id,
                    capsule.title,
                    capsule.message,
                    fmt_ts(capsule.due_at),
                    capsule.delivery_method,
                    CapsuleStatus::Pending.as_str(),
                    capsule.category,
                    capsule.mood,
                    capsule.image_url,
                    created,
                ],
            )?;
            fetch_capsule(conn, conn.last_insert_rowid(), capsule.owner_id)
        })
        .await
    }

    /// Validate `input` and create a pending capsule for `owner_id`.
    pub async fn create_capsule(&self, owner_id: OwnerId, input: CreateCapsule) -> Result<Capsule> {
        required("title", &input.title)?;
        required("message", &input.message)?;
        required("delivery_method", &input.delivery_method)?;
        let due_at = self.resolve_due_date(&input.due_date)?;
        // Surfaces a missing owner as NotFound instead of a foreign-key error.
        self.get_owner(owner_id).await?;

        let capsule = self
            .insert_capsule(NewCapsule {
                owner_id,
                title: input.title,
                message: input.message,
                due_at,
                delivery_method: input.delivery_method,
                category: present(input.category),
                mood: present(input.mood),
                image_url: present(input.image_url),
                created_at: self.now(),
            })
            .await?;
        info!(capsule_id = capsule.id, owner_id, due_at = %capsule.due_at, "capsule created");
        Ok(capsule)
    }

    pub async fn get_capsule(&self, id: CapsuleId, owner_id: OwnerId) -> Result<Capsule> {
        self.with_conn(move |conn| fetch_capsule(conn, id, owner_id))
            .await
    }

    /// All capsules of an owner regardless of status, soonest due first.
    pub async fn list_capsules(&self, owner_id: OwnerId) -> Result<Vec<Capsule>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {CAPSULE_COLUMNS} FROM capsules WHERE user_id = ?1 ORDER BY due_at ASC, id ASC"
            ))?;
            let capsules = stmt
                .query_map([owner_id], row_to_capsule)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from_row)?;
            Ok(capsules)
        })
        .await
    }

    /// Apply a partial update to a pending capsule.
    #[instrument(skip(self, input))]
    pub async fn update_capsule(
        &self,
        id: CapsuleId,
        owner_id: OwnerId,
        input: UpdateCapsule,
    ) -> Result<Capsule> {
        let mut capsule = self.get_capsule(id, owner_id).await?;
        capsule.status = capsule
            .status
            .apply(CapsuleEvent::Edit)
            .map_err(|_| invalid_state(&capsule))?;

        if let Some(title) = present(input.title) {
            capsule.title = title;
        }
        if let Some(message) = present(input.message) {
            capsule.message = message;
        }
        if let Some(method) = present(input.delivery_method) {
            capsule.delivery_method = method;
        }
        if let Some(raw) = present(input.due_date) {
            capsule.due_at = self.resolve_due_date(&raw)?;
        }
        if let Some(category) = present(input.category) {
            capsule.category = Some(category);
        }
        if let Some(mood) = present(input.mood) {
            capsule.mood = Some(mood);
        }

        let now = fmt_ts(self.now());
        let updated = self
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE capsules
                     SET title = ?1, message = ?2, due_at = ?3, delivery_method = ?4,
                         category = ?5, mood = ?6, updated_at = ?7
                     WHERE id = ?8 AND user_id = ?9 AND status = 'pending'",
                    rusqlite::params![
                        capsule.title,
                        capsule.message,
                        fmt_ts(capsule.due_at),
                        capsule.delivery_method,
                        capsule.category,
                        capsule.mood,
                        now,
                        capsule.id,
                        capsule.owner_id,
                    ],
                )?;
                // Delivered or canceled between the read and the write.
                if changed == 0 {
                    let current = fetch_capsule(conn, capsule.id, capsule.owner_id)?;
                    return Err(invalid_state(&current));
                }
                fetch_capsule(conn, capsule.id, capsule.owner_id)
            })
            .await?;
        info!(capsule_id = id, owner_id, "capsule updated");
        Ok(updated)
    }

    /// Soft-delete a pending capsule. The row is kept with status `canceled`.
    #[instrument(skip(self))]
    pub async fn cancel_capsule(&self, id: CapsuleId, owner_id: OwnerId) -> Result<()> {
        let capsule = self.get_capsule(id, owner_id).await?;
        let canceled = capsule
            .status
            .apply(CapsuleEvent::Cancel)
            .map_err(|_| invalid_state(&capsule))?;
        let now = fmt_ts(self.now());
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE capsules SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND user_id = ?4 AND status = 'pending'",
                rusqlite::params![canceled.as_str(), now, id, owner_id],
            )?;
            if changed == 0 {
                let current = fetch_capsule(conn, id, owner_id)?;
                return Err(invalid_state(&current));
            }
            Ok(())
        })
        .await?;
        info!(capsule_id = id, owner_id, "capsule canceled");
        Ok(())
    }
}

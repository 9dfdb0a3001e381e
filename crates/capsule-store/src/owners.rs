use capsule_core::{Owner, DEFAULT_TIMEZONE};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{fmt_ts, row_to_owner, OWNER_COLUMNS};
use crate::error::{Result, StoreError};
use crate::store::SqliteCapsuleStore;

/// Registration input for a capsule owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOwner {
    pub name: String,
    pub email: String,
    /// IANA zone; empty means UTC.
    pub timezone: String,
}

impl SqliteCapsuleStore {
    pub async fn create_owner(&self, input: NewOwner) -> Result<Owner> {
        if input.name.trim().is_empty() {
            return Err(StoreError::Validation("name is required".to_string()));
        }
        let email = input.email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(StoreError::Validation(format!(
                "invalid email address {email:?}"
            )));
        }
        let timezone = match input.timezone.trim() {
            "" => DEFAULT_TIMEZONE.to_string(),
            tz => tz.to_string(),
        };
        let name = input.name.trim().to_string();
        let now = fmt_ts(self.now());

        let owner = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO users (name, email, timezone, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    rusqlite::params![name, email, timezone, now],
                )?;
                let id = conn.last_insert_rowid();
                Ok(conn.query_row(
                    &format!("SELECT {OWNER_COLUMNS} FROM users WHERE id = ?1"),
                    [id],
                    row_to_owner,
                )?)
            })
            .await?;
        info!(owner_id = owner.id, email = %owner.email, "owner created");
        Ok(owner)
    }
}

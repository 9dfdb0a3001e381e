//! `capsule-store` — SQLite persistence for capsules and their owners.
//!
//! The delivery cycle only sees the narrow [`CapsuleStore`] trait
//! (due-today lookup, owner lookup, mark-sent). The CRUD operations used by
//! user-facing callers live on [`SqliteCapsuleStore`] and enforce the same
//! lifecycle rules: only `pending` capsules may be edited or canceled.

pub mod capsules;
pub mod db;
pub mod error;
pub mod owners;
pub mod store;

pub use capsules::{CreateCapsule, NewCapsule, UpdateCapsule};
pub use error::{Result, StoreError};
pub use owners::NewOwner;
pub use store::{CapsuleStore, SqliteCapsuleStore};

//! `capsule-core` — domain types and configuration shared by every capsule crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{resolve_timezone, Clock, FixedClock, SystemClock};
pub use config::{CapsuleConfig, DEFAULT_TIMEZONE};
pub use error::{CoreError, Result};
pub use types::{Capsule, CapsuleEvent, CapsuleId, CapsuleStatus, Owner, OwnerId};

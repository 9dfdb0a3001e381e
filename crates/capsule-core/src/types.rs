use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type CapsuleId = i64;
pub type OwnerId = i64;

/// Lifecycle state of a capsule.
///
/// `Sent` carries the delivery instant, so a sent capsule always has a
/// `sent_at` and a pending or canceled one never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStatus {
    /// Waiting for its due date. The only editable state.
    Pending,
    /// Delivered by the scheduler at `at`. Terminal.
    Sent { at: DateTime<Utc> },
    /// Soft-deleted by its owner. Terminal.
    Canceled,
}

/// Something that wants to move a capsule to another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleEvent {
    /// Owner edits title/message/due date.
    Edit,
    /// Owner deletes the capsule.
    Cancel,
    /// The delivery cycle confirmed a transport send.
    Deliver { at: DateTime<Utc> },
}

impl CapsuleStatus {
    /// Column value stored in `capsules.status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleStatus::Pending => "pending",
            CapsuleStatus::Sent { .. } => "sent",
            CapsuleStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            CapsuleStatus::Pending => false,
            CapsuleStatus::Sent { .. } | CapsuleStatus::Canceled => true,
        }
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CapsuleStatus::Sent { at } => Some(*at),
            CapsuleStatus::Pending | CapsuleStatus::Canceled => None,
        }
    }

    /// Apply `event`, returning the resulting status.
    ///
    /// Every event is only legal while `Pending`; `sent` and `canceled` are
    /// terminal and reject everything.
    pub fn apply(self, event: CapsuleEvent) -> std::result::Result<CapsuleStatus, String> {
        match (self, event) {
            (CapsuleStatus::Pending, CapsuleEvent::Edit) => Ok(CapsuleStatus::Pending),
            (CapsuleStatus::Pending, CapsuleEvent::Cancel) => Ok(CapsuleStatus::Canceled),
            (CapsuleStatus::Pending, CapsuleEvent::Deliver { at }) => Ok(CapsuleStatus::Sent { at }),
            (status @ (CapsuleStatus::Sent { .. } | CapsuleStatus::Canceled), event) => Err(format!(
                "cannot apply {event:?} to a {} capsule",
                status.as_str()
            )),
        }
    }

    /// Rebuild a status from its two storage columns.
    ///
    /// Fails when the pair breaks the `sent_at` invariant or the label is unknown.
    pub fn from_columns(
        status: &str,
        sent_at: Option<DateTime<Utc>>,
    ) -> std::result::Result<Self, String> {
        match (status, sent_at) {
            ("pending", None) => Ok(CapsuleStatus::Pending),
            ("canceled", None) => Ok(CapsuleStatus::Canceled),
            ("sent", Some(at)) => Ok(CapsuleStatus::Sent { at }),
            ("sent", None) => Err("status 'sent' without sent_at".to_string()),
            ("pending" | "canceled", Some(_)) => {
                Err(format!("status '{status}' must not carry sent_at"))
            }
            (other, _) => Err(format!("unknown capsule status: {other}")),
        }
    }
}

impl std::fmt::Display for CapsuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message stored for future delivery to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capsule {
    pub id: CapsuleId,
    pub owner_id: OwnerId,
    pub title: String,
    pub message: String,
    pub due_at: DateTime<Utc>,
    /// Informational only; every capsule goes through the same transport.
    pub delivery_method: String,
    pub status: CapsuleStatus,
    pub category: Option<String>,
    pub mood: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Capsule {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.status.sent_at()
    }

    pub fn is_pending(&self) -> bool {
        self.status == CapsuleStatus::Pending
    }
}

/// The user a capsule belongs to and is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    pub name: String,
    /// Delivery address.
    pub email: String,
    /// Advisory only: "due today" is evaluated in the scheduler timezone.
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

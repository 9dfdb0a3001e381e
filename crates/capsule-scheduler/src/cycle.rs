use std::sync::Arc;
use std::time::Duration;

use capsule_core::Capsule;
use capsule_mail::{compose, Transport, TransportError};
use capsule_store::{CapsuleStore, StoreError};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What started a cycle. Logged with every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Timer,
    Manual,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Timer => f.write_str("timer"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every due capsule was attempted.
    Completed,
    /// The due-today query returned nothing.
    NothingDue,
    /// The due-today query failed; nothing was attempted.
    FetchFailed,
    /// The cycle deadline elapsed; remaining capsules stay pending.
    DeadlineExceeded,
}

/// Per-cycle tally. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub trigger: Trigger,
    pub due: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Due capsules not resolved before the deadline (including one cut off mid-send).
    ///
    /// Not a guarantee that they are still pending: a `mark_sent` write already
    /// handed to the blocking pool commits even after the deadline drops it, so
    /// the capsule cut off last may end up `sent`.
    pub abandoned: usize,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(trigger: Trigger) -> Self {
        Self {
            cycle_id: Uuid::now_v7(),
            trigger,
            due: 0,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            abandoned: 0,
            outcome: CycleOutcome::Completed,
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Why a single capsule was not delivered this cycle.
#[derive(Debug, Error)]
enum DeliveryFailure {
    #[error("owner lookup failed: {0}")]
    Owner(#[source] StoreError),

    #[error("transport failed: {0}")]
    Transport(#[source] TransportError),
}

/// One pass over today's due capsules.
///
/// Dependencies are injected at construction; the cycle holds no state
/// between runs.
pub struct DeliveryCycle {
    store: Arc<dyn CapsuleStore>,
    transport: Arc<dyn Transport>,
    from_address: String,
    deadline: Duration,
    timezone: Tz,
}

impl DeliveryCycle {
    pub fn new(
        store: Arc<dyn CapsuleStore>,
        transport: Arc<dyn Transport>,
        from_address: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            from_address: from_address.into(),
            deadline,
            timezone: Tz::UTC,
        }
    }

    /// Timezone used for dates shown in delivered emails. Defaults to UTC.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run one cycle to completion or until the deadline. Never fails: every
    /// problem is logged and reflected in the returned report.
    pub async fn run(&self, trigger: Trigger) -> CycleReport {
        let mut report = CycleReport::new(trigger);
        info!(cycle_id = %report.cycle_id, %trigger, "delivery cycle started");

        let finished = tokio::time::timeout(self.deadline, self.process(&mut report)).await;
        if finished.is_err() {
            report.outcome = CycleOutcome::DeadlineExceeded;
            report.abandoned = report.due.saturating_sub(report.processed());
            error!(
                cycle_id = %report.cycle_id,
                deadline_secs = self.deadline.as_secs(),
                processed = report.processed(),
                abandoned = report.abandoned,
                "delivery cycle deadline exceeded, remaining capsules left pending"
            );
        }

        info!(
            cycle_id = %report.cycle_id,
            succeeded = report.succeeded,
            failed = report.failed,
            total = report.attempted,
            "delivery cycle finished"
        );
        report
    }

    async fn process(&self, report: &mut CycleReport) {
        let due = match self.store.find_due_today().await {
            Ok(due) => due,
            Err(e) => {
                error!(cycle_id = %report.cycle_id, error = %e, "failed to fetch due capsules");
                report.outcome = CycleOutcome::FetchFailed;
                return;
            }
        };

        report.due = due.len();
        if due.is_empty() {
            info!(cycle_id = %report.cycle_id, "no capsules due");
            report.outcome = CycleOutcome::NothingDue;
            return;
        }
        info!(cycle_id = %report.cycle_id, count = due.len(), "due capsules found");

        for capsule in &due {
            report.attempted += 1;
            match self.deliver(report.cycle_id, capsule).await {
                Ok(()) => report.succeeded += 1,
                Err(reason) => {
                    report.failed += 1;
                    warn!(
                        cycle_id = %report.cycle_id,
                        capsule_id = capsule.id,
                        owner_id = capsule.owner_id,
                        reason = %reason,
                        "capsule delivery failed"
                    );
                }
            }
        }
        report.outcome = CycleOutcome::Completed;
    }

    /// Deliver one capsule. A failed mark-sent after a successful send still
    /// counts as delivered: a duplicate email is preferred over a lost one.
    async fn deliver(&self, cycle_id: Uuid, capsule: &Capsule) -> Result<(), DeliveryFailure> {
        let owner = self
            .store
            .get_owner(capsule.owner_id)
            .await
            .map_err(DeliveryFailure::Owner)?;

        let message = compose(&owner, capsule, self.timezone);
        self.transport
            .send(&owner.email, &self.from_address, &message.subject, &message.body)
            .await
            .map_err(DeliveryFailure::Transport)?;

        if let Err(e) = self.store.mark_sent(capsule.id).await {
            warn!(
                %cycle_id,
                capsule_id = capsule.id,
                error = %e,
                "capsule sent but not marked, it may be delivered again"
            );
        } else {
            info!(%cycle_id, capsule_id = capsule.id, to = %owner.email, "capsule delivered");
        }
        Ok(())
    }
}

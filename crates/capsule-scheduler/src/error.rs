use thiserror::Error;

/// Errors returned by the [`Scheduler`](crate::Scheduler) control surface.
///
/// Nothing that happens inside a delivery cycle is reported here; per-capsule
/// failures only show up in the cycle report and the logs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression could not be parsed.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    /// `stop` has been called; no new work is accepted.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// A delivery cycle is already executing.
    #[error("A delivery cycle is already in flight")]
    CycleInFlight,

    /// The in-flight cycle did not finish within the shutdown grace period.
    #[error("Delivery cycle still running after {grace_secs}s shutdown grace period")]
    ShutdownTimeout { grace_secs: u64 },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

//! `capsule-scheduler` — the delivery cycle and the timer that drives it.
//!
//! # Overview
//!
//! A [`DeliveryCycle`] fetches the capsules due today, sends each one through
//! the configured transport in `created_at` order and marks it sent. One
//! capsule failing never stops the others; anything left `pending` is picked
//! up by the next cycle.
//!
//! The [`Scheduler`] fires cycles on a cron schedule in a named timezone and
//! guarantees that at most one cycle runs at a time.
//!
//! | State      | Meaning                                             |
//! |------------|-----------------------------------------------------|
//! | `Idle`     | Constructed, timer not armed                        |
//! | `Running`  | Timer armed; cycles fire on schedule                |
//! | `Stopping` | Shutdown requested, draining the in-flight cycle    |
//! | `Stopped`  | Terminal                                            |

pub mod cron;
pub mod cycle;
pub mod engine;
pub mod error;

pub use cron::CronSchedule;
pub use cycle::{CycleOutcome, CycleReport, DeliveryCycle, Trigger};
pub use engine::{Scheduler, SchedulerSettings, SchedulerState};
pub use error::{Result, SchedulerError};

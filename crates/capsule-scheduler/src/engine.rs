use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use capsule_core::{config::SchedulerConfig, resolve_timezone};
use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    cron::CronSchedule,
    cycle::{CycleReport, DeliveryCycle, Trigger},
    error::{Result, SchedulerError},
};

/// Lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Static scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub cron: String,
    /// IANA zone name; unknown names fall back to UTC.
    pub timezone: String,
    pub shutdown_grace: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            cron: config.cron.clone(),
            timezone: config.timezone.clone(),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }
}

/// Fires [`DeliveryCycle`]s on a cron schedule.
///
/// At most one cycle is in flight at any time, whether it came from the
/// timer or from [`Scheduler::trigger_manually`].
pub struct Scheduler {
    settings: SchedulerSettings,
    tz: Tz,
    cycle: Arc<DeliveryCycle>,
    state: Mutex<SchedulerState>,
    /// Held for the whole duration of a cycle.
    in_flight: Arc<tokio::sync::Mutex<()>>,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings, cycle: Arc<DeliveryCycle>) -> Self {
        let tz = resolve_timezone(&settings.timezone);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settings,
            tz,
            cycle,
            state: Mutex::new(SchedulerState::Idle),
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
            shutdown_tx,
            timer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Arm the timer. `Idle` → `Running`.
    pub fn start(&self) -> Result<()> {
        let schedule =
            CronSchedule::parse(&self.settings.cron).map_err(SchedulerError::InvalidSchedule)?;
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                SchedulerState::Idle => *state = SchedulerState::Running,
                SchedulerState::Running => return Err(SchedulerError::AlreadyRunning),
                SchedulerState::Stopping | SchedulerState::Stopped => {
                    return Err(SchedulerError::ShuttingDown)
                }
            }
        }

        info!(
            expression = %schedule,
            timezone = %self.tz,
            "scheduler started"
        );
        let handle = tokio::spawn(timer_loop(
            schedule,
            self.tz,
            Arc::clone(&self.cycle),
            Arc::clone(&self.in_flight),
            self.shutdown_tx.subscribe(),
        ));
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Run one cycle now, outside the timer.
    ///
    /// Rejected with [`SchedulerError::CycleInFlight`] while another cycle
    /// runs. Allowed before `start`, for one-shot use.
    pub async fn trigger_manually(&self) -> Result<CycleReport> {
        match self.state() {
            SchedulerState::Stopping | SchedulerState::Stopped => {
                return Err(SchedulerError::ShuttingDown)
            }
            SchedulerState::Idle | SchedulerState::Running => {}
        }
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| SchedulerError::CycleInFlight)?;
        Ok(self.cycle.run(Trigger::Manual).await)
    }

    /// Disarm the timer and wait for the in-flight cycle, bounded by the
    /// shutdown grace period. `Running` → `Stopping` → `Stopped`.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != SchedulerState::Running {
                return Err(SchedulerError::NotRunning);
            }
            *state = SchedulerState::Stopping;
        }
        info!("scheduler stopping");
        self.shutdown_tx.send_replace(true);

        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let in_flight = Arc::clone(&self.in_flight);
        let drain = async move {
            if let Some(handle) = timer {
                if let Err(e) = handle.await {
                    warn!(error = %e, "scheduler timer task ended abnormally");
                }
            }
            drop(in_flight.lock().await);
        };

        let grace = self.settings.shutdown_grace;
        let drained = tokio::time::timeout(grace, drain).await;
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SchedulerState::Stopped;

        match drained {
            Ok(()) => {
                info!("scheduler stopped");
                Ok(())
            }
            Err(_) => {
                error!(
                    grace_secs = grace.as_secs(),
                    "delivery cycle did not finish within the shutdown grace period"
                );
                Err(SchedulerError::ShutdownTimeout {
                    grace_secs: grace.as_secs(),
                })
            }
        }
    }
}

/// Sleep until the next fire time, then start a cycle unless one is running.
async fn timer_loop(
    schedule: CronSchedule,
    tz: Tz,
    cycle: Arc<DeliveryCycle>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(&now.with_timezone(&tz)) else {
            warn!(expression = %schedule, "schedule has no future fire time, timer stopped");
            return;
        };
        let wait = (next.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        debug!(next = %next, "next delivery cycle scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                debug!("scheduler timer shutting down");
                return;
            }
        }
        if *shutdown.borrow() {
            return;
        }

        match Arc::clone(&in_flight).try_lock_owned() {
            Ok(guard) => {
                let cycle = Arc::clone(&cycle);
                tokio::spawn(async move {
                    let _guard = guard;
                    cycle.run(Trigger::Timer).await;
                });
            }
            Err(_) => warn!("previous delivery cycle still in flight, skipping timer tick"),
        }
    }
}

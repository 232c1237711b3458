//! Cron-driven triggers for meal broadcasts and the onboarding sweep.
//!
//! A ticker wakes every few seconds, fires the jobs whose next fire time has
//! passed, and computes their next fire time in the service's timezone.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::broadcast::MealBroadcaster;
use crate::clock::Clock;
use crate::config::ScheduleConfig;
use crate::conversation::model::MealSlot;
use crate::error::ConfigError;
use crate::onboarding::OnboardingEngine;

/// What a scheduled job does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Broadcast(MealSlot),
    OnboardingSweep,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Broadcast(slot) => write!(f, "broadcast:{}", slot.as_str()),
            Self::OnboardingSweep => f.write_str("onboarding_sweep"),
        }
    }
}

struct ScheduledJob {
    kind: JobKind,
    schedule: cron::Schedule,
    next_fire: Option<DateTime<Utc>>,
}

/// Parse a cron expression, naming the offending variable on failure.
pub fn parse_schedule(key: &str, expr: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid cron: {e}"),
    })
}

/// Runs broadcast and onboarding jobs on their cron schedules.
pub struct MealScheduler {
    jobs: Mutex<Vec<ScheduledJob>>,
    broadcaster: Arc<MealBroadcaster>,
    onboarding: Arc<OnboardingEngine>,
    clock: Arc<dyn Clock>,
}

impl MealScheduler {
    pub fn new(
        config: &ScheduleConfig,
        broadcaster: Arc<MealBroadcaster>,
        onboarding: Arc<OnboardingEngine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let specs = [
            (
                JobKind::Broadcast(MealSlot::Breakfast),
                "MEAL_ASSIST_BREAKFAST_CRON",
                config.breakfast.as_str(),
            ),
            (
                JobKind::Broadcast(MealSlot::Lunch),
                "MEAL_ASSIST_LUNCH_CRON",
                config.lunch.as_str(),
            ),
            (
                JobKind::Broadcast(MealSlot::Dinner),
                "MEAL_ASSIST_DINNER_CRON",
                config.dinner.as_str(),
            ),
            (
                JobKind::OnboardingSweep,
                "MEAL_ASSIST_ONBOARDING_CRON",
                config.onboarding.as_str(),
            ),
        ];

        let mut jobs = Vec::with_capacity(specs.len());
        for (kind, key, expr) in specs {
            let schedule = parse_schedule(key, expr)?;
            let next_fire = next_after(&schedule, clock.as_ref());
            info!(job = %kind, next = ?next_fire, "Scheduled job");
            jobs.push(ScheduledJob {
                kind,
                schedule,
                next_fire,
            });
        }

        Ok(Self {
            jobs: Mutex::new(jobs),
            broadcaster,
            onboarding,
            clock,
        })
    }

    /// Jobs whose fire time has passed. Their next fire time is advanced.
    pub fn due_jobs(&self) -> Vec<JobKind> {
        let now = self.clock.now();
        let mut jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut due = Vec::new();
        for job in jobs.iter_mut() {
            if job.next_fire.is_some_and(|at| at <= now) {
                due.push(job.kind);
                job.next_fire = next_after(&job.schedule, self.clock.as_ref());
            }
        }
        due
    }

    /// Spawn every due job on its own task so a slow job never holds up
    /// the others or the next tick.
    pub fn tick(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.due_jobs()
            .into_iter()
            .map(|kind| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move { scheduler.run_job(kind).await })
            })
            .collect()
    }

    pub async fn run_job(&self, kind: JobKind) {
        info!(job = %kind, "Running scheduled job");
        match kind {
            JobKind::Broadcast(slot) => {
                if let Err(e) = self.broadcaster.broadcast(slot).await {
                    error!(job = %kind, error = %e, "Scheduled broadcast failed");
                }
            }
            JobKind::OnboardingSweep => {
                if let Err(e) = self.onboarding.sweep().await {
                    error!(job = %kind, error = %e, "Onboarding sweep failed");
                }
            }
        }
    }
}

fn next_after(schedule: &cron::Schedule, clock: &dyn Clock) -> Option<DateTime<Utc>> {
    schedule
        .after(&clock.local_now())
        .next()
        .map(|at| at.with_timezone(&Utc))
}

/// Spawn the ticker loop.
pub fn spawn_scheduler(
    scheduler: Arc<MealScheduler>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let spawned = scheduler.tick();
            if !spawned.is_empty() {
                debug!(jobs = spawned.len(), "Scheduled jobs spawned");
            }
        }
    })
}

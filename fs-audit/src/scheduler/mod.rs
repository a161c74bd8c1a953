//! Periodic jobs: the daily report and the suspicious-event sweep
//!
//! Both jobs run from one cooperative loop. A job that fails is logged and
//! rescheduled; it never stops the loop or delays the other job beyond its own
//! execution time.

pub mod clock;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::alerts::AlertDispatcher;
use crate::database::{DatabaseError, EventStore};
use crate::report::{ReportError, ReportGenerator};

pub use clock::{Clock, ManualClock, SystemClock};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Parse an `HH:MM` wall-clock time
pub fn parse_report_time(value: &str) -> Result<NaiveTime, SchedulerError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| {
        SchedulerError::InvalidConfiguration(format!("report time '{value}' is not HH:MM ({e})"))
    })
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub report_time: NaiveTime,
    pub check_minutes: u32,
    pub sweep_limit: usize,
    pub poll_interval: std::time::Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            report_time: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default(),
            check_minutes: 10,
            sweep_limit: 200,
            poll_interval: std::time::Duration::from_secs(1),
        }
    }
}

/// Jobs the scheduler knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    DailyReport,
    SuspiciousSweep,
}

pub struct Scheduler<C: Clock = SystemClock> {
    store: Arc<EventStore>,
    generator: ReportGenerator,
    dispatcher: AlertDispatcher,
    clock: C,
    config: ScheduleConfig,
    next_report: NaiveDateTime,
    /// Monotonic deadline, see [`Clock::monotonic`]
    next_sweep: std::time::Duration,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(
        store: Arc<EventStore>,
        generator: ReportGenerator,
        dispatcher: AlertDispatcher,
        clock: C,
        config: ScheduleConfig,
    ) -> Result<Self, SchedulerError> {
        if config.check_minutes == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "check interval must be at least one minute".to_string(),
            ));
        }

        let now = clock.now();
        let next_report = next_daily_run(now, config.report_time);
        let next_sweep = clock.monotonic() + sweep_interval(&config);

        Ok(Self {
            store,
            generator,
            dispatcher,
            clock,
            config,
            next_report,
            next_sweep,
        })
    }

    pub fn next_report(&self) -> NaiveDateTime {
        self.next_report
    }

    /// Wall-clock estimate of the next sweep
    pub fn next_sweep(&self) -> NaiveDateTime {
        let remaining = self.next_sweep.saturating_sub(self.clock.monotonic());
        self.clock.now() + Duration::from_std(remaining).unwrap_or_else(|_| Duration::zero())
    }

    /// Run every job that is due, daily report first
    pub fn run_pending(&mut self) -> Vec<Job> {
        let now = self.clock.now();
        let mut ran = Vec::new();

        if now >= self.next_report {
            if let Err(e) = self.daily_report(now.date()) {
                error!("Daily report for {} failed: {}", now.date(), e);
            }
            self.next_report = next_daily_run(now, self.config.report_time);
            ran.push(Job::DailyReport);
        }

        let elapsed = self.clock.monotonic();
        if elapsed >= self.next_sweep {
            if let Err(e) = self.sweep() {
                error!("Suspicious sweep failed: {}", e);
            }
            self.next_sweep = elapsed + sweep_interval(&self.config);
            ran.push(Job::SuspiciousSweep);
        }

        ran
    }

    /// Generate and save the report for `date`, then forward it as an alert
    pub fn daily_report(&self, date: NaiveDate) -> Result<PathBuf, ReportError> {
        info!("Generating daily report for {}", date);
        let (_, text, path) = self.generator.generate_and_save(date)?;
        self.dispatcher.dispatch_report(date, &text);
        Ok(path)
    }

    /// Alert on stored suspicious events. Returns how many were found.
    pub fn sweep(&self) -> Result<usize, DatabaseError> {
        info!("Checking for suspicious events");
        let events = self.store.suspicious_events(self.config.sweep_limit)?;
        if events.is_empty() {
            info!("No suspicious events");
        } else {
            info!("Found {} suspicious events", events.len());
            self.dispatcher.dispatch_suspicious(&events);
        }
        Ok(events.len())
    }

    /// Poll due jobs until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Scheduled: daily report at {} (next {}), suspicious sweep every {} min (next {})",
            self.config.report_time.format("%H:%M"),
            self.next_report,
            self.config.check_minutes,
            self.next_sweep()
        );
        tokio::pin!(shutdown);

        loop {
            self.run_pending();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

fn sweep_interval(config: &ScheduleConfig) -> std::time::Duration {
    std::time::Duration::from_secs(u64::from(config.check_minutes) * 60)
}

/// First occurrence of `at` strictly after `now`
fn next_daily_run(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

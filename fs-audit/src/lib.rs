//! fs-audit - filesystem audit agent
//!
//! Watches a directory tree, classifies every file action as routine or
//! suspicious from a per-user, per-file access history, stores all events in
//! SQLite and periodically emits reports and alerts.

pub mod alerts;
pub mod database;
pub mod engine;
pub mod logging;
pub mod report;
pub mod scheduler;

use std::path::PathBuf;

/// Re-export commonly used types
pub use alerts::{Alert, AlertDispatcher, AlertSink, ConsoleSink};
pub use database::{Action, DatabaseError, Event, EventStore, Statistics};
pub use engine::{FileMonitor, IgnorePolicy, Notification, WatchAdapter};
pub use report::{DailyReport, ReportGenerator, ReportOutcome};
pub use scheduler::{ScheduleConfig, Scheduler};

pub const DEFAULT_DATABASE: &str = "security.db";
pub const DEFAULT_REPORTS_DIR: &str = "reports";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";
pub const DEFAULT_REPORT_TIME: &str = "23:59";
pub const DEFAULT_CHECK_MINUTES: u32 = 10;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub reports_dir: PathBuf,
    pub watch_path: PathBuf,
    pub recursive: bool,
    pub ignored_suffixes: Vec<String>,
    pub admin_email: String,
    pub report_time: String,
    pub check_minutes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE),
            reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
            watch_path: PathBuf::from("."),
            recursive: false,
            ignored_suffixes: IgnorePolicy::parse_suffixes(engine::ignore::DEFAULT_IGNORED_SUFFIXES),
            admin_email: DEFAULT_ADMIN_EMAIL.to_string(),
            report_time: DEFAULT_REPORT_TIME.to_string(),
            check_minutes: DEFAULT_CHECK_MINUTES,
        }
    }
}

impl Config {
    /// Ignore policy for this configuration's database and reports directory
    pub fn ignore_policy(&self) -> IgnorePolicy {
        IgnorePolicy::new(
            &self.database_path,
            &self.reports_dir,
            self.ignored_suffixes.clone(),
        )
    }

    /// Scheduler settings, validating the report time
    pub fn schedule(&self) -> Result<ScheduleConfig, scheduler::SchedulerError> {
        Ok(ScheduleConfig {
            report_time: scheduler::parse_report_time(&self.report_time)?,
            check_minutes: self.check_minutes,
            ..ScheduleConfig::default()
        })
    }
}

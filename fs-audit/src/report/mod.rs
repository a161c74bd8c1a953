//! Daily report aggregation
//!
//! [`aggregate`] is a pure function over one day's events; [`ReportGenerator`]
//! pulls those events from the store, renders them and writes
//! `raport_<date>.txt` files.

pub mod render;

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::database::schema::DATE_FORMAT;
use crate::database::{Action, DatabaseError, Event, EventStore};

/// How many users/files the report ranks
pub const TOP_N: usize = 5;

/// How many suspicious events are itemized
pub const SUSPICIOUS_DETAIL_LIMIT: usize = 10;

/// Reason attached to every suspicious event
pub const SUSPICIOUS_REASON: &str = "first-time access by this user";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("cannot write report {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Count of one action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionCount {
    pub action: Action,
    pub count: usize,
}

/// A ranked user or file with its event count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ranked {
    pub name: String,
    pub count: usize,
}

/// One itemized suspicious event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousDetail {
    pub time: String,
    pub user: String,
    pub action: Action,
    pub path: String,
    pub reason: &'static str,
}

/// Aggregates for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total_events: usize,
    pub suspicious_events: usize,
    pub suspicious_percent: f64,
    pub distinct_users: usize,
    pub action_counts: Vec<ActionCount>,
    pub top_users: Vec<Ranked>,
    pub top_files: Vec<Ranked>,
    pub suspicious_details: Vec<SuspiciousDetail>,
    pub remaining_suspicious: usize,
}

impl DailyReport {
    pub fn count_for(&self, action: Action) -> usize {
        self.action_counts
            .iter()
            .find(|c| c.action == action)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

/// Result of aggregating one day
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportOutcome {
    NoData { date: NaiveDate },
    Report(DailyReport),
}

impl ReportOutcome {
    pub fn date(&self) -> NaiveDate {
        match self {
            ReportOutcome::NoData { date } => *date,
            ReportOutcome::Report(report) => report.date,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, ReportOutcome::NoData { .. })
    }
}

/// Aggregate a day's events (newest first, as the store returns them)
pub fn aggregate(date: NaiveDate, events: &[Event]) -> ReportOutcome {
    if events.is_empty() {
        return ReportOutcome::NoData { date };
    }

    let total_events = events.len();
    let suspicious: Vec<&Event> = events.iter().filter(|e| e.suspicious).collect();
    let suspicious_events = suspicious.len();

    let action_counts = Action::ALL
        .iter()
        .map(|&action| ActionCount {
            action,
            count: events.iter().filter(|e| e.action == action).count(),
        })
        .collect();

    let top_users = rank(events.iter().map(|e| e.user.as_str()));
    let distinct_users = top_users.len();

    let suspicious_details = suspicious
        .iter()
        .take(SUSPICIOUS_DETAIL_LIMIT)
        .map(|e| SuspiciousDetail {
            time: e.time_of_day().to_string(),
            user: e.user.clone(),
            action: e.action,
            path: e.path.clone(),
            reason: SUSPICIOUS_REASON,
        })
        .collect();

    ReportOutcome::Report(DailyReport {
        date,
        total_events,
        suspicious_events,
        suspicious_percent: suspicious_events as f64 * 100.0 / total_events as f64,
        distinct_users,
        action_counts,
        top_users: top_users.into_iter().take(TOP_N).collect(),
        top_files: rank(events.iter().map(|e| e.path.as_str()))
            .into_iter()
            .take(TOP_N)
            .collect(),
        suspicious_details,
        remaining_suspicious: suspicious_events.saturating_sub(SUSPICIOUS_DETAIL_LIMIT),
    })
}

/// Count occurrences, highest first; ties keep first-seen order
fn rank<'a>(names: impl Iterator<Item = &'a str>) -> Vec<Ranked> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut ranked: Vec<Ranked> = Vec::new();

    for name in names {
        let i = *index.entry(name).or_insert_with(|| {
            ranked.push(Ranked {
                name: name.to_string(),
                count: 0,
            });
            ranked.len() - 1
        });
        ranked[i].count += 1;
    }

    // Stable sort keeps insertion order among equal counts.
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked
}

/// Builds and persists daily reports from an event store
pub struct ReportGenerator {
    store: Arc<EventStore>,
    reports_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(store: Arc<EventStore>, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            reports_dir: reports_dir.into(),
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Aggregate the events of `date`
    pub fn generate(&self, date: NaiveDate) -> Result<ReportOutcome, ReportError> {
        let events = self.store.events_for_day(date)?;
        debug!("aggregating {} events for {}", events.len(), date);
        Ok(aggregate(date, &events))
    }

    /// Render an outcome as report text
    pub fn render(&self, outcome: &ReportOutcome) -> String {
        render::render_outcome(outcome)
    }

    /// Write report text to `<reports_dir>/raport_<date>.txt`, replacing any
    /// earlier file for the same date
    pub fn save(&self, date: NaiveDate, text: &str) -> Result<PathBuf, ReportError> {
        let path = self.report_path(date);
        let io_err = |source| ReportError::Io {
            path: path.display().to_string(),
            source,
        };

        std::fs::create_dir_all(&self.reports_dir).map_err(io_err)?;
        std::fs::write(&path, text).map_err(io_err)?;

        info!("Report saved to {}", path.display());
        Ok(path)
    }

    /// Generate, render and save the report of `date`
    pub fn generate_and_save(
        &self,
        date: NaiveDate,
    ) -> Result<(ReportOutcome, String, PathBuf), ReportError> {
        let outcome = self.generate(date)?;
        let text = self.render(&outcome);
        let path = self.save(date, &text)?;
        Ok((outcome, text, path))
    }

    pub fn report_path(&self, date: NaiveDate) -> PathBuf {
        self.reports_dir
            .join(format!("raport_{}.txt", date.format(DATE_FORMAT)))
    }
}

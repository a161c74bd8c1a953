use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use fs_audit::alerts::AlertError;
use fs_audit::scheduler::{Job, ManualClock};
use fs_audit::{
    Action, Alert, AlertDispatcher, AlertSink, EventStore, ReportGenerator, ScheduleConfig,
    Scheduler,
};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct Recording(Arc<Mutex<Vec<Alert>>>);

impl Recording {
    fn subjects(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|a| a.subject.clone()).collect()
    }
}

impl AlertSink for Recording {
    fn emit(&self, alert: &Alert) -> Result<(), AlertError> {
        self.0.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct Broken;

impl AlertSink for Broken {
    fn emit(&self, _alert: &Alert) -> Result<(), AlertError> {
        Err(AlertError::EmissionFailed("no route".to_string()))
    }
}

fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn config(report_time: &str, check_minutes: u32) -> ScheduleConfig {
    ScheduleConfig {
        report_time: fs_audit::scheduler::parse_report_time(report_time).unwrap(),
        check_minutes,
        ..ScheduleConfig::default()
    }
}

struct Harness {
    _dir: TempDir,
    reports: std::path::PathBuf,
    store: Arc<EventStore>,
    clock: ManualClock,
}

impl Harness {
    fn new(start: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        let store = Arc::new(EventStore::open(dir.path().join("security.db")).unwrap());
        Self {
            _dir: dir,
            reports,
            store,
            clock: ManualClock::new(dt(start)),
        }
    }

    fn scheduler(&self, sink: Box<dyn AlertSink>, config: ScheduleConfig) -> Scheduler<ManualClock> {
        let generator = ReportGenerator::new(self.store.clone(), self.reports.clone());
        Scheduler::new(
            self.store.clone(),
            generator,
            AlertDispatcher::new(sink),
            self.clock.clone(),
            config,
        )
        .unwrap()
    }
}

#[test]
fn sweep_fires_every_interval_and_skips_empty_results() {
    let h = Harness::new("2024-05-02 10:00:00");
    let sink = Recording::default();
    let mut scheduler = h.scheduler(Box::new(sink.clone()), config("23:59", 10));

    assert!(scheduler.run_pending().is_empty());

    h.clock.advance(Duration::minutes(10));
    assert_eq!(scheduler.run_pending(), vec![Job::SuspiciousSweep]);
    assert!(sink.subjects().is_empty(), "no suspicious events yet");

    h.store
        .record_at("dave", Action::Created, "/srv/x", dt("2024-05-02 10:12:00"))
        .unwrap();
    h.clock.advance(Duration::minutes(5));
    assert!(scheduler.run_pending().is_empty());

    h.clock.advance(Duration::minutes(5));
    assert_eq!(scheduler.run_pending(), vec![Job::SuspiciousSweep]);
    assert_eq!(sink.subjects(), vec!["SECURITY ALERT - 1 suspicious activities"]);
    assert_eq!(scheduler.next_sweep(), dt("2024-05-02 10:30:00"));
}

#[test]
fn daily_report_fires_once_per_day_and_writes_the_file() {
    let h = Harness::new("2024-05-02 07:00:00");
    h.store
        .record_at("erin", Action::Created, "/srv/y", dt("2024-05-02 06:30:00"))
        .unwrap();
    h.store
        .record_at("erin", Action::Modified, "/srv/y", dt("2024-05-02 06:45:00"))
        .unwrap();

    let sink = Recording::default();
    let mut scheduler = h.scheduler(Box::new(sink.clone()), config("08:00", 600));
    assert_eq!(scheduler.next_report(), dt("2024-05-02 08:00:00"));

    h.clock.set(dt("2024-05-02 08:00:00"));
    assert_eq!(scheduler.run_pending(), vec![Job::DailyReport]);
    assert_eq!(scheduler.next_report(), dt("2024-05-03 08:00:00"));

    let file = h.reports.join("raport_2024-05-02.txt");
    let text = std::fs::read_to_string(&file).unwrap();
    assert!(text.contains("Total events:                 2"));
    assert!(text.contains("Suspicious events:            1 (50.0%)"));
    assert_eq!(sink.subjects(), vec!["Daily Security Report - 2024-05-02"]);

    h.clock.set(dt("2024-05-02 09:00:00"));
    assert!(scheduler.run_pending().is_empty());
}

#[test]
fn both_jobs_due_run_in_one_poll() {
    let h = Harness::new("2024-05-02 23:50:00");
    let sink = Recording::default();
    let mut scheduler = h.scheduler(Box::new(sink.clone()), config("23:55", 5));

    h.clock.advance(Duration::minutes(6));
    assert_eq!(
        scheduler.run_pending(),
        vec![Job::DailyReport, Job::SuspiciousSweep]
    );
    // Empty day still produces a report file carrying the no-data notice.
    let text = std::fs::read_to_string(h.reports.join("raport_2024-05-02.txt")).unwrap();
    assert_eq!(text, "No data for date 2024-05-02");
}

#[test]
fn wall_clock_stepping_back_does_not_stall_the_sweep() {
    let h = Harness::new("2024-10-27 02:50:00");
    let mut scheduler = h.scheduler(Box::new(Recording::default()), config("23:59", 10));

    // Fall-back: the wall clock returns to 02:05, then ten real minutes pass.
    h.clock.set(dt("2024-10-27 02:05:00"));
    h.clock.advance(Duration::minutes(10));
    assert_eq!(scheduler.run_pending(), vec![Job::SuspiciousSweep]);
    assert_eq!(scheduler.next_sweep(), dt("2024-10-27 02:25:00"));

    // A forward step does not bring the sweep early either.
    h.clock.set(dt("2024-10-27 05:00:00"));
    assert!(scheduler.run_pending().is_empty());
}

#[test]
fn failing_sink_does_not_stop_the_jobs() {
    let h = Harness::new("2024-05-02 10:00:00");
    h.store.record("frank", Action::Created, "/srv/z").unwrap();
    let mut scheduler = h.scheduler(Box::new(Broken), config("10:01", 1));

    h.clock.advance(Duration::minutes(1));
    assert_eq!(
        scheduler.run_pending(),
        vec![Job::DailyReport, Job::SuspiciousSweep]
    );
    h.clock.advance(Duration::minutes(1));
    assert_eq!(scheduler.run_pending(), vec![Job::SuspiciousSweep]);
    assert_eq!(scheduler.sweep().unwrap(), 1);
}

#[test]
fn zero_minute_interval_is_rejected() {
    let h = Harness::new("2024-05-02 10:00:00");
    let generator = ReportGenerator::new(h.store.clone(), h.reports.clone());
    let result = Scheduler::new(
        h.store.clone(),
        generator,
        AlertDispatcher::new(Box::new(Recording::default())),
        h.clock.clone(),
        config("10:00", 0),
    );
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn run_returns_on_shutdown() {
    let h = Harness::new("2024-05-02 10:00:00");
    let mut scheduler = h.scheduler(Box::new(Recording::default()), config("23:59", 10));

    scheduler
        .run(tokio::time::sleep(std::time::Duration::from_secs(5)))
        .await;
}

#[test]
fn report_file_is_overwritten_on_regeneration() {
    let h = Harness::new("2024-05-02 10:00:00");
    let generator = ReportGenerator::new(h.store.clone(), h.reports.clone());
    let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();

    let (first, _, path) = generator.generate_and_save(date).unwrap();
    assert!(first.is_no_data());

    h.store
        .record_at("gina", Action::Deleted, "/srv/w", dt("2024-05-02 09:00:00"))
        .unwrap();
    let (second, text, same_path) = generator.generate_and_save(date).unwrap();
    assert!(!second.is_no_data());
    assert_eq!(path, same_path);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
}

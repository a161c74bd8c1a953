//! Alert rendering and best-effort emission

use chrono::NaiveDate;
use std::fmt::Write as _;
use std::io::Write;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::database::Event;

/// Suspicious events listed inline in one alert
pub const INLINE_EVENT_LIMIT: usize = 5;

const FRAME_WIDTH: usize = 70;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert emission failed: {0}")]
    EmissionFailed(String),
}

/// Rendered alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
}

impl Alert {
    /// Alert for a batch of suspicious events; `None` for an empty batch
    pub fn suspicious(events: &[Event]) -> Option<Self> {
        if events.is_empty() {
            return None;
        }

        let subject = format!("SECURITY ALERT - {} suspicious activities", events.len());
        let mut body = format!(
            "Found {} suspicious activities.\n\nDetails (max {}):\n",
            events.len(),
            INLINE_EVENT_LIMIT
        );
        for event in events.iter().take(INLINE_EVENT_LIMIT) {
            let _ = write!(
                body,
                "- [{}] user={} action={}\n  file={}\n\n",
                event.timestamp, event.user, event.action, event.path
            );
        }
        if events.len() > INLINE_EVENT_LIMIT {
            let _ = write!(
                body,
                "... and {} more activities.\n\n",
                events.len() - INLINE_EVENT_LIMIT
            );
        }
        body.push_str("Please review these activities as soon as possible.\n");

        Some(Self { subject, body })
    }

    /// Alert carrying a rendered daily report
    pub fn report(date: NaiveDate, text: &str) -> Self {
        Self {
            subject: format!("Daily Security Report - {date}"),
            body: text.to_string(),
        }
    }
}

/// Destination for alerts
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Prints alerts as a framed block, standing in for e-mail delivery
pub struct ConsoleSink<W: Write + Send = std::io::Stdout> {
    recipient: String,
    out: Mutex<W>,
}

impl ConsoleSink {
    pub fn stdout(recipient: impl Into<String>) -> Self {
        Self::with_writer(recipient, std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn with_writer(recipient: impl Into<String>, out: W) -> Self {
        Self {
            recipient: recipient.into(),
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> AlertSink for ConsoleSink<W> {
    fn emit(&self, alert: &Alert) -> Result<(), AlertError> {
        let heavy = "=".repeat(FRAME_WIDTH);
        let light = "-".repeat(FRAME_WIDTH);
        let block = format!(
            "\n{heavy}\nEMAIL ALERT (console)\nTo:      {}\nSubject: {}\n{light}\n{}\n{heavy}\n",
            self.recipient, alert.subject, alert.body
        );

        let mut out = self
            .out
            .lock()
            .map_err(|_| AlertError::EmissionFailed("console writer poisoned".to_string()))?;
        out.write_all(block.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| AlertError::EmissionFailed(e.to_string()))
    }
}

/// Renders alerts and hands them to a sink, never failing the caller
pub struct AlertDispatcher {
    sink: Box<dyn AlertSink>,
}

impl AlertDispatcher {
    pub fn new(sink: Box<dyn AlertSink>) -> Self {
        Self { sink }
    }

    pub fn console(recipient: impl Into<String>) -> Self {
        Self::new(Box::new(ConsoleSink::stdout(recipient)))
    }

    /// Emit an alert for suspicious events. Returns whether one was delivered.
    pub fn dispatch_suspicious(&self, events: &[Event]) -> bool {
        match Alert::suspicious(events) {
            Some(alert) => self.dispatch(&alert),
            None => false,
        }
    }

    /// Emit a rendered report. Returns whether it was delivered.
    pub fn dispatch_report(&self, date: NaiveDate, text: &str) -> bool {
        self.dispatch(&Alert::report(date, text))
    }

    fn dispatch(&self, alert: &Alert) -> bool {
        match self.sink.emit(alert) {
            Ok(()) => {
                debug!("alert emitted: {}", alert.subject);
                true
            }
            Err(e) => {
                warn!("Failed to emit alert '{}': {}", alert.subject, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Action;
    use std::sync::Arc;

    fn events(n: usize) -> Vec<Event> {
        (0..n)
            .map(|i| Event {
                id: i as i64,
                timestamp: format!("2024-05-02 10:00:{i:02}"),
                user: "alice".to_string(),
                action: Action::Created,
                path: format!("/srv/f{i}"),
                suspicious: true,
            })
            .collect()
    }

    struct Recording(Arc<Mutex<Vec<Alert>>>);

    impl AlertSink for Recording {
        fn emit(&self, alert: &Alert) -> Result<(), AlertError> {
            self.0.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct Failing;

    impl AlertSink for Failing {
        fn emit(&self, _alert: &Alert) -> Result<(), AlertError> {
            Err(AlertError::EmissionFailed("smtp down".to_string()))
        }
    }

    #[test]
    fn suspicious_alert_lists_at_most_five() {
        let alert = Alert::suspicious(&events(7)).unwrap();
        assert_eq!(alert.subject, "SECURITY ALERT - 7 suspicious activities");
        assert!(alert.body.contains("file=/srv/f4"));
        assert!(!alert.body.contains("file=/srv/f5"));
        assert!(alert.body.contains("... and 2 more activities."));

        let small = Alert::suspicious(&events(2)).unwrap();
        assert!(!small.body.contains("more activities"));
    }

    #[test]
    fn empty_batch_emits_nothing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = AlertDispatcher::new(Box::new(Recording(seen.clone())));

        assert!(!dispatcher.dispatch_suspicious(&[]));
        assert!(seen.lock().unwrap().is_empty());

        assert!(dispatcher.dispatch_suspicious(&events(1)));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn sink_failure_is_swallowed() {
        let dispatcher = AlertDispatcher::new(Box::new(Failing));
        assert!(!dispatcher.dispatch_suspicious(&events(3)));
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert!(!dispatcher.dispatch_report(date, "report"));
    }

    #[test]
    fn console_sink_frames_the_alert() {
        let sink = ConsoleSink::with_writer("admin@example.com", Vec::new());
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        sink.emit(&Alert::report(date, "body text")).unwrap();

        let printed = String::from_utf8(sink.into_inner()).unwrap();
        let frame = "=".repeat(FRAME_WIDTH);
        assert!(printed.starts_with(&format!("\n{frame}\n")));
        assert!(printed.contains("To:      admin@example.com"));
        assert!(printed.contains("Subject: Daily Security Report - 2024-05-02"));
        assert!(printed.contains(&"-".repeat(FRAME_WIDTH)));
        assert!(printed.ends_with(&format!("body text\n{frame}\n")));
    }
}

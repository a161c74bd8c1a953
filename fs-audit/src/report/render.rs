//! Plain-text report layout

use chrono::{Local, NaiveDateTime};
use std::fmt::Write;

use super::{DailyReport, ReportOutcome};
use crate::database::schema::TIMESTAMP_FORMAT;
use crate::database::Action;

const BOX_WIDTH: usize = 68;
const PATH_WIDTH: usize = 50;

/// Render with the current local time as the generation stamp
pub fn render_outcome(outcome: &ReportOutcome) -> String {
    render_outcome_at(outcome, Local::now().naive_local())
}

pub fn render_outcome_at(outcome: &ReportOutcome, generated_at: NaiveDateTime) -> String {
    match outcome {
        ReportOutcome::NoData { date } => format!("No data for date {date}"),
        ReportOutcome::Report(report) => render_report(report, generated_at),
    }
}

fn render_report(report: &DailyReport, generated_at: NaiveDateTime) -> String {
    let mut out = String::new();
    let rule = "═".repeat(BOX_WIDTH);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "╔{rule}╗");
    let _ = writeln!(out, "║{:^width$}║", "DAILY SECURITY REPORT", width = BOX_WIDTH);
    let _ = writeln!(out, "║{:<width$}║", format!(" Date: {}", report.date), width = BOX_WIDTH);
    let _ = writeln!(out, "╚{rule}╝");
    let _ = writeln!(out);

    let _ = writeln!(out, "SUMMARY");
    let _ = writeln!(out, "  • {:<30}{}", "Total events:", report.total_events);
    let _ = writeln!(
        out,
        "  • {:<30}{} ({:.1}%)",
        "Suspicious events:", report.suspicious_events, report.suspicious_percent
    );
    let _ = writeln!(out, "  • {:<30}{}", "Active users:", report.distinct_users);
    for action in Action::ALL {
        let label = format!("{action}:");
        let _ = writeln!(out, "  • {:<30}{}", label, report.count_for(action));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "TOP {} MOST ACTIVE USERS", super::TOP_N);
    let _ = writeln!(out);
    for (i, user) in report.top_users.iter().enumerate() {
        let _ = writeln!(out, "  {}. {:<30} {:>3} actions", i + 1, user.name, user.count);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "TOP {} MOST TOUCHED FILES", super::TOP_N);
    let _ = writeln!(out);
    for (i, file) in report.top_files.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {}. {:<width$} {:>3} times",
            i + 1,
            shorten(&file.name),
            file.count,
            width = PATH_WIDTH
        );
    }
    let _ = writeln!(out);

    if report.suspicious_details.is_empty() {
        let _ = writeln!(out, "NO SUSPICIOUS ACTIVITY");
        let _ = writeln!(out);
    } else {
        let _ = writeln!(out, "SUSPICIOUS ACTIVITY (DETAILS)");
        let _ = writeln!(out);
        for detail in &report.suspicious_details {
            let _ = writeln!(out, "  [{}] ALERT", detail.time);
            let _ = writeln!(out, "    User:        {}", detail.user);
            let _ = writeln!(out, "    Action:      {}", detail.action);
            let _ = writeln!(out, "    File:        {}", shorten(&detail.path));
            let _ = writeln!(out, "    Reason:      {}", detail.reason);
            let _ = writeln!(out);
        }
        if report.remaining_suspicious > 0 {
            let _ = writeln!(
                out,
                "  ... and {} more suspicious activities",
                report.remaining_suspicious
            );
        }
        let _ = writeln!(out);
    }

    let _ = write!(
        out,
        "Report generated at: {}",
        generated_at.format(TIMESTAMP_FORMAT)
    );
    out
}

/// Keep long paths to the column width, preserving the tail
pub fn shorten(path: &str) -> String {
    let len = path.chars().count();
    if len <= PATH_WIDTH {
        return path.to_string();
    }
    let tail: String = path.chars().skip(len - (PATH_WIDTH - 3)).collect();
    format!("...{tail}")
}

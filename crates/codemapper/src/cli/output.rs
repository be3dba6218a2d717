//! Output formatting for CLI commands
//!
//! Tables for codebases, jobs and log lines, plus relative timestamps.

use chrono::{DateTime, Utc};
use codemapper_protocol::{CodebaseInfo, JobInfo, JobStatus, LogLevel, LogLine};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use std::time::Duration;

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| {
                let cell = Cell::new(text);
                if let Some(c) = color {
                    cell.fg(c)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

pub fn print_codebases(codebases: &[CodebaseInfo]) {
    if codebases.is_empty() {
        println!("No codebases registered. Use 'mapper scan <path> --every 30m' to add one.");
        return;
    }
    let now = Utc::now();
    let rows = codebases
        .iter()
        .map(|cb| {
            vec![
                (cb.name.clone(), Some(Color::White)),
                (cb.path.clone(), None),
                (cb.schedule.clone(), Some(Color::Yellow)),
                (relative_or_never(cb.last_run.as_deref(), now), None),
                (relative_or_never(cb.next_run.as_deref(), now), None),
            ]
        })
        .collect();
    print_table_colored(&["NAME", "PATH", "SCHEDULE", "LAST RUN", "NEXT RUN"], rows);
}

pub fn print_jobs(jobs: &[JobInfo]) {
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }
    let now = Utc::now();
    let rows = jobs
        .iter()
        .map(|job| {
            vec![
                (job.id.clone(), Some(Color::White)),
                (job.codebase.clone(), None),
                (job.status.to_string(), Some(color_for_status(job.status))),
                (job.files.to_string(), None),
                (job.symbols.to_string(), None),
                (format_timestamp(&job.started, now), None),
                (job.error.clone().unwrap_or_default(), Some(Color::Red)),
            ]
        })
        .collect();
    print_table_colored(
        &["ID", "CODEBASE", "STATUS", "FILES", "SYMBOLS", "STARTED", "ERROR"],
        rows,
    );
}

pub fn print_logs(logs: &[LogLine]) {
    if logs.is_empty() {
        println!("No logs found.");
        return;
    }
    let rows = logs
        .iter()
        .map(|line| {
            vec![
                (line.timestamp.clone(), None),
                (line.level.as_str().to_uppercase(), Some(color_for_level(line.level))),
                (line.message.clone(), None),
            ]
        })
        .collect();
    print_table_colored(&["TIME", "LEVEL", "MESSAGE"], rows);
}

pub fn color_for_status(status: JobStatus) -> Color {
    match status {
        JobStatus::Pending => Color::Grey,
        JobStatus::Running => Color::Blue,
        JobStatus::Completed => Color::Green,
        JobStatus::Failed => Color::Red,
    }
}

pub fn color_for_level(level: LogLevel) -> Color {
    match level {
        LogLevel::Info => Color::White,
        LogLevel::Warn => Color::Yellow,
        LogLevel::Error => Color::Red,
    }
}

fn relative_or_never(timestamp: Option<&str>, now: DateTime<Utc>) -> String {
    timestamp
        .map(|ts| format_timestamp(ts, now))
        .unwrap_or_else(|| "never".to_string())
}

/// RFC 3339 timestamp relative to `now` ("5 minutes ago", "in 2 hours").
/// Unparseable input is returned unchanged.
pub fn format_timestamp(timestamp: &str, now: DateTime<Utc>) -> String {
    let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) else {
        return timestamp.to_string();
    };
    let delta = now.signed_duration_since(parsed.with_timezone(&Utc));
    match delta.to_std() {
        Ok(ago) => format_duration_ago(ago, parsed.with_timezone(&Utc)),
        Err(_) => {
            let ahead = (-delta).to_std().unwrap_or_default();
            format!("in {}", format_span(ahead))
        }
    }
}

/// Format a duration as "X time ago", or the absolute date after a week
fn format_duration_ago(duration: Duration, at: DateTime<Utc>) -> String {
    if duration.as_secs() >= 604_800 {
        return at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();
    }
    format!("{} ago", format_span(duration))
}

fn format_span(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (value, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        (secs / 60, "minute")
    } else if secs < 86400 {
        (secs / 3600, "hour")
    } else {
        (secs / 86400, "day")
    };
    format!("{} {}{}", value, unit, if value == 1 { "" } else { "s" })
}

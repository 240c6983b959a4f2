use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::cache::ResolutionCache;
use crate::error::ResolveError;
use crate::gateway::EvidenceGateway;
use crate::models::{Activity, ResolvedStatus, StatusKey, StudentId};

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub activity: Activity,
    pub depth: usize,
    pub outcome: Result<ResolvedStatus, ResolveError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub label: &'static str,
    pub count: usize,
}

/// Resolves each top-level activity and the direct children of containers.
pub fn collect_rows<G>(
    gateway: &G,
    top_level: &[Activity],
    student_id: StudentId,
    cache: &mut ResolutionCache,
) -> Vec<ReportRow>
where
    G: EvidenceGateway + ?Sized,
{
    let mut rows = Vec::new();

    for activity in top_level {
        let outcome = cache.resolve(gateway, activity, student_id);
        let failed = outcome.is_err();
        rows.push(ReportRow {
            activity: activity.clone(),
            depth: 0,
            outcome,
        });

        if !activity.kind.is_container() || failed {
            continue;
        }

        let children = match gateway.visible_children(activity.id) {
            Ok(children) => children,
            Err(err) => {
                tracing::warn!(activity_id = %activity.id, error = %err, "skipping child rows");
                continue;
            }
        };
        for child in children {
            let outcome = cache.resolve(gateway, &child, student_id);
            rows.push(ReportRow {
                activity: child,
                depth: 1,
                outcome,
            });
        }
    }

    rows
}

pub fn summarize_by_status(rows: &[ReportRow]) -> Vec<StatusSummary> {
    let mut completed = 0usize;
    let mut pending = 0usize;
    let mut not_started = 0usize;
    let mut errors = 0usize;

    for row in rows.iter().filter(|row| row.depth == 0) {
        match &row.outcome {
            Ok(status) => match status.key {
                StatusKey::Completed => completed += 1,
                StatusKey::Pending => pending += 1,
                StatusKey::NotStarted => not_started += 1,
            },
            Err(_) => errors += 1,
        }
    }

    let mut summaries = vec![
        StatusSummary {
            label: StatusKey::Completed.label(),
            count: completed,
        },
        StatusSummary {
            label: StatusKey::Pending.label(),
            count: pending,
        },
        StatusSummary {
            label: StatusKey::NotStarted.label(),
            count: not_started,
        },
    ];
    if errors > 0 {
        summaries.push(StatusSummary {
            label: "error",
            count: errors,
        });
    }
    summaries
}

pub fn build_report(student_label: &str, course_title: &str, rows: &[ReportRow]) -> String {
    let summaries = summarize_by_status(rows);

    let mut output = String::new();

    let _ = writeln!(output, "# Course Progress Report");
    let _ = writeln!(output, "Generated for {student_label} in {course_title}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");

    if rows.is_empty() {
        let _ = writeln!(output, "No visible activities in this course.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(output, "- {}: {}", summary.label, summary.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Activities");

    if rows.is_empty() {
        let _ = writeln!(output, "Nothing to report.");
    }

    for row in rows {
        let indent = "  ".repeat(row.depth);
        match &row.outcome {
            Ok(status) => {
                let _ = writeln!(
                    output,
                    "{}- {} ({}): {}{}",
                    indent,
                    row.activity.name,
                    row.activity.kind.as_str(),
                    status.key,
                    timestamp_notes(status)
                );
            }
            Err(err) => {
                let _ = writeln!(
                    output,
                    "{}- {} ({}): error: {}",
                    indent,
                    row.activity.name,
                    row.activity.kind.as_str(),
                    err
                );
            }
        }
    }

    output
}

fn timestamp_notes(status: &ResolvedStatus) -> String {
    let notes: Vec<String> = [
        ("started", status.started_at),
        ("completed", status.completed_at),
        ("updated", status.updated_at),
    ]
    .into_iter()
    .filter_map(|(label, at)| at.map(|at| format!("{} {}", label, format_timestamp(at))))
    .collect();

    if notes.is_empty() {
        String::new()
    } else {
        format!(" ({})", notes.join(", "))
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

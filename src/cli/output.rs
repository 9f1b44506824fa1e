//! Human-readable rendering for the CLI.

use std::fmt::Write;

use crate::domain::{AcquisitionJob, JobStatus, RunReport};
use crate::services::{HealthState, SourceOverview};

fn job_summary(job: &AcquisitionJob) -> String {
    match job.status {
        JobStatus::Succeeded => format!(
            "fetched {}, duplicates {}, low quality {}, accepted {}{}",
            job.counts.fetched,
            job.counts.duplicates,
            job.counts.low_quality,
            job.counts.accepted,
            if job.counts.sink_errors > 0 {
                format!(", sink errors {}", job.counts.sink_errors)
            } else {
                String::new()
            }
        ),
        JobStatus::Failed => job
            .error
            .as_ref()
            .map(|e| format!("{}: {}", e.kind, e.message))
            .unwrap_or_default(),
        JobStatus::Skipped => job.reason.clone().unwrap_or_default(),
        JobStatus::Pending | JobStatus::Running => String::new(),
    }
}

pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();

    let mode = if report.dry_run { " [DRY RUN]" } else { "" };
    let _ = writeln!(out, "Run {}{}\n", report.run_id, mode);

    if report.jobs.is_empty() {
        let _ = writeln!(out, "No sources selected.");
    }
    for job in &report.jobs {
        let _ = writeln!(
            out,
            "  {:<24} {:<10} {}",
            job.source_id,
            job.status,
            job_summary(job)
        );
    }

    if !report.excluded.is_empty() {
        let _ = writeln!(out, "\nExcluded:");
        for excluded in &report.excluded {
            let _ = writeln!(out, "  {:<24} {}", excluded.source_id, excluded.reason);
        }
    }

    let changed: Vec<_> = report.health_deltas.iter().filter(|d| d.changed()).collect();
    if !changed.is_empty() {
        let _ = writeln!(out, "\nHealth:");
        for delta in changed {
            let _ = writeln!(
                out,
                "  {:<24} score {} -> {}, failures {} -> {}, status {} -> {}",
                delta.source_id,
                delta.score_before,
                delta.score_after,
                delta.failures_before,
                delta.failures_after,
                delta.status_before,
                delta.status_after
            );
        }
    }

    let _ = writeln!(
        out,
        "\n{} {} accepted across {} jobs in {} ms{}",
        if report.dry_run { "Would have" } else { "Total" },
        report.total_accepted,
        report.jobs.len(),
        report.duration_ms,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    out
}

pub fn render_sources(sources: &[SourceOverview]) -> String {
    let mut out = String::from("Configured sources:\n\n");
    for entry in sources {
        let source = &entry.source;
        let state = match entry.state {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Disabled => "disabled",
        };
        let _ = writeln!(out, "  {} [{}] {}", source.name, source.kind, source.id);
        let _ = writeln!(
            out,
            "    status: {}, priority: {}, health: {} ({}), failures: {}{}",
            source.status,
            source.priority,
            source.health_score,
            state,
            source.consecutive_failures,
            if entry.eligible { "" } else { ", not eligible" }
        );
    }
    out
}

pub fn render_history(source_id: &str, jobs: &[AcquisitionJob]) -> String {
    if jobs.is_empty() {
        return format!("No jobs recorded for {}.\n", source_id);
    }

    let mut out = format!("Recent jobs for {}:\n\n", source_id);
    for job in jobs {
        let _ = writeln!(
            out,
            "  {}  {:<10} {}",
            job.requested_at.format("%Y-%m-%d %H:%M:%S"),
            job.status,
            job_summary(job)
        );
    }
    out
}

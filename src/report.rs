use std::fmt::Write;

use crate::models::{format_timestamp, HealthRecord};
use crate::risk;
use crate::state::DashboardState;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub health_status: String,
    pub count: usize,
}

pub fn summarize_by_status(records: &[HealthRecord]) -> Vec<StatusSummary> {
    let mut map: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for record in records {
        let status = record
            .monitoring
            .as_ref()
            .and_then(|monitoring| monitoring.health_status.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        *map.entry(status).or_insert(0) += 1;
    }

    let mut summaries: Vec<StatusSummary> = map
        .into_iter()
        .map(|(health_status, count)| StatusSummary {
            health_status,
            count,
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.health_status.cmp(&b.health_status))
    });
    summaries
}

pub fn build_report(principal: Option<&str>, state: &DashboardState) -> String {
    let mut output = String::new();
    let principal_label = principal.unwrap_or("no signed-in user");

    let _ = writeln!(output, "# Herd Health Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} animals, {} active alerts)",
        principal_label,
        state.records.len(),
        state.alerts.len()
    );

    if let Some(error) = &state.error {
        let _ = writeln!(output);
        let _ = writeln!(output, "> {error}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alert Mix");

    let counts = risk::count_by_severity(&state.alerts);
    if counts.is_empty() {
        let _ = writeln!(output, "No active alerts.");
    } else {
        for (severity, count) in counts {
            let label = severity.map(|s| s.as_str()).unwrap_or("Unrated");
            let _ = writeln!(output, "- {label}: {count}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Active Alerts");

    if state.alerts.is_empty() {
        let _ = writeln!(output, "No active alerts.");
    } else {
        for alert in state.alerts.iter().take(10) {
            let _ = writeln!(
                output,
                "- [{}] {} on {}: {} ({})",
                alert.severity.map(|s| s.as_str()).unwrap_or("Unrated"),
                alert.cattle_id,
                format_timestamp(alert.timestamp),
                alert.message,
                alert.disease
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Herd Status");

    let summaries = summarize_by_status(&state.records);
    if summaries.is_empty() {
        let _ = writeln!(output, "No animals reported yet.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(output, "- {}: {}", summary.health_status, summary.count);
        }
    }

    // Records are already newest first.
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Readings");

    if state.records.is_empty() {
        let _ = writeln!(output, "No readings recorded.");
    } else {
        for record in state.records.iter().take(5) {
            let risk_level = record
                .monitoring
                .as_ref()
                .and_then(|monitoring| monitoring.risk_level.as_deref())
                .unwrap_or("unknown");
            let _ = writeln!(
                output,
                "- {} at {}: risk {}, {} alerts",
                record.id,
                format_timestamp(record.timestamp),
                risk_level,
                record.alerts.len()
            );
        }
    }

    output
}

use std::cmp::Ordering;

use crate::models::{DerivedAlert, Severity};

/// Rank given to alerts whose severity is missing or unrecognised. Below `Low`.
pub const UNRANKED: f64 = 0.0;

pub fn severity_rank(severity: Option<Severity>) -> f64 {
    match severity {
        Some(Severity::Critical) => 4.0,
        Some(Severity::High) => 3.0,
        Some(Severity::Medium) => 2.0,
        Some(Severity::LowMedium) => 1.5,
        Some(Severity::Low) => 1.0,
        None => UNRANKED,
    }
}

/// Orders the feed by severity rank, highest first. The sort is stable, so
/// alerts of equal rank keep the order they were encountered in.
pub fn rank_alerts(alerts: &mut [DerivedAlert]) {
    alerts.sort_by(|a, b| {
        severity_rank(b.severity)
            .partial_cmp(&severity_rank(a.severity))
            .unwrap_or(Ordering::Equal)
    });
}

pub fn count_by_severity(alerts: &[DerivedAlert]) -> Vec<(Option<Severity>, usize)> {
    let mut counts: Vec<(Option<Severity>, usize)> = Severity::ALL
        .iter()
        .map(|severity| (Some(*severity), 0))
        .collect();
    counts.push((None, 0));

    for alert in alerts {
        if let Some(entry) = counts.iter_mut().find(|(severity, _)| *severity == alert.severity) {
            entry.1 += 1;
        }
    }

    counts.retain(|(_, count)| *count > 0);
    counts
}

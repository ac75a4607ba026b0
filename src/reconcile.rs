use std::collections::HashSet;

use uuid::Uuid;

use crate::models::{AlertAnnotation, DerivedAlert, Document, HealthRecord};
use crate::risk;

const ALERT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c1d_0a52_8f3e_4b7a_9d20_5e4f_a1c3_7b90);

/// Derived state for one snapshot. Always replaces the previous one wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub records: Vec<HealthRecord>,
    pub alerts: Vec<DerivedAlert>,
}

pub fn reconcile(documents: &[Document]) -> Reconciled {
    let records: Vec<HealthRecord> = documents.iter().map(HealthRecord::from_document).collect();
    let mut alerts = derive_alerts(&records);
    risk::rank_alerts(&mut alerts);

    tracing::debug!(
        records = records.len(),
        alerts = alerts.len(),
        "reconciled snapshot"
    );

    Reconciled { records, alerts }
}

/// Flattens every record's embedded alerts in snapshot order.
pub fn derive_alerts(records: &[HealthRecord]) -> Vec<DerivedAlert> {
    let mut alerts = Vec::new();
    let mut seen_ids = HashSet::new();

    for record in records {
        for (position, annotation) in record.alerts.iter().enumerate() {
            if annotation.severity.is_none() {
                tracing::warn!(
                    record = %record.id,
                    position,
                    "alert has no recognised severity; ranking it last"
                );
            }

            let id = unique_id(&mut seen_ids, alert_id(&record.id, position, annotation), position);

            alerts.push(DerivedAlert {
                id,
                cattle_id: record.id.clone(),
                timestamp: record.timestamp,
                message: annotation.message.clone(),
                severity: annotation.severity,
                disease: annotation
                    .disease
                    .clone()
                    .filter(|disease| !disease.is_empty())
                    .unwrap_or_else(|| record.fallback_disease()),
            });
        }
    }

    alerts
}

/// Suffixes a taken id with `-{position}`, then a counter, until it is free.
fn unique_id(seen_ids: &mut HashSet<String>, id: String, position: usize) -> String {
    if seen_ids.insert(id.clone()) {
        return id;
    }

    let mut candidate = format!("{id}-{position}");
    let mut attempt = 1usize;
    while !seen_ids.insert(candidate.clone()) {
        candidate = format!("{id}-{position}-{attempt}");
        attempt += 1;
    }
    candidate
}

/// `{record}-{rule}` when the backend names the rule, otherwise a digest that
/// stays the same across re-deliveries of the same document.
pub fn alert_id(record_id: &str, position: usize, annotation: &AlertAnnotation) -> String {
    match annotation.rule_triggered.as_deref() {
        Some(rule) if !rule.is_empty() => format!("{record_id}-{rule}"),
        _ => {
            let name = format!("{record_id}/{position}/{}", annotation.message);
            let digest = Uuid::new_v5(&ALERT_ID_NAMESPACE, name.as_bytes()).simple().to_string();
            format!("{record_id}-{position}-{}", &digest[..8])
        }
    }
}

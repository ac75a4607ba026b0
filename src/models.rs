use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Feature keys the prediction backend was trained on, in training order.
pub const FEATURE_KEYS: [&str; 16] = [
    "body_temperature",
    "breed_type_enc",
    "milk_production",
    "respiratory_rate",
    "walking_capacity",
    "sleeping_duration",
    "body_condition_score",
    "heart_rate",
    "eating_duration",
    "lying_down_duration",
    "ruminating",
    "rumen_fill",
    "faecal_consistency_enc",
    "activity_ratio",
    "eating_efficiency",
    "vital_sign_index",
];

/// Disease label used when neither the alert nor its record names one.
pub const NOT_APPLICABLE: &str = "N/A";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A raw document as delivered by the store: its id plus schemaless fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.fields.get("timestamp").and_then(parse_timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    #[serde(rename = "Low-Medium")]
    LowMedium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::LowMedium,
        Severity::Low,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Critical" => Some(Self::Critical),
            "High" => Some(Self::High),
            "Medium" => Some(Self::Medium),
            "Low-Medium" => Some(Self::LowMedium),
            "Low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::LowMedium => "Low-Medium",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lenient_severity<'de, D>(deserializer: D) -> Result<Option<Severity>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Value::as_str).and_then(Severity::parse))
}

/// Strings as-is, null as empty, anything else as its JSON text.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

/// Rule ids may arrive as numbers; null means no rule.
fn lenient_rule<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(rule) => Some(rule),
        Value::Number(rule) => Some(rule.to_string()),
        Value::Bool(rule) => Some(rule.to_string()),
        _ => None,
    })
}

fn lenient_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(label) => Some(label),
        _ => None,
    })
}

/// An alert embedded in a health record by the prediction backend. Fields of
/// an unexpected type are read leniently so the alert itself is never lost.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertAnnotation {
    #[serde(default, deserialize_with = "lenient_rule")]
    pub rule_triggered: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_severity")]
    pub severity: Option<Severity>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub disease: Option<String>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub symptom: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct MonitoringResults {
    #[serde(default)]
    pub health_status: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    pub id: String,
    pub timestamp: Option<NaiveDateTime>,
    pub vitals: BTreeMap<String, Value>,
    pub alerts: Vec<AlertAnnotation>,
    pub specific_diseases_detected: Option<Vec<String>>,
    pub monitoring: Option<MonitoringResults>,
}

impl HealthRecord {
    pub fn from_document(doc: &Document) -> Self {
        let vitals = doc
            .fields
            .get("input_data_snapshot")
            .and_then(Value::as_object)
            .map(|snapshot| {
                snapshot
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let specific_diseases_detected = doc
            .fields
            .get("specific_diseases_detected")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });

        let monitoring = doc
            .fields
            .get("monitoring_results")
            .and_then(|value| serde_json::from_value(value.clone()).ok());

        Self {
            id: doc.id.clone(),
            timestamp: doc.timestamp(),
            vitals,
            alerts: embedded_alerts(doc),
            specific_diseases_detected,
            monitoring,
        }
    }

    /// Label used for alerts that carry no disease of their own.
    pub fn fallback_disease(&self) -> String {
        match &self.specific_diseases_detected {
            Some(labels) => labels.join(", "),
            None => NOT_APPLICABLE.to_string(),
        }
    }
}

fn embedded_alerts(doc: &Document) -> Vec<AlertAnnotation> {
    let Some(Value::Array(items)) = doc.fields.get("alerts") else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            if !item.is_object() {
                tracing::warn!(record = %doc.id, position, "skipping non-object alert entry");
                return None;
            }
            match serde_json::from_value::<AlertAnnotation>(item.clone()) {
                Ok(alert) => Some(alert),
                Err(err) => {
                    tracing::warn!(
                        record = %doc.id,
                        position,
                        error = %err,
                        "skipping malformed alert annotation"
                    );
                    None
                }
            }
        })
        .collect()
}

/// One row of the alert feed, flattened out of its owning record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedAlert {
    pub id: String,
    pub cattle_id: String,
    pub timestamp: Option<NaiveDateTime>,
    pub message: String,
    pub severity: Option<Severity>,
    pub disease: String,
}

/// Accepts the backend's `%Y-%m-%d %H:%M:%S`, RFC 3339, or unix seconds.
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(text) => NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|parsed| parsed.naive_utc())
            }),
        Value::Number(number) => number
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|parsed| parsed.naive_utc()),
        _ => None,
    }
}

pub fn format_timestamp(timestamp: Option<NaiveDateTime>) -> String {
    timestamp
        .map(|value| value.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "unknown time".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> Document {
        Document::new(id, fields.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn parses_backend_and_rfc3339_timestamps() {
        let backend = parse_timestamp(&json!("2025-06-01 08:30:00")).unwrap();
        let rfc = parse_timestamp(&json!("2025-06-01T08:30:00Z")).unwrap();
        assert_eq!(backend, rfc);
        assert_eq!(parse_timestamp(&json!(10)).unwrap().and_utc().timestamp(), 10);
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(null)).is_none());
    }

    #[test]
    fn record_reads_backend_document_shape() {
        let record = HealthRecord::from_document(&doc(
            "cow-7",
            json!({
                "timestamp": "2025-06-01 08:30:00",
                "monitoring_results": {
                    "health_status": "Unhealthy",
                    "confidence": "91.20%",
                    "risk_level": "High"
                },
                "specific_diseases_detected": ["Udder Health Issue", "Systemic Infection"],
                "alerts": [{
                    "symptom": "milk_production",
                    "value": 6.1,
                    "message": "Very low milk production detected (6.1 L/day)!",
                    "severity": "Medium",
                    "rule_triggered": "Udder_MilkProd"
                }],
                "input_data_snapshot": {"body_temperature": 39.1, "breed_type": "Holstein"}
            }),
        ));

        assert_eq!(record.id, "cow-7");
        assert!(record.timestamp.is_some());
        assert_eq!(record.vitals.get("body_temperature"), Some(&json!(39.1)));
        assert_eq!(record.alerts.len(), 1);
        assert_eq!(record.alerts[0].severity, Some(Severity::Medium));
        assert_eq!(
            record.fallback_disease(),
            "Udder Health Issue, Systemic Infection"
        );
        assert_eq!(
            record.monitoring.and_then(|m| m.risk_level).as_deref(),
            Some("High")
        );
    }

    #[test]
    fn alerts_field_that_is_not_a_list_is_ignored() {
        let record = HealthRecord::from_document(&doc("cow-1", json!({"alerts": "none"})));
        assert!(record.alerts.is_empty());
        assert_eq!(record.fallback_disease(), NOT_APPLICABLE);
    }

    #[test]
    fn unknown_severity_is_kept_without_a_rank_label() {
        let record = HealthRecord::from_document(&doc(
            "cow-2",
            json!({"alerts": [{"message": "odd", "severity": "Severe"}, {"message": "bare"}, 7]}),
        ));
        assert_eq!(record.alerts.len(), 2);
        assert!(record.alerts.iter().all(|alert| alert.severity.is_none()));
    }

    #[test]
    fn alert_fields_of_unexpected_type_keep_the_alert() {
        let record = HealthRecord::from_document(&doc(
            "cow-3",
            json!({"alerts": [
                {"severity": "High", "message": null, "rule_triggered": "A"},
                {"severity": "Critical", "message": "m", "rule_triggered": 7, "disease": 3},
                {"severity": "Low", "message": 42, "symptom": ["x"], "rule_triggered": null}
            ]}),
        ));

        assert_eq!(record.alerts.len(), 3);
        assert_eq!(record.alerts[0].message, "");
        assert_eq!(record.alerts[1].rule_triggered.as_deref(), Some("7"));
        assert_eq!(record.alerts[1].disease, None);
        assert_eq!(record.alerts[2].message, "42");
        assert_eq!(record.alerts[2].symptom, None);
        assert_eq!(record.alerts[2].rule_triggered, None);
    }

    #[test]
    fn severity_names_round_trip_through_display() {
        for severity in Severity::ALL {
            assert_eq!(Severity::parse(&severity.to_string()), Some(severity));
        }
    }
}

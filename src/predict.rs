use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SubmissionError;
use crate::models::{AlertAnnotation, MonitoringResults, FEATURE_KEYS};

const EPSILON: f64 = 1e-6;

/// Features for one prediction request. Must carry exactly [`FEATURE_KEYS`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureVector {
    pub cattle_id: Option<String>,
    pub values: BTreeMap<String, Value>,
}

impl FeatureVector {
    pub fn validate(&self) -> Result<(), SubmissionError> {
        let missing: Vec<String> = FEATURE_KEYS
            .iter()
            .filter(|key| !self.values.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        let unexpected: Vec<String> = self
            .values
            .keys()
            .filter(|key| !FEATURE_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(SubmissionError::Validation {
                missing,
                unexpected,
            })
        }
    }

    fn body(&self) -> Map<String, Value> {
        let mut body: Map<String, Value> = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(cattle_id) = &self.cattle_id {
            body.insert("cattle_id".to_string(), Value::String(cattle_id.clone()));
        }
        body
    }
}

/// A sensor reading before feature engineering; one CSV row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub cattle_id: Option<String>,
    pub body_temperature: f64,
    pub breed_type_enc: f64,
    pub milk_production: f64,
    pub respiratory_rate: f64,
    pub walking_capacity: f64,
    pub sleeping_duration: f64,
    pub body_condition_score: f64,
    pub heart_rate: f64,
    pub eating_duration: f64,
    pub lying_down_duration: f64,
    pub ruminating: f64,
    pub rumen_fill: f64,
    pub faecal_consistency_enc: f64,
}

impl RawReading {
    /// Adds the engineered features the model was trained with.
    pub fn into_features(self) -> FeatureVector {
        let activity_ratio = self.walking_capacity / (self.sleeping_duration + EPSILON);
        let eating_efficiency = self.milk_production / (self.eating_duration + EPSILON);
        let vital_sign_index =
            (self.heart_rate + self.respiratory_rate + self.body_temperature) / 3.0;

        let values = [
            ("body_temperature", self.body_temperature),
            ("breed_type_enc", self.breed_type_enc),
            ("milk_production", self.milk_production),
            ("respiratory_rate", self.respiratory_rate),
            ("walking_capacity", self.walking_capacity),
            ("sleeping_duration", self.sleeping_duration),
            ("body_condition_score", self.body_condition_score),
            ("heart_rate", self.heart_rate),
            ("eating_duration", self.eating_duration),
            ("lying_down_duration", self.lying_down_duration),
            ("ruminating", self.ruminating),
            ("rumen_fill", self.rumen_fill),
            ("faecal_consistency_enc", self.faecal_consistency_enc),
            ("activity_ratio", activity_ratio),
            ("eating_efficiency", eating_efficiency),
            ("vital_sign_index", vital_sign_index),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), Value::from(value)))
        .collect();

        FeatureVector {
            cattle_id: self.cattle_id,
            values,
        }
    }
}

pub fn load_readings(csv_path: &Path) -> anyhow::Result<Vec<RawReading>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut readings = Vec::new();

    for (line, result) in reader.deserialize::<RawReading>().enumerate() {
        let reading = result.with_context(|| format!("invalid reading on row {}", line + 1))?;
        readings.push(reading);
    }

    Ok(readings)
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct PredictionDetail {
    #[serde(default)]
    pub predicted_class: Option<String>,
    #[serde(default)]
    pub prediction_probabilities: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PredictionResponse {
    #[serde(default)]
    pub cattle_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub monitoring_results: MonitoringResults,
    #[serde(default)]
    pub ml_predictions_detail: PredictionDetail,
    #[serde(default)]
    pub specific_diseases_detected: Vec<String>,
    #[serde(default)]
    pub alerts: Vec<AlertAnnotation>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
    #[serde(default)]
    missing: Vec<String>,
}

/// Client for the external prediction backend. Holds no dashboard state.
#[derive(Debug, Clone)]
pub struct PredictionClient {
    http: reqwest::Client,
    endpoint: String,
    principal: Option<String>,
}

impl PredictionClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            principal: None,
        }
    }

    /// Attributes submissions to a principal via the `X-User-Id` header.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Sends one request. No retries; the caller decides what to do on failure.
    pub async fn submit(&self, features: &FeatureVector) -> Result<PredictionResponse, SubmissionError> {
        features.validate()?;

        let mut request = self.http.post(&self.endpoint).json(&features.body());
        if let Some(principal) = &self.principal {
            request = request.header("X-User-Id", principal);
        }

        let response = request.send().await.map_err(SubmissionError::Network)?;
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(SubmissionError::Decode);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorPayload>(&body) {
            Ok(payload) if payload.missing.is_empty() => payload.error,
            Ok(payload) => format!("{} ({})", payload.error, payload.missing.join(", ")),
            Err(_) if body.is_empty() => status.to_string(),
            Err(_) => body,
        };

        tracing::warn!(status = status.as_u16(), %message, "prediction request failed");
        if status.is_server_error() {
            Err(SubmissionError::Server {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(SubmissionError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

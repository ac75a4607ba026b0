use anyhow::Context;
use serde_json::{json, Map, Value};
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::mpsc;

use crate::error::SubscriptionError;
use crate::models::{parse_timestamp, Document};
use crate::store::{CollectionQuery, DocumentStore, StoreEvent, Subscription};

/// Channel the `documents_changed` trigger publishes collection paths on.
pub const CHANGE_CHANNEL: &str = "herd_watch_documents";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn put_document(
    pool: &PgPool,
    collection_path: &str,
    doc_id: &str,
    fields: &Map<String, Value>,
) -> Result<(), sqlx::Error> {
    let recorded_at = fields.get("timestamp").and_then(parse_timestamp);

    sqlx::query(
        r#"
        INSERT INTO herd_watch.documents (collection_path, doc_id, recorded_at, fields)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (collection_path, doc_id) DO UPDATE
        SET recorded_at = EXCLUDED.recorded_at, fields = EXCLUDED.fields, updated_at = now()
        "#,
    )
    .bind(collection_path)
    .bind(doc_id)
    .bind(recorded_at)
    .bind(Json(fields))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn fetch_collection(
    pool: &PgPool,
    collection_path: &str,
) -> Result<Vec<Document>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT doc_id, fields
        FROM herd_watch.documents
        WHERE collection_path = $1
        ORDER BY recorded_at DESC NULLS LAST, doc_id
        "#,
    )
    .bind(collection_path)
    .fetch_all(pool)
    .await?;

    let mut documents = Vec::with_capacity(rows.len());
    for row in rows {
        let Json(fields): Json<Map<String, Value>> = row.try_get("fields")?;
        documents.push(Document::new(row.try_get::<String, _>("doc_id")?, fields));
    }

    Ok(documents)
}

/// Postgres-backed store. Each subscription runs a listener task that sends a
/// full snapshot up front and again whenever its collection changes.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DocumentStore for PgDocumentStore {
    fn subscribe(&self, query: CollectionQuery) -> Result<Subscription, SubscriptionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| SubscriptionError::Transport(err.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(watch_collection(self.pool.clone(), query.path.clone(), tx));
        let abort = task.abort_handle();
        Ok(Subscription::new(query.path, rx, move || abort.abort()))
    }
}

async fn watch_collection(pool: PgPool, path: String, tx: mpsc::UnboundedSender<StoreEvent>) {
    let mut listener = match listen(&pool).await {
        Ok(listener) => listener,
        Err(err) => {
            let _ = tx.send(StoreEvent::Error(err.into()));
            return;
        }
    };

    if !send_snapshot(&pool, &path, &tx).await {
        return;
    }

    loop {
        match listener.try_recv().await {
            Ok(Some(notification)) => {
                if notification.payload() != path {
                    continue;
                }
            }
            Ok(None) => {
                tracing::warn!(%path, "change listener reconnected; resyncing");
            }
            Err(err) => {
                let _ = tx.send(StoreEvent::Error(err.into()));
                return;
            }
        }

        if !send_snapshot(&pool, &path, &tx).await {
            return;
        }
    }
}

async fn listen(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGE_CHANNEL).await?;
    Ok(listener)
}

/// Returns `false` once nobody is listening any more.
async fn send_snapshot(pool: &PgPool, path: &str, tx: &mpsc::UnboundedSender<StoreEvent>) -> bool {
    let event = match fetch_collection(pool, path).await {
        Ok(documents) => {
            tracing::debug!(%path, documents = documents.len(), "delivering snapshot");
            StoreEvent::Snapshot(documents)
        }
        Err(err) => StoreEvent::Error(err.into()),
    };
    tx.send(event).is_ok()
}

pub async fn seed(pool: &PgPool, collection_path: &str) -> anyhow::Result<usize> {
    let herd = vec![
        (
            "Cattle001",
            json!({
                "cattle_id": "Cattle001",
                "timestamp": "2026-02-02 07:15:00",
                "monitoring_results": {
                    "health_status": "Unhealthy",
                    "confidence": "92.40%",
                    "risk_level": "Critical"
                },
                "specific_diseases_detected": ["Respiratory Disease", "Systemic Infection"],
                "alerts": [
                    {
                        "symptom": "body_temperature",
                        "value": 40.2,
                        "message": "Critically high body temperature detected (40.2°C)!",
                        "severity": "Critical",
                        "rule_triggered": "Systemic_Temp"
                    },
                    {
                        "symptom": "respiratory_rate",
                        "value": 45,
                        "message": "High respiratory rate detected (45 breaths/min)!",
                        "severity": "Medium",
                        "rule_triggered": "Respiratory_Rate"
                    }
                ],
                "input_data_snapshot": {
                    "body_temperature": 40.2,
                    "heart_rate": 84,
                    "respiratory_rate": 45,
                    "milk_production": 9.5
                }
            }),
        ),
        (
            "Cattle002",
            json!({
                "cattle_id": "Cattle002",
                "timestamp": "2026-02-01 18:40:00",
                "monitoring_results": {
                    "health_status": "Observation",
                    "confidence": "61.00%",
                    "risk_level": "High"
                },
                "specific_diseases_detected": ["Lameness / Musculoskeletal Issue"],
                "alerts": [
                    {
                        "symptom": "walking_capacity",
                        "value": 8500,
                        "message": "Low walking capacity detected (8500 steps/day)!",
                        "severity": "High",
                        "rule_triggered": "Musculoskeletal_Walking"
                    }
                ],
                "input_data_snapshot": {
                    "body_temperature": 38.6,
                    "walking_capacity": 8500,
                    "milk_production": 14.2
                }
            }),
        ),
        (
            "Cattle003",
            json!({
                "cattle_id": "Cattle003",
                "timestamp": "2026-01-30 09:05:00",
                "monitoring_results": {
                    "health_status": "Healthy",
                    "confidence": "88.10%",
                    "risk_level": "Low"
                },
                "specific_diseases_detected": [],
                "alerts": [],
                "input_data_snapshot": {
                    "body_temperature": 38.5,
                    "heart_rate": 64,
                    "milk_production": 21.0
                }
            }),
        ),
    ];

    let mut inserted = 0usize;
    for (doc_id, fields) in herd {
        let fields = fields
            .as_object()
            .cloned()
            .context("seed document must be an object")?;
        put_document(pool, collection_path, doc_id, &fields)
            .await
            .with_context(|| format!("failed to seed {doc_id}"))?;
        inserted += 1;
    }

    Ok(inserted)
}

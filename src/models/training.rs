use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of sources the retrieval corpus ingests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingDataType {
    Ddl,
    Documentation,
    SqlExample,
    QaPair,
    DomainKnowledge,
}

impl TrainingDataType {
    pub const ALL: [TrainingDataType; 5] = [
        TrainingDataType::Ddl,
        TrainingDataType::Documentation,
        TrainingDataType::SqlExample,
        TrainingDataType::QaPair,
        TrainingDataType::DomainKnowledge,
    ];
}

/// One unit of the retrieval corpus.
///
/// Invariant: `embedding`'s dimension equals the store-wide constant;
/// `data_type` is fixed after creation; every read filter carries
/// `(database_id, data_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: Uuid,
    pub data_type: TrainingDataType,
    pub database_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Populated for `QaPair` records.
    pub question: Option<String>,
    /// Populated for `QaPair` and `SqlExample` records.
    pub sql: Option<String>,
}

impl TrainingRecord {
    pub fn new(
        data_type: TrainingDataType,
        database_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            data_type,
            database_id: database_id.into(),
            content: content.into(),
            embedding,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            question: None,
            sql: None,
        }
    }
}

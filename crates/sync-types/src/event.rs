use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{new_id, Destination, Source, StandardizedActivity};

/// The pipeline-runtime envelope. Produced by the orchestrator, mutated by
/// the enricher, read by the router and every destination worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedActivityEvent {
    pub user_id: String,
    pub activity_id: String,
    pub pipeline_id: String,
    pub pipeline_execution_id: String,
    pub source: Source,
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub applied_enrichments: Vec<String>,
    #[serde(default)]
    pub enrichment_metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_data: Option<StandardizedActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_data_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_file_uri: Option<String>,
    #[serde(default)]
    pub use_update_method: bool,
    #[serde(default)]
    pub is_resume: bool,
    #[serde(default)]
    pub resume_only_enrichers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_pending_input_id: Option<String>,
}

impl EnrichedActivityEvent {
    pub fn seed(
        user_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        pipeline_execution_id: impl Into<String>,
        source: Source,
        destinations: Vec<Destination>,
        activity: StandardizedActivity,
    ) -> Self {
        let activity_id = new_id();
        let name = activity
            .title
            .clone()
            .unwrap_or_else(|| format!("{:?}", activity.activity_type));
        Self {
            user_id: user_id.into(),
            activity_id,
            pipeline_id: pipeline_id.into(),
            pipeline_execution_id: pipeline_execution_id.into(),
            source,
            destinations,
            name,
            description: String::new(),
            tags: Vec::new(),
            applied_enrichments: Vec::new(),
            enrichment_metadata: HashMap::new(),
            activity_data: Some(activity),
            activity_data_uri: None,
            fit_file_uri: None,
            use_update_method: false,
            is_resume: false,
            resume_only_enrichers: Vec::new(),
            resume_pending_input_id: None,
        }
    }
}

/// Structured event carried on the message bus. `attributes` always carries
/// `pipeline_execution_id` once one is known, propagated unchanged across
/// every hop (orchestrator -> enricher -> router -> destination).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: String,
    pub source_uri: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(event_type: impl Into<String>, source_uri: impl Into<String>, body: T) -> Self {
        Self {
            id: new_id(),
            source_uri: source_uri.into(),
            event_type: event_type.into(),
            time: chrono::Utc::now(),
            attributes: HashMap::new(),
            body,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn pipeline_execution_id(&self) -> Option<&str> {
        self.attributes.get("pipeline_execution_id").map(String::as_str)
    }
}

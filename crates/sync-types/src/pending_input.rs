use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingInputStatus {
    Waiting,
    Completed,
}

/// Suspension marker produced by an enricher that cannot finish
/// synchronously. Transitions WAITING -> COMPLETED are monotonic and
/// conditional: they succeed only if the current status is still WAITING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInput {
    pub id: String,
    pub user_id: String,
    pub linked_activity_id: String,
    pub pipeline_id: String,
    /// Run this suspension belongs to. Not part of the distilled field list
    /// but required to resume the right `PipelineRun`/envelope: the poller
    /// keys everything else off `pipelineExecutionId`, not `linkedActivityId`.
    pub pipeline_execution_id: String,
    pub enricher_provider_id: String,
    pub status: PendingInputStatus,
    #[serde(default)]
    pub auto_populated: bool,
    #[serde(default)]
    pub continued_without_resolution: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PendingInput {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        linked_activity_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        pipeline_execution_id: impl Into<String>,
        enricher_provider_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            linked_activity_id: linked_activity_id.into(),
            pipeline_id: pipeline_id.into(),
            pipeline_execution_id: pipeline_execution_id.into(),
            enricher_provider_id: enricher_provider_id.into(),
            status: PendingInputStatus::Waiting,
            auto_populated: false,
            continued_without_resolution: false,
            original_payload: None,
            input_data: None,
            auto_deadline: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.auto_deadline.map(|d| now >= d).unwrap_or(false)
    }
}

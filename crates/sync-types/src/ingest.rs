use serde::{Deserialize, Serialize};

use crate::StandardizedActivity;

/// Body carried on the `raw-activity` topic. Produced by source handlers
/// (webhook pushes, scheduled polls) — out of scope here beyond this
/// contract. `pipeline_execution_id` is only set when a source handler
/// itself is replaying a known execution; the orchestrator mints a fresh
/// one otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawActivityMessage {
    pub user_id: String,
    pub activity: StandardizedActivity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_execution_id: Option<String>,
}

impl RawActivityMessage {
    pub fn new(user_id: impl Into<String>, activity: StandardizedActivity) -> Self {
        Self {
            user_id: user_id.into(),
            activity,
            pipeline_execution_id: None,
        }
    }
}

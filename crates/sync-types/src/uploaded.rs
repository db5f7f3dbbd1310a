use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Destination, Source};

/// Bounceback-prevention entry. Written on every successful upload or when
/// the uploader discovers the activity already exists at the destination;
/// read by source handlers before admitting webhook-pushed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedActivityRecord {
    pub user_id: String,
    pub destination: Destination,
    pub destination_id: String,
    pub source: Source,
    pub external_id: String,
    pub start_time: DateTime<Utc>,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedActivityRecord {
    pub fn id(destination: Destination, destination_id: &str) -> String {
        format!("{}:{}", destination, destination_id)
    }

    pub fn is_within_window(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.uploaded_at) <= window
    }
}

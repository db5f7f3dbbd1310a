use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActivityType, Destination, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    Created,
    Enriching,
    PendingInput,
    Routing,
    Partial,
    Synced,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoosterStatus {
    Success,
    Failed,
    Skipped,
    PendingInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoosterRecord {
    pub provider_id: String,
    pub status: BoosterStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationOutcome {
    pub destination: Destination,
    pub status: DestinationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DestinationOutcome {
    pub fn pending(destination: Destination) -> Self {
        Self {
            destination,
            status: DestinationStatus::Pending,
            external_id: None,
            error: None,
            skip_reason: None,
            completed_at: None,
        }
    }
}

/// One record per `(userId, pipelineExecutionId)`. The single user-facing
/// record of what happened to a run: `status`, boosters, and destination
/// outcomes collectively describe it. Never mirrored into a parallel
/// aggregate — write outcomes here only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub pipeline_execution_id: String,
    pub user_id: String,
    pub pipeline_id: String,
    pub activity_id: String,
    pub source: Source,
    pub source_activity_id: String,
    #[serde(default)]
    pub title: String,
    pub activity_type: ActivityType,
    pub start_time: DateTime<Utc>,
    pub status: PipelineRunStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub boosters: Vec<BoosterRecord>,
    pub destinations: Vec<DestinationOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_event_uri: Option<String>,
}

impl PipelineRun {
    pub fn new(
        pipeline_execution_id: impl Into<String>,
        user_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        activity_id: impl Into<String>,
        source: Source,
        source_activity_id: impl Into<String>,
        activity_type: ActivityType,
        start_time: DateTime<Utc>,
        destinations: Vec<Destination>,
    ) -> Self {
        let now = Utc::now();
        Self {
            pipeline_execution_id: pipeline_execution_id.into(),
            user_id: user_id.into(),
            pipeline_id: pipeline_id.into(),
            activity_id: activity_id.into(),
            source,
            source_activity_id: source_activity_id.into(),
            title: String::new(),
            activity_type,
            start_time,
            status: PipelineRunStatus::Created,
            status_message: None,
            boosters: Vec::new(),
            destinations: destinations
                .into_iter()
                .map(DestinationOutcome::pending)
                .collect(),
            created_at: now,
            updated_at: now,
            enriched_event_uri: None,
        }
    }

    /// P3: aggregate status reflects the destination outcomes. SYNCED iff
    /// every destination succeeded; PARTIAL if some did and some did not;
    /// FAILED if none succeeded and at least one hard-failed.
    pub fn recompute_status(&mut self) {
        if self.status == PipelineRunStatus::PendingInput {
            return;
        }
        if self.destinations.iter().any(|d| d.status == DestinationStatus::Pending) {
            self.status = PipelineRunStatus::Routing;
            return;
        }
        let success = self
            .destinations
            .iter()
            .filter(|d| d.status == DestinationStatus::Success)
            .count();
        let failed = self
            .destinations
            .iter()
            .filter(|d| d.status == DestinationStatus::Failed)
            .count();
        self.status = if success == self.destinations.len() {
            PipelineRunStatus::Synced
        } else if success > 0 {
            PipelineRunStatus::Partial
        } else if failed > 0 {
            PipelineRunStatus::Failed
        } else {
            // all SKIPPED, none SUCCESS, none FAILED
            PipelineRunStatus::Skipped
        };
        self.updated_at = Utc::now();
    }

    /// Transactional read-modify-write merge: existing booster for the same
    /// provider is replaced, others preserved.
    pub fn upsert_booster(&mut self, record: BoosterRecord) {
        if let Some(existing) = self
            .boosters
            .iter_mut()
            .find(|b| b.provider_id == record.provider_id)
        {
            *existing = record;
        } else {
            self.boosters.push(record);
        }
        self.updated_at = Utc::now();
    }

    /// Transactional read-modify-write merge keyed on the destination enum.
    pub fn upsert_destination_outcome(&mut self, outcome: DestinationOutcome) {
        if let Some(existing) = self
            .destinations
            .iter_mut()
            .find(|d| d.destination == outcome.destination)
        {
            *existing = outcome;
        } else {
            self.destinations.push(outcome);
        }
        self.recompute_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(destinations: Vec<Destination>) -> PipelineRun {
        PipelineRun::new(
            "pe-1",
            "u-1",
            "p-1",
            "a-1",
            Source::Strava,
            "src-1",
            ActivityType::Run,
            Utc::now(),
            destinations,
        )
    }

    #[test]
    fn all_success_is_synced() {
        let mut run = run_with(vec![Destination::GitRepo, Destination::GoogleSheets]);
        run.upsert_destination_outcome(DestinationOutcome {
            destination: Destination::GitRepo,
            status: DestinationStatus::Success,
            external_id: Some("x1".into()),
            error: None,
            skip_reason: None,
            completed_at: Some(Utc::now()),
        });
        run.upsert_destination_outcome(DestinationOutcome {
            destination: Destination::GoogleSheets,
            status: DestinationStatus::Success,
            external_id: Some("x2".into()),
            error: None,
            skip_reason: None,
            completed_at: Some(Utc::now()),
        });
        assert_eq!(run.status, PipelineRunStatus::Synced);
    }

    #[test]
    fn mixed_outcomes_is_partial() {
        let mut run = run_with(vec![Destination::GitRepo, Destination::GoogleSheets]);
        run.upsert_destination_outcome(DestinationOutcome {
            destination: Destination::GitRepo,
            status: DestinationStatus::Failed,
            external_id: None,
            error: Some("boom".into()),
            skip_reason: None,
            completed_at: Some(Utc::now()),
        });
        run.upsert_destination_outcome(DestinationOutcome {
            destination: Destination::GoogleSheets,
            status: DestinationStatus::Success,
            external_id: Some("x2".into()),
            error: None,
            skip_reason: None,
            completed_at: Some(Utc::now()),
        });
        assert_eq!(run.status, PipelineRunStatus::Partial);
    }

    #[test]
    fn upsert_booster_replaces_existing_provider_entry() {
        let mut run = run_with(vec![Destination::GitRepo]);
        run.upsert_booster(BoosterRecord {
            provider_id: "weather".into(),
            status: BoosterStatus::Failed,
            duration_ms: Some(10),
            metadata: HashMap::new(),
            error: Some("timeout".into()),
        });
        run.upsert_booster(BoosterRecord {
            provider_id: "weather".into(),
            status: BoosterStatus::Success,
            duration_ms: Some(20),
            metadata: HashMap::new(),
            error: None,
        });
        assert_eq!(run.boosters.len(), 1);
        assert_eq!(run.boosters[0].status, BoosterStatus::Success);
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;

use sync_types::{
    BoosterRecord, Destination, DestinationOutcome, PendingInput, Pipeline, PipelineRun,
    PipelineRunStatus, Source, UploadedActivityRecord, User,
};

use crate::StoreError;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Option<User>;
    async fn put_user(&self, user: User) -> Result<(), StoreError>;

    async fn put_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError>;
    async fn get_pipeline(&self, pipeline_id: &str) -> Option<Pipeline>;
    async fn list_matching_pipelines(&self, user_id: &str, source: Source) -> Vec<Pipeline>;

    async fn get_pipeline_run(&self, pipeline_execution_id: &str) -> Option<PipelineRun>;
    /// Idempotent create keyed on `pipelineExecutionId` (P1). Returns `false`
    /// without overwriting anything if a run with this id already exists.
    async fn create_pipeline_run(&self, run: PipelineRun) -> Result<bool, StoreError>;
    async fn upsert_booster(
        &self,
        pipeline_execution_id: &str,
        record: BoosterRecord,
    ) -> Result<(), StoreError>;
    async fn upsert_destination_outcome(
        &self,
        pipeline_execution_id: &str,
        outcome: DestinationOutcome,
    ) -> Result<(), StoreError>;
    async fn set_pipeline_run_status(
        &self,
        pipeline_execution_id: &str,
        status: PipelineRunStatus,
        message: Option<String>,
    ) -> Result<(), StoreError>;
    async fn set_enriched_event_uri(
        &self,
        pipeline_execution_id: &str,
        uri: String,
    ) -> Result<(), StoreError>;

    async fn get_uploaded_activity(
        &self,
        user_id: &str,
        destination: Destination,
        destination_id: &str,
    ) -> Option<UploadedActivityRecord>;
    async fn put_uploaded_activity(&self, record: UploadedActivityRecord) -> Result<(), StoreError>;

    async fn put_pending_input(&self, input: PendingInput) -> Result<(), StoreError>;
    async fn get_pending_input(&self, user_id: &str, id: &str) -> Option<PendingInput>;
    /// Conditional WAITING -> COMPLETED transition (P7). `Ok(false)` (not an
    /// error) means the input was already COMPLETED by someone else.
    async fn complete_pending_input(
        &self,
        user_id: &str,
        id: &str,
        input_data: Value,
    ) -> Result<bool, StoreError>;
    async fn list_resumable_pending_inputs(&self, enricher_provider_id: &str) -> Vec<PendingInput>;

    async fn increment_counter(&self, user_id: &str, key: &str, delta: i64) -> i64;
    /// Compare-and-set: updates and returns `true` only if `value` is
    /// strictly greater than the stored record.
    async fn raise_personal_record(&self, user_id: &str, key: &str, value: f64) -> bool;
    async fn get_booster_data(&self, user_id: &str, key: &str) -> Option<Value>;
    async fn set_booster_data(&self, user_id: &str, key: &str, value: Value) -> Result<(), StoreError>;
}

fn scoped_key(user_id: &str, key: &str) -> String {
    format!("{}/{}", user_id, key)
}

/// File-backed state store: one in-memory `RwLock<HashMap<..>>` per
/// collection, flushed to its own JSON file on every write. Collections are
/// independent files rather than one big document so a crash mid-flush loses
/// at most one collection's latest write.
pub struct JsonFileStore {
    base: PathBuf,
    users: RwLock<HashMap<String, User>>,
    pipelines: RwLock<HashMap<String, Pipeline>>,
    pipeline_runs: RwLock<HashMap<String, PipelineRun>>,
    uploaded_activities: RwLock<HashMap<String, UploadedActivityRecord>>,
    pending_inputs: RwLock<HashMap<String, PendingInput>>,
    counters: RwLock<HashMap<String, i64>>,
    personal_records: RwLock<HashMap<String, f64>>,
    booster_data: RwLock<HashMap<String, Value>>,
}

impl JsonFileStore {
    pub async fn new(base: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        Ok(Self {
            users: RwLock::new(load_collection(&base, "users.json").await?),
            pipelines: RwLock::new(load_collection(&base, "pipelines.json").await?),
            pipeline_runs: RwLock::new(load_collection(&base, "pipeline_runs.json").await?),
            uploaded_activities: RwLock::new(
                load_collection(&base, "uploaded_activities.json").await?,
            ),
            pending_inputs: RwLock::new(load_collection(&base, "pending_inputs.json").await?),
            counters: RwLock::new(load_collection(&base, "counters.json").await?),
            personal_records: RwLock::new(load_collection(&base, "personal_records.json").await?),
            booster_data: RwLock::new(load_collection(&base, "booster_data.json").await?),
            base,
        })
    }

    async fn flush_users(&self) -> Result<(), StoreError> {
        write_collection(&self.base, "users.json", &*self.users.read().await).await
    }

    async fn flush_pipelines(&self) -> Result<(), StoreError> {
        write_collection(&self.base, "pipelines.json", &*self.pipelines.read().await).await
    }

    async fn flush_pipeline_runs(&self) -> Result<(), StoreError> {
        write_collection(
            &self.base,
            "pipeline_runs.json",
            &*self.pipeline_runs.read().await,
        )
        .await
    }

    async fn flush_uploaded_activities(&self) -> Result<(), StoreError> {
        write_collection(
            &self.base,
            "uploaded_activities.json",
            &*self.uploaded_activities.read().await,
        )
        .await
    }

    async fn flush_pending_inputs(&self) -> Result<(), StoreError> {
        write_collection(
            &self.base,
            "pending_inputs.json",
            &*self.pending_inputs.read().await,
        )
        .await
    }

    async fn flush_counters(&self) -> Result<(), StoreError> {
        write_collection(&self.base, "counters.json", &*self.counters.read().await).await
    }

    async fn flush_personal_records(&self) -> Result<(), StoreError> {
        write_collection(
            &self.base,
            "personal_records.json",
            &*self.personal_records.read().await,
        )
        .await
    }

    async fn flush_booster_data(&self) -> Result<(), StoreError> {
        write_collection(
            &self.base,
            "booster_data.json",
            &*self.booster_data.read().await,
        )
        .await
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.read().await.get(user_id).cloned()
    }

    async fn put_user(&self, user: User) -> Result<(), StoreError> {
        self.users.write().await.insert(user.id.clone(), user);
        self.flush_users().await
    }

    async fn put_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError> {
        self.pipelines
            .write()
            .await
            .insert(pipeline.id.clone(), pipeline);
        self.flush_pipelines().await
    }

    async fn get_pipeline(&self, pipeline_id: &str) -> Option<Pipeline> {
        self.pipelines.read().await.get(pipeline_id).cloned()
    }

    async fn list_matching_pipelines(&self, user_id: &str, source: Source) -> Vec<Pipeline> {
        self.pipelines
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id && p.source == source && !p.disabled)
            .cloned()
            .collect()
    }

    async fn get_pipeline_run(&self, pipeline_execution_id: &str) -> Option<PipelineRun> {
        self.pipeline_runs
            .read()
            .await
            .get(pipeline_execution_id)
            .cloned()
    }

    async fn create_pipeline_run(&self, run: PipelineRun) -> Result<bool, StoreError> {
        {
            let mut runs = self.pipeline_runs.write().await;
            if runs.contains_key(&run.pipeline_execution_id) {
                return Ok(false);
            }
            runs.insert(run.pipeline_execution_id.clone(), run);
        }
        self.flush_pipeline_runs().await?;
        Ok(true)
    }

    async fn upsert_booster(
        &self,
        pipeline_execution_id: &str,
        record: BoosterRecord,
    ) -> Result<(), StoreError> {
        {
            let mut runs = self.pipeline_runs.write().await;
            let run = runs
                .get_mut(pipeline_execution_id)
                .ok_or_else(|| StoreError::NotFound(pipeline_execution_id.to_string()))?;
            run.upsert_booster(record);
        }
        self.flush_pipeline_runs().await
    }

    async fn upsert_destination_outcome(
        &self,
        pipeline_execution_id: &str,
        outcome: DestinationOutcome,
    ) -> Result<(), StoreError> {
        {
            let mut runs = self.pipeline_runs.write().await;
            let run = runs
                .get_mut(pipeline_execution_id)
                .ok_or_else(|| StoreError::NotFound(pipeline_execution_id.to_string()))?;
            run.upsert_destination_outcome(outcome);
        }
        self.flush_pipeline_runs().await
    }

    async fn set_pipeline_run_status(
        &self,
        pipeline_execution_id: &str,
        status: PipelineRunStatus,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        {
            let mut runs = self.pipeline_runs.write().await;
            let run = runs
                .get_mut(pipeline_execution_id)
                .ok_or_else(|| StoreError::NotFound(pipeline_execution_id.to_string()))?;
            run.status = status;
            run.status_message = message;
            run.updated_at = chrono::Utc::now();
        }
        self.flush_pipeline_runs().await
    }

    async fn set_enriched_event_uri(
        &self,
        pipeline_execution_id: &str,
        uri: String,
    ) -> Result<(), StoreError> {
        {
            let mut runs = self.pipeline_runs.write().await;
            let run = runs
                .get_mut(pipeline_execution_id)
                .ok_or_else(|| StoreError::NotFound(pipeline_execution_id.to_string()))?;
            run.enriched_event_uri = Some(uri);
        }
        self.flush_pipeline_runs().await
    }

    async fn get_uploaded_activity(
        &self,
        user_id: &str,
        destination: Destination,
        destination_id: &str,
    ) -> Option<UploadedActivityRecord> {
        let key = scoped_key(user_id, &UploadedActivityRecord::id(destination, destination_id));
        self.uploaded_activities.read().await.get(&key).cloned()
    }

    async fn put_uploaded_activity(&self, record: UploadedActivityRecord) -> Result<(), StoreError> {
        let key = scoped_key(
            &record.user_id,
            &UploadedActivityRecord::id(record.destination, &record.destination_id),
        );
        self.uploaded_activities.write().await.insert(key, record);
        self.flush_uploaded_activities().await
    }

    async fn put_pending_input(&self, input: PendingInput) -> Result<(), StoreError> {
        let key = scoped_key(&input.user_id, &input.id);
        self.pending_inputs.write().await.insert(key, input);
        self.flush_pending_inputs().await
    }

    async fn get_pending_input(&self, user_id: &str, id: &str) -> Option<PendingInput> {
        let key = scoped_key(user_id, id);
        self.pending_inputs.read().await.get(&key).cloned()
    }

    async fn complete_pending_input(
        &self,
        user_id: &str,
        id: &str,
        input_data: Value,
    ) -> Result<bool, StoreError> {
        let key = scoped_key(user_id, id);
        {
            let mut inputs = self.pending_inputs.write().await;
            let input = inputs
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            if input.status == sync_types::PendingInputStatus::Completed {
                return Ok(false);
            }
            input.status = sync_types::PendingInputStatus::Completed;
            input.input_data = Some(input_data);
            input.completed_at = Some(chrono::Utc::now());
        }
        self.flush_pending_inputs().await?;
        Ok(true)
    }

    async fn list_resumable_pending_inputs(&self, enricher_provider_id: &str) -> Vec<PendingInput> {
        self.pending_inputs
            .read()
            .await
            .values()
            .filter(|input| {
                input.enricher_provider_id == enricher_provider_id
                    && input.status == sync_types::PendingInputStatus::Waiting
                    && input.auto_populated
                    && input.continued_without_resolution
            })
            .cloned()
            .collect()
    }

    async fn increment_counter(&self, user_id: &str, key: &str, delta: i64) -> i64 {
        let scoped = scoped_key(user_id, key);
        let value = {
            let mut counters = self.counters.write().await;
            let entry = counters.entry(scoped).or_insert(0);
            *entry += delta;
            *entry
        };
        if let Err(err) = self.flush_counters().await {
            tracing::warn!(target: "sync.store", %err, "failed to flush counters after increment");
        }
        value
    }

    async fn raise_personal_record(&self, user_id: &str, key: &str, value: f64) -> bool {
        let scoped = scoped_key(user_id, key);
        let raised = {
            let mut records = self.personal_records.write().await;
            match records.get(&scoped) {
                Some(existing) if *existing >= value => false,
                _ => {
                    records.insert(scoped, value);
                    true
                }
            }
        };
        if raised {
            if let Err(err) = self.flush_personal_records().await {
                tracing::warn!(target: "sync.store", %err, "failed to flush personal records");
            }
        }
        raised
    }

    async fn get_booster_data(&self, user_id: &str, key: &str) -> Option<Value> {
        let scoped = scoped_key(user_id, key);
        self.booster_data.read().await.get(&scoped).cloned()
    }

    async fn set_booster_data(&self, user_id: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let scoped = scoped_key(user_id, key);
        self.booster_data.write().await.insert(scoped, value);
        self.flush_booster_data().await
    }
}

async fn load_collection<T: DeserializeOwned>(
    base: &Path,
    file_name: &str,
) -> Result<HashMap<String, T>, StoreError> {
    let path = base.join(file_name);
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(&path).await?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

async fn write_collection<T: Serialize>(
    base: &Path,
    file_name: &str,
    collection: &HashMap<String, T>,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string_pretty(collection)?;
    fs::write(base.join(file_name), payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sync_types::{ActivityType, DestinationStatus, PipelineRunStatus as Status};

    fn sample_run(id: &str, user_id: &str) -> PipelineRun {
        PipelineRun::new(
            id,
            user_id,
            "pipe-1",
            "act-1",
            Source::Strava,
            "src-act-1",
            ActivityType::Run,
            Utc::now(),
            vec![Destination::GitRepo, Destination::GoogleSheets],
        )
    }

    #[tokio::test]
    async fn create_pipeline_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).await.unwrap();
        let run = sample_run("pe-1", "u-1");
        assert!(store.create_pipeline_run(run.clone()).await.unwrap());
        assert!(!store.create_pipeline_run(run).await.unwrap());
    }

    #[tokio::test]
    async fn destination_outcome_upsert_recomputes_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).await.unwrap();
        store.create_pipeline_run(sample_run("pe-2", "u-1")).await.unwrap();
        store
            .upsert_destination_outcome(
                "pe-2",
                DestinationOutcome {
                    destination: Destination::GitRepo,
                    status: DestinationStatus::Success,
                    external_id: Some("x1".into()),
                    error: None,
                    skip_reason: None,
                    completed_at: Some(Utc::now()),
                },
            )
            .await
            .unwrap();
        let run = store.get_pipeline_run("pe-2").await.unwrap();
        assert_eq!(run.status, Status::Routing);
    }

    #[tokio::test]
    async fn pending_input_completes_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).await.unwrap();
        let input = PendingInput::new("pi-1", "u-1", "act-1", "pipe-1", "pe-1", "weather");
        store.put_pending_input(input).await.unwrap();
        assert!(store
            .complete_pending_input("u-1", "pi-1", Value::String("done".into()))
            .await
            .unwrap());
        assert!(!store
            .complete_pending_input("u-1", "pi-1", Value::String("again".into()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn personal_record_only_raises_on_strictly_greater_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).await.unwrap();
        assert!(store.raise_personal_record("u-1", "5k_pace", 21.5).await);
        assert!(!store.raise_personal_record("u-1", "5k_pace", 20.0).await);
        assert!(store.raise_personal_record("u-1", "5k_pace", 22.1).await);
    }
}

//! Destination-upload protocol: one `UploadWorker` per destination topic
//! drives the `RECEIVED -> RESOLVED -> DECIDE -> (CREATE|UPDATE|SKIP) ->
//! OUTCOME_WRITTEN` state machine from spec section 4.4. Concrete providers
//! plug in as a `DestinationAdapter`; the worker owns everything else.

pub mod adapter;
pub mod adapters;
mod bounceback;
mod error;
pub mod http;
mod registry;

pub use adapter::{DestinationAdapter, RemoteRecord, UploadPayload};
pub use bounceback::is_bounceback;
pub use error::DestinationError;
pub use registry::DestinationRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use sync_bus::{topics, BusEnvelope, MessageBus};
use sync_observability::{emit_event, ObservabilityEvent, ProcessKind};
use sync_store::{ArtifactStore, StateStore};
use sync_types::{
    Destination, DestinationOutcome, DestinationStatus, EnrichedActivityEvent, PipelineRunStatus,
    UploadedActivityRecord,
};

const COMPONENT: &str = "upload_worker";
const SECTION_HEADER_PREFIX: &str = "section_header_";

pub struct UploadWorker {
    destination: Destination,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn StateStore>,
    artifacts: Arc<dyn ArtifactStore>,
    adapter: Arc<dyn DestinationAdapter>,
}

impl UploadWorker {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn StateStore>,
        artifacts: Arc<dyn ArtifactStore>,
        adapter: Arc<dyn DestinationAdapter>,
    ) -> Self {
        Self {
            destination: adapter.destination(),
            bus,
            store,
            artifacts,
            adapter,
        }
    }

    /// Runs the full upload protocol for one delivery on this worker's
    /// `job.<destination>` topic.
    pub async fn handle(&self, envelope: BusEnvelope) -> anyhow::Result<()> {
        // RECEIVED -> RESOLVED
        let mut event: EnrichedActivityEvent = serde_json::from_value(envelope.body)?;
        let pipeline_execution_id = event.pipeline_execution_id.clone();

        if event.activity_data.is_none() {
            if let Some(uri) = event.activity_data_uri.clone() {
                let bytes = self.artifacts.get(&uri).await?;
                event.activity_data = Some(serde_json::from_slice(&bytes)?);
            }
        }

        let config = self.destination_config(&event);

        // RESOLVED -> DECIDE
        let run = self
            .store
            .get_pipeline_run(&pipeline_execution_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("pipeline run {} not found", pipeline_execution_id))?;
        let existing = run
            .destinations
            .iter()
            .find(|d| d.destination == self.destination)
            .cloned();

        // A CREATE attempt for an execution the state store already shows as
        // fully SYNCED is a stale redelivery, not a fresh upload (spec
        // section 7, `duplicate`). An UPDATE redelivery is handled instead
        // by the byte-identical no-op check below, which still records
        // SUCCESS rather than SKIPPED per spec section 4.4 step 4.
        let outcome = match existing.as_ref().and_then(|d| d.external_id.clone()) {
            Some(external_id) => self.update(&event, &config, &external_id).await,
            None if run.status == PipelineRunStatus::Synced => {
                Err(DestinationError::Duplicate(format!(
                    "pipeline execution {} already synced",
                    pipeline_execution_id
                )))
            }
            None => self.create(&event, &config).await,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) if err.is_transient() => {
                anyhow::bail!(
                    "destination {} upload failed transiently: {}",
                    self.destination,
                    err
                )
            }
            Err(err) => DestinationOutcome {
                destination: self.destination,
                status: if matches!(err, DestinationError::Permanent(_)) {
                    DestinationStatus::Failed
                } else {
                    DestinationStatus::Skipped
                },
                external_id: None,
                error: Some(err.to_string()),
                skip_reason: Some(err.skip_reason().to_string()),
                completed_at: Some(chrono::Utc::now()),
            },
        };

        // OUTCOME_WRITTEN -> DONE
        self.store
            .upsert_destination_outcome(&pipeline_execution_id, outcome.clone())
            .await?;

        emit_event(
            tracing::Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "destination_outcome_written",
                component: COMPONENT,
                correlation_id: Some(&pipeline_execution_id),
                user_id: Some(&event.user_id),
                provider_id: None,
                destination: Some(&self.destination.to_string()),
                status: Some(match outcome.status {
                    DestinationStatus::Success => "success",
                    DestinationStatus::Failed => "failed",
                    DestinationStatus::Skipped => "skipped",
                    DestinationStatus::Pending => "pending",
                }),
                error_code: outcome.skip_reason.as_deref(),
                detail: outcome.error.as_deref(),
            },
        );

        Ok(())
    }

    /// This destination's config slice, read off `enrichmentMetadata` by the
    /// `<destination>_` key prefix the enricher runtime injects.
    fn destination_config(&self, event: &EnrichedActivityEvent) -> HashMap<String, String> {
        let prefix = format!("{}_", self.destination);
        event
            .enrichment_metadata
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(prefix.as_str())
                    .map(|stripped| (stripped.to_string(), value.clone()))
            })
            .collect()
    }

    async fn create(
        &self,
        event: &EnrichedActivityEvent,
        config: &HashMap<String, String>,
    ) -> Result<DestinationOutcome, DestinationError> {
        let record = self
            .adapter
            .create(UploadPayload {
                title: &event.name,
                description: &event.description,
                config,
            })
            .await?;

        self.store
            .put_uploaded_activity(UploadedActivityRecord {
                user_id: event.user_id.clone(),
                destination: self.destination,
                destination_id: record.external_id.clone(),
                source: event.source,
                external_id: event.activity_id.clone(),
                start_time: event
                    .activity_data
                    .as_ref()
                    .map(|a| a.start_time)
                    .unwrap_or_else(chrono::Utc::now),
                uploaded_at: chrono::Utc::now(),
            })
            .await
            .map_err(|err| DestinationError::Permanent(err.to_string()))?;

        Ok(DestinationOutcome {
            destination: self.destination,
            status: DestinationStatus::Success,
            external_id: Some(record.external_id),
            error: None,
            skip_reason: None,
            completed_at: Some(chrono::Utc::now()),
        })
    }

    async fn update(
        &self,
        event: &EnrichedActivityEvent,
        config: &HashMap<String, String>,
        external_id: &str,
    ) -> Result<DestinationOutcome, DestinationError> {
        let existing = match self.adapter.fetch(external_id, config).await {
            Ok(record) => record,
            Err(DestinationError::NotFound(_)) => {
                tracing::info!(
                    target: "sync.destinations",
                    destination = %self.destination,
                    "remote record missing on update, no create fallback configured"
                );
                return Ok(DestinationOutcome {
                    destination: self.destination,
                    status: DestinationStatus::Skipped,
                    external_id: Some(external_id.to_string()),
                    error: None,
                    skip_reason: Some("not_found".to_string()),
                    completed_at: Some(chrono::Utc::now()),
                });
            }
            Err(err) => return Err(err),
        };

        let mut merged_description = existing.description.clone();
        for (key, heading) in &event.enrichment_metadata {
            if !key.starts_with(SECTION_HEADER_PREFIX) {
                continue;
            }
            if let Some(section) = sync_types::section::extract_section(&event.description, heading) {
                merged_description =
                    sync_types::section::replace_section(&merged_description, heading, &section);
            }
        }
        let merged_title = event.name.clone();

        if merged_title == existing.title && merged_description == existing.description {
            // Merged document is byte-identical: skip the round-trip, still
            // a successful no-op outcome.
            return Ok(DestinationOutcome {
                destination: self.destination,
                status: DestinationStatus::Success,
                external_id: Some(external_id.to_string()),
                error: None,
                skip_reason: None,
                completed_at: Some(chrono::Utc::now()),
            });
        }

        self.adapter
            .update(
                external_id,
                UploadPayload {
                    title: &merged_title,
                    description: &merged_description,
                    config,
                },
            )
            .await?;

        Ok(DestinationOutcome {
            destination: self.destination,
            status: DestinationStatus::Success,
            external_id: Some(external_id.to_string()),
            error: None,
            skip_reason: None,
            completed_at: Some(chrono::Utc::now()),
        })
    }

    /// Subscribes to `job.<destination>` and runs forever, one task per
    /// delivery.
    pub async fn run(self: Arc<Self>) {
        let mut subscription = self.bus.subscribe(&topics::job_topic(self.destination));
        while let Some(delivery) = subscription.recv().await {
            let worker = self.clone();
            tokio::spawn(async move {
                if let Err(err) = worker.handle(delivery.envelope).await {
                    tracing::error!(target: "sync.destinations", destination = %worker.destination, %err, "upload failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sync_bus::BroadcastBus;
    use sync_store::{FsArtifactStore, JsonFileStore};
    use sync_types::{ActivityType, Envelope, Source, StandardizedActivity};

    struct StubAdapter {
        destination: Destination,
        next_external_id: &'static str,
        existing: tokio::sync::Mutex<Option<RemoteRecord>>,
    }

    #[async_trait]
    impl DestinationAdapter for StubAdapter {
        fn destination(&self) -> Destination {
            self.destination
        }

        async fn create(&self, payload: UploadPayload<'_>) -> Result<RemoteRecord, DestinationError> {
            let record = RemoteRecord {
                external_id: self.next_external_id.to_string(),
                title: payload.title.to_string(),
                description: payload.description.to_string(),
            };
            *self.existing.lock().await = Some(record.clone());
            Ok(record)
        }

        async fn fetch(
            &self,
            _external_id: &str,
            _config: &HashMap<String, String>,
        ) -> Result<RemoteRecord, DestinationError> {
            self.existing
                .lock()
                .await
                .clone()
                .ok_or_else(|| DestinationError::NotFound("no such record".to_string()))
        }

        async fn update(
            &self,
            _external_id: &str,
            payload: UploadPayload<'_>,
        ) -> Result<(), DestinationError> {
            *self.existing.lock().await = Some(RemoteRecord {
                external_id: self.next_external_id.to_string(),
                title: payload.title.to_string(),
                description: payload.description.to_string(),
            });
            Ok(())
        }
    }

    fn seed_event(destination: Destination) -> EnrichedActivityEvent {
        let activity = StandardizedActivity::new("ext-1", Source::Strava, ActivityType::Run);
        let mut event = EnrichedActivityEvent::seed(
            "u-1",
            "pipe-1",
            "pe-1",
            Source::Strava,
            vec![destination],
            activity,
        );
        event.description = "### Weather\n\nsunny\n".to_string();
        event
            .enrichment_metadata
            .insert("section_header_weather".to_string(), "### Weather".to_string());
        event
    }

    async fn harness(
        destination: Destination,
    ) -> (tempfile::TempDir, Arc<JsonFileStore>, Arc<StubAdapter>, UploadWorker) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("state")).await.unwrap());
        let artifacts = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let bus = Arc::new(BroadcastBus::new());
        store
            .create_pipeline_run(sync_types::PipelineRun::new(
                "pe-1",
                "u-1",
                "pipe-1",
                "act-1",
                Source::Strava,
                "ext-1",
                ActivityType::Run,
                chrono::Utc::now(),
                vec![destination],
            ))
            .await
            .unwrap();
        let adapter = Arc::new(StubAdapter {
            destination,
            next_external_id: "remote-1",
            existing: tokio::sync::Mutex::new(None),
        });
        let worker = UploadWorker::new(bus, store.clone(), artifacts, adapter.clone());
        (dir, store, adapter, worker)
    }

    #[tokio::test]
    async fn first_upload_creates_and_records_success() {
        let (_dir, store, _adapter, worker) = harness(Destination::GitRepo).await;
        let envelope: BusEnvelope = Envelope::new(
            "com.fitglue.router.dispatched",
            "router/pipe-1",
            serde_json::to_value(seed_event(Destination::GitRepo)).unwrap(),
        );
        worker.handle(envelope).await.unwrap();

        let run = store.get_pipeline_run("pe-1").await.unwrap();
        let outcome = run
            .destinations
            .iter()
            .find(|d| d.destination == Destination::GitRepo)
            .unwrap();
        assert_eq!(outcome.status, DestinationStatus::Success);
        assert_eq!(outcome.external_id.as_deref(), Some("remote-1"));

        let bounced = store
            .get_uploaded_activity("u-1", Destination::GitRepo, "remote-1")
            .await;
        assert!(bounced.is_some());
    }

    #[tokio::test]
    async fn second_delivery_updates_by_merging_sections() {
        let (_dir, store, adapter, worker) = harness(Destination::GitRepo).await;
        let first: BusEnvelope = Envelope::new(
            "com.fitglue.router.dispatched",
            "router/pipe-1",
            serde_json::to_value(seed_event(Destination::GitRepo)).unwrap(),
        );
        worker.handle(first).await.unwrap();

        let mut second_event = seed_event(Destination::GitRepo);
        second_event.description = "### Weather\n\nrainy now\n".to_string();
        let second: BusEnvelope = Envelope::new(
            "com.fitglue.router.dispatched",
            "router/pipe-1",
            serde_json::to_value(second_event).unwrap(),
        );
        worker.handle(second).await.unwrap();

        let remote = adapter.existing.lock().await.clone().unwrap();
        assert!(remote.description.contains("rainy now"));

        let run = store.get_pipeline_run("pe-1").await.unwrap();
        let outcome = run
            .destinations
            .iter()
            .find(|d| d.destination == Destination::GitRepo)
            .unwrap();
        assert_eq!(outcome.status, DestinationStatus::Success);
    }

    #[tokio::test]
    async fn create_against_an_already_synced_run_is_skipped_as_duplicate() {
        let (_dir, store, adapter, worker) = harness(Destination::GitRepo).await;
        // Simulates a stale redelivery: the state store already reports this
        // execution as fully synced (e.g. via another destination's write)
        // while this worker never recorded a CREATE for its own outcome.
        store
            .set_pipeline_run_status("pe-1", sync_types::PipelineRunStatus::Synced, None)
            .await
            .unwrap();

        let envelope: BusEnvelope = Envelope::new(
            "com.fitglue.router.dispatched",
            "router/pipe-1",
            serde_json::to_value(seed_event(Destination::GitRepo)).unwrap(),
        );
        worker.handle(envelope).await.unwrap();

        let run = store.get_pipeline_run("pe-1").await.unwrap();
        let outcome = run
            .destinations
            .iter()
            .find(|d| d.destination == Destination::GitRepo)
            .unwrap();
        assert_eq!(outcome.status, DestinationStatus::Skipped);
        assert_eq!(outcome.skip_reason.as_deref(), Some("duplicate"));
        assert!(adapter.existing.lock().await.is_none(), "adapter.create must not run");
    }

    #[tokio::test]
    async fn identical_update_is_a_no_op_success() {
        let (_dir, store, _adapter, worker) = harness(Destination::GitRepo).await;
        let envelope: BusEnvelope = Envelope::new(
            "com.fitglue.router.dispatched",
            "router/pipe-1",
            serde_json::to_value(seed_event(Destination::GitRepo)).unwrap(),
        );
        worker.handle(envelope.clone()).await.unwrap();
        worker.handle(envelope).await.unwrap();

        let run = store.get_pipeline_run("pe-1").await.unwrap();
        let outcome = run
            .destinations
            .iter()
            .find(|d| d.destination == Destination::GitRepo)
            .unwrap();
        assert_eq!(outcome.status, DestinationStatus::Success);
    }
}

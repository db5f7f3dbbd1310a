//! Admission, idempotency, and per-pipeline fan-out. Consumes `raw-activity`,
//! matches the envelope's user/source against that user's enabled
//! pipelines, and publishes one `activity-enrichment` message (and creates
//! one `PipelineRun`) per matching pipeline.

use std::sync::Arc;

use sync_bus::{topics, BusEnvelope, MessageBus};
use sync_observability::{emit_event, ObservabilityEvent, ProcessKind};
use sync_store::StateStore;
use sync_types::{new_id, EnrichedActivityEvent, Pipeline, PipelineRun, RawActivityMessage, User};
use tracing::Level;

const COMPONENT: &str = "orchestrator";

/// Result of handling one `raw-activity` message. `Skipped` is not an error:
/// it is the documented SKIPPED-`<reason>` admission outcome from spec
/// section 4.1, steps 1-2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Skipped { reason: &'static str },
    Admitted { pipeline_execution_ids: Vec<String> },
}

pub struct Orchestrator {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn StateStore>,
}

impl Orchestrator {
    pub fn new(bus: Arc<dyn MessageBus>, store: Arc<dyn StateStore>) -> Self {
        Self { bus, store }
    }

    /// Runs the full admission + fan-out algorithm (spec 4.1, steps 1-4).
    /// Each pipeline's dispatch is independent: one pipeline failing to
    /// publish must not stop the others (fan-out semantics).
    pub async fn handle_raw_activity(
        &self,
        message: RawActivityMessage,
    ) -> anyhow::Result<AdmissionOutcome> {
        let Some(user) = self.store.get_user(&message.user_id).await else {
            return Ok(self.skip(&message.user_id, "access_disabled"));
        };
        if !user.access_enabled {
            return Ok(self.skip(&message.user_id, "access_disabled"));
        }

        let pipelines: Vec<Pipeline> = self
            .store
            .list_matching_pipelines(&message.user_id, message.activity.source)
            .await
            .into_iter()
            .filter(Pipeline::is_valid)
            .collect();

        if pipelines.is_empty() {
            return Ok(self.skip(&message.user_id, "no_matching_pipeline"));
        }

        let mut pipeline_execution_ids = Vec::with_capacity(pipelines.len());
        for pipeline in pipelines {
            let pipeline_id = pipeline.id.clone();
            match self.dispatch_pipeline(&message, &user, pipeline).await {
                Ok(pipeline_execution_id) => pipeline_execution_ids.push(pipeline_execution_id),
                Err(err) => {
                    emit_event(
                        Level::ERROR,
                        ProcessKind::Engine,
                        ObservabilityEvent {
                            event: "dispatch_failed",
                            component: COMPONENT,
                            correlation_id: None,
                            user_id: Some(&message.user_id),
                            provider_id: None,
                            destination: None,
                            status: Some("error"),
                            error_code: None,
                            detail: Some(&err.to_string()),
                        },
                    );
                    tracing::error!(
                        target: "sync.orchestrator",
                        user_id = %message.user_id,
                        pipeline_id = %pipeline_id,
                        %err,
                        "pipeline dispatch failed, continuing with remaining pipelines"
                    );
                }
            }
        }

        Ok(AdmissionOutcome::Admitted {
            pipeline_execution_ids,
        })
    }

    fn skip(&self, user_id: &str, reason: &'static str) -> AdmissionOutcome {
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "admission_skipped",
                component: COMPONENT,
                correlation_id: None,
                user_id: Some(user_id),
                provider_id: None,
                destination: None,
                status: Some("skipped"),
                error_code: Some(reason),
                detail: None,
            },
        );
        AdmissionOutcome::Skipped { reason }
    }

    /// One pipeline's share of step 3-4: mint (or reuse) a pipeline
    /// execution id, create the `PipelineRun` idempotently, and publish the
    /// seeded `EnrichedActivityEvent` to `activity-enrichment`. The enricher
    /// plan itself is not embedded on the envelope — the enricher runtime
    /// re-reads the `Pipeline` by id, so this stays a stable contract even
    /// as enricher configuration changes between publish and consume.
    async fn dispatch_pipeline(
        &self,
        message: &RawActivityMessage,
        user: &User,
        pipeline: Pipeline,
    ) -> anyhow::Result<String> {
        let pipeline_execution_id = message
            .pipeline_execution_id
            .clone()
            .unwrap_or_else(new_id);
        let destinations = pipeline.destination_set();

        let event = EnrichedActivityEvent::seed(
            user.id.clone(),
            pipeline.id.clone(),
            pipeline_execution_id.clone(),
            pipeline.source,
            destinations.clone(),
            message.activity.clone(),
        );

        let run = PipelineRun::new(
            pipeline_execution_id.clone(),
            user.id.clone(),
            pipeline.id.clone(),
            event.activity_id.clone(),
            pipeline.source,
            message.activity.external_id.clone(),
            message.activity.activity_type,
            message.activity.start_time,
            destinations,
        );

        // Idempotency: a duplicate invocation with the same pipeline
        // execution id is a no-op — the PipelineRun already exists and we
        // must not republish a second activity-enrichment message for it.
        let created = self.store.create_pipeline_run(run).await?;
        if created {
            let envelope: BusEnvelope = sync_types::Envelope::new(
                "com.fitglue.enrichment.requested",
                format!("orchestrator/{}", pipeline.id),
                serde_json::to_value(&event)?,
            )
            .with_attribute("pipeline_execution_id", pipeline_execution_id.clone());
            self.bus
                .publish(topics::ACTIVITY_ENRICHMENT, envelope)
                .await?;

            emit_event(
                Level::INFO,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "pipeline_run_created",
                    component: COMPONENT,
                    correlation_id: Some(&pipeline_execution_id),
                    user_id: Some(&user.id),
                    provider_id: None,
                    destination: None,
                    status: Some("created"),
                    error_code: None,
                    detail: None,
                },
            );
        } else {
            tracing::debug!(
                target: "sync.orchestrator",
                pipeline_execution_id = %pipeline_execution_id,
                "pipeline run already exists, skipping duplicate publish"
            );
        }

        Ok(pipeline_execution_id)
    }

    /// Subscribes to `raw-activity` and runs forever, dispatching one task
    /// per delivery so a slow pipeline never blocks admission of the next
    /// message (spec section 5's one-message-per-task scheduling model).
    pub async fn run(self: Arc<Self>) {
        let mut subscription = self.bus.subscribe(topics::RAW_ACTIVITY);
        while let Some(delivery) = subscription.recv().await {
            let message: RawActivityMessage = match serde_json::from_value(delivery.envelope.body)
            {
                Ok(message) => message,
                Err(err) => {
                    tracing::error!(target: "sync.orchestrator", %err, "malformed raw-activity envelope, dropping");
                    continue;
                }
            };
            let orchestrator = self.clone();
            tokio::spawn(async move {
                if let Err(err) = orchestrator.handle_raw_activity(message).await {
                    tracing::error!(target: "sync.orchestrator", %err, "raw-activity handling failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sync_bus::BroadcastBus;
    use sync_store::JsonFileStore;
    use sync_types::{ActivityType, Destination, DestinationConfig, Source, StandardizedActivity};

    async fn store_with_tempdir() -> (tempfile::TempDir, Arc<JsonFileStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()).await.unwrap());
        (dir, store)
    }

    fn activity() -> StandardizedActivity {
        let mut activity =
            StandardizedActivity::new("ext-1", Source::Strava, ActivityType::Run);
        activity.start_time = Utc::now();
        activity
    }

    fn pipeline(user_id: &str, destinations: Vec<Destination>) -> Pipeline {
        let mut pipeline = Pipeline::new(user_id, "main", Source::Strava);
        pipeline.destinations = destinations
            .into_iter()
            .map(|destination| DestinationConfig {
                destination,
                config: Default::default(),
            })
            .collect();
        pipeline
    }

    #[tokio::test]
    async fn access_disabled_user_is_skipped() {
        let (_dir, store) = store_with_tempdir().await;
        let mut user = User::new("u-1");
        user.access_enabled = false;
        store.put_user(user).await.unwrap();

        let bus = Arc::new(BroadcastBus::new());
        let orchestrator = Orchestrator::new(bus, store);
        let outcome = orchestrator
            .handle_raw_activity(RawActivityMessage::new("u-1", activity()))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AdmissionOutcome::Skipped {
                reason: "access_disabled"
            }
        );
    }

    #[tokio::test]
    async fn no_matching_pipeline_is_skipped() {
        let (_dir, store) = store_with_tempdir().await;
        store.put_user(User::new("u-1")).await.unwrap();

        let bus = Arc::new(BroadcastBus::new());
        let orchestrator = Orchestrator::new(bus, store);
        let outcome = orchestrator
            .handle_raw_activity(RawActivityMessage::new("u-1", activity()))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AdmissionOutcome::Skipped {
                reason: "no_matching_pipeline"
            }
        );
    }

    #[tokio::test]
    async fn fan_out_creates_one_run_per_matching_pipeline() {
        let (_dir, store) = store_with_tempdir().await;
        store.put_user(User::new("u-1")).await.unwrap();
        store
            .put_pipeline(pipeline("u-1", vec![Destination::GitRepo]))
            .await
            .unwrap();
        store
            .put_pipeline(pipeline("u-1", vec![Destination::GoogleSheets]))
            .await
            .unwrap();

        let bus = Arc::new(BroadcastBus::new());
        let mut subscription = bus.subscribe(topics::ACTIVITY_ENRICHMENT);
        let orchestrator = Orchestrator::new(bus, store);
        let outcome = orchestrator
            .handle_raw_activity(RawActivityMessage::new("u-1", activity()))
            .await
            .unwrap();

        match outcome {
            AdmissionOutcome::Admitted {
                pipeline_execution_ids,
            } => assert_eq!(pipeline_execution_ids.len(), 2),
            other => panic!("expected Admitted, got {other:?}"),
        }

        subscription.recv().await.expect("first publish");
        subscription.recv().await.expect("second publish");
    }

    #[tokio::test]
    async fn duplicate_pipeline_execution_id_is_idempotent() {
        let (_dir, store) = store_with_tempdir().await;
        store.put_user(User::new("u-1")).await.unwrap();
        store
            .put_pipeline(pipeline("u-1", vec![Destination::GitRepo]))
            .await
            .unwrap();

        let bus = Arc::new(BroadcastBus::new());
        let orchestrator = Orchestrator::new(bus, store.clone());

        let mut message = RawActivityMessage::new("u-1", activity());
        message.pipeline_execution_id = Some("fixed-pe".to_string());

        orchestrator
            .handle_raw_activity(message.clone())
            .await
            .unwrap();
        let run_count_after_first = store.get_pipeline_run("fixed-pe").await.unwrap();
        assert_eq!(run_count_after_first.boosters.len(), 0);

        // A second delivery of the same raw-activity message (e.g. at-least-
        // once redelivery upstream) must not create a second run or publish.
        let outcome = orchestrator.handle_raw_activity(message).await.unwrap();
        match outcome {
            AdmissionOutcome::Admitted {
                pipeline_execution_ids,
            } => assert_eq!(pipeline_execution_ids, vec!["fixed-pe".to_string()]),
            other => panic!("expected Admitted, got {other:?}"),
        }
    }
}

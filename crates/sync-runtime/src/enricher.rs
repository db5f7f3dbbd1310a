//! Enricher runtime: the ordered two-phase provider execution loop (spec
//! section 4.2). One `EnricherRuntime` instance drives every
//! `activity-enrichment` delivery; providers themselves come from
//! `sync_enrichers::EnricherRegistry`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sync_bus::{topics, BusEnvelope, MessageBus};
use sync_enrichers::{EnrichContext, EnrichError, EnrichResult, Enricher, EnricherRegistry};
use sync_observability::{emit_event, ObservabilityEvent, ProcessKind};
use sync_store::{activity_data_path, ArtifactStore, StateStore};
use sync_types::{
    section, BoosterRecord, BoosterStatus, Envelope, EnrichedActivityEvent, PendingInput,
    PipelineRunStatus,
};
use tracing::Level;

const COMPONENT: &str = "enricher_runtime";

pub struct EnricherRuntime {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn StateStore>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: EnricherRegistry,
    provider_timeout: Duration,
    inlining_threshold_bytes: u64,
}

impl EnricherRuntime {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn StateStore>,
        artifacts: Arc<dyn ArtifactStore>,
        registry: EnricherRegistry,
        provider_timeout: Duration,
        inlining_threshold_bytes: u64,
    ) -> Self {
        Self {
            bus,
            store,
            artifacts,
            registry,
            provider_timeout,
            inlining_threshold_bytes,
        }
    }

    /// Runs the full algorithm (spec 4.2 steps 1-6) for one envelope. A
    /// `PendingInput` suspension returns `Ok(())` early without publishing;
    /// everything else either publishes exactly one `activity-enriched`
    /// message or propagates a transient error for the bus to redeliver.
    pub async fn handle(&self, envelope: BusEnvelope) -> anyhow::Result<()> {
        let mut event: EnrichedActivityEvent = serde_json::from_value(envelope.body)?;
        let pipeline_execution_id = event.pipeline_execution_id.clone();

        let Some(pipeline) = self.store.get_pipeline(&event.pipeline_id).await else {
            anyhow::bail!("pipeline {} not found", event.pipeline_id);
        };

        if event.activity_data.is_none() {
            if let Some(uri) = event.activity_data_uri.clone() {
                let bytes = self.artifacts.get(&uri).await?;
                event.activity_data = Some(serde_json::from_slice(&bytes)?);
            }
        }

        self.store
            .set_pipeline_run_status(&pipeline_execution_id, PipelineRunStatus::Enriching, None)
            .await?;

        let user = self
            .store
            .get_user(&event.user_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("user {} not found", event.user_id))?;

        let resolved_pending = match &event.resume_pending_input_id {
            Some(id) => self.store.get_pending_input(&event.user_id, id).await,
            None => None,
        };

        // Two-phase ordering: resolve should_defer for every candidate step
        // up front (registry lookups are async), then partition.
        let mut candidates = Vec::new();
        for step in &pipeline.enrichers {
            if step.disabled {
                continue;
            }
            if event.is_resume && !event.resume_only_enrichers.contains(&step.provider_id) {
                continue;
            }
            let provider = self.registry.get(&step.provider_id).await;
            candidates.push((step.clone(), provider));
        }
        let (non_deferred, deferred): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|(_, provider)| provider.as_ref().map(|p| !p.should_defer()).unwrap_or(true));

        for (step, provider) in non_deferred.into_iter().chain(deferred.into_iter()) {
            let Some(provider) = provider else {
                tracing::warn!(
                    target: "sync.enricher",
                    provider_id = %step.provider_id,
                    "enricher step references an unregistered provider, skipping"
                );
                continue;
            };

            let inputs = merge_resolved_inputs(&step.inputs, resolved_pending.as_ref());
            let activity = event
                .activity_data
                .clone()
                .ok_or_else(|| anyhow::anyhow!("activity data missing at enrichment time"))?;

            let outcome = self
                .invoke_with_deadline_retry(provider.as_ref(), &event, &user, &activity, &inputs)
                .await;

            let suspended = self
                .apply_provider_outcome(&mut event, provider.as_ref(), outcome)
                .await?;
            if suspended {
                return Ok(());
            }
        }

        if let Some(id) = event.resume_pending_input_id.clone() {
            if let Err(err) = self
                .store
                .complete_pending_input(&event.user_id, &id, Value::Null)
                .await
            {
                tracing::debug!(target: "sync.enricher", %err, "pending input completion on resume was a no-op");
            }
        }

        for destination_config in &pipeline.destinations {
            for (key, value) in &destination_config.config {
                event.enrichment_metadata.insert(
                    format!("{}_{}", destination_config.destination, key),
                    value.clone(),
                );
            }
        }

        let serialized_len = event
            .activity_data
            .as_ref()
            .map(|activity| serde_json::to_vec(activity).map(|v| v.len()).unwrap_or(0))
            .unwrap_or(0) as u64;
        if serialized_len > self.inlining_threshold_bytes {
            let path = activity_data_path(&event.user_id, &pipeline_execution_id);
            let bytes = serde_json::to_vec(&event.activity_data)?;
            self.artifacts.put(&path, bytes).await?;
            event.activity_data = None;
            event.activity_data_uri = Some(path);
        }

        let out_envelope: BusEnvelope = Envelope::new(
            "com.fitglue.enricher.completed",
            format!("enricher/{}", event.pipeline_id),
            serde_json::to_value(&event)?,
        )
        .with_attribute("pipeline_execution_id", pipeline_execution_id.clone());
        self.bus
            .publish(topics::ACTIVITY_ENRICHED, out_envelope)
            .await?;

        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "enrichment_published",
                component: COMPONENT,
                correlation_id: Some(&pipeline_execution_id),
                user_id: Some(&event.user_id),
                provider_id: None,
                destination: None,
                status: Some("published"),
                error_code: None,
                detail: None,
            },
        );

        Ok(())
    }

    /// Invokes `enrich` once. If the result suspends with an already-expired
    /// auto-populated `PendingInput` (spec 4.2 step 2's edge case), invokes
    /// the provider a second time with `do_not_retry` set rather than
    /// persisting a suspension nobody will ever resolve.
    async fn invoke_with_deadline_retry(
        &self,
        provider: &dyn Enricher,
        event: &EnrichedActivityEvent,
        user: &sync_types::User,
        activity: &sync_types::StandardizedActivity,
        inputs: &HashMap<String, String>,
    ) -> Result<EnrichResult, EnrichError> {
        let ctx = EnrichContext::new(self.provider_timeout);
        let request = sync_enrichers::EnrichRequest {
            activity_id: &event.activity_id,
            pipeline_id: &event.pipeline_id,
            pipeline_execution_id: &event.pipeline_execution_id,
            activity,
            user,
            inputs,
            do_not_retry: false,
            description_so_far: &event.description,
            metadata_so_far: &event.enrichment_metadata,
        };
        let first = provider.enrich(&ctx, request).await?;

        let needs_retry = matches!(
            &first.pending_input,
            Some(pending) if pending.auto_populated && pending.is_past_deadline(chrono::Utc::now())
        );
        if !needs_retry {
            return Ok(first);
        }

        let ctx = EnrichContext::new(self.provider_timeout);
        let retry_request = sync_enrichers::EnrichRequest {
            activity_id: &event.activity_id,
            pipeline_id: &event.pipeline_id,
            pipeline_execution_id: &event.pipeline_execution_id,
            activity,
            user,
            inputs,
            do_not_retry: true,
            description_so_far: &event.description,
            metadata_so_far: &event.enrichment_metadata,
        };
        provider.enrich(&ctx, retry_request).await
    }

    /// Merges one provider's outcome into the running event and writes its
    /// booster record. Returns `true` if the run suspended on a
    /// `PendingInput` and the caller must stop processing further providers.
    async fn apply_provider_outcome(
        &self,
        event: &mut EnrichedActivityEvent,
        provider: &dyn Enricher,
        outcome: Result<EnrichResult, EnrichError>,
    ) -> anyhow::Result<bool> {
        let pipeline_execution_id = event.pipeline_execution_id.clone();
        let provider_id = provider.provider_id().to_string();

        let result = match outcome {
            Ok(result) => result,
            Err(err) if err.is_transient() => {
                anyhow::bail!("provider {} failed transiently: {}", provider_id, err)
            }
            Err(err) => {
                // config_missing/tier_restricted are admission-time gates,
                // not failures: spec 4.2 step 2 records them without a
                // section but as SKIPPED, not FAILED.
                let status = match err {
                    EnrichError::ConfigMissing(_) | EnrichError::TierRestricted(_) => {
                        BoosterStatus::Skipped
                    }
                    _ => BoosterStatus::Failed,
                };
                self.store
                    .upsert_booster(
                        &pipeline_execution_id,
                        BoosterRecord {
                            provider_id: provider_id.clone(),
                            status,
                            duration_ms: None,
                            metadata: HashMap::new(),
                            error: Some(err.to_string()),
                        },
                    )
                    .await?;
                return Ok(false);
            }
        };

        if let Some(pending) = result.pending_input {
            self.suspend(event, &provider_id, pending).await?;
            return Ok(true);
        }

        if let Some(description) = &result.description {
            let heading = format!("### {}", provider.name());
            event.description =
                section::replace_section(&event.description, &heading, description);
            event
                .enrichment_metadata
                .insert(format!("section_header_{}", provider_id), heading);
        }
        if let Some(suffix) = &result.name_suffix {
            event.name = format!("{} {}", event.name, suffix);
        }
        for (key, value) in &result.metadata {
            event.enrichment_metadata.insert(key.clone(), value.clone());
        }
        event.applied_enrichments.push(provider_id.clone());

        self.store
            .upsert_booster(
                &pipeline_execution_id,
                BoosterRecord {
                    provider_id,
                    status: BoosterStatus::Success,
                    duration_ms: None,
                    metadata: result.metadata,
                    error: None,
                },
            )
            .await?;

        Ok(false)
    }

    /// Persists the suspension. `pending.original_payload` is overwritten
    /// with a full snapshot of `event` (accumulated description/metadata
    /// included) regardless of what the provider set it to: it is the only
    /// place the poller can later rebuild a resumable `activity-enrichment`
    /// envelope from, so the runtime — not the provider — owns it.
    async fn suspend(
        &self,
        event: &EnrichedActivityEvent,
        provider_id: &str,
        mut pending: PendingInput,
    ) -> anyhow::Result<()> {
        pending.pipeline_execution_id = event.pipeline_execution_id.clone();
        pending.original_payload = Some(serde_json::to_value(event)?);
        self.store.put_pending_input(pending).await?;
        self.store
            .set_pipeline_run_status(
                &event.pipeline_execution_id,
                PipelineRunStatus::PendingInput,
                Some(format!("waiting on {}", provider_id)),
            )
            .await?;
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "suspended_on_pending_input",
                component: COMPONENT,
                correlation_id: Some(&event.pipeline_execution_id),
                user_id: Some(&event.user_id),
                provider_id: Some(provider_id),
                destination: None,
                status: Some("pending_input"),
                error_code: None,
                detail: None,
            },
        );
        Ok(())
    }

    /// Subscribes to `activity-enrichment` and runs forever, one task per
    /// delivery.
    pub async fn run(self: Arc<Self>) {
        let mut subscription = self.bus.subscribe(topics::ACTIVITY_ENRICHMENT);
        while let Some(delivery) = subscription.recv().await {
            let runtime = self.clone();
            tokio::spawn(async move {
                if let Err(err) = runtime.handle(delivery.envelope).await {
                    tracing::error!(target: "sync.enricher", %err, "enrichment failed");
                }
            });
        }
    }
}

fn merge_resolved_inputs(
    declared: &HashMap<String, String>,
    pending: Option<&PendingInput>,
) -> HashMap<String, String> {
    let mut merged = declared.clone();
    if let Some(pending) = pending {
        if let Some(Value::Object(map)) = &pending.input_data {
            for (key, value) in map {
                if let Some(s) = value.as_str() {
                    merged.insert(key.clone(), s.to_string());
                }
            }
        }
    }
    merged
}

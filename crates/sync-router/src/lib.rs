//! Fan-out of one `activity-enriched` envelope to per-destination `job.*`
//! topics, with per-destination outcome tracking already seeded by the
//! orchestrator. The router's own write is `enriched_event_uri`, the pointer
//! destination workers and the repost flow read to recover the full
//! envelope later.

use std::sync::Arc;

use sync_bus::{topics, BusEnvelope, MessageBus};
use sync_observability::{emit_event, ObservabilityEvent, ProcessKind};
use sync_store::{enriched_event_path, ArtifactStore, StateStore};
use sync_types::{Envelope, EnrichedActivityEvent};
use tracing::Level;

const COMPONENT: &str = "router";

pub struct Router {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn StateStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl Router {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn StateStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            bus,
            store,
            artifacts,
        }
    }

    /// Publishes one envelope per destination named on the event, then
    /// records `enriched_event_uri` on the originating `PipelineRun`. The
    /// destination enum is closed in this workspace, so every destination
    /// that reaches here is by construction known; a wire client sending an
    /// unrecognized destination string fails to deserialize `Destination`
    /// upstream of the router rather than arriving here as an unknown value.
    pub async fn route(&self, envelope: BusEnvelope) -> anyhow::Result<()> {
        let event: EnrichedActivityEvent = serde_json::from_value(envelope.body)?;
        let pipeline_execution_id = event.pipeline_execution_id.clone();

        for destination in &event.destinations {
            let job_envelope: BusEnvelope = Envelope::new(
                "com.fitglue.router.dispatched",
                format!("router/{}", event.pipeline_id),
                serde_json::to_value(&event)?,
            )
            .with_attribute("pipeline_execution_id", pipeline_execution_id.clone());

            self.bus
                .publish(&topics::job_topic(*destination), job_envelope)
                .await?;

            emit_event(
                Level::INFO,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "routed",
                    component: COMPONENT,
                    correlation_id: Some(&pipeline_execution_id),
                    user_id: Some(&event.user_id),
                    provider_id: None,
                    destination: Some(&destination.to_string()),
                    status: Some("dispatched"),
                    error_code: None,
                    detail: None,
                },
            );
        }

        let enriched_event_uri = match &event.activity_data_uri {
            Some(uri) => uri.clone(),
            None => {
                let path = enriched_event_path(&event.user_id, &pipeline_execution_id);
                let bytes = serde_json::to_vec(&event)?;
                self.artifacts.put(&path, bytes).await?;
                path
            }
        };
        self.store
            .set_enriched_event_uri(&pipeline_execution_id, enriched_event_uri)
            .await?;

        Ok(())
    }

    /// Subscribes to `activity-enriched` and runs forever, one task per
    /// delivery (spec section 5: no cross-message ordering is promised, so
    /// nothing here waits on a prior delivery to finish).
    pub async fn run(self: Arc<Self>) {
        let mut subscription = self.bus.subscribe(topics::ACTIVITY_ENRICHED);
        while let Some(delivery) = subscription.recv().await {
            let router = self.clone();
            tokio::spawn(async move {
                if let Err(err) = router.route(delivery.envelope).await {
                    tracing::error!(target: "sync.router", %err, "routing failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_bus::BroadcastBus;
    use sync_store::{FsArtifactStore, JsonFileStore};
    use sync_types::{ActivityType, Destination, Source, StandardizedActivity};

    fn sample_event(destinations: Vec<Destination>) -> EnrichedActivityEvent {
        let activity = StandardizedActivity::new("ext-1", Source::Strava, ActivityType::Run);
        EnrichedActivityEvent::seed(
            "u-1",
            "pipe-1",
            "pe-1",
            Source::Strava,
            destinations,
            activity,
        )
    }

    async fn harness() -> (tempfile::TempDir, Arc<BroadcastBus>, Router) {
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
                vec![Destination::GitRepo, Destination::GoogleSheets],
            ))
            .await
            .unwrap();
        let router = Router::new(bus.clone(), store.clone(), artifacts);
        (dir, bus, router)
    }

    #[tokio::test]
    async fn publishes_one_message_per_destination() {
        let (_dir, bus, router) = harness().await;
        let mut git_sub = bus.subscribe(&topics::job_topic(Destination::GitRepo));
        let mut sheets_sub = bus.subscribe(&topics::job_topic(Destination::GoogleSheets));

        let envelope: BusEnvelope = Envelope::new(
            "com.fitglue.enricher.completed",
            "enricher/pipe-1",
            serde_json::to_value(sample_event(vec![
                Destination::GitRepo,
                Destination::GoogleSheets,
            ]))
            .unwrap(),
        );
        router.route(envelope).await.unwrap();

        git_sub.recv().await.expect("git delivery");
        sheets_sub.recv().await.expect("sheets delivery");
    }

    #[tokio::test]
    async fn offloads_full_event_when_not_already_offloaded() {
        let (_dir, _bus, router) = harness().await;
        let envelope: BusEnvelope = Envelope::new(
            "com.fitglue.enricher.completed",
            "enricher/pipe-1",
            serde_json::to_value(sample_event(vec![Destination::GitRepo])).unwrap(),
        );
        router.route(envelope).await.unwrap();

        let run = router.store.get_pipeline_run("pe-1").await.unwrap();
        let uri = run.enriched_event_uri.expect("uri set");
        assert_eq!(uri, enriched_event_path("u-1", "pe-1"));
        let bytes = router.artifacts.get(&uri).await.unwrap();
        let roundtripped: EnrichedActivityEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(roundtripped.pipeline_execution_id, "pe-1");
    }

    #[tokio::test]
    async fn reuses_activity_data_uri_when_already_offloaded() {
        let (_dir, _bus, router) = harness().await;
        let mut event = sample_event(vec![Destination::GitRepo]);
        event.activity_data = None;
        event.activity_data_uri = Some("activities/u-1/pe-1.json".to_string());
        let envelope: BusEnvelope = Envelope::new(
            "com.fitglue.enricher.completed",
            "enricher/pipe-1",
            serde_json::to_value(event).unwrap(),
        );
        router.route(envelope).await.unwrap();

        let run = router.store.get_pipeline_run("pe-1").await.unwrap();
        assert_eq!(
            run.enriched_event_uri,
            Some("activities/u-1/pe-1.json".to_string())
        );
    }
}

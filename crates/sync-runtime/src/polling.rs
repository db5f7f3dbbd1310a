//! Polling source: periodically resolves auto-populated `PendingInput`s that
//! have passed into "continued without resolution" and republishes a resume
//! envelope once an external probe resolves them (spec section 4.5).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sync_bus::{topics, BusEnvelope, MessageBus};
use sync_observability::{emit_event, ObservabilityEvent, ProcessKind};
use sync_store::StateStore;
use sync_types::{EnrichedActivityEvent, Envelope, PendingInput};
use tracing::Level;

const COMPONENT: &str = "pending_input_poller";

/// External probe a concrete poller plugs in: given a resolved
/// `PendingInput`, attempt to fetch the data it is waiting on (e.g. a public
/// results page). `Ok(None)` means "still not ready", distinct from an
/// error, which is logged and retried on the next tick.
#[async_trait]
pub trait PendingInputProbe: Send + Sync {
    async fn try_resolve(&self, pending: &PendingInput) -> anyhow::Result<Option<serde_json::Value>>;
}

pub struct PendingInputPoller {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn StateStore>,
    probe: Arc<dyn PendingInputProbe>,
    enricher_provider_id: String,
    interval: Duration,
}

impl PendingInputPoller {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn StateStore>,
        probe: Arc<dyn PendingInputProbe>,
        enricher_provider_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            bus,
            store,
            probe,
            enricher_provider_id: enricher_provider_id.into(),
            interval,
        }
    }

    /// One scan (spec 4.5 steps 1-3). Inputs that are still `WAITING` but
    /// not yet `continued_without_resolution` are left alone here — that
    /// flag is set elsewhere once a suspension's deadline passes, and this
    /// loop only resolves the ones already in that terminal-unless-resolved
    /// state (step 4: "not retried by this loop" otherwise).
    pub async fn scan_once(&self) -> anyhow::Result<usize> {
        let candidates = self
            .store
            .list_resumable_pending_inputs(&self.enricher_provider_id)
            .await;
        let mut resolved = 0;
        for pending in candidates {
            match self.probe.try_resolve(&pending).await {
                Ok(Some(input_data)) => {
                    self.resolve_and_resume(&pending, input_data).await?;
                    resolved += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        target: "sync.poller",
                        pending_input_id = %pending.id,
                        %err,
                        "probe failed, will retry next scan"
                    );
                }
            }
        }
        Ok(resolved)
    }

    async fn resolve_and_resume(
        &self,
        pending: &PendingInput,
        input_data: serde_json::Value,
    ) -> anyhow::Result<()> {
        let Some(snapshot) = pending.original_payload.clone() else {
            anyhow::bail!(
                "pending input {} has no original_payload snapshot to resume from",
                pending.id
            );
        };
        let mut event: EnrichedActivityEvent = serde_json::from_value(snapshot)?;

        let completed = self
            .store
            .complete_pending_input(&pending.user_id, &pending.id, input_data)
            .await?;
        if !completed {
            // ALREADY_COMPLETED (P7): someone else resolved it first.
            return Ok(());
        }

        event.is_resume = true;
        event.resume_only_enrichers = vec![pending.enricher_provider_id.clone()];
        event.use_update_method = true;
        event.resume_pending_input_id = Some(pending.id.clone());

        let envelope: BusEnvelope = Envelope::new(
            "com.fitglue.pending_input.resolved",
            format!("poller/{}", self.enricher_provider_id),
            serde_json::to_value(&event)?,
        )
        .with_attribute("pipeline_execution_id", pending.pipeline_execution_id.clone());
        self.bus
            .publish(topics::ACTIVITY_ENRICHMENT, envelope)
            .await?;

        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "pending_input_resolved",
                component: COMPONENT,
                correlation_id: Some(&pending.pipeline_execution_id),
                user_id: Some(&pending.user_id),
                provider_id: Some(&pending.enricher_provider_id),
                destination: None,
                status: Some("resolved"),
                error_code: None,
                detail: None,
            },
        );
        Ok(())
    }

    /// Runs the scheduled scan forever at `interval`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.scan_once().await {
                tracing::error!(target: "sync.poller", %err, "pending-input scan failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sync_bus::BroadcastBus;
    use sync_store::JsonFileStore;
    use sync_types::{ActivityType, Destination, Source, StandardizedActivity};

    struct AlwaysResolves;

    #[async_trait]
    impl PendingInputProbe for AlwaysResolves {
        async fn try_resolve(
            &self,
            _pending: &PendingInput,
        ) -> anyhow::Result<Option<serde_json::Value>> {
            Ok(Some(serde_json::json!({ "banner_url": "https://example.test/banner.png" })))
        }
    }

    struct NeverResolves;

    #[async_trait]
    impl PendingInputProbe for NeverResolves {
        async fn try_resolve(
            &self,
            _pending: &PendingInput,
        ) -> anyhow::Result<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    fn resumable_input() -> PendingInput {
        let mut input = PendingInput::new("pi-1", "u-1", "act-1", "pipe-1", "pe-1", "ai_banner");
        input.auto_populated = true;
        input.continued_without_resolution = true;
        input.auto_deadline = Some(Utc::now() + chrono::Duration::minutes(10));
        let activity = StandardizedActivity::new("ext-1", Source::Strava, ActivityType::Run);
        let event = EnrichedActivityEvent::seed(
            "u-1",
            "pipe-1",
            "pe-1",
            Source::Strava,
            vec![Destination::GitRepo],
            activity,
        );
        input.original_payload = Some(serde_json::to_value(&event).unwrap());
        input
    }

    #[tokio::test]
    async fn resolved_input_publishes_a_resume_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()).await.unwrap());
        store.put_pending_input(resumable_input()).await.unwrap();
        let bus = Arc::new(BroadcastBus::new());
        let mut subscription = bus.subscribe(topics::ACTIVITY_ENRICHMENT);

        let poller = Arc::new(PendingInputPoller::new(
            bus,
            store.clone(),
            Arc::new(AlwaysResolves),
            "ai_banner",
            Duration::from_secs(60),
        ));
        let resolved = poller.scan_once().await.unwrap();
        assert_eq!(resolved, 1);

        let delivery = subscription.recv().await.expect("resume envelope");
        assert_eq!(
            delivery
                .envelope
                .pipeline_execution_id()
                .expect("attribute"),
            "pe-1"
        );

        let input = store.get_pending_input("u-1", "pi-1").await.unwrap();
        assert_eq!(input.status, sync_types::PendingInputStatus::Completed);
    }

    #[tokio::test]
    async fn unresolved_input_does_not_publish() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()).await.unwrap());
        store.put_pending_input(resumable_input()).await.unwrap();
        let bus = Arc::new(BroadcastBus::new());

        let poller = Arc::new(PendingInputPoller::new(
            bus,
            store,
            Arc::new(NeverResolves),
            "ai_banner",
            Duration::from_secs(60),
        ));
        let resolved = poller.scan_once().await.unwrap();
        assert_eq!(resolved, 0);
    }

    #[tokio::test]
    async fn resolving_twice_is_a_no_op_the_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()).await.unwrap());
        store.put_pending_input(resumable_input()).await.unwrap();
        let bus = Arc::new(BroadcastBus::new());

        let poller = Arc::new(PendingInputPoller::new(
            bus,
            store.clone(),
            Arc::new(AlwaysResolves),
            "ai_banner",
            Duration::from_secs(60),
        ));
        poller.scan_once().await.unwrap();
        // Already COMPLETED, so it no longer matches list_resumable_pending_inputs
        // (which filters on WAITING); a second scan finds nothing to resolve.
        let resolved_again = poller.scan_once().await.unwrap();
        assert_eq!(resolved_again, 0);
    }
}

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sync_types::{new_id, PendingInput};

use crate::provider::{EnrichContext, EnrichRequest, EnrichResult};
use crate::{EnrichError, Enricher};

/// Deferred (Phase 2) enricher demonstrating `should_defer`: it needs the
/// full Phase 1 description to prompt a banner-generation job, which runs
/// asynchronously. The first invocation suspends with an auto-populated
/// PendingInput; the polling source resolves it once the job completes and
/// dispatches a resume run that picks this provider back up via `inputs`.
pub struct AiBannerEnricher {
    auto_deadline: Duration,
}

impl AiBannerEnricher {
    pub fn new() -> Self {
        Self {
            auto_deadline: Duration::minutes(10),
        }
    }
}

impl Default for AiBannerEnricher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Enricher for AiBannerEnricher {
    fn provider_id(&self) -> &str {
        "ai_banner"
    }

    fn name(&self) -> &str {
        "AI Banner"
    }

    fn should_defer(&self) -> bool {
        true
    }

    async fn enrich(
        &self,
        _ctx: &EnrichContext,
        request: EnrichRequest<'_>,
    ) -> Result<EnrichResult, EnrichError> {
        if let Some(banner_url) = request.inputs.get("banner_url") {
            return Ok(EnrichResult {
                description: Some(format!("![banner]({})", banner_url)),
                ..Default::default()
            });
        }
        if request.do_not_retry {
            // Deadline passed with no resolution; continue without a banner
            // rather than suspend again.
            return Ok(EnrichResult::default());
        }

        let pending = PendingInput {
            auto_populated: true,
            auto_deadline: Some(Utc::now() + self.auto_deadline),
            original_payload: Some(serde_json::json!({
                "description": request.description_so_far,
            })),
            ..PendingInput::new(
                new_id(),
                request.user.id.clone(),
                request.activity_id.to_string(),
                request.pipeline_id.to_string(),
                request.pipeline_execution_id.to_string(),
                "ai_banner",
            )
        };

        Ok(EnrichResult {
            pending_input: Some(pending),
            ..Default::default()
        })
    }
}

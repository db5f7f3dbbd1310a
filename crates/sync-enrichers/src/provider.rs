use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sync_types::{PendingInput, StandardizedActivity, User};
use tokio_util::sync::CancellationToken;

use crate::EnrichError;

/// Cancellation/deadline pair every `enrich` call inherits from its message,
/// mirroring how the teacher's provider `stream` call is cancellation-aware.
#[derive(Clone)]
pub struct EnrichContext {
    pub cancellation: CancellationToken,
    pub deadline: Duration,
}

impl EnrichContext {
    pub fn new(deadline: Duration) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline,
        }
    }
}

pub struct EnrichRequest<'a> {
    pub activity_id: &'a str,
    pub pipeline_id: &'a str,
    pub pipeline_execution_id: &'a str,
    pub activity: &'a StandardizedActivity,
    pub user: &'a User,
    pub inputs: &'a HashMap<String, String>,
    /// Set when a previously auto-populated PendingInput passed its deadline
    /// unresolved; the provider must not suspend again and should proceed
    /// with whatever data it has.
    pub do_not_retry: bool,
    /// Description and metadata accumulated so far this run. Populated for
    /// every provider; deferred (Phase 2) providers are the ones that
    /// actually rely on seeing Phase 1's output here.
    pub description_so_far: &'a str,
    pub metadata_so_far: &'a HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichResult {
    pub description: Option<String>,
    pub name_suffix: Option<String>,
    pub metadata: HashMap<String, String>,
    pub heart_rate_stream: Option<Vec<u16>>,
    pub pending_input: Option<PendingInput>,
}

/// One pipeline step. Implementors supply only `enrich`; `should_defer`
/// defaults to Phase 1 (non-deferred) execution.
#[async_trait]
pub trait Enricher: Send + Sync {
    fn provider_id(&self) -> &str;
    fn name(&self) -> &str;

    fn should_defer(&self) -> bool {
        false
    }

    async fn enrich(
        &self,
        ctx: &EnrichContext,
        request: EnrichRequest<'_>,
    ) -> Result<EnrichResult, EnrichError>;
}

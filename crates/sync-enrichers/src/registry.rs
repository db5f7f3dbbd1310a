use std::sync::Arc;

use tokio::sync::RwLock;

use crate::Enricher;

/// Module-private-in-spirit: built once at startup via `EnricherRegistry::new`
/// and never mutated at runtime except through `reload`, matching the
/// "plugin registry as shared mutable state" design note.
#[derive(Clone)]
pub struct EnricherRegistry {
    enrichers: Arc<RwLock<Vec<Arc<dyn Enricher>>>>,
}

impl EnricherRegistry {
    pub fn new(enrichers: Vec<Arc<dyn Enricher>>) -> Self {
        Self {
            enrichers: Arc::new(RwLock::new(enrichers)),
        }
    }

    pub async fn reload(&self, enrichers: Vec<Arc<dyn Enricher>>) {
        *self.enrichers.write().await = enrichers;
    }

    pub async fn get(&self, provider_id: &str) -> Option<Arc<dyn Enricher>> {
        self.enrichers
            .read()
            .await
            .iter()
            .find(|p| p.provider_id() == provider_id)
            .cloned()
    }

    pub async fn list(&self) -> Vec<Arc<dyn Enricher>> {
        self.enrichers.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EnrichContext, EnrichRequest, EnrichResult};
    use crate::EnrichError;
    use async_trait::async_trait;

    struct StubEnricher(&'static str);

    #[async_trait]
    impl Enricher for StubEnricher {
        fn provider_id(&self) -> &str {
            self.0
        }

        fn name(&self) -> &str {
            self.0
        }

        async fn enrich(
            &self,
            _ctx: &EnrichContext,
            _request: EnrichRequest<'_>,
        ) -> Result<EnrichResult, EnrichError> {
            Ok(EnrichResult::default())
        }
    }

    #[tokio::test]
    async fn get_finds_registered_provider_by_id() {
        let registry = EnricherRegistry::new(vec![
            Arc::new(StubEnricher("weather")),
            Arc::new(StubEnricher("personal_record")),
        ]);
        assert!(registry.get("personal_record").await.is_some());
        assert!(registry.get("does-not-exist").await.is_none());
    }

    #[tokio::test]
    async fn reload_replaces_the_full_provider_set() {
        let registry = EnricherRegistry::new(vec![Arc::new(StubEnricher("weather"))]);
        registry.reload(vec![Arc::new(StubEnricher("ai_banner"))]).await;
        assert!(registry.get("weather").await.is_none());
        assert!(registry.get("ai_banner").await.is_some());
    }
}

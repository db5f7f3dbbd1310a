use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sync_store::StateStore;

use crate::provider::{EnrichContext, EnrichRequest, EnrichResult};
use crate::{EnrichError, Enricher};

/// Phase 1 enricher: raises a per-user, per-activity-type longest-distance
/// record and, when raised, adds a section announcing it. Max-reducing per
/// the data model's Counter/PersonalRecord/BoosterData contract.
pub struct PersonalRecordEnricher {
    store: Arc<dyn StateStore>,
}

impl PersonalRecordEnricher {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn record_key(activity: &sync_types::StandardizedActivity) -> String {
        format!("longest_distance_{:?}", activity.activity_type).to_lowercase()
    }
}

#[async_trait]
impl Enricher for PersonalRecordEnricher {
    fn provider_id(&self) -> &str {
        "personal_record"
    }

    fn name(&self) -> &str {
        "Personal Record"
    }

    async fn enrich(
        &self,
        _ctx: &EnrichContext,
        request: EnrichRequest<'_>,
    ) -> Result<EnrichResult, EnrichError> {
        let Some(distance_m) = request.activity.distance_m else {
            return Ok(EnrichResult::default());
        };
        let key = Self::record_key(request.activity);
        let raised = self
            .store
            .raise_personal_record(&request.user.id, &key, distance_m)
            .await;
        if !raised {
            return Ok(EnrichResult::default());
        }

        let mut metadata = HashMap::new();
        metadata.insert("personal_record_key".to_string(), key);

        Ok(EnrichResult {
            description: Some(format!(
                "New personal best distance: {:.1} km!",
                distance_m / 1000.0
            )),
            metadata,
            ..Default::default()
        })
    }
}

pub mod builtin;
mod error;
mod provider;
mod registry;

pub use builtin::{AiBannerEnricher, PersonalRecordEnricher, WeatherEnricher};
pub use error::EnrichError;
pub use provider::{EnrichContext, EnrichRequest, EnrichResult, Enricher};
pub use registry::EnricherRegistry;

use std::sync::Arc;

use sync_store::StateStore;

/// Builds the registry from the illustrative enrichers this repository
/// ships. A real deployment would extend this with its own providers.
pub fn build_registry(store: Arc<dyn StateStore>) -> EnricherRegistry {
    let enrichers: Vec<Arc<dyn Enricher>> = vec![
        Arc::new(WeatherEnricher::new()),
        Arc::new(PersonalRecordEnricher::new(store)),
        Arc::new(AiBannerEnricher::new()),
    ];
    EnricherRegistry::new(enrichers)
}

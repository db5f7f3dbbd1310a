use std::sync::Arc;

use sync_types::Destination;

use crate::DestinationAdapter;

/// Destinations are a closed set configured once at startup; no runtime
/// reload is needed the way the enricher registry supports (destinations
/// don't get added without a redeploy).
#[derive(Clone)]
pub struct DestinationRegistry {
    adapters: Arc<Vec<Arc<dyn DestinationAdapter>>>,
}

impl DestinationRegistry {
    pub fn new(adapters: Vec<Arc<dyn DestinationAdapter>>) -> Self {
        Self {
            adapters: Arc::new(adapters),
        }
    }

    pub fn get(&self, destination: Destination) -> Option<Arc<dyn DestinationAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.destination() == destination)
            .cloned()
    }
}
